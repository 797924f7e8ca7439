//! Facings, motor commands and the per-tick pending command slot.

use serde::{Deserialize, Serialize};

/// One of four discrete facings, clockwise from `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    Up,
    Right,
    Down,
    Left,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [Rotation::Up, Rotation::Right, Rotation::Down, Rotation::Left];

    pub fn index(self) -> usize {
        match self {
            Rotation::Up => 0,
            Rotation::Right => 1,
            Rotation::Down => 2,
            Rotation::Left => 3,
        }
    }

    /// Wraps any index onto the 4-cycle.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 4]
    }

    pub fn turned(self, turn: Turn) -> Self {
        self.turned_by(turn.quarter_turns())
    }

    /// Applies `quarter_turns` clockwise quarter turns, modulo 4.
    pub fn turned_by(self, quarter_turns: u8) -> Self {
        Self::from_index(self.index() + usize::from(quarter_turns % 4))
    }

    /// Unit step along this facing; `Up` is `+y`, `Right` is `+x`.
    pub fn unit_vector(self) -> (i32, i32) {
        match self {
            Rotation::Up => (0, 1),
            Rotation::Right => (1, 0),
            Rotation::Down => (0, -1),
            Rotation::Left => (-1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rotation::Up => "up",
            Rotation::Right => "right",
            Rotation::Down => "down",
            Rotation::Left => "left",
        }
    }
}

/// A single quarter turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    /// Negative discriminators turn left, everything else turns right.
    pub fn from_discriminator(direction: i32) -> Self {
        if direction < 0 {
            Turn::Left
        } else {
            Turn::Right
        }
    }

    /// Clockwise quarter turns equivalent to this turn on the 4-cycle.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Turn::Left => 3,
            Turn::Right => 1,
        }
    }
}

/// Motor intent emitted by a guest during a hook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotorCommand {
    RotateLeft,
    RotateRight,
    MoveForward { distance: u16 },
}

impl MotorCommand {
    pub fn rotate(direction: i32) -> Self {
        match Turn::from_discriminator(direction) {
            Turn::Left => MotorCommand::RotateLeft,
            Turn::Right => MotorCommand::RotateRight,
        }
    }

    /// Clamps a guest-supplied distance into `0..=u16::MAX`.
    pub fn move_forward(distance: i32) -> Self {
        let distance = distance.clamp(0, i32::from(u16::MAX)) as u16;
        MotorCommand::MoveForward { distance }
    }
}

/// Per-unit pending slot, overwritten within a tick and drained once at its end.
///
/// Rotations compose in call order onto a net clockwise quarter-turn count;
/// only the latest move request is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCommands {
    quarter_turns: u8,
    rotate_calls: u32,
    movement: Option<u16>,
}

impl PendingCommands {
    pub fn push(&mut self, command: MotorCommand) {
        match command {
            MotorCommand::RotateLeft => self.turn(Turn::Left),
            MotorCommand::RotateRight => self.turn(Turn::Right),
            MotorCommand::MoveForward { distance } => self.movement = Some(distance),
        }
    }

    fn turn(&mut self, turn: Turn) {
        self.quarter_turns = (self.quarter_turns + turn.quarter_turns()) % 4;
        self.rotate_calls = self.rotate_calls.saturating_add(1);
    }

    pub fn is_empty(&self) -> bool {
        self.rotate_calls == 0 && self.movement.is_none()
    }

    pub fn drain(&mut self) -> TickIntents {
        let intents = TickIntents {
            quarter_turns: self.quarter_turns,
            rotate_calls: self.rotate_calls,
            movement: self.movement,
        };
        *self = Self::default();
        intents
    }
}

/// Everything a unit asked for during one tick, ready for reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickIntents {
    /// Net clockwise quarter turns, `0..4`.
    pub quarter_turns: u8,
    pub rotate_calls: u32,
    pub movement: Option<u16>,
}

impl TickIntents {
    pub fn final_facing(&self, facing: Rotation) -> Rotation {
        facing.turned_by(self.quarter_turns)
    }
}
