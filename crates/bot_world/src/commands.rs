//! Command effect queue: turns each unit's tick intents into world changes.

use std::collections::BTreeMap;

use bot_world_wasm_abi::{Rotation, TickIntents};

use crate::events::WorldEvent;
use crate::geometry::Position;
use crate::types::EntityId;
use crate::world::WorldMap;

/// Intents collected from every hook that returned cleanly this tick, in
/// scheduling order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandQueue {
    entries: Vec<(EntityId, TickIntents)>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units with nothing pending are skipped.
    pub fn submit(&mut self, unit: EntityId, intents: TickIntents) {
        if intents.rotate_calls == 0 && intents.movement.is_none() {
            return;
        }
        self.entries.push((unit, intents));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rotated: usize,
    pub moved: usize,
    pub blocked: usize,
    pub collided: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Moved { from: Position, to: Position },
    Blocked { to: Option<Position> },
    Collided { to: Position },
}

/// Where a chain of movers ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainEnd {
    Clear,
    Blocked,
    Loop,
}

struct Planned {
    unit: EntityId,
    facing: Rotation,
    announce_rotation: bool,
    outcome: Option<MoveOutcome>,
}

/// Applies the queue as one simultaneous step.
///
/// Every unit first takes its net rotation. Moves are then resolved against
/// the positions at the start of the step, so the result does not depend on
/// queue order:
/// - a move into a cell a forward mover is leaving follows that mover;
/// - units targeting the same cell all stay put and collide;
/// - a closed loop of movers, including a head-on swap, collides;
/// - a chain ending at a wall, an obstacle or a unit that stays put is blocked.
pub fn reconcile<W: WorldMap>(
    world: &mut W,
    queue: CommandQueue,
    events: &mut Vec<WorldEvent>,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut plans = Vec::with_capacity(queue.len());
    let mut movers = BTreeMap::new();

    for (unit, intents) in queue.entries {
        let Some(pose) = world.unit_pose(unit) else {
            tracing::debug!(%unit, "skipping intents for a unit no longer in the world");
            continue;
        };

        let facing = intents.final_facing(pose.facing);
        if intents.rotate_calls > 0
            && facing != pose.facing
            && world.set_facing(unit, facing).is_ok()
        {
            report.rotated += 1;
        }

        let mut outcome = None;
        if let Some(distance) = intents.movement.filter(|distance| *distance > 0) {
            let from = pose.position;
            match from.offset(facing, distance) {
                Some(to) if world.in_bounds(to) => {
                    movers.insert(unit, (from, to));
                }
                to => {
                    tracing::debug!(%unit, %from, ?to, distance, "move leaves the world");
                    outcome = Some(MoveOutcome::Blocked { to });
                }
            }
        }
        plans.push(Planned {
            unit,
            facing,
            announce_rotation: intents.rotate_calls > 0,
            outcome,
        });
    }

    let mut resolved = resolve_moves(&*world, &movers);
    apply_moves(world, &mut resolved);

    for plan in plans {
        let unit = plan.unit;
        if plan.announce_rotation {
            events.push(WorldEvent::BotRotate {
                unit,
                facing: plan.facing,
            });
        }
        match plan.outcome.or_else(|| resolved.get(&unit).copied()) {
            Some(MoveOutcome::Moved { from, to }) => {
                tracing::debug!(%unit, %from, %to, "move applied");
                report.moved += 1;
                events.push(WorldEvent::BotMove { unit, from, to });
            }
            Some(MoveOutcome::Blocked { to }) => {
                tracing::debug!(%unit, ?to, "move blocked");
                report.blocked += 1;
                events.push(WorldEvent::BotBlocked { unit, to });
            }
            Some(MoveOutcome::Collided { to }) => {
                tracing::debug!(%unit, %to, "move collided");
                report.collided += 1;
                events.push(WorldEvent::BotCollide { unit, to });
            }
            None => {}
        }
    }
    report
}

fn resolve_moves<W: WorldMap>(
    world: &W,
    movers: &BTreeMap<EntityId, (Position, Position)>,
) -> BTreeMap<EntityId, MoveOutcome> {
    let mut resolved = BTreeMap::new();

    let mut contenders: BTreeMap<Position, Vec<EntityId>> = BTreeMap::new();
    for (&unit, &(_, to)) in movers {
        contenders.entry(to).or_default().push(unit);
    }
    for (to, units) in contenders {
        if units.len() > 1 {
            for unit in units {
                resolved.insert(unit, MoveOutcome::Collided { to });
            }
        }
    }

    for &unit in movers.keys() {
        if resolved.contains_key(&unit) {
            continue;
        }
        // Targets are unique here, so a loop can only close back on `unit`.
        let mut chain = vec![unit];
        let mut current = unit;
        let end = loop {
            let Some(&(_, to)) = movers.get(&current) else {
                break ChainEnd::Blocked;
            };
            let Some(occupant) = world.occupant(to) else {
                break ChainEnd::Clear;
            };
            if let Some(outcome) = resolved.get(&occupant.id) {
                break match outcome {
                    MoveOutcome::Moved { .. } => ChainEnd::Clear,
                    _ => ChainEnd::Blocked,
                };
            }
            if chain.contains(&occupant.id) {
                break ChainEnd::Loop;
            }
            if !movers.contains_key(&occupant.id) {
                break ChainEnd::Blocked;
            }
            chain.push(occupant.id);
            current = occupant.id;
        };

        for member in chain {
            let Some(&(from, to)) = movers.get(&member) else {
                continue;
            };
            let outcome = match end {
                ChainEnd::Clear => MoveOutcome::Moved { from, to },
                ChainEnd::Blocked => MoveOutcome::Blocked { to: Some(to) },
                ChainEnd::Loop => MoveOutcome::Collided { to },
            };
            resolved.insert(member, outcome);
        }
    }
    resolved
}

/// Relocates every cleared mover, heads of chains first.
fn apply_moves<W: WorldMap>(world: &mut W, resolved: &mut BTreeMap<EntityId, MoveOutcome>) {
    let mut pending: Vec<(EntityId, Position)> = resolved
        .iter()
        .filter_map(|(&unit, outcome)| match outcome {
            MoveOutcome::Moved { to, .. } => Some((unit, *to)),
            _ => None,
        })
        .collect();

    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for (unit, to) in pending {
            if !world.is_free(to) {
                waiting.push((unit, to));
                continue;
            }
            if let Err(err) = world.relocate(unit, to) {
                tracing::debug!(%unit, %to, error = %err, "move dropped");
                resolved.insert(unit, MoveOutcome::Blocked { to: Some(to) });
            }
        }
        pending = waiting;
        if pending.len() == before {
            break;
        }
    }

    for (unit, to) in pending {
        tracing::debug!(%unit, %to, "move never cleared");
        resolved.insert(unit, MoveOutcome::Blocked { to: Some(to) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use crate::world::GridWorld;
    use bot_world_wasm_abi::{EntityType, MotorCommand, PendingCommands, Rotation};

    fn intents(commands: &[MotorCommand]) -> TickIntents {
        let mut pending = PendingCommands::default();
        for command in commands {
            pending.push(*command);
        }
        pending.drain()
    }

    fn world_with_unit(at: Position, facing: Rotation) -> (GridWorld, EntityId) {
        let mut world = GridWorld::new(8, 8);
        let unit = world.allocate_id();
        world.insert_unit(unit, at, facing).unwrap();
        (world, unit)
    }

    #[test]
    fn rotation_applies_before_move() {
        let (mut world, unit) = world_with_unit(Position::new(0, 0), Rotation::Up);
        let mut queue = CommandQueue::new();
        queue.submit(
            unit,
            intents(&[
                MotorCommand::RotateRight,
                MotorCommand::MoveForward { distance: 2 },
            ]),
        );
        let mut events = Vec::new();
        let report = reconcile(&mut world, queue, &mut events);

        let pose = world.unit_pose(unit).unwrap();
        assert_eq!(pose.facing, Rotation::Right);
        assert_eq!(pose.position, Position::new(2, 0));
        assert_eq!(
            report,
            ReconcileReport {
                rotated: 1,
                moved: 1,
                ..ReconcileReport::default()
            }
        );
        assert_eq!(
            events,
            vec![
                WorldEvent::BotRotate {
                    unit,
                    facing: Rotation::Right
                },
                WorldEvent::BotMove {
                    unit,
                    from: Position::new(0, 0),
                    to: Position::new(2, 0)
                },
            ]
        );
    }

    #[test]
    fn move_issued_before_rotate_uses_final_facing() {
        let (mut world, unit) = world_with_unit(Position::new(3, 3), Rotation::Up);
        let mut queue = CommandQueue::new();
        queue.submit(
            unit,
            intents(&[
                MotorCommand::MoveForward { distance: 1 },
                MotorCommand::RotateLeft,
            ]),
        );
        reconcile(&mut world, queue, &mut Vec::new());
        assert_eq!(
            world.unit_pose(unit).unwrap().position,
            Position::new(2, 3)
        );
    }

    #[test]
    fn blocked_move_leaves_position_unchanged() {
        let (mut world, unit) = world_with_unit(Position::new(0, 0), Rotation::Right);
        world
            .place_static(EntityType::Rock, Position::new(2, 0))
            .unwrap();
        let mut queue = CommandQueue::new();
        queue.submit(unit, intents(&[MotorCommand::MoveForward { distance: 2 }]));
        let mut events = Vec::new();
        let report = reconcile(&mut world, queue, &mut events);

        assert_eq!(report.blocked, 1);
        assert_eq!(
            world.unit_pose(unit).unwrap().position,
            Position::new(0, 0)
        );
        assert_eq!(
            events,
            vec![WorldEvent::BotBlocked {
                unit,
                to: Some(Position::new(2, 0))
            }]
        );
    }

    #[test]
    fn only_destination_cell_is_checked() {
        let (mut world, unit) = world_with_unit(Position::new(0, 0), Rotation::Right);
        world
            .place_static(EntityType::Rock, Position::new(1, 0))
            .unwrap();
        let mut queue = CommandQueue::new();
        queue.submit(unit, intents(&[MotorCommand::MoveForward { distance: 2 }]));
        reconcile(&mut world, queue, &mut Vec::new());
        assert_eq!(
            world.unit_pose(unit).unwrap().position,
            Position::new(2, 0)
        );
    }

    #[test]
    fn out_of_bounds_and_overflow_are_blocked() {
        let (mut world, unit) = world_with_unit(Position::new(0, 0), Rotation::Down);
        let mut queue = CommandQueue::new();
        queue.submit(unit, intents(&[MotorCommand::MoveForward { distance: 1 }]));
        let mut events = Vec::new();
        reconcile(&mut world, queue, &mut events);
        assert_eq!(
            events,
            vec![WorldEvent::BotBlocked {
                unit,
                to: Some(Position::new(0, -1))
            }]
        );
        assert_eq!(
            world.unit_pose(unit).unwrap().position,
            Position::new(0, 0)
        );
    }

    fn forward(distance: u16) -> TickIntents {
        intents(&[MotorCommand::MoveForward { distance }])
    }

    fn world_with_units(units: &[(Position, Rotation)]) -> (GridWorld, Vec<EntityId>) {
        let mut world = GridWorld::new(8, 8);
        let ids = units
            .iter()
            .map(|&(at, facing)| {
                let unit = world.allocate_id();
                world.insert_unit(unit, at, facing).unwrap();
                unit
            })
            .collect();
        (world, ids)
    }

    #[test]
    fn units_contesting_a_cell_both_collide() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 1), Rotation::Right),
            (Position::new(2, 1), Rotation::Left),
        ]);
        let mut queue = CommandQueue::new();
        queue.submit(units[0], forward(1));
        queue.submit(units[1], forward(1));
        let mut events = Vec::new();
        let report = reconcile(&mut world, queue, &mut events);

        assert_eq!(report.moved, 0);
        assert_eq!(report.collided, 2);
        assert_eq!(
            world.unit_pose(units[0]).unwrap().position,
            Position::new(0, 1)
        );
        assert_eq!(
            world.unit_pose(units[1]).unwrap().position,
            Position::new(2, 1)
        );
        assert_eq!(
            events,
            vec![
                WorldEvent::BotCollide {
                    unit: units[0],
                    to: Position::new(1, 1)
                },
                WorldEvent::BotCollide {
                    unit: units[1],
                    to: Position::new(1, 1)
                },
            ]
        );
    }

    #[test]
    fn contest_outcome_ignores_queue_order() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 1), Rotation::Right),
            (Position::new(2, 1), Rotation::Left),
        ]);
        let mut queue = CommandQueue::new();
        queue.submit(units[1], forward(1));
        queue.submit(units[0], forward(1));
        let report = reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(report.collided, 2);
        assert_eq!(
            world.unit_pose(units[1]).unwrap().position,
            Position::new(2, 1)
        );
    }

    #[test]
    fn follower_moves_behind_leader() {
        let (mut world, units) = world_with_units(&[
            (Position::new(1, 0), Rotation::Right),
            (Position::new(0, 0), Rotation::Right),
        ]);
        let (lead, follower) = (units[0], units[1]);
        let mut queue = CommandQueue::new();
        queue.submit(lead, forward(1));
        queue.submit(follower, forward(1));
        reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(world.unit_pose(lead).unwrap().position, Position::new(2, 0));
        assert_eq!(
            world.unit_pose(follower).unwrap().position,
            Position::new(1, 0)
        );
    }

    #[test]
    fn follower_queued_before_leader_still_moves() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 0), Rotation::Right),
            (Position::new(1, 0), Rotation::Right),
            (Position::new(2, 0), Rotation::Right),
        ]);
        let mut queue = CommandQueue::new();
        for unit in &units {
            queue.submit(*unit, forward(1));
        }
        let mut events = Vec::new();
        let report = reconcile(&mut world, queue, &mut events);

        assert_eq!(report.moved, 3);
        for (unit, x) in units.iter().zip([1, 2, 3]) {
            assert_eq!(
                world.unit_pose(*unit).unwrap().position,
                Position::new(x, 0)
            );
        }
        assert_eq!(
            events[0],
            WorldEvent::BotMove {
                unit: units[0],
                from: Position::new(0, 0),
                to: Position::new(1, 0)
            }
        );
    }

    #[test]
    fn chain_ending_at_an_obstacle_is_blocked() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 0), Rotation::Right),
            (Position::new(1, 0), Rotation::Right),
        ]);
        world
            .place_static(EntityType::Rock, Position::new(2, 0))
            .unwrap();
        let mut queue = CommandQueue::new();
        queue.submit(units[0], forward(1));
        queue.submit(units[1], forward(1));
        let report = reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(report.blocked, 2);
        assert_eq!(
            world.unit_pose(units[0]).unwrap().position,
            Position::new(0, 0)
        );
        assert_eq!(
            world.unit_pose(units[1]).unwrap().position,
            Position::new(1, 0)
        );
    }

    #[test]
    fn unit_that_only_turns_blocks_the_unit_behind() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 0), Rotation::Right),
            (Position::new(1, 0), Rotation::Right),
        ]);
        let mut queue = CommandQueue::new();
        queue.submit(units[0], forward(1));
        queue.submit(units[1], intents(&[MotorCommand::RotateLeft]));
        let report = reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(report.rotated, 1);
        assert_eq!(report.blocked, 1);
        assert_eq!(
            world.unit_pose(units[0]).unwrap().position,
            Position::new(0, 0)
        );
    }

    #[test]
    fn head_on_swap_collides() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 0), Rotation::Right),
            (Position::new(1, 0), Rotation::Left),
        ]);
        let mut queue = CommandQueue::new();
        queue.submit(units[0], forward(1));
        queue.submit(units[1], forward(1));
        let report = reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(report.collided, 2);
        assert_eq!(
            world.unit_pose(units[0]).unwrap().position,
            Position::new(0, 0)
        );
        assert_eq!(
            world.unit_pose(units[1]).unwrap().position,
            Position::new(1, 0)
        );
    }

    #[test]
    fn closed_loop_of_movers_collides() {
        let (mut world, units) = world_with_units(&[
            (Position::new(0, 0), Rotation::Up),
            (Position::new(0, 1), Rotation::Right),
            (Position::new(1, 1), Rotation::Down),
            (Position::new(1, 0), Rotation::Left),
        ]);
        let mut queue = CommandQueue::new();
        for unit in &units {
            queue.submit(*unit, forward(1));
        }
        let report = reconcile(&mut world, queue, &mut Vec::new());

        assert_eq!(report.collided, 4);
        assert_eq!(
            world.unit_pose(units[2]).unwrap().position,
            Position::new(1, 1)
        );
    }

    #[test]
    fn zero_move_and_full_turn_change_nothing() {
        let (mut world, unit) = world_with_unit(Position::new(4, 4), Rotation::Left);
        let mut queue = CommandQueue::new();
        queue.submit(
            unit,
            intents(&[
                MotorCommand::RotateRight,
                MotorCommand::RotateRight,
                MotorCommand::RotateRight,
                MotorCommand::RotateRight,
                MotorCommand::MoveForward { distance: 0 },
            ]),
        );
        let mut events = Vec::new();
        let report = reconcile(&mut world, queue, &mut events);

        let pose = world.unit_pose(unit).unwrap();
        assert_eq!(pose.facing, Rotation::Left);
        assert_eq!(pose.position, Position::new(4, 4));
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(
            events,
            vec![WorldEvent::BotRotate {
                unit,
                facing: Rotation::Left
            }]
        );
    }

    #[test]
    fn empty_intents_are_not_queued() {
        let mut queue = CommandQueue::new();
        queue.submit(EntityId(1), TickIntents::default());
        assert!(queue.is_empty());
    }
}
