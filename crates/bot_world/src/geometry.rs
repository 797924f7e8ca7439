use bot_world_wasm_abi::Rotation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid cell; `x` grows to the right, `y` grows upward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Cell `distance` steps along `facing`, or `None` on coordinate overflow.
    pub fn offset(self, facing: Rotation, distance: u16) -> Option<Position> {
        let (dx, dy) = facing.unit_vector();
        let distance = i32::from(distance);
        Some(Position {
            x: self.x.checked_add(dx.checked_mul(distance)?)?,
            y: self.y.checked_add(dy.checked_mul(distance)?)?,
        })
    }

    pub fn ahead(self, facing: Rotation) -> Option<Position> {
        self.offset(facing, 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_follows_facing() {
        let origin = Position::new(0, 0);
        assert_eq!(origin.offset(Rotation::Right, 2), Some(Position::new(2, 0)));
        assert_eq!(origin.offset(Rotation::Up, 3), Some(Position::new(0, 3)));
        assert_eq!(origin.offset(Rotation::Left, 1), Some(Position::new(-1, 0)));
        assert_eq!(origin.ahead(Rotation::Down), Some(Position::new(0, -1)));
    }

    #[test]
    fn offset_overflow_is_none() {
        let edge = Position::new(i32::MAX - 1, 0);
        assert_eq!(edge.offset(Rotation::Right, 5), None);
        assert_eq!(edge.offset(Rotation::Right, 0), Some(edge));
    }
}
