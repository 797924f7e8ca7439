//! Grid world model: bounds, occupancy and unit poses.

use bot_world_wasm_abi::{EntityDescriptor, EntityType, Rotation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::WorldError;
use crate::geometry::Position;
use crate::types::EntityId;

/// What the command effect queue needs from a world model.
pub trait WorldMap {
    fn in_bounds(&self, at: Position) -> bool;

    fn occupant(&self, at: Position) -> Option<Occupant>;

    fn is_free(&self, at: Position) -> bool {
        self.in_bounds(at) && self.occupant(at).is_none()
    }

    fn unit_pose(&self, unit: EntityId) -> Option<UnitPose>;

    fn set_facing(&mut self, unit: EntityId, facing: Rotation) -> Result<(), WorldError>;

    /// Moves a unit to a free in-bounds cell.
    fn relocate(&mut self, unit: EntityId, to: Position) -> Result<(), WorldError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub id: EntityId,
    pub kind: EntityType,
}

impl Occupant {
    pub fn descriptor(&self) -> EntityDescriptor {
        EntityDescriptor::new(self.id.0, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPose {
    pub position: Position,
    pub facing: Rotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticEntity {
    pub id: EntityId,
    pub kind: EntityType,
    pub position: Position,
}

/// Rectangular grid, cells `0..width` by `0..height`.
#[derive(Debug, Clone, PartialEq)]
pub struct GridWorld {
    width: i32,
    height: i32,
    next_id: i64,
    cells: BTreeMap<Position, Occupant>,
    units: BTreeMap<EntityId, UnitPose>,
    statics: BTreeMap<EntityId, StaticEntity>,
}

impl GridWorld {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(0),
            height: height.max(0),
            next_id: 1,
            cells: BTreeMap::new(),
            units: BTreeMap::new(),
            statics: BTreeMap::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Issues the next identity. Identities are never reused.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    pub fn ensure_free(&self, at: Position) -> Result<(), WorldError> {
        if !self.in_bounds(at) {
            return Err(WorldError::OutOfBounds { at });
        }
        if let Some(occupant) = self.cells.get(&at) {
            return Err(WorldError::Occupied {
                at,
                occupant: occupant.id,
            });
        }
        Ok(())
    }

    /// Places a rock or building. Bots enter through [`GridWorld::insert_unit`].
    pub fn place_static(&mut self, kind: EntityType, at: Position) -> Result<EntityId, WorldError> {
        self.ensure_free(at)?;
        let id = self.allocate_id();
        self.cells.insert(at, Occupant { id, kind });
        self.statics.insert(
            id,
            StaticEntity {
                id,
                kind,
                position: at,
            },
        );
        Ok(id)
    }

    pub fn insert_unit(
        &mut self,
        id: EntityId,
        at: Position,
        facing: Rotation,
    ) -> Result<(), WorldError> {
        self.ensure_free(at)?;
        self.cells.insert(
            at,
            Occupant {
                id,
                kind: EntityType::Bot,
            },
        );
        self.units.insert(
            id,
            UnitPose {
                position: at,
                facing,
            },
        );
        Ok(())
    }

    pub fn remove_unit(&mut self, id: EntityId) -> Result<UnitPose, WorldError> {
        let pose = self.units.remove(&id).ok_or(WorldError::UnknownUnit(id))?;
        self.cells.remove(&pose.position);
        Ok(pose)
    }

    /// Descriptor of whatever occupies `at`; invalid when empty or outside.
    pub fn descriptor_at(&self, at: Position) -> EntityDescriptor {
        self.cells
            .get(&at)
            .map(Occupant::descriptor)
            .unwrap_or_else(EntityDescriptor::none)
    }

    /// Cell ahead of `at` for each facing, indexed by [`Rotation::index`].
    pub fn surroundings(&self, at: Position) -> [EntityDescriptor; 4] {
        Rotation::ALL.map(|facing| match at.ahead(facing) {
            Some(cell) => self.descriptor_at(cell),
            None => EntityDescriptor::none(),
        })
    }

    pub fn units(&self) -> impl Iterator<Item = (EntityId, UnitPose)> + '_ {
        self.units.iter().map(|(id, pose)| (*id, *pose))
    }

    pub fn statics(&self) -> impl Iterator<Item = &StaticEntity> {
        self.statics.values()
    }
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new(32, 32)
    }
}

impl WorldMap for GridWorld {
    fn in_bounds(&self, at: Position) -> bool {
        (0..self.width).contains(&at.x) && (0..self.height).contains(&at.y)
    }

    fn occupant(&self, at: Position) -> Option<Occupant> {
        self.cells.get(&at).copied()
    }

    fn unit_pose(&self, unit: EntityId) -> Option<UnitPose> {
        self.units.get(&unit).copied()
    }

    fn set_facing(&mut self, unit: EntityId, facing: Rotation) -> Result<(), WorldError> {
        let pose = self
            .units
            .get_mut(&unit)
            .ok_or(WorldError::UnknownUnit(unit))?;
        pose.facing = facing;
        Ok(())
    }

    fn relocate(&mut self, unit: EntityId, to: Position) -> Result<(), WorldError> {
        let from = self
            .units
            .get(&unit)
            .ok_or(WorldError::UnknownUnit(unit))?
            .position;
        self.ensure_free(to)?;
        if let Some(occupant) = self.cells.remove(&from) {
            self.cells.insert(to, occupant);
        }
        if let Some(pose) = self.units.get_mut(&unit) {
            pose.position = to;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_start_at_one_and_never_repeat() {
        let mut world = GridWorld::new(4, 4);
        let rock = world
            .place_static(EntityType::Rock, Position::new(1, 1))
            .unwrap();
        let unit = world.allocate_id();
        assert_eq!(rock, EntityId(1));
        assert_eq!(unit, EntityId(2));
    }

    #[test]
    fn bounds_are_half_open() {
        let world = GridWorld::new(3, 2);
        assert!(world.in_bounds(Position::new(0, 0)));
        assert!(world.in_bounds(Position::new(2, 1)));
        assert!(!world.in_bounds(Position::new(3, 1)));
        assert!(!world.in_bounds(Position::new(0, -1)));
    }

    #[test]
    fn placement_rejects_occupied_and_outside_cells() {
        let mut world = GridWorld::new(4, 4);
        let rock = world
            .place_static(EntityType::Rock, Position::new(1, 1))
            .unwrap();
        assert_eq!(
            world.place_static(EntityType::Building, Position::new(1, 1)),
            Err(WorldError::Occupied {
                at: Position::new(1, 1),
                occupant: rock
            })
        );
        assert_eq!(
            world.insert_unit(EntityId(99), Position::new(4, 0), Rotation::Up),
            Err(WorldError::OutOfBounds {
                at: Position::new(4, 0)
            })
        );
    }

    #[test]
    fn surroundings_follow_facing_order() {
        let mut world = GridWorld::new(4, 4);
        let rock = world
            .place_static(EntityType::Rock, Position::new(2, 1))
            .unwrap();
        let building = world
            .place_static(EntityType::Building, Position::new(1, 2))
            .unwrap();

        let around = world.surroundings(Position::new(1, 1));
        assert_eq!(
            around[Rotation::Up.index()],
            EntityDescriptor::new(building.0, EntityType::Building)
        );
        assert_eq!(
            around[Rotation::Right.index()],
            EntityDescriptor::new(rock.0, EntityType::Rock)
        );
        assert!(!around[Rotation::Down.index()].is_valid());
        assert!(!around[Rotation::Left.index()].is_valid());
    }

    #[test]
    fn relocate_moves_occupancy() {
        let mut world = GridWorld::new(4, 4);
        let unit = world.allocate_id();
        world
            .insert_unit(unit, Position::new(0, 0), Rotation::Up)
            .unwrap();
        world.relocate(unit, Position::new(0, 2)).unwrap();

        assert!(world.is_free(Position::new(0, 0)));
        assert_eq!(
            world.occupant(Position::new(0, 2)).map(|o| o.id),
            Some(unit)
        );
        assert_eq!(
            world.unit_pose(unit).unwrap().position,
            Position::new(0, 2)
        );
    }

    #[test]
    fn remove_unit_frees_cell() {
        let mut world = GridWorld::new(2, 2);
        let unit = world.allocate_id();
        world
            .insert_unit(unit, Position::new(1, 1), Rotation::Left)
            .unwrap();
        let pose = world.remove_unit(unit).unwrap();
        assert_eq!(pose.facing, Rotation::Left);
        assert!(world.is_free(Position::new(1, 1)));
        assert_eq!(world.remove_unit(unit), Err(WorldError::UnknownUnit(unit)));
    }
}
