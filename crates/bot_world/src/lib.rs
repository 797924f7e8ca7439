//! Host runtime for bots controlled by sandboxed wasm programs.
//!
//! Guests see the world only through the host function table in
//! [`bot_world_wasm_abi`]; the [`Simulation`] owns every piece of world state
//! and changes it only while reconciling a finished tick.

pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod geometry;
pub mod simulation;
pub mod types;
pub mod world;

pub use bot_world_wasm_abi::{
    EntityDescriptor, EntityType, GuestFault, GuestFaultCode, GuestLimits, GuestProgram,
    Rotation, UnitCapabilities,
};
pub use bot_world_wasm_executor::{ScriptedGuest, WasmExecutor, WasmExecutorConfig};
pub use commands::{reconcile, CommandQueue, ReconcileReport};
pub use config::{BotSpec, CellSpec, Scenario, SimulationConfig, SpawnOutcome, WorldConfig};
pub use error::{ConfigError, WorldError};
pub use events::{EventJournal, WorldEvent};
pub use geometry::Position;
pub use simulation::{
    ModuleStatus, RunReport, Simulation, StepReport, UnitSnapshot, WorldSnapshot,
    GUEST_LOG_TARGET,
};
pub use types::{EntityId, ProgramId};
pub use world::{GridWorld, Occupant, StaticEntity, UnitPose, WorldMap};
