//! Error types for the bot host.

use bot_world_wasm_abi::GuestFault;

use crate::geometry::Position;
use crate::types::{EntityId, ProgramId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("cell {at} is outside the world")]
    OutOfBounds { at: Position },
    #[error("cell {at} is occupied by entity {occupant}")]
    Occupied { at: Position, occupant: EntityId },
    #[error("unknown unit {0}")]
    UnknownUnit(EntityId),
    #[error("unknown program {0}")]
    UnknownProgram(ProgramId),
    #[error("program rejected: {0}")]
    ProgramRejected(GuestFault),
    #[error("guest failed to load: {0}")]
    GuestLoad(GuestFault),
    #[error("executor unavailable: {0}")]
    Executor(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file failed ({path}): {message}")]
    ReadFile { path: String, message: String },
    #[error("parse config file failed ({path}): {message}")]
    ParseFile { path: String, message: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
