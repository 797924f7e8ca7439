//! Control ABI shared between the bot host and guest tooling.

mod entity;
mod host;
mod motion;

use serde::{Deserialize, Serialize};

pub use entity::{EntityDescriptor, EntityType};
pub use host::{
    AbiParam, GuestLog, HostFunction, UnitCapabilities, CONTACT_FUEL, HOST_FUNCTIONS, IO_LOG,
    IO_LOG_UTF8, IO_NAMESPACE, LOG_FUEL_BASE, LOG_FUEL_PER_BYTE, MOTOR_MOVE, MOTOR_NAMESPACE,
    MOTOR_ROTATE, MOVE_FUEL, ROTATE_FUEL, SENSORS_CONTACT, SENSORS_NAMESPACE,
};
pub use motion::{MotorCommand, PendingCommands, Rotation, TickIntents, Turn};

/// Name of the exported linear memory the host marshals through.
pub const MEMORY_EXPORT: &str = "memory";

/// Entry points a guest module may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleHook {
    Start,
    Tick,
}

impl LifecycleHook {
    pub const ALL: [LifecycleHook; 2] = [LifecycleHook::Start, LifecycleHook::Tick];

    pub fn export_name(&self) -> &'static str {
        match self {
            LifecycleHook::Start => "_start",
            LifecycleHook::Tick => "tick",
        }
    }

    pub fn required(&self) -> bool {
        matches!(self, LifecycleHook::Tick)
    }
}

/// Resource bounds applied to every hook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestLimits {
    /// Step budget for one hook call; `0` disables metering.
    pub max_fuel: u64,
    pub max_mem_bytes: u64,
    pub max_log_bytes: u64,
}

impl Default for GuestLimits {
    fn default() -> Self {
        Self {
            max_fuel: 1_000_000,
            max_mem_bytes: 16 * 1024 * 1024,
            max_log_bytes: 4096,
        }
    }
}

impl GuestLimits {
    pub fn unbounded() -> Self {
        Self {
            max_fuel: 0,
            max_mem_bytes: u64::MAX,
            max_log_bytes: u64::MAX,
        }
    }

    pub fn log_limit(&self) -> usize {
        usize::try_from(self.max_log_bytes).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestFaultCode {
    Compile,
    MissingExport,
    InvalidExport,
    Instantiate,
    StartTrap,
    Trap,
    OutOfFuel,
    MemoryAccess,
    MemoryLimit,
}

impl GuestFaultCode {
    /// Faults raised before a module ever reaches the running state.
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            GuestFaultCode::Compile
                | GuestFaultCode::MissingExport
                | GuestFaultCode::InvalidExport
                | GuestFaultCode::Instantiate
                | GuestFaultCode::StartTrap
                | GuestFaultCode::MemoryLimit
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {detail}")]
pub struct GuestFault {
    pub code: GuestFaultCode,
    pub detail: String,
}

impl GuestFault {
    pub fn new(code: GuestFaultCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

/// A loaded guest, driven by the scheduler one hook call at a time.
///
/// Every call receives the unit's capabilities; nothing else is reachable.
pub trait GuestProgram {
    /// Whether the module exports the optional startup hook.
    fn has_start(&self) -> bool;

    fn start(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault>;

    fn tick(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_tick_is_required() {
        assert!(LifecycleHook::Tick.required());
        assert!(!LifecycleHook::Start.required());
        assert_eq!(LifecycleHook::Start.export_name(), "_start");
    }

    #[test]
    fn fault_codes_serialize_snake_case() {
        let fault = GuestFault::new(GuestFaultCode::OutOfFuel, "budget spent");
        let json = serde_json::to_string(&fault).unwrap();
        assert_eq!(json, r#"{"code":"out_of_fuel","detail":"budget spent"}"#);
        assert!(!fault.code.is_load_time());
        assert!(GuestFaultCode::StartTrap.is_load_time());
    }

    #[test]
    fn log_limit_saturates() {
        assert_eq!(GuestLimits::unbounded().log_limit(), usize::MAX);
        assert_eq!(GuestLimits::default().log_limit(), 4096);
    }
}
