//! Host function table and the capability struct behind it.

use serde::{Deserialize, Serialize};

use crate::entity::EntityDescriptor;
use crate::motion::{MotorCommand, PendingCommands, Rotation, TickIntents, Turn};

pub const IO_NAMESPACE: &str = "io";
pub const MOTOR_NAMESPACE: &str = "motor";
pub const SENSORS_NAMESPACE: &str = "sensors";

pub const LOG_FUEL_BASE: u64 = 16;
pub const LOG_FUEL_PER_BYTE: u64 = 2;
pub const ROTATE_FUEL: u64 = 32;
pub const MOVE_FUEL: u64 = 256;
pub const CONTACT_FUEL: u64 = 16;

/// Wasm value types used by host function parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiParam {
    /// Offset into guest linear memory.
    Address,
    /// Byte length paired with an address.
    ByteCount,
    /// Signed direction discriminator.
    Direction,
    /// Cell count.
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFunction {
    pub namespace: &'static str,
    pub name: &'static str,
    pub params: &'static [AbiParam],
    pub base_fuel: u64,
    pub fuel_per_byte: u64,
}

impl HostFunction {
    pub fn fuel_cost(&self, byte_len: u32) -> u64 {
        self.base_fuel
            .saturating_add(self.fuel_per_byte.saturating_mul(u64::from(byte_len)))
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

pub const IO_LOG: HostFunction = HostFunction {
    namespace: IO_NAMESPACE,
    name: "log",
    params: &[AbiParam::Address, AbiParam::ByteCount],
    base_fuel: LOG_FUEL_BASE,
    fuel_per_byte: LOG_FUEL_PER_BYTE,
};

pub const IO_LOG_UTF8: HostFunction = HostFunction {
    namespace: IO_NAMESPACE,
    name: "log_utf8",
    params: &[AbiParam::Address, AbiParam::ByteCount],
    base_fuel: LOG_FUEL_BASE,
    fuel_per_byte: LOG_FUEL_PER_BYTE,
};

pub const MOTOR_ROTATE: HostFunction = HostFunction {
    namespace: MOTOR_NAMESPACE,
    name: "rotate",
    params: &[AbiParam::Direction],
    base_fuel: ROTATE_FUEL,
    fuel_per_byte: 0,
};

pub const MOTOR_MOVE: HostFunction = HostFunction {
    namespace: MOTOR_NAMESPACE,
    name: "move",
    params: &[AbiParam::Distance],
    base_fuel: MOVE_FUEL,
    fuel_per_byte: 0,
};

pub const SENSORS_CONTACT: HostFunction = HostFunction {
    namespace: SENSORS_NAMESPACE,
    name: "contact",
    params: &[AbiParam::Address],
    base_fuel: CONTACT_FUEL,
    fuel_per_byte: 0,
};

/// The complete capability surface visible to guest code.
pub const HOST_FUNCTIONS: [HostFunction; 5] =
    [IO_LOG, IO_LOG_UTF8, MOTOR_ROTATE, MOTOR_MOVE, SENSORS_CONTACT];

/// Guest log lines collected during one hook call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestLog {
    lines: Vec<String>,
    bytes: usize,
    limit: usize,
    dropped: u32,
}

impl GuestLog {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Single-byte text. NUL bytes are skipped, so ASCII written as UTF-16LE
    /// reads the same as plain ASCII.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        let line: String = bytes
            .iter()
            .filter(|byte| **byte != 0)
            .map(|byte| char::from(*byte))
            .collect();
        self.push_line(line);
    }

    pub fn push_utf8(&mut self, bytes: &[u8]) {
        self.push_line(String::from_utf8_lossy(bytes).into_owned());
    }

    fn push_line(&mut self, mut line: String) {
        let remaining = self.limit.saturating_sub(self.bytes);
        if remaining == 0 {
            self.dropped = self.dropped.saturating_add(1);
            return;
        }
        if line.len() > remaining {
            let mut cut = remaining;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            self.dropped = self.dropped.saturating_add(1);
        }
        self.bytes += line.len();
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines dropped or cut short by the byte limit.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.dropped == 0
    }

    pub fn take(&mut self) -> GuestLog {
        let limit = self.limit;
        std::mem::replace(self, GuestLog::with_limit(limit))
    }
}

/// Capabilities handed to one guest for the duration of one hook call.
///
/// `rotate` updates the facing seen by later calls in the same hook;
/// `move` only records a request. `contact` answers from the surroundings
/// captured before the hook started, indexed by the current facing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitCapabilities {
    unit: i64,
    facing: Rotation,
    surroundings: [EntityDescriptor; 4],
    pending: PendingCommands,
    log: GuestLog,
}

impl UnitCapabilities {
    pub fn new(
        unit: i64,
        facing: Rotation,
        surroundings: [EntityDescriptor; 4],
        log_limit: usize,
    ) -> Self {
        Self {
            unit,
            facing,
            surroundings,
            pending: PendingCommands::default(),
            log: GuestLog::with_limit(log_limit),
        }
    }

    pub fn unit(&self) -> i64 {
        self.unit
    }

    pub fn facing(&self) -> Rotation {
        self.facing
    }

    pub fn log(&mut self, bytes: &[u8]) {
        self.log.push_raw(bytes);
    }

    pub fn log_utf8(&mut self, bytes: &[u8]) {
        self.log.push_utf8(bytes);
    }

    pub fn rotate(&mut self, direction: i32) {
        self.facing = self.facing.turned(Turn::from_discriminator(direction));
        self.pending.push(MotorCommand::rotate(direction));
    }

    pub fn move_forward(&mut self, distance: i32) {
        self.pending.push(MotorCommand::move_forward(distance));
    }

    pub fn contact(&self) -> EntityDescriptor {
        self.surroundings[self.facing.index()]
    }

    pub fn take_intents(&mut self) -> TickIntents {
        self.pending.drain()
    }

    pub fn take_log(&mut self) -> GuestLog {
        self.log.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    fn caps_with_rock_on_right() -> UnitCapabilities {
        let mut surroundings = [EntityDescriptor::none(); 4];
        surroundings[Rotation::Right.index()] = EntityDescriptor::new(9, EntityType::Rock);
        UnitCapabilities::new(1, Rotation::Up, surroundings, 64)
    }

    #[test]
    fn table_lists_each_import_once() {
        let names: Vec<String> = HOST_FUNCTIONS.iter().map(|f| f.qualified_name()).collect();
        assert_eq!(
            names,
            vec![
                "io.log",
                "io.log_utf8",
                "motor.rotate",
                "motor.move",
                "sensors.contact"
            ]
        );
    }

    #[test]
    fn log_fuel_scales_with_length() {
        assert_eq!(IO_LOG.fuel_cost(0), LOG_FUEL_BASE);
        assert_eq!(IO_LOG.fuel_cost(10), LOG_FUEL_BASE + 20);
        assert_eq!(MOTOR_MOVE.fuel_cost(1000), MOVE_FUEL);
    }

    #[test]
    fn raw_and_utf8_logs_agree_on_ascii() {
        let mut log = GuestLog::with_limit(128);
        log.push_raw(b"hello bot");
        log.push_utf8(b"hello bot");
        let utf16: Vec<u8> = "hello bot"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        log.push_raw(&utf16);
        assert_eq!(log.lines(), ["hello bot", "hello bot", "hello bot"]);
    }

    #[test]
    fn log_limit_truncates_on_char_boundary() {
        let mut log = GuestLog::with_limit(5);
        log.push_utf8("abcé".as_bytes());
        log.push_utf8(b"xyz");
        assert_eq!(log.lines(), ["abcé"]);
        assert_eq!(log.dropped(), 1);

        let mut log = GuestLog::with_limit(4);
        log.push_utf8("abcé".as_bytes());
        assert_eq!(log.lines(), ["abc"]);
        assert_eq!(log.dropped(), 1);
    }

    #[test]
    fn contact_follows_synchronous_rotation() {
        let mut caps = caps_with_rock_on_right();
        assert!(!caps.contact().is_valid());
        caps.rotate(1);
        assert_eq!(caps.facing(), Rotation::Right);
        assert_eq!(caps.contact(), EntityDescriptor::new(9, EntityType::Rock));
        caps.rotate(-1);
        assert_eq!(caps.facing(), Rotation::Up);
    }

    #[test]
    fn intents_drain_once() {
        let mut caps = caps_with_rock_on_right();
        caps.rotate(1);
        caps.move_forward(3);
        caps.move_forward(2);

        let intents = caps.take_intents();
        assert_eq!(intents.movement, Some(2));
        assert_eq!(intents.final_facing(Rotation::Up), Rotation::Right);
        assert_eq!(caps.take_intents(), TickIntents::default());
    }
}
