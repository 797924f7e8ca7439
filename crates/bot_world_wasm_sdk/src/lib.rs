//! Guest-side bindings for writing bots in Rust.
//!
//! Wraps the five host imports (`io`, `motor`, `sensors`) and provides
//! [`export_bot!`] to expose `_start` and `tick` from a [`BotLifecycle`] type.
#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::cell::UnsafeCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Rock,
    Bot,
    Building,
}

/// Entity in contact with the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityType,
}

/// Descriptor exactly as the host writes it: `i64` identity, `u16` kind tag.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawEntity {
    pub id: i64,
    pub kind: u16,
}

impl RawEntity {
    pub fn is_valid(&self) -> bool {
        self.id > 0 && self.entity_type().is_some()
    }

    pub fn entity_type(&self) -> Option<EntityType> {
        match self.kind {
            0 => Some(EntityType::Rock),
            1 => Some(EntityType::Bot),
            2 => Some(EntityType::Building),
            _ => None,
        }
    }

    pub fn to_entity(&self) -> Option<Entity> {
        if self.id <= 0 {
            return None;
        }
        self.entity_type().map(|kind| Entity { id: self.id, kind })
    }
}

#[cfg(target_arch = "wasm32")]
mod raw {
    use super::RawEntity;

    #[link(wasm_import_module = "io")]
    extern "C" {
        #[link_name = "log"]
        pub fn io_log(ptr: *const u8, len: u32);
        #[link_name = "log_utf8"]
        pub fn io_log_utf8(ptr: *const u8, len: u32);
    }

    #[link(wasm_import_module = "motor")]
    extern "C" {
        #[link_name = "rotate"]
        pub fn motor_rotate(direction: i32);
        #[link_name = "move"]
        pub fn motor_move(distance: i32);
    }

    #[link(wasm_import_module = "sensors")]
    extern "C" {
        #[link_name = "contact"]
        pub fn sensors_contact(out: *mut RawEntity);
    }
}

#[cfg(target_arch = "wasm32")]
pub mod io {
    /// Writes `s` as raw bytes; only ASCII is guaranteed to read back intact.
    pub fn log(s: &str) {
        unsafe { super::raw::io_log(s.as_ptr(), s.len() as u32) }
    }

    pub fn log_utf8(s: &str) {
        unsafe { super::raw::io_log_utf8(s.as_ptr(), s.len() as u32) }
    }
}

#[cfg(target_arch = "wasm32")]
pub mod motor {
    /// Quarter turn, applied before this call returns.
    pub fn rotate(left: bool) {
        unsafe { super::raw::motor_rotate(if left { -1 } else { 1 }) }
    }

    pub fn rotate_left() {
        rotate(true);
    }

    pub fn rotate_right() {
        rotate(false);
    }

    /// Requests a move of `distance` cells along the facing at the end of the
    /// tick. Only the last request of a tick counts; the move happens after
    /// the tick returns, and may be blocked.
    pub fn go_forward(distance: u16) {
        unsafe { super::raw::motor_move(i32::from(distance)) }
    }
}

#[cfg(target_arch = "wasm32")]
pub mod sensors {
    use super::{Entity, RawEntity};

    /// Entity in the cell directly ahead, if any.
    pub fn contact() -> Option<Entity> {
        let mut raw = RawEntity::default();
        unsafe { super::raw::sensors_contact(&mut raw) };
        raw.to_entity()
    }
}

/// Behaviour of a bot across its lifetime.
pub trait BotLifecycle: Default {
    fn on_start(&mut self) {}

    fn on_tick(&mut self);
}

/// Holds the bot instance between hook calls.
pub struct BotSlot<B> {
    bot: UnsafeCell<Option<B>>,
}

// SAFETY: the host never runs two hooks of one module at the same time, and
// wasm guests are single threaded.
unsafe impl<B> Sync for BotSlot<B> {}

impl<B: BotLifecycle> BotSlot<B> {
    pub const fn new() -> Self {
        Self {
            bot: UnsafeCell::new(None),
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn bot(&self) -> &mut B {
        // SAFETY: see the `Sync` impl; hooks are never re-entered.
        let slot = unsafe { &mut *self.bot.get() };
        slot.get_or_insert_with(B::default)
    }

    pub fn start(&self) {
        self.bot().on_start();
    }

    pub fn tick(&self) {
        self.bot().on_tick();
    }
}

impl<B: BotLifecycle> Default for BotSlot<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[macro_export]
macro_rules! export_bot {
    ($bot_ty:ty) => {
        static __BOT_WORLD_SLOT: $crate::BotSlot<$bot_ty> = $crate::BotSlot::new();

        #[no_mangle]
        pub extern "C" fn _start() {
            __BOT_WORLD_SLOT.start();
        }

        #[no_mangle]
        pub extern "C" fn tick() {
            __BOT_WORLD_SLOT.tick();
        }
    };
}
