use bot_world_wasm_abi::{GuestFault, GuestProgram, UnitCapabilities};
use std::fmt;

type Hook = Box<dyn FnMut(&mut UnitCapabilities) -> Result<(), GuestFault>>;

/// A guest driven by Rust closures instead of a wasm module.
///
/// Useful for embedding the scheduler in tests and tools where compiling a
/// module is not worth it; it sees the same capabilities a wasm guest does.
pub struct ScriptedGuest {
    start: Option<Hook>,
    tick: Hook,
}

impl ScriptedGuest {
    pub fn new(
        tick: impl FnMut(&mut UnitCapabilities) -> Result<(), GuestFault> + 'static,
    ) -> Self {
        Self {
            start: None,
            tick: Box::new(tick),
        }
    }

    /// A guest whose tick hook does nothing.
    pub fn idle() -> Self {
        Self::new(|_| Ok(()))
    }

    pub fn with_start(
        mut self,
        start: impl FnMut(&mut UnitCapabilities) -> Result<(), GuestFault> + 'static,
    ) -> Self {
        self.start = Some(Box::new(start));
        self
    }
}

impl fmt::Debug for ScriptedGuest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedGuest")
            .field("has_start", &self.start.is_some())
            .finish()
    }
}

impl GuestProgram for ScriptedGuest {
    fn has_start(&self) -> bool {
        self.start.is_some()
    }

    fn start(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault> {
        match self.start.as_mut() {
            Some(start) => start(caps),
            None => Ok(()),
        }
    }

    fn tick(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault> {
        (self.tick)(caps)
    }
}
