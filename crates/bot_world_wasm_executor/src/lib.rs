//! Wasmtime execution of untrusted bot programs.
//!
//! The linker defines exactly the host function table from
//! `bot_world_wasm_abi`; a module importing anything else fails to load.
//! Every host call is fuel-charged and every guest address is bounds checked
//! before the host touches linear memory.

mod scripted;

pub use scripted::ScriptedGuest;

use bot_world_wasm_abi::{
    EntityDescriptor, GuestFault, GuestFaultCode, GuestLimits, GuestProgram, HostFunction,
    LifecycleHook, UnitCapabilities, HOST_FUNCTIONS, IO_LOG, IO_LOG_UTF8, MEMORY_EXPORT,
    MOTOR_MOVE, MOTOR_ROTATE, SENSORS_CONTACT,
};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use wasmtime::{
    Caller, Extern, ExternType, Linker, Module, Store, StoreLimits, TypedFunc, ValType,
};

const WASM_PAGE_SIZE: u64 = 65_536;

/// Configuration for the wasm guest runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct WasmExecutorConfig {
    pub limits: GuestLimits,
    pub max_cache_entries: usize,
}

impl Default for WasmExecutorConfig {
    fn default() -> Self {
        Self {
            limits: GuestLimits::default(),
            max_cache_entries: 32,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("wasmtime engine init failed: {0}")]
    Engine(String),
    #[error("host function table link failed: {0}")]
    Link(String),
}

/// Compiles, validates and instantiates guest programs against the host table.
#[derive(Clone)]
pub struct WasmExecutor {
    config: WasmExecutorConfig,
    engine: wasmtime::Engine,
    linker: Arc<Linker<GuestState>>,
    compiled_cache: Arc<Mutex<CompiledModuleCache>>,
}

impl fmt::Debug for WasmExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl WasmExecutor {
    pub fn new(config: WasmExecutorConfig) -> Result<Self, ExecutorError> {
        let mut engine_config = wasmtime::Config::new();
        engine_config.consume_fuel(true);
        engine_config.wasm_multi_value(true);
        engine_config.wasm_threads(false);
        engine_config.cranelift_nan_canonicalization(true);
        engine_config.debug_info(false);
        let engine = wasmtime::Engine::new(&engine_config)
            .map_err(|err| ExecutorError::Engine(err.to_string()))?;
        let mut linker = Linker::new(&engine);
        define_host_functions(&mut linker).map_err(|err| ExecutorError::Link(err.to_string()))?;
        let compiled_cache = Arc::new(Mutex::new(CompiledModuleCache::new(
            config.max_cache_entries,
        )));
        Ok(Self {
            config,
            engine,
            linker: Arc::new(linker),
            compiled_cache,
        })
    }

    pub fn config(&self) -> &WasmExecutorConfig {
        &self.config
    }

    pub fn engine(&self) -> &wasmtime::Engine {
        &self.engine
    }

    #[cfg(test)]
    pub(crate) fn compiled_cache_len(&self) -> usize {
        self.compiled_cache
            .lock()
            .map(|cache| cache.len())
            .unwrap_or_default()
    }

    /// Compiles `wasm_bytes` (binary or text format), reusing a cached module
    /// for a known `program_hash`.
    pub fn compile(&self, program_hash: &str, wasm_bytes: &[u8]) -> Result<Module, GuestFault> {
        if let Ok(mut cache) = self.compiled_cache.lock() {
            if let Some(module) = cache.get(program_hash) {
                return Ok(module);
            }
        }
        let module = Module::new(&self.engine, wasm_bytes).map_err(|err| {
            GuestFault::new(GuestFaultCode::Compile, format!("compile failed: {err}"))
        })?;
        if let Ok(mut cache) = self.compiled_cache.lock() {
            cache.insert(program_hash.to_string(), module.clone());
        }
        Ok(module)
    }

    /// Validates the export contract and instantiates a fresh guest.
    ///
    /// The startup hook is not run here; the scheduler drives it through
    /// [`GuestProgram::start`].
    pub fn load(&self, program_hash: &str, wasm_bytes: &[u8]) -> Result<WasmGuest, GuestFault> {
        let module = self.compile(program_hash, wasm_bytes)?;
        self.instantiate(program_hash, &module)
    }

    pub fn instantiate(
        &self,
        program_hash: &str,
        module: &Module,
    ) -> Result<WasmGuest, GuestFault> {
        validate_imports(module)?;
        let has_start = validate_exports(module)?;
        self.validate_memory(module)?;
        let pre = self.linker.instantiate_pre(module).map_err(|err| {
            GuestFault::new(GuestFaultCode::Instantiate, format!("link failed: {err}"))
        })?;

        let limits = &self.config.limits;
        let store_limits = wasmtime::StoreLimitsBuilder::new()
            .memory_size(usize::try_from(limits.max_mem_bytes).unwrap_or(usize::MAX))
            .instances(1)
            .build();
        let mut store = Store::new(
            &self.engine,
            GuestState {
                caps: UnitCapabilities::default(),
                metered: limits.max_fuel > 0,
                limits: store_limits,
            },
        );
        store.limiter(|state| &mut state.limits);
        refuel(&mut store, limits.max_fuel)?;

        let instance = pre.instantiate(&mut store).map_err(|err| {
            GuestFault::new(
                GuestFaultCode::Instantiate,
                format!("instantiate failed: {err}"),
            )
        })?;
        let tick = instance
            .get_typed_func::<(), ()>(&mut store, LifecycleHook::Tick.export_name())
            .map_err(|err| GuestFault::new(GuestFaultCode::InvalidExport, err.to_string()))?;
        let start = if has_start {
            Some(
                instance
                    .get_typed_func::<(), ()>(&mut store, LifecycleHook::Start.export_name())
                    .map_err(|err| {
                        GuestFault::new(GuestFaultCode::InvalidExport, err.to_string())
                    })?,
            )
        } else {
            None
        };

        Ok(WasmGuest {
            program_hash: program_hash.to_string(),
            max_fuel: limits.max_fuel,
            store,
            start,
            tick,
        })
    }

    fn validate_memory(&self, module: &Module) -> Result<(), GuestFault> {
        for export in module.exports() {
            if let ExternType::Memory(memory) = export.ty() {
                let min_bytes = memory.minimum().saturating_mul(WASM_PAGE_SIZE);
                if min_bytes > self.config.limits.max_mem_bytes {
                    return Err(GuestFault::new(
                        GuestFaultCode::MemoryLimit,
                        format!(
                            "initial memory {min_bytes} bytes exceeds limit {}",
                            self.config.limits.max_mem_bytes
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Every import must be an entry of [`HOST_FUNCTIONS`] with its exact
/// signature: one `i32` per parameter and no results.
fn validate_imports(module: &Module) -> Result<(), GuestFault> {
    for import in module.imports() {
        let qualified = format!("{}.{}", import.module(), import.name());
        let function = HOST_FUNCTIONS
            .iter()
            .find(|function| {
                function.namespace == import.module() && function.name == import.name()
            })
            .ok_or_else(|| {
                GuestFault::new(
                    GuestFaultCode::Instantiate,
                    format!("import '{qualified}' is not a host function"),
                )
            })?;
        let signature_matches = match import.ty() {
            ExternType::Func(ty) => {
                ty.params().len() == function.params.len()
                    && ty.params().all(|param| matches!(param, ValType::I32))
                    && ty.results().len() == 0
            }
            _ => false,
        };
        if !signature_matches {
            return Err(GuestFault::new(
                GuestFaultCode::Instantiate,
                format!(
                    "import '{qualified}' must be a function taking {} i32 and returning nothing",
                    function.params.len()
                ),
            ));
        }
    }
    Ok(())
}

/// Returns whether the optional startup hook is present.
fn validate_exports(module: &Module) -> Result<bool, GuestFault> {
    let mut has_start = false;
    for hook in LifecycleHook::ALL {
        let name = hook.export_name();
        match module.get_export(name) {
            Some(ExternType::Func(ty)) => {
                if ty.params().len() != 0 || ty.results().len() != 0 {
                    return Err(GuestFault::new(
                        GuestFaultCode::InvalidExport,
                        format!("'{name}' function signature must be () -> ()"),
                    ));
                }
                if hook == LifecycleHook::Start {
                    has_start = true;
                }
            }
            Some(_) => {
                return Err(GuestFault::new(
                    GuestFaultCode::InvalidExport,
                    format!("'{name}' export is not a function"),
                ));
            }
            None if hook.required() => {
                return Err(GuestFault::new(
                    GuestFaultCode::MissingExport,
                    format!("missing '{name}' export"),
                ));
            }
            None => {}
        }
    }
    Ok(has_start)
}

fn refuel(store: &mut Store<GuestState>, max_fuel: u64) -> Result<(), GuestFault> {
    let fuel = if max_fuel > 0 { max_fuel } else { u64::MAX };
    store
        .set_fuel(fuel)
        .map_err(|err| GuestFault::new(GuestFaultCode::Trap, err.to_string()))
}

/// Store data of one guest instance.
struct GuestState {
    caps: UnitCapabilities,
    metered: bool,
    limits: StoreLimits,
}

/// An instantiated guest module owning its private linear memory.
pub struct WasmGuest {
    program_hash: String,
    max_fuel: u64,
    store: Store<GuestState>,
    start: Option<TypedFunc<(), ()>>,
    tick: TypedFunc<(), ()>,
}

impl fmt::Debug for WasmGuest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmGuest")
            .field("program_hash", &self.program_hash)
            .field("max_fuel", &self.max_fuel)
            .field("has_start", &self.start.is_some())
            .finish()
    }
}

impl WasmGuest {
    /// Fuel left over from the most recent hook call.
    pub fn remaining_fuel(&self) -> u64 {
        self.store.get_fuel().unwrap_or(0)
    }

    fn call_hook(
        &mut self,
        hook: LifecycleHook,
        caps: &mut UnitCapabilities,
    ) -> Result<(), GuestFault> {
        let func = match hook {
            LifecycleHook::Start => match &self.start {
                Some(func) => func.clone(),
                None => return Ok(()),
            },
            LifecycleHook::Tick => self.tick.clone(),
        };
        refuel(&mut self.store, self.max_fuel)?;
        std::mem::swap(&mut self.store.data_mut().caps, caps);
        let result = func.call(&mut self.store, ());
        std::mem::swap(&mut self.store.data_mut().caps, caps);
        result.map_err(|err| classify_error(hook, err))
    }
}

impl GuestProgram for WasmGuest {
    fn has_start(&self) -> bool {
        self.start.is_some()
    }

    fn start(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault> {
        self.call_hook(LifecycleHook::Start, caps)
    }

    fn tick(&mut self, caps: &mut UnitCapabilities) -> Result<(), GuestFault> {
        self.call_hook(LifecycleHook::Tick, caps)
    }
}

/// Host-side rejection of a guest call; aborts the running hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostCallFault {
    #[error("{function}: range {offset}+{len} outside guest memory of {memory_size} bytes")]
    OutOfBounds {
        function: &'static str,
        offset: u64,
        len: u64,
        memory_size: u64,
    },
    #[error("{function}: address {offset} not aligned to {align}")]
    Misaligned {
        function: &'static str,
        offset: u64,
        align: u64,
    },
    #[error("{function}: module exports no linear memory")]
    MissingMemory { function: &'static str },
    #[error("{function}: needs {needed} fuel, {remaining} left")]
    FuelExhausted {
        function: &'static str,
        needed: u64,
        remaining: u64,
    },
}

fn classify_error(hook: LifecycleHook, err: wasmtime::Error) -> GuestFault {
    let (code, detail) = if let Some(fault) = err.downcast_ref::<HostCallFault>() {
        let code = match fault {
            HostCallFault::FuelExhausted { .. } => GuestFaultCode::OutOfFuel,
            _ => GuestFaultCode::MemoryAccess,
        };
        (code, fault.to_string())
    } else if let Some(trap) = err.downcast_ref::<wasmtime::Trap>() {
        let code = match trap {
            wasmtime::Trap::OutOfFuel => GuestFaultCode::OutOfFuel,
            _ => GuestFaultCode::Trap,
        };
        (code, trap.to_string())
    } else {
        (GuestFaultCode::Trap, err.to_string())
    };
    match hook {
        LifecycleHook::Start => GuestFault::new(
            GuestFaultCode::StartTrap,
            format!("{}: {detail}", hook.export_name()),
        ),
        LifecycleHook::Tick => GuestFault::new(code, detail),
    }
}

fn define_host_functions(linker: &mut Linker<GuestState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        IO_LOG.namespace,
        IO_LOG.name,
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            charge_fuel(&mut caller, &IO_LOG, len as u32)?;
            let bytes = read_guest_bytes(&mut caller, &IO_LOG, ptr, len)?;
            caller.data_mut().caps.log(&bytes);
            Ok(())
        },
    )?;
    linker.func_wrap(
        IO_LOG_UTF8.namespace,
        IO_LOG_UTF8.name,
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            charge_fuel(&mut caller, &IO_LOG_UTF8, len as u32)?;
            let bytes = read_guest_bytes(&mut caller, &IO_LOG_UTF8, ptr, len)?;
            caller.data_mut().caps.log_utf8(&bytes);
            Ok(())
        },
    )?;
    linker.func_wrap(
        MOTOR_ROTATE.namespace,
        MOTOR_ROTATE.name,
        |mut caller: Caller<'_, GuestState>, direction: i32| -> wasmtime::Result<()> {
            charge_fuel(&mut caller, &MOTOR_ROTATE, 0)?;
            caller.data_mut().caps.rotate(direction);
            Ok(())
        },
    )?;
    linker.func_wrap(
        MOTOR_MOVE.namespace,
        MOTOR_MOVE.name,
        |mut caller: Caller<'_, GuestState>, distance: i32| -> wasmtime::Result<()> {
            charge_fuel(&mut caller, &MOTOR_MOVE, 0)?;
            caller.data_mut().caps.move_forward(distance);
            Ok(())
        },
    )?;
    linker.func_wrap(
        SENSORS_CONTACT.namespace,
        SENSORS_CONTACT.name,
        |mut caller: Caller<'_, GuestState>, out: i32| -> wasmtime::Result<()> {
            charge_fuel(&mut caller, &SENSORS_CONTACT, 0)?;
            let descriptor = caller.data().caps.contact();
            write_descriptor(&mut caller, out, &descriptor)?;
            Ok(())
        },
    )?;
    Ok(())
}

fn charge_fuel(
    caller: &mut Caller<'_, GuestState>,
    function: &HostFunction,
    byte_len: u32,
) -> wasmtime::Result<()> {
    if !caller.data().metered {
        return Ok(());
    }
    let needed = function.fuel_cost(byte_len);
    let remaining = caller.get_fuel()?;
    if remaining < needed {
        caller.set_fuel(0)?;
        return Err(wasmtime::Error::new(HostCallFault::FuelExhausted {
            function: function.name,
            needed,
            remaining,
        }));
    }
    caller.set_fuel(remaining - needed)?;
    Ok(())
}

fn guest_memory(
    caller: &mut Caller<'_, GuestState>,
    function: &HostFunction,
) -> Result<wasmtime::Memory, HostCallFault> {
    match caller.get_export(MEMORY_EXPORT) {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(HostCallFault::MissingMemory {
            function: function.name,
        }),
    }
}

/// Guest addresses and lengths are unsigned 32-bit values.
fn guest_range(
    function: &HostFunction,
    ptr: i32,
    len: usize,
    memory_size: usize,
) -> Result<std::ops::Range<usize>, HostCallFault> {
    let offset = ptr as u32 as usize;
    let out_of_bounds = || HostCallFault::OutOfBounds {
        function: function.name,
        offset: offset as u64,
        len: len as u64,
        memory_size: memory_size as u64,
    };
    let end = offset.checked_add(len).ok_or_else(out_of_bounds)?;
    if end > memory_size {
        return Err(out_of_bounds());
    }
    Ok(offset..end)
}

fn read_guest_bytes(
    caller: &mut Caller<'_, GuestState>,
    function: &HostFunction,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<Vec<u8>> {
    let memory = guest_memory(caller, function)?;
    let data = memory.data(&*caller);
    let range = guest_range(function, ptr, len as u32 as usize, data.len())?;
    Ok(data[range].to_vec())
}

/// Writes exactly one descriptor record; the only host write into guest memory.
fn write_descriptor(
    caller: &mut Caller<'_, GuestState>,
    out: i32,
    descriptor: &EntityDescriptor,
) -> wasmtime::Result<()> {
    let function = &SENSORS_CONTACT;
    let offset = out as u32 as usize;
    if offset % EntityDescriptor::ALIGN != 0 {
        return Err(wasmtime::Error::new(HostCallFault::Misaligned {
            function: function.name,
            offset: offset as u64,
            align: EntityDescriptor::ALIGN as u64,
        }));
    }
    let memory = guest_memory(caller, function)?;
    let data = memory.data_mut(&mut *caller);
    let range = guest_range(function, out, EntityDescriptor::SIZE, data.len())?;
    data[range].copy_from_slice(&descriptor.encode());
    Ok(())
}

#[derive(Debug)]
struct CompiledModuleCache {
    max_entries: usize,
    cache: BTreeMap<String, Module>,
    lru: VecDeque<String>,
}

impl CompiledModuleCache {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            cache: BTreeMap::new(),
            lru: VecDeque::new(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.len()
    }

    fn get(&mut self, program_hash: &str) -> Option<Module> {
        let module = self.cache.get(program_hash)?.clone();
        self.touch(program_hash);
        Some(module)
    }

    fn insert(&mut self, program_hash: String, module: Module) {
        self.cache.insert(program_hash.clone(), module);
        self.touch(&program_hash);
        self.prune();
    }

    fn touch(&mut self, program_hash: &str) {
        self.lru.retain(|entry| entry != program_hash);
        self.lru.push_back(program_hash.to_string());
    }

    fn prune(&mut self) {
        if self.max_entries == 0 {
            self.cache.clear();
            self.lru.clear();
            return;
        }
        while self.cache.len() > self.max_entries {
            match self.lru.pop_front() {
                Some(evicted) => {
                    self.cache.remove(&evicted);
                }
                None => break,
            }
        }
    }
}
