//! Guest scheduler: spawns bots, ticks every running module, then reconciles.

use bot_world_wasm_abi::{
    EntityType, GuestFault, GuestFaultCode, GuestLog, GuestProgram, Rotation, UnitCapabilities,
};
use bot_world_wasm_executor::WasmExecutor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::commands::{reconcile, CommandQueue, ReconcileReport};
use crate::config::SimulationConfig;
use crate::error::WorldError;
use crate::events::{EventJournal, WorldEvent};
use crate::geometry::Position;
use crate::types::{EntityId, ProgramId};
use crate::world::{GridWorld, StaticEntity, WorldMap};

/// Log target for lines written by guests through `io.log*`.
pub const GUEST_LOG_TARGET: &str = "bot_world::guest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModuleStatus {
    Running,
    Faulted { fault: GuestFault },
}

impl ModuleStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ModuleStatus::Running)
    }
}

struct BotModule {
    unit: EntityId,
    program: Option<ProgramId>,
    guest: Box<dyn GuestProgram>,
    status: ModuleStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    pub tick: u64,
    pub ticked: usize,
    pub faulted: usize,
    pub reconcile: ReconcileReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub last_tick: u64,
    pub steps: u64,
    pub faulted: usize,
    pub moved: usize,
    pub blocked: usize,
    pub collided: usize,
}

impl RunReport {
    /// Folds one step into the totals.
    pub fn record(&mut self, step: &StepReport) {
        self.last_tick = step.tick;
        self.steps += 1;
        self.faulted += step.faulted;
        self.moved += step.reconcile.moved;
        self.blocked += step.reconcile.blocked;
        self.collided += step.reconcile.collided;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<ProgramId>,
    pub position: Position,
    pub facing: Rotation,
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    pub width: i32,
    pub height: i32,
    pub units: Vec<UnitSnapshot>,
    pub statics: Vec<StaticEntity>,
}

/// Owns the world and every loaded guest.
///
/// A step calls each running module's `tick` hook once, in spawn order, then
/// applies the collected intents. No guest runs while reconciliation does.
pub struct Simulation {
    config: SimulationConfig,
    executor: WasmExecutor,
    world: GridWorld,
    programs: BTreeMap<ProgramId, Arc<[u8]>>,
    modules: Vec<BotModule>,
    tick: u64,
    events: EventJournal,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("programs", &self.programs.len())
            .field("modules", &self.modules.len())
            .field("world", &self.world)
            .finish()
    }
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let executor = WasmExecutor::new(config.executor_config())
            .map_err(|err| WorldError::Executor(err.to_string()))?;
        let world = GridWorld::new(config.world.width, config.world.height);
        let events = EventJournal::new(config.max_journal_events);
        Ok(Self {
            config,
            executor,
            world,
            programs: BTreeMap::new(),
            modules: Vec::new(),
            tick: 0,
            events,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &GridWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut GridWorld {
        &mut self.world
    }

    /// Last completed step; `0` before the first.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn place_static(&mut self, kind: EntityType, at: Position) -> Result<EntityId, WorldError> {
        self.world.place_static(kind, at)
    }

    /// Compiles a program once so any number of bots can be spawned from it.
    pub fn register_program(&mut self, wasm_bytes: &[u8]) -> Result<ProgramId, WorldError> {
        let program = ProgramId::for_bytes(wasm_bytes);
        if self.programs.contains_key(&program) {
            return Ok(program);
        }
        self.executor
            .compile(program.as_str(), wasm_bytes)
            .map_err(WorldError::ProgramRejected)?;
        tracing::debug!(%program, bytes = wasm_bytes.len(), "program registered");
        self.programs.insert(program.clone(), Arc::from(wasm_bytes));
        Ok(program)
    }

    /// Instantiates a registered program as a new bot.
    ///
    /// The unit is placed only once the module is Running; a load fault or a
    /// failing startup hook leaves the world untouched.
    pub fn spawn(
        &mut self,
        program: &ProgramId,
        at: Position,
        facing: Rotation,
    ) -> Result<EntityId, WorldError> {
        let bytes = self
            .programs
            .get(program)
            .cloned()
            .ok_or_else(|| WorldError::UnknownProgram(program.clone()))?;
        self.world.ensure_free(at)?;
        let guest = self
            .executor
            .load(program.as_str(), &bytes)
            .map_err(|fault| {
                tracing::warn!(%program, %fault, "guest failed to load");
                WorldError::GuestLoad(fault)
            })?;
        self.spawn_module(Box::new(guest), Some(program.clone()), at, facing)
    }

    /// Spawns a bot driven by an already-loaded guest.
    pub fn spawn_guest(
        &mut self,
        guest: Box<dyn GuestProgram>,
        at: Position,
        facing: Rotation,
    ) -> Result<EntityId, WorldError> {
        self.spawn_module(guest, None, at, facing)
    }

    fn spawn_module(
        &mut self,
        mut guest: Box<dyn GuestProgram>,
        program: Option<ProgramId>,
        at: Position,
        facing: Rotation,
    ) -> Result<EntityId, WorldError> {
        self.world.ensure_free(at)?;
        let unit = self.world.allocate_id();

        if guest.has_start() {
            let mut caps = UnitCapabilities::new(
                unit.0,
                facing,
                self.world.surroundings(at),
                self.config.guest_limits().log_limit(),
            );
            let result = guest.start(&mut caps);
            flush_guest_log(unit, caps.take_log(), &mut self.events);
            if let Err(fault) = result {
                let fault = match fault.code {
                    GuestFaultCode::StartTrap => fault,
                    _ => GuestFault::new(GuestFaultCode::StartTrap, fault.to_string()),
                };
                tracing::warn!(%unit, %fault, "startup hook failed, bot not spawned");
                return Err(WorldError::GuestLoad(fault));
            }
            // Motor calls made during startup have no tick to resolve in.
            let _ = caps.take_intents();
        }

        self.world.insert_unit(unit, at, facing)?;
        tracing::info!(%unit, %at, facing = facing.as_str(), "bot spawned");
        self.events.push(WorldEvent::BotSpawn {
            unit,
            program: program.clone(),
            at,
            facing,
        });
        self.modules.push(BotModule {
            unit,
            program,
            guest,
            status: ModuleStatus::Running,
        });
        Ok(unit)
    }

    /// Tears a bot down and frees its cell.
    pub fn despawn(&mut self, unit: EntityId) -> Result<(), WorldError> {
        let index = self
            .modules
            .iter()
            .position(|module| module.unit == unit)
            .ok_or(WorldError::UnknownUnit(unit))?;
        self.modules.remove(index);
        self.world.remove_unit(unit)?;
        self.events.push(WorldEvent::BotDespawn { unit });
        Ok(())
    }

    pub fn module_status(&self, unit: EntityId) -> Option<&ModuleStatus> {
        self.modules
            .iter()
            .find(|module| module.unit == unit)
            .map(|module| &module.status)
    }

    /// Unit ids in scheduling order.
    pub fn units(&self) -> Vec<EntityId> {
        self.modules.iter().map(|module| module.unit).collect()
    }

    #[tracing::instrument(level = "debug", skip(self), fields(tick = self.tick + 1))]
    pub fn step(&mut self) -> StepReport {
        self.tick += 1;
        let tick = self.tick;
        self.events.push(WorldEvent::TickStart { tick });

        let log_limit = self.config.guest_limits().log_limit();
        let mut report = StepReport {
            tick,
            ..StepReport::default()
        };
        let mut queue = CommandQueue::new();
        for module in self.modules.iter_mut() {
            if !module.status.is_running() {
                continue;
            }
            let Some(pose) = self.world.unit_pose(module.unit) else {
                continue;
            };
            let unit = module.unit;
            let mut caps = UnitCapabilities::new(
                unit.0,
                pose.facing,
                self.world.surroundings(pose.position),
                log_limit,
            );
            let result = module.guest.tick(&mut caps);
            report.ticked += 1;
            flush_guest_log(unit, caps.take_log(), &mut self.events);
            match result {
                Ok(()) => queue.submit(unit, caps.take_intents()),
                Err(fault) => {
                    tracing::warn!(
                        %unit,
                        %fault,
                        "tick hook faulted, module excluded from scheduling"
                    );
                    self.events.push(WorldEvent::BotFault {
                        unit,
                        fault: fault.clone(),
                    });
                    module.status = ModuleStatus::Faulted { fault };
                    report.faulted += 1;
                }
            }
        }

        let mut moves = Vec::new();
        report.reconcile = reconcile(&mut self.world, queue, &mut moves);
        self.events.extend(moves);
        self.events.push(WorldEvent::TickEnd { tick });
        report
    }

    pub fn run(&mut self, ticks: u64) -> RunReport {
        let mut summary = RunReport {
            last_tick: self.tick,
            ..RunReport::default()
        };
        for _ in 0..ticks {
            let step = self.step();
            summary.record(&step);
        }
        summary
    }

    /// Journaled events since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<WorldEvent> {
        self.events.drain()
    }

    /// Events evicted from a full journal before they were drained.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn snapshot(&self) -> WorldSnapshot {
        let units = self
            .modules
            .iter()
            .filter_map(|module| {
                let pose = self.world.unit_pose(module.unit)?;
                Some(UnitSnapshot {
                    id: module.unit,
                    program: module.program.clone(),
                    position: pose.position,
                    facing: pose.facing,
                    status: module.status.clone(),
                })
            })
            .collect();
        WorldSnapshot {
            tick: self.tick,
            width: self.world.width(),
            height: self.world.height(),
            units,
            statics: self.world.statics().copied().collect(),
        }
    }
}

fn flush_guest_log(unit: EntityId, log: GuestLog, events: &mut EventJournal) {
    for line in log.lines() {
        tracing::info!(target: GUEST_LOG_TARGET, %unit, "{line}");
        events.push(WorldEvent::BotLog {
            unit,
            message: line.clone(),
        });
    }
    if log.dropped() > 0 {
        tracing::warn!(%unit, dropped = log.dropped(), "guest log exceeded its byte limit");
    }
}
