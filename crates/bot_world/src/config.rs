//! Simulation settings and scenario files.

use bot_world_wasm_abi::{EntityType, GuestLimits, Rotation};
use bot_world_wasm_executor::WasmExecutorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, WorldError};
use crate::geometry::Position;
use crate::simulation::Simulation;
use crate::types::{EntityId, ProgramId};

pub const ENV_FUEL_PER_TICK: &str = "BOT_WORLD_FUEL_PER_TICK";
pub const ENV_MAX_MEM_BYTES: &str = "BOT_WORLD_MAX_MEM_BYTES";
pub const ENV_MAX_LOG_BYTES: &str = "BOT_WORLD_MAX_LOG_BYTES";
pub const ENV_MAX_CACHE_ENTRIES: &str = "BOT_WORLD_MAX_CACHE_ENTRIES";
pub const ENV_WORLD_WIDTH: &str = "BOT_WORLD_WIDTH";
pub const ENV_WORLD_HEIGHT: &str = "BOT_WORLD_HEIGHT";
pub const ENV_MAX_JOURNAL_EVENTS: &str = "BOT_WORLD_MAX_JOURNAL_EVENTS";

pub const DEFAULT_CONFIG_FILE_NAME: &str = "bot_world.toml";
pub const DEFAULT_FUEL_PER_TICK: u64 = 1_000_000;
pub const DEFAULT_MAX_MEM_BYTES: u64 = 16 * 1024 * 1024;
pub const DEFAULT_MAX_LOG_BYTES: u64 = 4096;
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_WORLD_SIZE: i32 = 32;
pub const DEFAULT_MAX_JOURNAL_EVENTS: usize = 65_536;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: i32,
    pub height: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WORLD_SIZE,
            height: DEFAULT_WORLD_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fuel granted to every hook call; `0` runs guests unmetered.
    pub fuel_per_tick: u64,
    pub max_mem_bytes: u64,
    pub max_log_bytes: u64,
    pub max_cache_entries: usize,
    /// Events retained until drained; the oldest are dropped beyond this.
    /// `0` turns the journal off.
    pub max_journal_events: usize,
    pub world: WorldConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fuel_per_tick: DEFAULT_FUEL_PER_TICK,
            max_mem_bytes: DEFAULT_MAX_MEM_BYTES,
            max_log_bytes: DEFAULT_MAX_LOG_BYTES,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
            max_journal_events: DEFAULT_MAX_JOURNAL_EVENTS,
            world: WorldConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// `bot_world.toml` in the working directory if present, else defaults;
    /// environment variables override either.
    pub fn from_default_sources() -> Result<Self, ConfigError> {
        let config_path = Path::new(DEFAULT_CONFIG_FILE_NAME);
        if config_path.exists() {
            return Self::from_config_file(config_path);
        }
        Self::from_env()
    }

    pub fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        let config: SimulationConfig =
            toml::from_str(&content).map_err(|err| ConfigError::ParseFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    pub fn from_env_with<F>(getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        Self::default().with_overrides(getter)
    }

    fn with_overrides<F>(mut self, mut getter: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(value) = parse_env(&mut getter, ENV_FUEL_PER_TICK)? {
            self.fuel_per_tick = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_MAX_MEM_BYTES)? {
            self.max_mem_bytes = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_MAX_LOG_BYTES)? {
            self.max_log_bytes = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_MAX_CACHE_ENTRIES)? {
            self.max_cache_entries = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_MAX_JOURNAL_EVENTS)? {
            self.max_journal_events = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_WORLD_WIDTH)? {
            self.world.width = value;
        }
        if let Some(value) = parse_env(&mut getter, ENV_WORLD_HEIGHT)? {
            self.world.height = value;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.width <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "world.width",
                value: self.world.width.to_string(),
            });
        }
        if self.world.height <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "world.height",
                value: self.world.height.to_string(),
            });
        }
        Ok(())
    }

    pub fn guest_limits(&self) -> GuestLimits {
        GuestLimits {
            max_fuel: self.fuel_per_tick,
            max_mem_bytes: self.max_mem_bytes,
            max_log_bytes: self.max_log_bytes,
        }
    }

    pub fn executor_config(&self) -> WasmExecutorConfig {
        WasmExecutorConfig {
            limits: self.guest_limits(),
            max_cache_entries: self.max_cache_entries,
        }
    }
}

fn parse_env<F, T>(getter: &mut F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(value) = getter(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|err| ConfigError::ReadFile {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSpec {
    pub x: i32,
    pub y: i32,
}

impl CellSpec {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSpec {
    /// `.wasm` or `.wat` file, relative to the scenario file.
    pub program: PathBuf,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub facing: Rotation,
}

/// Initial world contents and run length for the headless runner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub ticks: u64,
    pub rocks: Vec<CellSpec>,
    pub buildings: Vec<CellSpec>,
    pub bots: Vec<BotSpec>,
    #[serde(skip)]
    base_dir: PathBuf,
}

/// Outcome of one `[[bots]]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    Spawned {
        unit: EntityId,
        program: ProgramId,
    },
    Rejected {
        program: PathBuf,
        error: WorldError,
    },
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        let mut scenario = Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::ParseFile { message, .. } => ConfigError::ParseFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        scenario.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(scenario)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::ParseFile {
            path: "<inline>".to_string(),
            message: err.to_string(),
        })
    }

    pub fn program_path(&self, bot: &BotSpec) -> PathBuf {
        if bot.program.is_absolute() {
            bot.program.clone()
        } else {
            self.base_dir.join(&bot.program)
        }
    }

    /// Builds the world. Static placement errors and unreadable program files
    /// abort; a bot whose program fails to load is reported and skipped.
    pub fn build(
        &self,
        config: SimulationConfig,
    ) -> Result<(Simulation, Vec<SpawnOutcome>), WorldError> {
        let mut simulation = Simulation::new(config)?;
        for rock in &self.rocks {
            simulation.place_static(EntityType::Rock, rock.position())?;
        }
        for building in &self.buildings {
            simulation.place_static(EntityType::Building, building.position())?;
        }

        let mut outcomes = Vec::with_capacity(self.bots.len());
        for bot in &self.bots {
            let path = self.program_path(bot);
            let bytes = fs::read(&path).map_err(|err| ConfigError::ReadFile {
                path: path.display().to_string(),
                message: err.to_string(),
            })?;
            let outcome = simulation
                .register_program(&bytes)
                .and_then(|program| {
                    simulation
                        .spawn(&program, Position::new(bot.x, bot.y), bot.facing)
                        .map(|unit| (unit, program))
                });
            outcomes.push(match outcome {
                Ok((unit, program)) => SpawnOutcome::Spawned { unit, program },
                Err(error) => {
                    tracing::warn!(program = %path.display(), %error, "bot not spawned");
                    SpawnOutcome::Rejected {
                        program: path,
                        error,
                    }
                }
            });
        }
        Ok((simulation, outcomes))
    }
}
