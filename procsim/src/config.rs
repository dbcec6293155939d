//! Simulator Configuration
//!
//! Raw configuration as loaded from disk. Loading is forgiving: unknown
//! keys are ignored and unparsable values keep their defaults. Semantic
//! validation happens later, when a scheduler is built from the config
//! (see [`crate::sys::scheduler::SchedulerParams::from_config`]).
//!
//! Two file formats are accepted:
//!
//! ```text
//! num-cpu 4
//! scheduler "rr"
//! quantum-cycles 5
//! batch-process-freq 1
//! min-ins 100
//! max-ins 500
//! delays-per-exec 0
//! max-overall-mem 16384
//! mem-per-frame 256
//! min-mem-per-proc 256
//! max-mem-per-proc 4096
//! paging true
//! ```
//!
//! or the JSON form produced by [`SimConfig::save`] for files ending in
//! `.json`.

use std::fmt;
use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::{SimError, SimResult};

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SimConfig {
    /// Number of simulated cores
    pub num_cpu: i64,

    /// Scheduling discipline
    pub scheduler: SchedulerKind,

    /// Instructions per time slice
    pub quantum_cycles: i64,

    /// Interval between generated processes
    #[serde(with = "humantime_serde")]
    pub batch_process_freq: Duration,

    /// Smallest instruction count of a generated process
    pub min_ins: i64,

    /// Largest instruction count of a generated process
    pub max_ins: i64,

    /// Delay charged for each executed instruction
    #[serde(with = "humantime_serde")]
    pub delays_per_exec: Duration,

    /// Total memory, in instruction units
    pub max_overall_mem: u64,

    /// Instructions held by one frame
    pub mem_per_frame: u64,

    /// Lower bound on a process's memory (diagnostic only)
    pub min_mem_per_proc: u64,

    /// Upper bound on a process's memory (diagnostic only)
    pub max_mem_per_proc: u64,

    /// Paged (scattered frames) or flat (contiguous frames) allocation
    pub paging: bool,

    /// What to do when a ready process cannot get frames
    pub eviction: EvictionPolicy,

    /// Seed for instruction count generation
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            num_cpu: 4,
            scheduler: SchedulerKind::RoundRobin,
            quantum_cycles: 5,
            batch_process_freq: Duration::from_secs(1),
            min_ins: 100,
            max_ins: 500,
            delays_per_exec: Duration::ZERO,
            max_overall_mem: 16384,
            mem_per_frame: 256,
            min_mem_per_proc: 256,
            max_mem_per_proc: 4096,
            paging: true,
            eviction: EvictionPolicy::None,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Load configuration from file
    ///
    /// `.json` files go through serde; anything else is read as
    /// key/value lines.
    pub fn load(path: &Path) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;

        if path.extension().map_or(false, |ext| ext == "json") {
            serde_json::from_str(&content)
                .map_err(|e| SimError::InvalidConfiguration(e.to_string()))
        } else {
            Ok(Self::parse(&content))
        }
    }

    /// Save configuration as JSON
    pub fn save(&self, path: &Path) -> SimResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| SimError::InvalidConfiguration(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse the key/value text format
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let (Some(key), Some(value)) = (tokens.next(), tokens.next()) else {
                warn!("config line {}: expected `key value`, got {:?}", lineno + 1, line);
                continue;
            };

            config.apply(key, value.trim_matches('"'));
        }

        config
    }

    /// Set one key; bad values keep the current setting
    fn apply(&mut self, key: &str, value: &str) {
        let applied = match key {
            "num-cpu" => set(&mut self.num_cpu, value),
            "scheduler" => set(&mut self.scheduler, value),
            "quantum-cycles" => set(&mut self.quantum_cycles, value),
            "batch-process-freq" => set_duration(&mut self.batch_process_freq, value, Duration::from_secs),
            "min-ins" => set(&mut self.min_ins, value),
            "max-ins" => set(&mut self.max_ins, value),
            "delays-per-exec" | "delay-per-exec" => {
                set_duration(&mut self.delays_per_exec, value, Duration::from_millis)
            }
            "max-overall-mem" => set(&mut self.max_overall_mem, value),
            "mem-per-frame" => set(&mut self.mem_per_frame, value),
            "min-mem-per-proc" => set(&mut self.min_mem_per_proc, value),
            "max-mem-per-proc" => set(&mut self.max_mem_per_proc, value),
            "paging" => set(&mut self.paging, value),
            "eviction" => set(&mut self.eviction, value),
            "seed" => {
                let parsed = value.parse().ok();
                if parsed.is_some() {
                    self.seed = parsed;
                }
                parsed.is_some()
            }
            _ => {
                debug!("ignoring unknown config key {:?}", key);
                return;
            }
        };

        if !applied {
            warn!("invalid value {:?} for {}, keeping default", value, key);
        }
    }
}

fn set<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

fn set_duration(slot: &mut Duration, value: &str, unit: fn(u64) -> Duration) -> bool {
    match value.parse::<u64>() {
        Ok(v) => {
            *slot = unit(v);
            true
        }
        Err(_) => false,
    }
}

impl fmt::Display for SimConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "num-cpu            {}", self.num_cpu)?;
        writeln!(f, "scheduler          {}", self.scheduler)?;
        writeln!(f, "quantum-cycles     {}", self.quantum_cycles)?;
        writeln!(f, "batch-process-freq {}", humantime::format_duration(self.batch_process_freq))?;
        writeln!(f, "min-ins            {}", self.min_ins)?;
        writeln!(f, "max-ins            {}", self.max_ins)?;
        writeln!(f, "delays-per-exec    {}", humantime::format_duration(self.delays_per_exec))?;
        writeln!(f, "max-overall-mem    {}", self.max_overall_mem)?;
        writeln!(f, "mem-per-frame      {}", self.mem_per_frame)?;
        writeln!(f, "min-mem-per-proc   {}", self.min_mem_per_proc)?;
        writeln!(f, "max-mem-per-proc   {}", self.max_mem_per_proc)?;
        writeln!(f, "paging             {}", self.paging)?;
        write!(f, "eviction           {}", self.eviction)
    }
}

/// Scheduling discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    /// Preemptive, one quantum per turn
    #[serde(rename = "rr", alias = "round-robin")]
    RoundRobin,
    /// Run to completion in arrival order
    #[serde(rename = "fcfs")]
    Fcfs,
}

impl std::str::FromStr for SchedulerKind {
    type Err = SimError;

    fn from_str(s: &str) -> SimResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rr" | "round-robin" => Ok(SchedulerKind::RoundRobin),
            "fcfs" => Ok(SchedulerKind::Fcfs),
            other => Err(SimError::InvalidConfiguration(format!("unknown scheduler: {}", other))),
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::RoundRobin => write!(f, "rr"),
            SchedulerKind::Fcfs => write!(f, "fcfs"),
        }
    }
}

/// Victim selection when memory is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Waiting processes stay in the backing store
    None,
    /// Evict the longest-resident process that has had a turn
    Oldest,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> SimResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(EvictionPolicy::None),
            "oldest" => Ok(EvictionPolicy::Oldest),
            other => Err(SimError::InvalidConfiguration(format!("unknown eviction policy: {}", other))),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::None => write!(f, "none"),
            EvictionPolicy::Oldest => write!(f, "oldest"),
        }
    }
}
