//! Reporting
//!
//! Point-in-time views of a simulation. Every `capture` copies what it
//! needs out of a borrowed [`SimState`], so callers hold the lock only for
//! the copy and render afterwards:
//!
//! ```ignore
//! let status = emulator.with_state(|s| StatusSnapshot::capture(s, emulator.params()));
//! println!("{}", status);
//! ```

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use crate::mm::MemoryStats;
use crate::sys::process::{Process, ProcessId, ProcessState};
use crate::sys::scheduler::SchedulerParams;
use crate::sys::SimState;
use crate::SimResult;

const RULE: &str = "------------------------------------------------------------";

fn timestamp(t: SystemTime) -> humantime::Rfc3339Timestamp {
    humantime::format_rfc3339_seconds(t)
}

/// One row of the status listing
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessLine {
    pub name: String,
    pub core_id: u32,
    pub progress: u32,
    pub total_instructions: u32,
    pub created_at: SystemTime,
    pub finished_at: Option<SystemTime>,
}

impl From<&Process> for ProcessLine {
    fn from(p: &Process) -> Self {
        Self {
            name: p.name.clone(),
            core_id: p.core_id,
            progress: p.progress,
            total_instructions: p.total_instructions,
            created_at: p.created_at,
            finished_at: p.finished_at,
        }
    }
}

/// Waiting / running / finished listing (`screen -ls`)
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub num_cpu: u32,
    pub waiting: Vec<ProcessLine>,
    pub running: Vec<ProcessLine>,
    pub finished: Vec<ProcessLine>,
}

impl StatusSnapshot {
    /// Partition every process by state
    pub fn capture(state: &SimState, params: &SchedulerParams) -> Self {
        let mut waiting = Vec::new();
        let mut running = Vec::new();
        for p in state.ready_queue() {
            match p.state {
                ProcessState::Ready => waiting.push(ProcessLine::from(p)),
                _ => running.push(ProcessLine::from(p)),
            }
        }

        Self {
            num_cpu: params.num_cpu,
            waiting,
            running,
            finished: state.finished().map(ProcessLine::from).collect(),
        }
    }

    /// Cores with a resident process to run
    pub fn active_cores(&self) -> u32 {
        (self.running.len() as u32).min(self.num_cpu)
    }

    /// Busy cores as a percentage
    pub fn cpu_utilization(&self) -> u32 {
        if self.num_cpu == 0 {
            return 0;
        }
        self.active_cores() * 100 / self.num_cpu
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CPU utilization: {}%", self.cpu_utilization())?;
        writeln!(f, "Cores used: {}", self.active_cores())?;
        writeln!(f, "Cores available: {}", self.num_cpu - self.active_cores())?;
        writeln!(f, "{}", RULE)?;
        writeln!(f)?;

        writeln!(f, "Waiting processes:")?;
        for p in &self.waiting {
            writeln!(f, "{}  ({})  Core: {}   {} / {}",
                p.name, timestamp(p.created_at), p.core_id, p.progress, p.total_instructions)?;
        }
        writeln!(f, "Running processes:")?;
        for p in &self.running {
            writeln!(f, "{}  ({})  Core: {}   {} / {}",
                p.name, timestamp(p.created_at), p.core_id, p.progress, p.total_instructions)?;
        }
        writeln!(f, "Finished processes:")?;
        for p in &self.finished {
            let at = p.finished_at.unwrap_or(p.created_at);
            writeln!(f, "{}  ({})  Finished   {} / {}",
                p.name, timestamp(at), p.progress, p.total_instructions)?;
        }
        writeln!(f, "{}", RULE)
    }
}

/// Memory usage per resident process (`process-smi`)
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnapshot {
    pub total_memory: usize,
    pub usable_memory: usize,
    pub used_memory: usize,
    pub free_memory: usize,
    pub utilization: f64,
    pub frame_size: usize,
    pub total_frames: usize,
    pub free_frames: usize,
    pub residents: Vec<(String, ProcessId, usize)>,
    pub backing_store: Vec<ProcessId>,
}

impl MemorySnapshot {
    pub fn capture(state: &SimState) -> Self {
        let memory = state.memory();
        let frame_size = memory.frame_size();

        Self {
            total_memory: memory.total_memory(),
            usable_memory: memory.usable_memory(),
            used_memory: memory.used_memory(),
            free_memory: memory.free_memory(),
            utilization: memory.utilization(),
            frame_size,
            total_frames: memory.total_frames(),
            free_frames: memory.available_frames(),
            residents: state
                .ready_queue()
                .filter(|p| p.is_resident())
                .map(|p| (p.name.clone(), p.id, p.memory_footprint(frame_size)))
                .collect(),
            backing_store: memory.backing_store().collect(),
        }
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "| PROCESS-SMI")?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Memory usage: {} / {}", self.used_memory, self.usable_memory)?;
        writeln!(f, "Memory free: {}", self.free_memory)?;
        if self.total_memory > self.usable_memory {
            writeln!(f, "Unusable remainder: {}", self.total_memory - self.usable_memory)?;
        }
        writeln!(f, "Memory util: {:.2}%", self.utilization)?;
        writeln!(f, "Frames: {} free of {} ({} per frame)", self.free_frames, self.total_frames, self.frame_size)?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Resident processes and memory usage:")?;
        for (name, id, footprint) in &self.residents {
            writeln!(f, "{:<10} {:>4}  {}", name, id, footprint)?;
        }
        writeln!(f, "Backing store: {} process(es)", self.backing_store.len())?;
        writeln!(f, "{}", RULE)
    }
}

/// Aggregate statistics (`vmstat`)
#[derive(Debug, Clone, PartialEq)]
pub struct VmStat {
    pub total_memory: usize,
    pub unusable_memory: usize,
    pub used_memory: usize,
    pub free_memory: usize,
    pub external_fragmentation: usize,
    pub active_ticks: u64,
    pub idle_ticks: u64,
    pub cycles: u64,
    pub instructions_executed: u64,
    pub backing_store: usize,
    pub stats: MemoryStats,
}

impl VmStat {
    /// CPU ticks are derived: `active_cores * quantum` busy, the rest idle
    pub fn capture(state: &SimState, params: &SchedulerParams) -> Self {
        let memory = state.memory();
        let running = state.ready_queue().filter(|p| p.is_resident()).count() as u64;
        let active = running.min(params.num_cpu as u64);
        let quantum = params.quantum as u64;

        Self {
            total_memory: memory.total_memory(),
            unusable_memory: memory.unusable_memory(),
            used_memory: memory.used_memory(),
            free_memory: memory.free_memory(),
            external_fragmentation: memory.calculate_external_fragmentation(),
            active_ticks: active * quantum,
            idle_ticks: (params.num_cpu as u64 - active) * quantum,
            cycles: state.cycles(),
            instructions_executed: state.instructions_executed(),
            backing_store: memory.backing_store().count(),
            stats: memory.stats(),
        }
    }
}

impl fmt::Display for VmStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>12} total memory", self.total_memory)?;
        writeln!(f, "{:>12} used memory", self.used_memory)?;
        writeln!(f, "{:>12} free memory", self.free_memory)?;
        writeln!(f, "{:>12} unusable memory", self.unusable_memory)?;
        writeln!(f, "{:>12} external fragmentation", self.external_fragmentation)?;
        writeln!(f, "{:>12} idle cpu ticks", self.idle_ticks)?;
        writeln!(f, "{:>12} active cpu ticks", self.active_ticks)?;
        writeln!(f, "{:>12} total cpu ticks", self.idle_ticks + self.active_ticks)?;
        writeln!(f, "{:>12} scheduling cycles", self.cycles)?;
        writeln!(f, "{:>12} instructions executed", self.instructions_executed)?;
        writeln!(f, "{:>12} allocations", self.stats.allocations)?;
        writeln!(f, "{:>12} allocation failures", self.stats.allocation_failures)?;
        writeln!(f, "{:>12} releases", self.stats.releases)?;
        writeln!(f, "{:>12} evictions", self.stats.evictions)?;
        writeln!(f, "{:>12} in backing store", self.backing_store)
    }
}

/// Status and memory snapshots for `report-util`
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationReport {
    pub generated_at: SystemTime,
    pub status: StatusSnapshot,
    pub memory: MemorySnapshot,
}

impl UtilizationReport {
    pub fn capture(state: &SimState, params: &SchedulerParams) -> Self {
        Self {
            generated_at: SystemTime::now(),
            status: StatusSnapshot::capture(state, params),
            memory: MemorySnapshot::capture(state),
        }
    }

    /// Append the rendered report to a file, creating it if needed
    pub fn append_to(&self, path: &Path) -> SimResult<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        write!(file, "{}", self)?;
        Ok(())
    }
}

impl fmt::Display for UtilizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Utilization report ({})", timestamp(self.generated_at))?;
        write!(f, "{}", self.status)?;
        writeln!(f)?;
        write!(f, "{}", self.memory)?;
        writeln!(f)
    }
}

/// Single-process view (`screen -r`)
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessDetail {
    pub id: ProcessId,
    pub state: ProcessState,
    pub frames: usize,
    pub in_backing_store: bool,
    pub line: ProcessLine,
}

impl ProcessDetail {
    /// Look a process up by name
    pub fn capture(state: &SimState, name: &str) -> Option<Self> {
        let p = state.processes().by_name(name)?;
        Some(Self {
            id: p.id,
            state: p.state,
            frames: p.frames.len(),
            in_backing_store: state.memory().in_backing_store(p.id),
            line: ProcessLine::from(p),
        })
    }
}

impl fmt::Display for ProcessDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Process: {}", self.line.name)?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "State: {}", self.state.label())?;
        writeln!(f, "Core: {}", self.line.core_id)?;
        writeln!(f)?;
        writeln!(f, "Current instruction line: {}", self.line.progress)?;
        writeln!(f, "Lines of code: {}", self.line.total_instructions)?;
        writeln!(f, "Frames held: {}", self.frames)?;
        if self.in_backing_store {
            writeln!(f, "Waiting in backing store")?;
        }
        writeln!(f, "Created: {}", timestamp(self.line.created_at))?;
        if let Some(at) = self.line.finished_at {
            writeln!(f, "Finished: {}", timestamp(at))?;
        }
        Ok(())
    }
}
