//! procsim: CPU Scheduler and Memory Manager Simulator
//!
//! A discrete simulation of a multi-core machine running synthetic
//! processes under round-robin (or first-come first-served) scheduling,
//! with a frame-based memory manager deciding who may be resident.
//!
//! # Architecture
//!
//! 1. **Memory** - Frame table, first-fit grants, backing store
//! 2. **Processes** - Arena of process records keyed by id
//! 3. **Scheduler** - Admission, time slices, completion
//! 4. **Generator** - Periodic process creation
//! 5. **Reporting** - Read-only snapshots of the above
//!
//! The scheduler and the generator run on their own threads and share a
//! single [`SimState`] behind one lock.
//!
//! # Example
//!
//! ```ignore
//! use procsim::prelude::*;
//!
//! let mut emulator = Emulator::new(&SimConfig::default())?;
//! emulator.start()?;
//!
//! let status = emulator.with_state(|s| StatusSnapshot::capture(s, emulator.params()));
//! println!("{}", status);
//!
//! emulator.stop()?;
//! ```

use std::time::Duration;

pub mod config;
pub mod console;
pub mod error;
pub mod mm;
pub mod report;
pub mod sys;

pub use error::{SimError, SimResult};
pub use config::{SimConfig, SchedulerKind, EvictionPolicy};
pub use mm::{MemoryManager, MemoryStats, FrameTable, FrameId};
pub use sys::{SimState, SharedState};
pub use sys::process::{Process, ProcessId, ProcessState, ProcessTable};
pub use sys::scheduler::{Scheduler, SchedulerParams, SchedulingPolicy};
pub use sys::generator::ProcessGenerator;
pub use sys::emulator::Emulator;
pub use console::{Command, Console, Outcome};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        SimError, SimResult, SimConfig, SchedulerKind, EvictionPolicy,
        MemoryManager, Process, ProcessId, ProcessState,
        SimState, Scheduler, SchedulerParams, SchedulingPolicy,
        Emulator, Console, Command,
        report::{StatusSnapshot, MemorySnapshot, VmStat, UtilizationReport, ProcessDetail},
    };
}

/// Shortest pause between scheduling cycles
pub const IDLE_TICK: Duration = Duration::from_millis(10);

/// Default configuration file
pub const DEFAULT_CONFIG_FILE: &str = "config.txt";

/// Default `report-util` output file
pub const DEFAULT_REPORT_FILE: &str = "csopesy-log.txt";

/// Console prompt
pub const PROMPT: &str = "root:> ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(IDLE_TICK, Duration::from_millis(10));
        assert!(sys::STOP_POLL >= IDLE_TICK);
        assert_eq!(DEFAULT_REPORT_FILE, "csopesy-log.txt");
    }
}
