//! Scheduler
//!
//! Cycle-driven scheduler over [`SimState`]:
//! - Admission of waiting processes into memory
//! - Time slices per policy (round-robin quantum or run-to-completion)
//! - `num-cpu` processes advanced side by side, one per simulated core
//!
//! The lock is held only while state changes. The per-instruction delay is
//! slept with the lock released, and every step re-validates the process
//! it touches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::process::ProcessId;
use super::{sleep_for, SharedState, SimState, StepOutcome};
use crate::config::{EvictionPolicy, SchedulerKind, SimConfig};
use crate::mm::MemoryManager;
use crate::{SimError, SimResult, IDLE_TICK};

/// Validated scheduler parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerParams {
    /// Simulated cores
    pub num_cpu: u32,
    /// Time slice policy
    pub policy: SchedulingPolicy,
    /// Quantum, also the unit of derived CPU ticks
    pub quantum: u32,
    /// Interval between generated processes
    pub batch_interval: Duration,
    /// Instruction count bounds for new processes
    pub min_ins: u32,
    pub max_ins: u32,
    /// Delay per executed instruction
    pub exec_delay: Duration,
    /// Memory capacity, in instruction units
    pub total_memory: usize,
    /// Instructions per frame
    pub frame_size: usize,
    /// Per-process memory bounds
    pub min_mem_per_proc: u64,
    pub max_mem_per_proc: u64,
    /// Scattered or contiguous frame grants
    pub paging: bool,
    /// Victim selection on admission failure
    pub eviction: EvictionPolicy,
    /// Seed for the generator
    pub seed: Option<u64>,
}

impl SchedulerParams {
    /// Validate a raw configuration
    ///
    /// Nonsensical quantum, core count, instruction bounds or frame size
    /// abort construction.
    pub fn from_config(config: &SimConfig) -> SimResult<Self> {
        let quantum = u32::try_from(config.quantum_cycles)
            .ok()
            .filter(|&q| q > 0)
            .ok_or(SimError::InvalidQuantum(config.quantum_cycles))?;

        let num_cpu = u32::try_from(config.num_cpu)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(SimError::InvalidCoreCount(config.num_cpu))?;

        if config.min_ins > config.max_ins {
            return Err(SimError::InvertedInstructionBounds {
                min: config.min_ins,
                max: config.max_ins,
            });
        }
        let min_ins = u32::try_from(config.min_ins)
            .ok()
            .filter(|&n| n > 0)
            .ok_or(SimError::InvalidInstructionCount(config.min_ins))?;
        let max_ins = u32::try_from(config.max_ins)
            .map_err(|_| SimError::InvalidInstructionCount(config.max_ins))?;

        if config.mem_per_frame == 0 {
            return Err(SimError::InvalidFrameSize);
        }
        if config.min_mem_per_proc > config.max_mem_per_proc {
            return Err(SimError::InvertedMemoryBounds {
                min: config.min_mem_per_proc,
                max: config.max_mem_per_proc,
            });
        }
        if config.batch_process_freq.is_zero() {
            return Err(SimError::InvalidConfiguration(
                "batch-process-freq must be > 0".to_string(),
            ));
        }

        if config.max_overall_mem < config.min_mem_per_proc {
            warn!(
                "max-overall-mem {} is below min-mem-per-proc {}; processes may never become resident",
                config.max_overall_mem, config.min_mem_per_proc
            );
        }

        Ok(Self {
            num_cpu,
            policy: SchedulingPolicy::from_params(config.scheduler, quantum),
            quantum,
            batch_interval: config.batch_process_freq,
            min_ins,
            max_ins,
            exec_delay: config.delays_per_exec,
            total_memory: config.max_overall_mem as usize,
            frame_size: config.mem_per_frame as usize,
            min_mem_per_proc: config.min_mem_per_proc,
            max_mem_per_proc: config.max_mem_per_proc,
            paging: config.paging,
            eviction: config.eviction,
            seed: config.seed,
        })
    }

    /// Empty simulation state sized by these parameters
    pub fn new_state(&self) -> SimState {
        SimState::new(
            MemoryManager::new(self.total_memory, self.frame_size, self.paging),
            self.eviction,
        )
    }

    /// Pause between cycles
    pub fn cycle_pause(&self) -> Duration {
        self.exec_delay.max(IDLE_TICK)
    }
}

/// Time slice policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// Preempt after `quantum` instructions
    RoundRobin { quantum: u32 },
    /// Run each process to completion
    Fcfs,
}

impl SchedulingPolicy {
    /// Policy for a configured scheduler kind
    pub fn from_params(kind: SchedulerKind, quantum: u32) -> Self {
        match kind {
            SchedulerKind::RoundRobin => SchedulingPolicy::RoundRobin { quantum },
            SchedulerKind::Fcfs => SchedulingPolicy::Fcfs,
        }
    }

    /// Instructions a process with `remaining` work may run this turn
    pub fn slice_for(&self, remaining: u32) -> u32 {
        match self {
            SchedulingPolicy::RoundRobin { quantum } => remaining.min(*quantum),
            SchedulingPolicy::Fcfs => remaining,
        }
    }

    /// Short name
    pub fn name(&self) -> &'static str {
        match self {
            SchedulingPolicy::RoundRobin { .. } => "rr",
            SchedulingPolicy::Fcfs => "fcfs",
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Processes that became resident
    pub admitted: usize,
    /// Instructions executed
    pub executed: u64,
    /// Processes that finished
    pub completed: usize,
}

/// Scheduler loop over shared state
pub struct Scheduler {
    state: SharedState,
    params: Arc<SchedulerParams>,
    stop: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler over `state`
    pub fn new(state: SharedState, params: Arc<SchedulerParams>, stop: Arc<AtomicBool>) -> Self {
        Self { state, params, stop }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run one scheduling cycle
    pub fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        let runnable = {
            let mut state = self.state.lock();
            summary.admitted = state.admit();
            state.runnable()
        };
        trace!("cycle: {} runnable, {} admitted", runnable.len(), summary.admitted);

        for batch in runnable.chunks(self.params.num_cpu as usize) {
            self.run_batch(batch, &mut summary);
            if self.stopped() {
                break;
            }
        }

        let mut state = self.state.lock();
        state.finish_cycle();
        if cfg!(debug_assertions) {
            if let Err(e) = state.check_invariants() {
                tracing::error!("after cycle {}: {}", state.cycles(), e);
            }
        }

        summary
    }

    fn run_batch(&self, batch: &[ProcessId], summary: &mut CycleSummary) {
        let slices: Vec<(ProcessId, u32)> = {
            let state = self.state.lock();
            batch
                .iter()
                .filter_map(|&pid| state.process(pid).map(|p| (pid, self.params.policy.slice_for(p.remaining()))))
                .collect()
        };
        let longest = slices.iter().map(|&(_, slice)| slice).max().unwrap_or(0);

        for step in 0..longest {
            {
                let mut state = self.state.lock();
                for &(pid, slice) in &slices {
                    if step >= slice {
                        continue;
                    }
                    match state.step(pid) {
                        StepOutcome::Advanced => summary.executed += 1,
                        StepOutcome::Finished => {
                            summary.executed += 1;
                            summary.completed += 1;
                        }
                        StepOutcome::Skipped => {}
                    }
                }
            }

            if !self.params.exec_delay.is_zero() && !sleep_for(&self.stop, self.params.exec_delay) {
                break;
            }
            if self.stopped() {
                break;
            }
        }

        self.state.lock().end_slice(batch);
    }

    /// Run cycles until the stop flag is raised
    pub fn run(&self) {
        info!(
            "Scheduler started: policy {}, {} cores, quantum {}",
            self.params.policy.name(),
            self.params.num_cpu,
            self.params.quantum
        );

        while !self.stopped() {
            let summary = self.run_cycle();
            if summary.executed > 0 {
                debug!(
                    "cycle ran {} instructions, {} processes finished",
                    summary.executed, summary.completed
                );
            }

            if !sleep_for(&self.stop, self.params.cycle_pause()) {
                break;
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn params(config: SimConfig) -> Arc<SchedulerParams> {
        Arc::new(SchedulerParams::from_config(&config).unwrap())
    }

    fn scheduler(config: SimConfig) -> Scheduler {
        let params = params(config);
        let state = Arc::new(Mutex::new(params.new_state()));
        Scheduler::new(state, params, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_params_from_defaults() {
        let p = SchedulerParams::from_config(&SimConfig::default()).unwrap();
        assert_eq!(p.num_cpu, 4);
        assert_eq!(p.policy, SchedulingPolicy::RoundRobin { quantum: 5 });
        assert_eq!(p.frame_size, 256);
        assert_eq!(p.cycle_pause(), IDLE_TICK);
    }

    #[test]
    fn test_zero_quantum_rejected() {
        let config = SimConfig { quantum_cycles: 0, ..SimConfig::default() };
        let err = SchedulerParams::from_config(&config).unwrap_err();
        assert!(matches!(err, SimError::InvalidQuantum(0)));
        assert!(err.is_fatal_config());
    }

    #[test]
    fn test_bad_bounds_rejected() {
        let inverted = SimConfig { min_ins: 10, max_ins: 5, ..SimConfig::default() };
        assert!(matches!(
            SchedulerParams::from_config(&inverted),
            Err(SimError::InvertedInstructionBounds { min: 10, max: 5 })
        ));

        let zero = SimConfig { min_ins: 0, ..SimConfig::default() };
        assert!(matches!(SchedulerParams::from_config(&zero), Err(SimError::InvalidInstructionCount(0))));

        let cores = SimConfig { num_cpu: 0, ..SimConfig::default() };
        assert!(matches!(SchedulerParams::from_config(&cores), Err(SimError::InvalidCoreCount(0))));

        let frame = SimConfig { mem_per_frame: 0, ..SimConfig::default() };
        assert!(matches!(SchedulerParams::from_config(&frame), Err(SimError::InvalidFrameSize)));

        let mem = SimConfig { min_mem_per_proc: 9, max_mem_per_proc: 1, ..SimConfig::default() };
        assert!(matches!(SchedulerParams::from_config(&mem), Err(SimError::InvertedMemoryBounds { .. })));
    }

    #[test]
    fn test_slice_for() {
        let rr = SchedulingPolicy::RoundRobin { quantum: 5 };
        assert_eq!(rr.slice_for(12), 5);
        assert_eq!(rr.slice_for(2), 2);
        assert_eq!(SchedulingPolicy::Fcfs.slice_for(400), 400);
        assert_eq!(SchedulingPolicy::from_params(SchedulerKind::Fcfs, 5), SchedulingPolicy::Fcfs);
    }

    #[test]
    fn test_round_robin_cycles() {
        let s = scheduler(SimConfig { quantum_cycles: 5, num_cpu: 1, ..SimConfig::default() });
        let pid = s.state.lock().spawn_process(None, 12, 1).unwrap();

        let first = s.run_cycle();
        assert_eq!(first.admitted, 1);
        assert_eq!(first.executed, 5);
        assert_eq!(s.state.lock().process(pid).unwrap().progress, 5);

        s.run_cycle();
        assert_eq!(s.state.lock().process(pid).unwrap().progress, 10);

        let last = s.run_cycle();
        assert_eq!(last.executed, 2);
        assert_eq!(last.completed, 1);

        let state = s.state.lock();
        assert!(state.process(pid).unwrap().is_finished());
        assert_eq!(state.cycles(), 3);
        assert_eq!(state.instructions_executed(), 12);
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_fcfs_runs_to_completion() {
        let s = scheduler(SimConfig {
            scheduler: SchedulerKind::Fcfs,
            num_cpu: 1,
            ..SimConfig::default()
        });
        let a = s.state.lock().spawn_process(None, 40, 1).unwrap();
        let b = s.state.lock().spawn_process(None, 7, 1).unwrap();

        let summary = s.run_cycle();
        assert_eq!(summary.completed, 2);

        let state = s.state.lock();
        let order: Vec<ProcessId> = state.finished().map(|p| p.id).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_batches_rotate_queue() {
        let s = scheduler(SimConfig { quantum_cycles: 2, num_cpu: 2, ..SimConfig::default() });
        let ids: Vec<ProcessId> = (0..3)
            .map(|_| s.state.lock().spawn_process(None, 10, 2).unwrap())
            .collect();

        s.run_cycle();

        let state = s.state.lock();
        for &pid in &ids {
            assert_eq!(state.process(pid).unwrap().progress, 2);
        }
        let order: Vec<ProcessId> = state.ready_queue().map(|p| p.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_cycle_without_memory_is_harmless() {
        let s = scheduler(SimConfig { max_overall_mem: 100, ..SimConfig::default() });
        let pid = s.state.lock().spawn_process(None, 10, 4).unwrap();

        let summary = s.run_cycle();
        assert_eq!(summary, CycleSummary::default());

        let state = s.state.lock();
        assert_eq!(state.process(pid).unwrap().progress, 0);
        assert!(state.memory().in_backing_store(pid));
    }

    #[test]
    fn test_huge_delay_still_stops() {
        let s = scheduler(SimConfig {
            delays_per_exec: Duration::from_secs(u64::MAX / 2),
            ..SimConfig::default()
        });
        s.state.lock().spawn_process(None, 10, 4).unwrap();
        let stop = s.stop.clone();

        let handle = std::thread::spawn(move || {
            s.run();
            s
        });
        std::thread::sleep(Duration::from_millis(30));
        stop.store(true, Ordering::Release);

        let s = handle.join().unwrap();
        assert_eq!(s.state.lock().instructions_executed(), 1);
        s.state.lock().check_invariants().unwrap();
    }

    #[test]
    fn test_run_exits_when_stopped() {
        let s = scheduler(SimConfig::default());
        s.stop.store(true, Ordering::Release);
        s.run();
        assert_eq!(s.state.lock().cycles(), 0);
    }
}
