//! Process generator
//!
//! Creates one process per `batch-process-freq`, with an instruction count
//! drawn uniformly from `[min-ins, max-ins]`. The k-th process is due at
//! `start + k * interval`, so slow cycles do not make the schedule drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use super::process::ProcessId;
use super::scheduler::SchedulerParams;
use super::{sleep_for, sleep_until, SharedState};
use crate::SimResult;

/// Periodic process source
pub struct ProcessGenerator {
    state: SharedState,
    params: Arc<SchedulerParams>,
    stop: Arc<AtomicBool>,
    rng: StdRng,
}

impl ProcessGenerator {
    /// Create a generator; a configured seed makes instruction counts repeatable
    pub fn new(state: SharedState, params: Arc<SchedulerParams>, stop: Arc<AtomicBool>) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self { state, params, stop, rng }
    }

    /// Draw an instruction count and append a new process
    pub fn generate_one(&mut self) -> SimResult<ProcessId> {
        let instructions = self.rng.gen_range(self.params.min_ins..=self.params.max_ins);
        self.state.lock().spawn_process(None, instructions, self.params.num_cpu)
    }

    /// Produce processes until the stop flag is raised
    pub fn run(&mut self) {
        info!("Process generator started, one process every {:?}", self.params.batch_interval);

        let start = Instant::now();
        let mut due = 1u64;

        while !self.stop.load(Ordering::Acquire) {
            let deadline = u32::try_from(due)
                .ok()
                .and_then(|k| self.params.batch_interval.checked_mul(k))
                .and_then(|offset| start.checked_add(offset));

            // a deadline past the end of the clock is never due
            let due_now = match deadline {
                Some(deadline) => sleep_until(&self.stop, deadline),
                None => sleep_for(&self.stop, Duration::MAX),
            };
            if !due_now {
                break;
            }

            if let Err(e) = self.generate_one() {
                warn!("Process generation failed: {}", e);
            }
            due = due.saturating_add(1);
        }

        info!("Process generator stopped");
    }
}
