//! Emulator
//!
//! Owns one simulation: the shared state, the validated parameters, and
//! while running, the scheduler and generator threads with their stop flag.
//! Stopping joins both threads before returning, so nothing touches the
//! state once [`Emulator::stop`] is done.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{error, info};

use super::generator::ProcessGenerator;
use super::process::ProcessId;
use super::scheduler::{Scheduler, SchedulerParams};
use super::{SharedState, SimState};
use crate::config::SimConfig;
use crate::{SimError, SimResult};

struct Workers {
    scheduler: JoinHandle<()>,
    generator: JoinHandle<()>,
}

/// One simulation and its worker threads
pub struct Emulator {
    params: Arc<SchedulerParams>,
    state: SharedState,
    stop: Arc<AtomicBool>,
    workers: Option<Workers>,
}

impl Emulator {
    /// Validate a configuration and build an idle simulation
    pub fn new(config: &SimConfig) -> SimResult<Self> {
        let params = Arc::new(SchedulerParams::from_config(config)?);
        let state = Arc::new(Mutex::new(params.new_state()));

        info!(
            "Emulator initialized: {} cores, {} frames of {}",
            params.num_cpu,
            state.lock().memory().total_frames(),
            params.frame_size
        );

        Ok(Self {
            params,
            state,
            stop: Arc::new(AtomicBool::new(false)),
            workers: None,
        })
    }

    /// Start the scheduler and generator threads
    ///
    /// Returns `Ok(false)` if they are already running.
    pub fn start(&mut self) -> SimResult<bool> {
        if self.workers.is_some() {
            return Ok(false);
        }
        self.stop.store(false, Ordering::Release);

        let scheduler = Scheduler::new(self.state.clone(), self.params.clone(), self.stop.clone());
        let scheduler = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || scheduler.run())?;

        let mut generator = ProcessGenerator::new(self.state.clone(), self.params.clone(), self.stop.clone());
        let generator = match thread::Builder::new()
            .name("generator".into())
            .spawn(move || generator.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.store(true, Ordering::Release);
                let _ = scheduler.join();
                return Err(e.into());
            }
        };

        self.workers = Some(Workers { scheduler, generator });
        Ok(true)
    }

    /// Stop both threads and wait for them
    ///
    /// Returns `Ok(false)` if nothing was running.
    pub fn stop(&mut self) -> SimResult<bool> {
        let Some(workers) = self.workers.take() else {
            return Ok(false);
        };
        self.stop.store(true, Ordering::Release);

        let scheduler = workers.scheduler.join();
        let generator = workers.generator.join();
        if scheduler.is_err() || generator.is_err() {
            return Err(SimError::Internal("worker thread panicked".to_string()));
        }

        info!("Emulator stopped");
        Ok(true)
    }

    /// Whether the worker threads are running
    pub fn is_running(&self) -> bool {
        self.workers.is_some()
    }

    /// Shared simulation state
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Validated parameters
    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    /// Create a named process, drawing its size like the generator does
    pub fn create_named(&self, name: &str) -> SimResult<ProcessId> {
        let instructions = rand::thread_rng().gen_range(self.params.min_ins..=self.params.max_ins);
        self.state.lock().spawn_process(Some(name.to_string()), instructions, self.params.num_cpu)
    }

    /// Run a closure against the state under the lock
    pub fn with_state<R>(&self, f: impl FnOnce(&SimState) -> R) -> R {
        f(&self.state.lock())
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Emulator shutdown: {}", e);
        }
    }
}
