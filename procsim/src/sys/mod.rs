//! Simulation core
//!
//! [`SimState`] is the one object the generator, the scheduler and the
//! reporting facade share. It owns the process arena, the ready queue,
//! the finished list and the memory manager, and every mutation of the
//! simulation goes through it while its lock is held.

pub mod process;
pub mod scheduler;
pub mod generator;
pub mod emulator;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::EvictionPolicy;
use crate::mm::MemoryManager;
use crate::{SimError, SimResult};
use process::{Process, ProcessId, ProcessState, ProcessTable};

/// Simulation state behind the single lock
pub type SharedState = Arc<Mutex<SimState>>;

/// Longest uninterrupted sleep while waiting on a stop flag
pub const STOP_POLL: Duration = Duration::from_millis(50);

/// Result of executing one instruction of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Progress advanced, work remains
    Advanced,
    /// That was the last instruction
    Finished,
    /// Process was not runnable any more
    Skipped,
}

/// Shared scheduler state
#[derive(Debug)]
pub struct SimState {
    /// All processes ever created
    table: ProcessTable,
    /// Unfinished processes in round-robin order
    ready: VecDeque<ProcessId>,
    /// Finished processes in completion order
    finished: Vec<ProcessId>,
    /// Frame allocator and backing store
    memory: MemoryManager,
    /// What to do when admission fails
    eviction: EvictionPolicy,
    /// Completed scheduling cycles
    cycles: u64,
    /// Instructions executed across all processes
    instructions_executed: u64,
}

impl SimState {
    /// Create an empty simulation around a memory manager
    pub fn new(memory: MemoryManager, eviction: EvictionPolicy) -> Self {
        Self {
            table: ProcessTable::new(),
            ready: VecDeque::new(),
            finished: Vec::new(),
            memory,
            eviction,
            cycles: 0,
            instructions_executed: 0,
        }
    }

    /// Create a process and append it to the ready queue
    ///
    /// Unnamed processes are called `p{id:02}`. The core label is
    /// `id mod num_cpu`.
    pub fn spawn_process(
        &mut self,
        name: Option<String>,
        instructions: u32,
        num_cpu: u32,
    ) -> SimResult<ProcessId> {
        if instructions == 0 {
            return Err(SimError::InvalidInstructionCount(0));
        }
        if let Some(name) = &name {
            if self.table.contains_name(name) {
                return Err(SimError::ProcessExists(name.clone()));
            }
        }

        let pid = self.table.allocate_id();
        let name = name.unwrap_or_else(|| format!("p{:02}", pid));
        let core_id = pid % num_cpu.max(1);

        self.table.insert(Process::new(pid, name.clone(), instructions, core_id))?;
        self.ready.push_back(pid);

        info!("Created process {} ({}) with {} instructions", pid, name, instructions);
        Ok(pid)
    }

    /// Try to bring every non-resident ready process into memory
    ///
    /// Returns how many processes became resident.
    pub fn admit(&mut self) -> usize {
        let waiting: Vec<ProcessId> = self.ready.iter()
            .copied()
            .filter(|&pid| self.table.get(pid).map_or(false, |p| !p.is_resident()))
            .collect();

        let mut admitted = 0;
        for pid in waiting {
            let mut granted = self.try_allocate(pid);

            if !granted && self.eviction == EvictionPolicy::Oldest && self.evict_for(pid) {
                granted = self.try_allocate(pid);
            }

            if granted {
                admitted += 1;
            }
        }
        admitted
    }

    fn try_allocate(&mut self, pid: ProcessId) -> bool {
        let cycle = self.cycles;
        let Some(process) = self.table.get_mut(pid) else {
            return false;
        };

        if self.memory.allocate(process) {
            process.admitted_cycle = Some(cycle);
            process.slices_since_admission = 0;
            debug!("process {} resident with {} frames", pid, process.frames.len());
            true
        } else {
            false
        }
    }

    /// Evict the oldest residents until `pid` would fit
    ///
    /// Only residents that have run at least one slice since admission are
    /// candidates. Nothing is evicted unless enough room can be made.
    pub fn evict_for(&mut self, pid: ProcessId) -> bool {
        let Some(needed) = self.table.get(pid).map(|p| self.memory.frames_needed(p.total_instructions).max(1)) else {
            return false;
        };
        if needed > self.memory.total_frames() {
            return false;
        }

        let mut victims: Vec<&Process> = self.table.iter()
            .filter(|p| p.id != pid && p.is_resident() && !p.is_finished())
            .filter(|p| p.state != ProcessState::Running && p.slices_since_admission > 0)
            .collect();
        victims.sort_by_key(|p| (p.admitted_cycle, p.id));

        let mut reclaimable = self.memory.available_frames();
        let mut chosen = Vec::new();
        for victim in victims {
            if reclaimable >= needed {
                break;
            }
            reclaimable += victim.frames.len();
            chosen.push(victim.id);
        }
        if reclaimable < needed {
            return false;
        }

        for victim in chosen {
            if let Some(process) = self.table.get_mut(victim) {
                info!("Evicting process {} to make room for process {}", victim, pid);
                self.memory.evict(process);
            }
        }
        true
    }

    /// Resident, unfinished processes in ready-queue order
    pub fn runnable(&self) -> Vec<ProcessId> {
        self.ready.iter()
            .copied()
            .filter(|&pid| {
                self.table.get(pid).map_or(false, |p| p.is_resident() && !p.is_finished())
            })
            .collect()
    }

    /// Execute one instruction of a process
    pub fn step(&mut self, pid: ProcessId) -> StepOutcome {
        let Some(process) = self.table.get_mut(pid) else {
            return StepOutcome::Skipped;
        };
        if !process.is_resident() || process.is_finished() {
            return StepOutcome::Skipped;
        }

        process.state = ProcessState::Running;
        let done = process.advance();
        self.instructions_executed += 1;

        if done {
            self.complete(pid);
            StepOutcome::Finished
        } else {
            StepOutcome::Advanced
        }
    }

    fn complete(&mut self, pid: ProcessId) {
        let Some(process) = self.table.get_mut(pid) else {
            return;
        };

        process.state = ProcessState::Finished;
        process.finished_at = Some(SystemTime::now());
        self.memory.release(process);
        self.memory.forget(pid);

        self.ready.retain(|&p| p != pid);
        self.finished.push(pid);
        info!("Process {} finished", pid);
    }

    /// Close a time slice for a batch of processes
    ///
    /// Unfinished members return to `ResidentReady` and move to the back of
    /// the ready queue, keeping their relative order.
    pub fn end_slice(&mut self, batch: &[ProcessId]) {
        for &pid in batch {
            let Some(process) = self.table.get_mut(pid) else {
                continue;
            };
            if process.is_finished() {
                continue;
            }

            if process.state == ProcessState::Running {
                process.state = ProcessState::ResidentReady;
            }
            process.slices_since_admission += 1;

            self.ready.retain(|&p| p != pid);
            self.ready.push_back(pid);
        }
    }

    /// Mark a scheduling cycle as complete
    pub fn finish_cycle(&mut self) {
        self.cycles += 1;
    }

    /// Look a process up by id
    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.table.get(pid)
    }

    /// The process arena
    pub fn processes(&self) -> &ProcessTable {
        &self.table
    }

    /// Unfinished processes in queue order
    pub fn ready_queue(&self) -> impl Iterator<Item = &Process> {
        self.ready.iter().filter_map(|&pid| self.table.get(pid))
    }

    /// Finished processes in completion order
    pub fn finished(&self) -> impl Iterator<Item = &Process> {
        self.finished.iter().filter_map(|&pid| self.table.get(pid))
    }

    /// The memory manager
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Completed scheduling cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Instructions executed so far
    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    /// Verify frame accounting and collection membership
    pub fn check_invariants(&self) -> SimResult<()> {
        let violated = |msg: String| Err(SimError::InvariantViolated(msg));

        let mut membership: HashMap<ProcessId, (usize, usize)> = HashMap::new();
        for &pid in &self.ready {
            membership.entry(pid).or_default().0 += 1;
        }
        for &pid in &self.finished {
            membership.entry(pid).or_default().1 += 1;
        }

        let mut owned = HashSet::new();
        let mut held = 0;
        let mut listed = 0;
        for p in self.table.iter() {
            if p.progress > p.total_instructions {
                return violated(format!("process {} progress {} > {}", p.id, p.progress, p.total_instructions));
            }
            if (p.state == ProcessState::Finished) != p.is_finished() {
                return violated(format!("process {} state {:?} at {}/{}", p.id, p.state, p.progress, p.total_instructions));
            }
            if p.is_finished() && p.is_resident() {
                return violated(format!("finished process {} still holds frames", p.id));
            }
            let resident_state = matches!(p.state, ProcessState::ResidentReady | ProcessState::Running);
            if resident_state != p.is_resident() {
                return violated(format!("process {} is {:?} with {} frames", p.id, p.state, p.frames.len()));
            }
            for &frame in &p.frames {
                if !owned.insert(frame) {
                    return violated(format!("frame {} owned twice", frame));
                }
                if !self.memory.is_frame_used(frame) {
                    return violated(format!("frame {} held by process {} but free", frame, p.id));
                }
            }
            held += p.frames.len();

            let (queued, done) = membership.get(&p.id).copied().unwrap_or_default();
            listed += usize::from(membership.contains_key(&p.id));
            let expected = if p.is_finished() { (0, 1) } else { (1, 0) };
            if (queued, done) != expected {
                return violated(format!("process {} appears {} times queued, {} times finished", p.id, queued, done));
            }
        }

        if listed != membership.len() {
            return violated(format!("{} listed ids have no process", membership.len() - listed));
        }
        if held != self.memory.used_frames() {
            return violated(format!("{} frames held, {} marked used", held, self.memory.used_frames()));
        }
        Ok(())
    }
}

/// Sleep until `deadline`, waking early if `stop` is raised
///
/// Returns false when stopped.
pub fn sleep_until(stop: &AtomicBool, deadline: Instant) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Sleep for `duration`, waking early if `stop` is raised
///
/// A duration past the end of the clock waits for `stop` alone. Returns
/// false when stopped.
pub fn sleep_for(stop: &AtomicBool, duration: Duration) -> bool {
    match Instant::now().checked_add(duration) {
        Some(deadline) => sleep_until(stop, deadline),
        None => {
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(STOP_POLL);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(total_memory: usize, frame_size: usize) -> SimState {
        SimState::new(MemoryManager::new(total_memory, frame_size, true), EvictionPolicy::None)
    }

    #[test]
    fn test_spawn_names_and_cores() {
        let mut s = state(1024, 256);
        let a = s.spawn_process(None, 10, 4).unwrap();
        let b = s.spawn_process(Some("custom".into()), 10, 4).unwrap();

        assert_eq!(s.process(a).unwrap().name, "p01");
        assert_eq!(s.process(a).unwrap().core_id, 1);
        assert_eq!(s.process(b).unwrap().name, "custom");
        assert_eq!(s.process(b).unwrap().core_id, 2);
        assert_eq!(s.ready_queue().count(), 2);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_spawn_rejects_duplicates_and_empty_work() {
        let mut s = state(1024, 256);
        s.spawn_process(Some("x".into()), 10, 1).unwrap();
        assert!(matches!(s.spawn_process(Some("x".into()), 10, 1), Err(SimError::ProcessExists(_))));
        assert!(matches!(s.spawn_process(None, 0, 1), Err(SimError::InvalidInstructionCount(0))));
    }

    #[test]
    fn test_admit_in_queue_order() {
        let mut s = state(512, 256);
        let a = s.spawn_process(None, 256, 1).unwrap();
        let b = s.spawn_process(None, 512, 1).unwrap();
        let c = s.spawn_process(None, 256, 1).unwrap();

        // a takes one frame, b needs two of the one left, c takes the last
        assert_eq!(s.admit(), 2);
        assert!(s.process(a).unwrap().is_resident());
        assert!(!s.process(b).unwrap().is_resident());
        assert!(s.process(c).unwrap().is_resident());
        assert!(s.memory().in_backing_store(b));
        assert_eq!(s.runnable(), vec![a, c]);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_step_completes_and_releases() {
        let mut s = state(1024, 256);
        let a = s.spawn_process(None, 2, 1).unwrap();
        s.admit();

        assert_eq!(s.step(a), StepOutcome::Advanced);
        assert_eq!(s.process(a).unwrap().state, ProcessState::Running);
        assert_eq!(s.step(a), StepOutcome::Finished);

        let p = s.process(a).unwrap();
        assert_eq!(p.state, ProcessState::Finished);
        assert!(p.finished_at.is_some());
        assert!(!p.is_resident());
        assert_eq!(s.memory().used_frames(), 0);
        assert_eq!(s.finished().count(), 1);
        assert_eq!(s.ready_queue().count(), 0);
        assert_eq!(s.step(a), StepOutcome::Skipped);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_step_skips_non_resident() {
        let mut s = state(0, 256);
        let a = s.spawn_process(None, 2, 1).unwrap();
        s.admit();
        assert_eq!(s.step(a), StepOutcome::Skipped);
        assert_eq!(s.process(a).unwrap().progress, 0);
    }

    #[test]
    fn test_end_slice_rotates_queue() {
        let mut s = state(1024, 256);
        let a = s.spawn_process(None, 10, 1).unwrap();
        let b = s.spawn_process(None, 10, 1).unwrap();
        let c = s.spawn_process(None, 10, 1).unwrap();
        s.admit();

        s.step(a);
        s.end_slice(&[a]);

        let order: Vec<ProcessId> = s.ready_queue().map(|p| p.id).collect();
        assert_eq!(order, vec![b, c, a]);
        assert_eq!(s.process(a).unwrap().state, ProcessState::ResidentReady);
        assert_eq!(s.process(a).unwrap().slices_since_admission, 1);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_makes_room() {
        let mut s = SimState::new(MemoryManager::new(512, 256, true), EvictionPolicy::Oldest);
        let a = s.spawn_process(None, 512, 1).unwrap();
        s.admit();
        let b = s.spawn_process(None, 256, 1).unwrap();

        // a has not had a turn yet, so it is protected
        assert_eq!(s.admit(), 0);

        s.step(a);
        s.end_slice(&[a]);
        assert_eq!(s.admit(), 1);

        assert!(!s.process(a).unwrap().is_resident());
        assert_eq!(s.process(a).unwrap().progress, 1);
        assert!(s.process(b).unwrap().is_resident());
        assert!(s.memory().in_backing_store(a));
        assert_eq!(s.memory().stats().evictions, 1);
        s.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_skips_impossible_requests() {
        let mut s = SimState::new(MemoryManager::new(512, 256, true), EvictionPolicy::Oldest);
        let a = s.spawn_process(None, 256, 1).unwrap();
        s.admit();
        s.step(a);
        s.end_slice(&[a]);

        // three frames can never fit in two
        s.spawn_process(None, 700, 1).unwrap();
        s.admit();
        assert!(s.process(a).unwrap().is_resident());
        assert_eq!(s.memory().stats().evictions, 0);
    }

    #[test]
    fn test_check_invariants_catches_bad_state() {
        let mut s = state(1024, 256);
        let a = s.spawn_process(None, 5, 1).unwrap();
        s.admit();
        s.table.get_mut(a).unwrap().frames.push(3);
        assert!(matches!(s.check_invariants(), Err(SimError::InvariantViolated(_))));
    }

    #[test]
    fn test_check_invariants_catches_duplicate_queue_entry() {
        let mut s = state(1024, 256);
        let a = s.spawn_process(None, 5, 1).unwrap();
        s.ready.push_back(a);
        assert!(matches!(s.check_invariants(), Err(SimError::InvariantViolated(_))));

        s.ready.pop_back();
        s.finished.push(99);
        assert!(matches!(s.check_invariants(), Err(SimError::InvariantViolated(_))));
    }

    #[test]
    fn test_check_invariants_scales_with_finished_list() {
        let mut s = state(1024, 256);
        for _ in 0..20_000 {
            let pid = s.spawn_process(None, 1, 4).unwrap();
            s.admit();
            s.step(pid);
        }
        assert_eq!(s.finished().count(), 20_000);

        let start = Instant::now();
        s.check_invariants().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_sleep_for_unbounded_duration() {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::spawn(move || sleep_for(&flag, Duration::MAX));

        std::thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::Release);
        assert!(!handle.join().unwrap());

        let go = AtomicBool::new(false);
        assert!(sleep_for(&go, Duration::from_millis(5)));
    }

    #[test]
    fn test_sleep_until_observes_stop() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_until(&stop, start + Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));

        let go = AtomicBool::new(false);
        assert!(sleep_until(&go, Instant::now() + Duration::from_millis(5)));
    }
}
