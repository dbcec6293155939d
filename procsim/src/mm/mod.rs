//! Memory Management
//!
//! Decides which processes may be resident:
//! - Fixed-size frame table sized `max-overall-mem / mem-per-frame`
//! - First-fit frame grants, scattered (paged) or contiguous (flat)
//! - Backing store of processes waiting for frames
//! - Fragmentation and utilization accounting
//!
//! # Units
//!
//! Frame size is counted in instructions. A process occupies one unit
//! of memory per instruction, so it needs
//! `ceil(total_instructions / frame_size)` frames.

pub mod frame;

pub use frame::{FrameId, FrameTable};

use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::sys::process::{Process, ProcessId, ProcessState};

/// Memory manager counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Successful grants
    pub allocations: u64,
    /// Refused grants
    pub allocation_failures: u64,
    /// Frame sets returned
    pub releases: u64,
    /// Residents forced out to make room
    pub evictions: u64,
}

/// Frame-based memory manager
#[derive(Debug, Clone)]
pub struct MemoryManager {
    /// Frame ownership bitmap
    frames: FrameTable,
    /// Instructions per frame
    frame_size: usize,
    /// Configured capacity in instruction units
    total_memory: usize,
    /// Scattered (true) or contiguous (false) grants
    paging: bool,
    /// Processes that want memory but hold none
    backing_store: BTreeSet<ProcessId>,
    /// Counters
    stats: MemoryStats,
}

impl MemoryManager {
    /// Create a memory manager (a zero frame size is treated as 1)
    pub fn new(total_memory: usize, frame_size: usize, paging: bool) -> Self {
        let frame_size = frame_size.max(1);
        let total_frames = total_memory / frame_size;

        Self {
            frames: FrameTable::new(total_frames),
            frame_size,
            total_memory,
            paging,
            backing_store: BTreeSet::new(),
            stats: MemoryStats::default(),
        }
    }

    /// Frames a process with `instructions` of work occupies
    pub fn frames_needed(&self, instructions: u32) -> usize {
        let instructions = instructions as usize;
        instructions / self.frame_size + usize::from(instructions % self.frame_size != 0)
    }

    /// Try to make a process resident
    ///
    /// On success the process holds its frames and is `ResidentReady`.
    /// On failure it stays non-resident and is kept in the backing store.
    /// Already-resident and finished processes are left alone.
    pub fn allocate(&mut self, process: &mut Process) -> bool {
        if process.is_resident() {
            return true;
        }
        if process.is_finished() {
            return false;
        }

        let needed = self.frames_needed(process.total_instructions).max(1);
        let granted = if self.available_frames() < needed {
            None
        } else if self.paging {
            self.frames.allocate_scattered(needed)
        } else {
            self.frames.allocate_contiguous(needed)
        };

        match granted {
            Some(frames) => {
                trace!("process {} granted frames {:?}", process.id, frames);
                process.frames = frames;
                process.state = ProcessState::ResidentReady;
                self.backing_store.remove(&process.id);
                self.stats.allocations += 1;
                true
            }
            None => {
                if self.backing_store.insert(process.id) {
                    debug!(
                        "process {} needs {} frames, {} free; moved to backing store",
                        process.id, needed, self.available_frames()
                    );
                }
                self.stats.allocation_failures += 1;
                false
            }
        }
    }

    /// Return every frame a process holds
    ///
    /// Releasing a non-resident process is a no-op.
    pub fn release(&mut self, process: &mut Process) {
        if process.frames.is_empty() {
            return;
        }

        for frame in process.frames.drain(..) {
            // frames on a process are always owned; a failure here means
            // the table and the process disagree
            if let Err(e) = self.frames.deallocate(frame) {
                tracing::error!("process {}: {}", process.id, e);
            }
        }

        if process.state != ProcessState::Finished {
            process.state = ProcessState::Ready;
        }
        self.stats.releases += 1;
        trace!("process {} released its frames", process.id);
    }

    /// Force a resident process out to the backing store
    pub fn evict(&mut self, process: &mut Process) {
        if !process.is_resident() || process.is_finished() {
            return;
        }
        self.release(process);
        self.backing_store.insert(process.id);
        self.stats.evictions += 1;
    }

    /// Drop a process from the backing store (e.g. once it finished)
    pub fn forget(&mut self, id: ProcessId) {
        self.backing_store.remove(&id);
    }

    /// Count of free frames
    pub fn available_frames(&self) -> usize {
        self.frames.free_frames()
    }

    /// Count of all frames
    pub fn total_frames(&self) -> usize {
        self.frames.total_frames()
    }

    /// Count of owned frames
    pub fn used_frames(&self) -> usize {
        self.frames.used_frames()
    }

    /// Whether a frame is currently owned
    pub fn is_frame_used(&self, frame: FrameId) -> bool {
        self.frames.is_used(frame)
    }

    /// Sum of `run_length * frame_size` over maximal free runs
    pub fn calculate_external_fragmentation(&self) -> usize {
        self.frames
            .free_runs()
            .iter()
            .map(|&(_, len)| len * self.frame_size)
            .sum()
    }

    /// Configured capacity
    pub fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Memory held by resident processes
    pub fn used_memory(&self) -> usize {
        self.used_frames() * self.frame_size
    }

    /// Capacity covered by whole frames
    pub fn usable_memory(&self) -> usize {
        self.total_frames() * self.frame_size
    }

    /// Configured capacity too small to form a frame
    pub fn unusable_memory(&self) -> usize {
        self.total_memory - self.usable_memory()
    }

    /// Frame-backed capacity not held by anyone
    pub fn free_memory(&self) -> usize {
        self.available_frames() * self.frame_size
    }

    /// Used memory as a percentage of frame-backed capacity
    pub fn utilization(&self) -> f64 {
        let usable = self.usable_memory();
        if usable == 0 {
            return 0.0;
        }
        self.used_memory() as f64 * 100.0 / usable as f64
    }

    /// Processes waiting for frames, lowest id first
    pub fn backing_store(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.backing_store.iter().copied()
    }

    /// Whether a process is waiting for frames
    pub fn in_backing_store(&self, id: ProcessId) -> bool {
        self.backing_store.contains(&id)
    }

    /// Instructions per frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Paged or flat allocation
    pub fn paging(&self) -> bool {
        self.paging
    }

    /// Counters
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }
}
