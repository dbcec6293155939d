//! Process Management
//!
//! A process is a synthetic workload with:
//! - A fixed instruction budget
//! - A progress counter
//! - A set of memory frames while resident
//!
//! Processes live in a [`ProcessTable`] arena keyed by id and are never
//! removed while a simulation runs; everything else refers to them by id.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::mm::FrameId;
use crate::{SimError, SimResult};

/// Process ID type
pub type ProcessId = u32;

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Waiting in the ready queue without memory
    Ready,
    /// Holds frames, waiting for its turn
    ResidentReady,
    /// Inside its time slice
    Running,
    /// All instructions executed
    Finished,
}

impl ProcessState {
    /// Short label used in reports
    pub fn label(&self) -> &'static str {
        match self {
            ProcessState::Ready => "Ready",
            ProcessState::ResidentReady => "Resident",
            ProcessState::Running => "Running",
            ProcessState::Finished => "Finished",
        }
    }
}

/// Process structure
#[derive(Debug, Clone)]
pub struct Process {
    /// Process ID
    pub id: ProcessId,
    /// Process name
    pub name: String,
    /// Instructions to execute, fixed at creation
    pub total_instructions: u32,
    /// Instructions executed so far
    pub progress: u32,
    /// Informational core label
    pub core_id: u32,
    /// Process state
    pub state: ProcessState,
    /// Frames owned while resident
    pub frames: Vec<FrameId>,
    /// Creation time
    pub created_at: SystemTime,
    /// Completion time
    pub finished_at: Option<SystemTime>,
    /// Cycle in which memory was last granted
    pub admitted_cycle: Option<u64>,
    /// Time slices run since the last grant
    pub slices_since_admission: u32,
}

impl Process {
    /// Create new process
    pub fn new(id: ProcessId, name: impl Into<String>, total_instructions: u32, core_id: u32) -> Self {
        Self {
            id,
            name: name.into(),
            total_instructions,
            progress: 0,
            core_id,
            state: ProcessState::Ready,
            frames: Vec::new(),
            created_at: SystemTime::now(),
            finished_at: None,
            admitted_cycle: None,
            slices_since_admission: 0,
        }
    }

    /// Instructions still to execute
    pub fn remaining(&self) -> u32 {
        self.total_instructions - self.progress
    }

    /// Check if all instructions have executed
    pub fn is_finished(&self) -> bool {
        self.progress >= self.total_instructions
    }

    /// Check if the process holds memory
    pub fn is_resident(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Execute one instruction; returns true when this was the last one
    pub fn advance(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.progress += 1;
        self.is_finished()
    }

    /// Memory held, in instruction units
    pub fn memory_footprint(&self, frame_size: usize) -> usize {
        self.frames.len() * frame_size
    }
}

/// Process table
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: Vec<Option<Process>>,
    names: HashMap<String, ProcessId>,
    next_pid: ProcessId,
}

impl ProcessTable {
    /// Create an empty table; ids start at 1
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            names: HashMap::new(),
            next_pid: 1,
        }
    }

    /// Reserve the next process id
    pub fn allocate_id(&mut self) -> ProcessId {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Store a process under its id
    pub fn insert(&mut self, process: Process) -> SimResult<()> {
        if self.names.contains_key(&process.name) {
            return Err(SimError::ProcessExists(process.name));
        }

        let pid = process.id as usize;
        while self.processes.len() <= pid {
            self.processes.push(None);
        }
        if self.processes[pid].is_some() {
            return Err(SimError::ProcessExists(format!("pid {}", pid)));
        }

        self.names.insert(process.name.clone(), process.id);
        self.processes[pid] = Some(process);
        Ok(())
    }

    /// Get process by ID
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid as usize).and_then(|p| p.as_ref())
    }

    /// Get mutable process by ID
    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(pid as usize).and_then(|p| p.as_mut())
    }

    /// Look a process up by name
    pub fn by_name(&self, name: &str) -> Option<&Process> {
        self.names.get(name).and_then(|&pid| self.get(pid))
    }

    /// Whether a name is taken
    pub fn contains_name(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of processes ever created
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no process exists
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All processes in id order
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter().filter_map(|p| p.as_ref())
    }
}
