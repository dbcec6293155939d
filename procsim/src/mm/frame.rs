//! Frame Table
//!
//! Bitmap of simulated memory frames. A set bit marks a frame owned by
//! some process; ownership itself is recorded on the process.

use crate::{SimError, SimResult};

/// Frame index
pub type FrameId = usize;

/// Bitmap-backed frame table
#[derive(Debug, Clone)]
pub struct FrameTable {
    /// Bitmap of frame usage (1 = used, 0 = free)
    bitmap: Vec<u64>,
    /// Total number of frames
    total_frames: usize,
    /// Number of used frames
    used_count: usize,
}

impl FrameTable {
    /// Create a table with every frame free
    pub fn new(total_frames: usize) -> Self {
        let bitmap_size = (total_frames + 63) / 64; // 64 bits per entry

        Self {
            bitmap: vec![0u64; bitmap_size],
            total_frames,
            used_count: 0,
        }
    }

    /// Whether a frame is currently owned
    pub fn is_used(&self, frame: FrameId) -> bool {
        frame < self.total_frames && self.bitmap[frame / 64] & (1 << (frame % 64)) != 0
    }

    fn mark_used(&mut self, frame: FrameId) {
        self.bitmap[frame / 64] |= 1 << (frame % 64);
        self.used_count += 1;
    }

    /// Take the `count` lowest-numbered free frames, wherever they are
    pub fn allocate_scattered(&mut self, count: usize) -> Option<Vec<FrameId>> {
        if count == 0 || count > self.free_frames() {
            return None;
        }

        let mut frames = Vec::with_capacity(count);

        for (idx, &entry) in self.bitmap.iter().enumerate() {
            let mut free = !entry;
            while free != 0 && frames.len() < count {
                let bit = free.trailing_zeros() as usize;
                let frame = idx * 64 + bit;
                if frame >= self.total_frames {
                    break;
                }
                frames.push(frame);
                free &= free - 1;
            }
            if frames.len() == count {
                break;
            }
        }

        for &frame in &frames {
            self.mark_used(frame);
        }

        Some(frames)
    }

    /// Take the first run of `count` contiguous free frames
    pub fn allocate_contiguous(&mut self, count: usize) -> Option<Vec<FrameId>> {
        if count == 0 || count > self.free_frames() {
            return None;
        }

        let mut run_start = 0;
        let mut run_length = 0;

        for frame in 0..self.total_frames {
            if !self.is_used(frame) {
                if run_length == 0 {
                    run_start = frame;
                }
                run_length += 1;

                if run_length >= count {
                    let frames: Vec<FrameId> = (run_start..run_start + count).collect();
                    for &f in &frames {
                        self.mark_used(f);
                    }
                    return Some(frames);
                }
            } else {
                run_length = 0;
            }
        }

        None
    }

    /// Free a single frame
    pub fn deallocate(&mut self, frame: FrameId) -> SimResult<()> {
        if frame >= self.total_frames {
            return Err(SimError::FrameOutOfRange(frame));
        }

        if !self.is_used(frame) {
            tracing::warn!("Double free of frame {}", frame);
            return Err(SimError::DoubleFree(frame));
        }

        self.bitmap[frame / 64] &= !(1 << (frame % 64));
        self.used_count -= 1;

        Ok(())
    }

    /// Maximal runs of free frames as `(start, length)`
    pub fn free_runs(&self) -> Vec<(FrameId, usize)> {
        let mut runs = Vec::new();
        let mut run_start = 0;
        let mut run_length = 0;

        for frame in 0..self.total_frames {
            if self.is_used(frame) {
                if run_length > 0 {
                    runs.push((run_start, run_length));
                    run_length = 0;
                }
            } else {
                if run_length == 0 {
                    run_start = frame;
                }
                run_length += 1;
            }
        }

        if run_length > 0 {
            runs.push((run_start, run_length));
        }

        runs
    }

    /// Get number of free frames
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.used_count
    }

    /// Get number of used frames
    pub fn used_frames(&self) -> usize {
        self.used_count
    }

    /// Get total number of frames
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }
}
