//! The data-parallel executor consumed by the planner.
//!
//! The core treats the executor as an opaque parallel runtime: submit a
//! kernel over a 1-D range, wait for quiescence, introspect the device.
//! Kernels submitted here run to completion before `submit` returns, so the
//! submission-order guarantees of the planner hold trivially; a kernel body
//! must be safe to run once per index, in any order, concurrently.
//!
//! Submission counting is part of the interface because plan-level sharing
//! is observable only through it (one kernel per materialized node).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct SubmissionId(pub u64);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceKind {
    Cpu,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub kind: DeviceKind,
    pub name: String,
    pub compute_units: usize,
    pub work_group_size: usize,
    pub global_memory: usize,
    pub local_memory: usize,
}

pub trait Executor {
    /// Run `kernel` once per index in `0..range`.
    fn submit(&self, range: usize, kernel: &(dyn Fn(usize) + Sync)) -> SubmissionId;

    /// Block until all submitted work is finished.
    fn wait(&self);

    fn info(&self) -> DeviceInfo;

    /// Number of kernels submitted so far.
    fn submission_count(&self) -> u64;
}

/// CPU executor; single-threaded for `threads <= 1`, otherwise chunked
/// across scoped threads.
pub struct CpuExecutor {
    threads: usize,
    submissions: AtomicU64,
}

impl CpuExecutor {
    pub fn new() -> Self {
        Self { threads: 1, submissions: AtomicU64::new(0) }
    }

    pub fn with_threads(threads: usize) -> Self {
        assert!(threads >= 1);
        Self { threads, submissions: AtomicU64::new(0) }
    }
}

impl Default for CpuExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for CpuExecutor {
    fn submit(&self, range: usize, kernel: &(dyn Fn(usize) + Sync)) -> SubmissionId {
        let id = self.submissions.fetch_add(1, Ordering::Relaxed);
        let threads = self.threads.min(range.max(1));
        if threads <= 1 {
            for i in 0..range {
                kernel(i);
            }
        } else {
            let chunk = range.div_ceil(threads);
            std::thread::scope(|scope| {
                for t in 0..threads {
                    let lo = t * chunk;
                    let hi = ((t + 1) * chunk).min(range);
                    if lo >= hi {
                        break;
                    }
                    scope.spawn(move || {
                        for i in lo..hi {
                            kernel(i);
                        }
                    });
                }
            });
        }
        SubmissionId(id)
    }

    fn wait(&self) {
        // Kernels complete inside submit.
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            kind: DeviceKind::Cpu,
            name: "cpu".into(),
            compute_units: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            work_group_size: 1,
            global_memory: 0,
            local_memory: 0,
        }
    }

    fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }
}
