//! Persistent worker pool driving barrier-separated phases.
//!
//! One pool exists per update direction. The calling thread is the
//! coordinator: for every phase it publishes the work, wakes all workers and
//! blocks until each of them has finished its slab. No worker can start phase
//! N+1 before the coordinator has seen phase N complete everywhere.
//!
//! ```text
//! IDLE --run_phase--> PHASE_SIGNALED --notify--> MAIN_WAITING --all done--> IDLE
//! ```

use std::any::Any;
use std::fmt;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{Error, Result};

/// One barrier-separated step of an update call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Material hook before the E curl update
    AnteCompute,
    /// Yee curl update of E
    FieldUpdateE,
    /// Material hook after the E curl update
    ApplyE,
    /// Material hook
    PostCompute,
    /// Material hook
    SelfCompute,
    /// CPML correction of E
    PmlE,
    /// Yee curl update of H
    FieldUpdateH,
    /// CPML correction of H
    PmlH,
}

impl Phase {
    /// Phases of one E update, in order.
    pub const E_CYCLE: [Phase; 6] = [
        Phase::AnteCompute,
        Phase::FieldUpdateE,
        Phase::ApplyE,
        Phase::PostCompute,
        Phase::SelfCompute,
        Phase::PmlE,
    ];

    /// Phases of one H update, in order.
    pub const H_CYCLE: [Phase; 2] = [Phase::FieldUpdateH, Phase::PmlH];

    /// Short name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Phase::AnteCompute => "ante_compute",
            Phase::FieldUpdateE => "field_update_e",
            Phase::ApplyE => "apply_e",
            Phase::PostCompute => "post_compute",
            Phase::SelfCompute => "self_compute",
            Phase::PmlE => "pml_e",
            Phase::FieldUpdateH => "field_update_h",
            Phase::PmlH => "pml_h",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Range of `[0, n)` owned by thread `t` out of `n_threads`.
///
/// The ranges of all threads are disjoint and tile `[0, n)`.
#[inline]
pub fn slab(t: usize, n_threads: usize, n: usize) -> Range<usize> {
    (t * n / n_threads)..((t + 1) * n / n_threads)
}

/// Work every worker executes for a phase.
pub(crate) trait PhaseWork: Send + Sync {
    /// Run `phase` on the share of thread `thread`.
    fn run(&self, phase: Phase, thread: usize, n_threads: usize);
}

#[derive(Debug)]
struct Fault {
    thread: usize,
    message: String,
}

struct SeqState {
    generation: u64,
    current: Option<(Phase, Arc<dyn PhaseWork>)>,
    remaining: usize,
    ready: usize,
    stop: bool,
    faults: Vec<Fault>,
    phases_run: u64,
}

struct Shared {
    state: Mutex<SeqState>,
    work: Condvar,
    done: Condvar,
}

impl Shared {
    /// Wait on `done` until `finished` holds or the deadline passes.
    /// Returns false on timeout.
    fn wait_done(
        &self,
        st: &mut MutexGuard<'_, SeqState>,
        deadline: Option<Instant>,
        finished: impl Fn(&SeqState) -> bool,
    ) -> bool {
        while !finished(&**st) {
            match deadline {
                Some(d) => {
                    if self.done.wait_until(st, d).timed_out() && !finished(&**st) {
                        return false;
                    }
                }
                None => self.done.wait(st),
            }
        }
        true
    }
}

/// Fixed set of persistent worker threads plus their phase sequencer.
pub(crate) struct WorkerPool {
    name: &'static str,
    n_threads: usize,
    timeout: Duration,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    detached: bool,
}

impl WorkerPool {
    /// Spawn `n_threads` workers and block until all of them are ready.
    pub(crate) fn new(name: &'static str, n_threads: usize, timeout: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SeqState {
                generation: 0,
                current: None,
                remaining: 0,
                ready: 0,
                stop: false,
                faults: Vec::new(),
                phases_run: 0,
            }),
            work: Condvar::new(),
            done: Condvar::new(),
        });

        let mut pool = Self {
            name,
            n_threads,
            timeout,
            shared,
            handles: Vec::with_capacity(n_threads),
            detached: false,
        };

        for t in 0..n_threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{name}-{t}"))
                .spawn(move || worker_loop(&shared, t, n_threads))?;
            pool.handles.push(handle);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut st = pool.shared.state.lock();
        let ready = pool.shared.wait_done(&mut st, deadline, |s| s.ready == n_threads);
        drop(st);
        if !ready {
            return Err(Error::BarrierTimeout {
                pool: name,
                phase: "startup".into(),
                waited: timeout,
            });
        }
        Ok(pool)
    }

    /// Pool name.
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Worker count.
    pub(crate) fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Number of phases that completed their barrier.
    pub(crate) fn phases_run(&self) -> u64 {
        self.shared.state.lock().phases_run
    }

    /// Run one phase on every worker and wait for all of them.
    ///
    /// A worker panic still counts as arrival; the first fault is returned
    /// once the barrier has drained. A barrier that does not drain within the
    /// timeout yields [`Error::BarrierTimeout`] and leaves the stalled workers
    /// running.
    pub(crate) fn run_phase(&self, phase: Phase, job: &Arc<dyn PhaseWork>) -> Result<()> {
        let start = Instant::now();
        let deadline = start.checked_add(self.timeout);

        let mut st = self.shared.state.lock();
        st.current = Some((phase, Arc::clone(job)));
        st.remaining = self.n_threads;
        st.generation += 1;
        self.shared.work.notify_all();

        if !self.shared.wait_done(&mut st, deadline, |s| s.remaining == 0) {
            return Err(Error::BarrierTimeout {
                pool: self.name,
                phase: phase.to_string(),
                waited: start.elapsed(),
            });
        }

        st.current = None;
        st.phases_run += 1;
        let faults = std::mem::take(&mut st.faults);
        drop(st);

        match faults.into_iter().min_by_key(|f| f.thread) {
            Some(fault) => Err(Error::WorkerPanic {
                pool: self.name,
                thread: fault.thread,
                phase: phase.to_string(),
                message: fault.message,
            }),
            None => Ok(()),
        }
    }

    /// Leave the workers running on drop instead of joining them.
    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }

    /// Stop and join every worker. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        {
            let mut st = self.shared.state.lock();
            st.stop = true;
            self.shared.work.notify_all();
        }
        if self.detached {
            // dropping a JoinHandle detaches the thread
            self.handles.clear();
            return;
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared, thread: usize, n_threads: usize) {
    let mut seen = {
        let mut st = shared.state.lock();
        st.ready += 1;
        shared.done.notify_all();
        st.generation
    };

    loop {
        let current = {
            let mut st = shared.state.lock();
            while !st.stop && st.generation == seen {
                shared.work.wait(&mut st);
            }
            if st.stop {
                return;
            }
            seen = st.generation;
            st.current.clone()
        };

        let outcome = match &current {
            Some((phase, job)) => {
                catch_unwind(AssertUnwindSafe(|| job.run(*phase, thread, n_threads)))
            }
            None => Ok(()),
        };
        drop(current);

        let mut st = shared.state.lock();
        if let Err(payload) = outcome {
            st.faults.push(Fault {
                thread,
                message: panic_message(payload.as_ref()),
            });
        }
        st.remaining = st.remaining.saturating_sub(1);
        if st.remaining == 0 {
            shared.done.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
