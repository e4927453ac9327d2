//! Error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the engine.
///
/// There is no mid-step recovery: configuration problems are caught when the
/// engine is built or reconfigured, and worker faults poison the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value or combination.
    #[error("configuration error: {0}")]
    Config(String),

    /// A caller-supplied grid does not match the declared size.
    #[error("{what}: expected dimensions {expected:?}, found {found:?}")]
    DimensionMismatch {
        /// What was being checked
        what: &'static str,
        /// Dimensions the engine expects
        expected: Vec<usize>,
        /// Dimensions the caller supplied
        found: Vec<usize>,
    },

    /// A grid could not be allocated.
    #[error("failed to allocate {bytes} bytes")]
    Allocation {
        /// Requested size (saturated on overflow)
        bytes: usize,
    },

    /// Degenerate numeric input (zero spacing, non-finite coefficients, ...).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// A worker thread panicked while executing a phase.
    #[error("worker {thread} of pool '{pool}' panicked during phase {phase}: {message}")]
    WorkerPanic {
        /// Pool name ("fdtd-e" or "fdtd-h")
        pool: &'static str,
        /// Worker index
        thread: usize,
        /// Phase being executed
        phase: String,
        /// Panic payload
        message: String,
    },

    /// A phase barrier did not drain within the liveness timeout.
    #[error("pool '{pool}' stalled in phase {phase} for {waited:?}")]
    BarrierTimeout {
        /// Pool name
        pool: &'static str,
        /// Phase being executed
        phase: String,
        /// How long the coordinator waited
        waited: Duration,
    },

    /// The engine was poisoned by an earlier worker fault.
    #[error("engine is poisoned by an earlier worker fault")]
    Poisoned,

    /// I/O failure while reading or writing checkpoint slices.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
