//! FDTD core: domain layout, worker pool, Yee kernels and the driver.
//!
//! - [`layout`]: configuration and the resolved [`DomainLayout`]
//! - [`matsgrid`]: per-voxel material ids and the [`MaterialTable`]
//! - [`pool`]: persistent workers stepping through barrier-separated phases
//! - [`engine`]: the [`Fdtd`] driver
//! - [`simulation`]: run control with end conditions and progress reporting

pub mod engine;
pub(crate) mod kernels;
pub mod layout;
pub mod matsgrid;
pub mod pool;
pub mod simulation;

pub use engine::Fdtd;
pub use layout::{DomainLayout, FdtdConfig, MatsLayout, Mode, OutputConfig};
pub use matsgrid::{MaterialTable, MatsGrid};
pub use pool::{slab, Phase};
pub use simulation::{EndCondition, Simulation, SimulationState, SimulationStats, StepHook};
