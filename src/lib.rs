//! Multi-threaded FDTD electromagnetic field update engine.
//!
//! The crate advances Maxwell's curl equations on a staggered Yee lattice
//! with convolutional PML (CPML) absorbing layers and per-voxel material
//! models, including dispersive media driven by auxiliary differential
//! equations. Field updates run on a persistent pool of worker threads that
//! step through a fixed sequence of barrier-separated phases.
//!
//! # Layout
//!
//! - [`arrays`]: dense N-dimensional grids and checkpoint slice I/O
//! - [`extensions`]: material models, dispersive poles and the CPML boundary
//! - [`fdtd`]: domain layout, worker pool, Yee kernels and the [`Fdtd`] driver
//! - [`diagnostics`]: the sink the driver reports setup and faults through
//!
//! # Example
//!
//! ```no_run
//! use fdtd_core::fdtd::{Fdtd, FdtdConfig};
//! use fdtd_core::extensions::Material;
//!
//! let config = FdtdConfig::new([40, 40, 40], [10e-9; 3]).courant_fraction(0.9);
//! let mut fdtd = Fdtd::new(config)?;
//! fdtd.set_material(1, Material::dielectric(2.25))?;
//! fdtd.e_mut(fdtd_core::Axis::Z).set(20, 20, 20, 1.0);
//! for _ in 0..100 {
//!     fdtd.update_e()?;
//!     fdtd.update_h()?;
//! }
//! # Ok::<(), fdtd_core::Error>(())
//! ```

pub mod arrays;
pub mod constants;
pub mod diagnostics;
mod error;
pub mod extensions;
pub mod fdtd;

pub use error::{Error, Result};
pub use fdtd::{Fdtd, FdtdConfig};

/// Cartesian axis, also used to name field components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// x axis
    X = 0,
    /// y axis
    Y = 1,
    /// z axis
    Z = 2,
}

impl Axis {
    /// All three axes in order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Axis from a 0/1/2 index.
    ///
    /// # Panics
    /// Panics if `index > 2`.
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Axis::X,
            1 => Axis::Y,
            2 => Axis::Z,
            _ => panic!("axis index {index} out of range"),
        }
    }

    /// 0/1/2 index of this axis.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The two axes following this one cyclically (x -> (y, z)).
    #[inline]
    pub fn cyclic(self) -> (Axis, Axis) {
        let i = self.index();
        (Axis::from_index((i + 1) % 3), Axis::from_index((i + 2) % 3))
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}
