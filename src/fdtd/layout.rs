//! Domain layout and construction configuration.
//!
//! The allocated domain is the structure region surrounded on each side by
//! padding and then CPML layers:
//!
//! ```text
//! | pml_m | pad_m |    structure (N_s)    | pad_p | pml_p |
//! 0       ^ xs_s                          ^ xs_e          N
//! ```

use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{courant_limit, MU0};
use crate::extensions::cpml::{CpmlBoundaries, Face, PmlSide};
use crate::{Axis, Error, Result};

/// Cells of padding put in front of an enabled z CPML in oblique mode.
pub const OBLIQUE_Z_PADDING: usize = 10;

/// Propagation mode. Selects the lateral edge convention of the Yee kernels
/// and the default padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Plain wrap-around at every edge
    #[default]
    Normal,
    /// Oblique-incidence phase compensation: on x and y the stencils read an
    /// extra guard cell at index `N` instead of wrapping, and the field grids
    /// are one cell larger on those axes
    ObliquePhase,
}

/// How material ids are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatsLayout {
    /// One id grid shared by the three E components
    #[default]
    Shared,
    /// One id grid per E component
    PerAxis,
}

/// Where run artefacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Output directory
    pub directory: PathBuf,
    /// File-name prefix
    pub prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: String::new(),
        }
    }
}

impl OutputConfig {
    /// Create with a directory and prefix.
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
        }
    }

    /// `directory/prefix + name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}{}", self.prefix, name))
    }
}

/// Construction parameters of an [`crate::Fdtd`].
#[derive(Debug, Clone)]
pub struct FdtdConfig {
    /// Structure size (cells) before padding and CPML
    pub size: [usize; 3],
    /// Cell size (m)
    pub spacing: [f64; 3],
    /// Explicit timestep (s). Overrides `courant_fraction`.
    pub dt: Option<f64>,
    /// Timestep as a fraction of the Courant limit
    pub courant_fraction: f64,
    /// Propagation mode
    pub mode: Mode,
    /// CPML per face
    pub pml: CpmlBoundaries,
    /// Padding per face `[x-, x+, y-, y+, z-, z+]`; derived from the mode
    /// when unset
    pub padding: Option<[usize; 6]>,
    /// Worker threads per pool; defaults to the rayon thread count
    pub n_threads: Option<usize>,
    /// Liveness timeout of every barrier wait
    pub barrier_timeout: Duration,
    /// Material id storage
    pub mats_layout: MatsLayout,
    /// Output naming
    pub output: OutputConfig,
    /// Assert finite field values after every kernel (debug builds only)
    pub check_finite: bool,
}

impl FdtdConfig {
    /// Configuration with the given structure size and cell size, a timestep
    /// at 99% of the Courant limit, no CPML and no padding.
    pub fn new(size: [usize; 3], spacing: [f64; 3]) -> Self {
        Self {
            size,
            spacing,
            dt: None,
            courant_fraction: 0.99,
            mode: Mode::Normal,
            pml: CpmlBoundaries::default(),
            padding: None,
            n_threads: None,
            barrier_timeout: Duration::from_secs(300),
            mats_layout: MatsLayout::Shared,
            output: OutputConfig::default(),
            check_finite: false,
        }
    }

    /// Set an explicit timestep.
    pub fn dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }

    /// Derive the timestep from the Courant limit.
    pub fn courant_fraction(mut self, fraction: f64) -> Self {
        self.courant_fraction = fraction;
        self.dt = None;
        self
    }

    /// Set the propagation mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set all CPML faces at once.
    pub fn pml(mut self, pml: CpmlBoundaries) -> Self {
        self.pml = pml;
        self
    }

    /// Set one CPML face.
    pub fn pml_side(mut self, face: Face, side: PmlSide) -> Self {
        self.pml.sides[face.index()] = side;
        self
    }

    /// Set explicit padding `[x-, x+, y-, y+, z-, z+]`.
    pub fn padding(mut self, padding: [usize; 6]) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Set the worker count per pool.
    pub fn n_threads(mut self, n: usize) -> Self {
        self.n_threads = Some(n);
        self
    }

    /// Set the barrier liveness timeout.
    pub fn barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    /// Set the material id storage.
    pub fn mats_layout(mut self, layout: MatsLayout) -> Self {
        self.mats_layout = layout;
        self
    }

    /// Set the output naming.
    pub fn output(mut self, output: OutputConfig) -> Self {
        self.output = output;
        self
    }

    /// Enable finite-value assertions in debug builds.
    pub fn check_finite(mut self, on: bool) -> Self {
        self.check_finite = on;
        self
    }

    /// Timestep this configuration resolves to.
    pub fn resolved_dt(&self) -> f64 {
        self.dt
            .unwrap_or_else(|| self.courant_fraction * courant_limit(self.spacing))
    }

    /// Worker count this configuration resolves to.
    pub fn resolved_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(rayon::current_num_threads)
    }

    /// Padding this configuration resolves to.
    pub fn resolved_padding(&self) -> [usize; 6] {
        if let Some(p) = self.padding {
            return p;
        }
        match self.mode {
            Mode::Normal => [0; 6],
            Mode::ObliquePhase => {
                let z = |face: usize| {
                    if self.pml.sides[face].is_enabled() {
                        OBLIQUE_Z_PADDING
                    } else {
                        0
                    }
                };
                [0, 0, 0, 0, z(4), z(5)]
            }
        }
    }
}

/// Resolved geometry of the allocated domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainLayout {
    /// Propagation mode
    pub mode: Mode,
    /// Structure size
    pub structure: [usize; 3],
    /// CPML widths `[x-, x+, y-, y+, z-, z+]`
    pub pml: [usize; 6],
    /// Padding widths `[x-, x+, y-, y+, z-, z+]`
    pub padding: [usize; 6],
    /// Logical extent `N_s + pad_m + pad_p + pml_m + pml_p`
    pub extent: [usize; 3],
    /// Allocated field extent (one guard cell more on guarded axes)
    pub alloc: [usize; 3],
    /// Axes whose stencils read a guard cell at index `N`
    pub guard: [bool; 3],
    /// Cell size
    pub spacing: [f64; 3],
    /// Timestep
    pub dt: f64,
}

impl DomainLayout {
    /// Validate `config` and resolve the layout.
    pub fn from_config(config: &FdtdConfig) -> Result<Self> {
        if config.size.iter().any(|&n| n == 0) {
            return Err(Error::Config(format!(
                "structure size must be at least 1 on every axis, got {:?}",
                config.size
            )));
        }
        if config.spacing.iter().any(|&d| !(d.is_finite() && d > 0.0)) {
            return Err(Error::Config(format!(
                "cell size must be positive and finite, got {:?}",
                config.spacing
            )));
        }

        let dt = config.resolved_dt();
        let limit = courant_limit(config.spacing);
        if !(dt.is_finite() && dt > 0.0) {
            return Err(Error::Config(format!("timestep must be positive, got {dt}")));
        }
        if dt > limit {
            return Err(Error::Config(format!(
                "timestep {dt:e} s exceeds the Courant limit {limit:e} s"
            )));
        }
        if config.resolved_threads() == 0 {
            return Err(Error::Config("at least one worker thread is required".into()));
        }

        let pml = config.pml.widths();
        let padding = config.resolved_padding();
        let guard = match config.mode {
            Mode::Normal => [false; 3],
            Mode::ObliquePhase => {
                if pml[..4].iter().chain(&padding[..4]).any(|&w| w > 0) {
                    return Err(Error::Config(
                        "oblique phase mode allows neither CPML nor padding on x and y".into(),
                    ));
                }
                [true, true, false]
            }
        };

        let mut extent = [0usize; 3];
        let mut alloc = [0usize; 3];
        for a in 0..3 {
            let n = [
                config.size[a],
                padding[2 * a],
                padding[2 * a + 1],
                pml[2 * a],
                pml[2 * a + 1],
            ]
            .iter()
            .try_fold(0usize, |acc, &w| acc.checked_add(w))
            .ok_or(Error::Allocation { bytes: usize::MAX })?;
            if pml[2 * a] + pml[2 * a + 1] >= n {
                return Err(Error::Config(format!(
                    "CPML on {} leaves no interior cell",
                    Axis::from_index(a)
                )));
            }
            extent[a] = n;
            alloc[a] = n + usize::from(guard[a]);
        }

        // Every grid must be addressable; report before allocating anything.
        alloc
            .iter()
            .try_fold(std::mem::size_of::<f64>(), |acc, &n| acc.checked_mul(n))
            .ok_or(Error::Allocation { bytes: usize::MAX })?;

        Ok(Self {
            mode: config.mode,
            structure: config.size,
            pml,
            padding,
            extent,
            alloc,
            guard,
            spacing: config.spacing,
            dt,
        })
    }

    /// First structure index along `axis` (`xs_s`).
    #[inline]
    pub fn structure_start(&self, axis: Axis) -> usize {
        let a = axis.index();
        self.pml[2 * a] + self.padding[2 * a]
    }

    /// One past the last structure index along `axis` (`xs_e`).
    #[inline]
    pub fn structure_end(&self, axis: Axis) -> usize {
        self.structure_start(axis) + self.structure[axis.index()]
    }

    /// Structure index range along `axis`.
    pub fn structure_range(&self, axis: Axis) -> Range<usize> {
        self.structure_start(axis)..self.structure_end(axis)
    }

    /// Logical cell count.
    pub fn cells(&self) -> usize {
        self.extent.iter().product()
    }

    /// Allocated element count of one field grid.
    pub fn alloc_cells(&self) -> usize {
        self.alloc.iter().product()
    }

    /// H update coefficient `dt / (d_axis * mu0)`.
    #[inline]
    pub fn dtdm(&self, axis: Axis) -> f64 {
        self.dt / (self.spacing[axis.index()] * MU0)
    }

    /// Timestep as a fraction of the Courant limit.
    pub fn courant_number(&self) -> f64 {
        self.dt / courant_limit(self.spacing)
    }

    /// Axis with the most cells, used to cut worker slabs.
    pub fn slab_axis(&self) -> Axis {
        let mut best = Axis::Z;
        for axis in [Axis::Y, Axis::X] {
            if self.extent[axis.index()] > self.extent[best.index()] {
                best = axis;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::cpml::Side;

    #[test]
    fn test_extent_adds_padding_and_pml() {
        let config = FdtdConfig::new([10, 12, 14], [1e-9; 3])
            .pml_side(Face::new(Axis::X, Side::Low), PmlSide::new(4))
            .pml_side(Face::new(Axis::Z, Side::High), PmlSide::new(6))
            .padding([2, 1, 0, 0, 3, 3]);
        let layout = DomainLayout::from_config(&config).unwrap();
        assert_eq!(layout.extent, [10 + 2 + 1 + 4, 12, 14 + 6 + 6]);
        assert_eq!(layout.alloc, layout.extent);
        assert_eq!(layout.structure_start(Axis::X), 6);
        assert_eq!(layout.structure_range(Axis::X).len(), 10);
        assert_eq!(layout.structure_start(Axis::Z), 3);
        assert_eq!(layout.structure_end(Axis::Z), 17);
        assert_eq!(layout.slab_axis(), Axis::Z);
    }

    #[test]
    fn test_oblique_mode_adds_guard_and_z_padding() {
        let config = FdtdConfig::new([8, 8, 20], [1e-9; 3])
            .mode(Mode::ObliquePhase)
            .pml_side(Face::new(Axis::Z, Side::Low), PmlSide::new(8))
            .pml_side(Face::new(Axis::Z, Side::High), PmlSide::new(8));
        let layout = DomainLayout::from_config(&config).unwrap();
        assert_eq!(layout.padding, [0, 0, 0, 0, 10, 10]);
        assert_eq!(layout.extent, [8, 8, 56]);
        assert_eq!(layout.alloc, [9, 9, 56]);
        assert_eq!(layout.guard, [true, true, false]);
    }

    #[test]
    fn test_oblique_mode_rejects_lateral_pml() {
        let config = FdtdConfig::new([8, 8, 8], [1e-9; 3])
            .mode(Mode::ObliquePhase)
            .pml_side(Face::new(Axis::Y, Side::High), PmlSide::new(2));
        assert!(matches!(
            DomainLayout::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validation() {
        let base = FdtdConfig::new([4, 4, 4], [1e-9; 3]);
        assert!(DomainLayout::from_config(&base.clone().courant_fraction(1.01)).is_err());
        assert!(DomainLayout::from_config(&base.clone().dt(-1.0)).is_err());
        assert!(DomainLayout::from_config(&base.clone().n_threads(0)).is_err());
        assert!(DomainLayout::from_config(&FdtdConfig::new([0, 4, 4], [1e-9; 3])).is_err());
        assert!(DomainLayout::from_config(&FdtdConfig::new([4, 4, 4], [1e-9, 0.0, 1e-9])).is_err());
        assert!(DomainLayout::from_config(&base).is_ok());
    }

    #[test]
    fn test_dtdm_and_courant() {
        let config = FdtdConfig::new([4, 4, 4], [1e-9, 2e-9, 4e-9]).courant_fraction(0.5);
        let layout = DomainLayout::from_config(&config).unwrap();
        assert!((layout.courant_number() - 0.5).abs() < 1e-12);
        assert_eq!(layout.dtdm(Axis::Y), layout.dt / (2e-9 * MU0));
    }

    #[test]
    fn test_output_path() {
        let out = OutputConfig::new("/tmp/run", "sweep_");
        assert_eq!(out.path("ex.bin"), PathBuf::from("/tmp/run/sweep_ex.bin"));
    }
}
