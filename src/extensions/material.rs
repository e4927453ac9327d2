//! Material models and their per-voxel hooks.
//!
//! A [`Material`] is the physical description handed in by the caller. The
//! engine turns it into a [`MaterialModel`], which supplies the explicit
//! update coefficients used by the Yee kernels and, for dispersive media,
//! carries per-voxel auxiliary state across time steps.
//!
//! # E-update cycle
//!
//! Every call to [`crate::Fdtd::update_e`] runs six barrier-separated phases:
//! 1. `ante_compute` - before the curl update, with `E^n` still in place
//! 2. Yee curl update of Ex/Ey/Ez with the coefficients from [`MaterialModel::coeffs`]
//! 3. `apply_e` - fold auxiliary state into the freshly updated field
//! 4. `post_compute`
//! 5. `self_compute`
//! 6. CPML correction
//!
//! A hook only sees its own voxels. Other materials' hooks for the same
//! phase may or may not have run, so a hook must rely only on the state
//! settled by the previous phase and on its own voxels.

use std::marker::PhantomData;

use crate::constants::EPS0;
use crate::extensions::dispersive::{DispersiveModel, Pole};
use crate::{Axis, Error, Result};

/// Explicit update coefficients for one E component.
///
/// For `Ex`: `Ex = c1*Ex + c2a*dHz/dy - c2b*dHy/dz` (differences, not
/// derivatives: the cell size is folded into `c2a`/`c2b`). The pairs follow
/// the cyclic order, so `c2a` goes with the next axis and `c2b` with the one
/// after: X -> (y, z), Y -> (z, x), Z -> (x, y).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateCoeffs {
    /// Decay / identity term
    pub c1: f64,
    /// Curl coupling along the next axis
    pub c2a: f64,
    /// Curl coupling along the axis after next
    pub c2b: f64,
}

impl UpdateCoeffs {
    /// Curl coupling for the derivative along `along`, as used by the
    /// component `comp`.
    ///
    /// # Panics
    /// Panics if `along == comp` (a component has no curl term along itself).
    #[inline]
    pub fn c2_along(&self, comp: Axis, along: Axis) -> f64 {
        let (a1, a2) = comp.cyclic();
        if along == a1 {
            self.c2a
        } else if along == a2 {
            self.c2b
        } else {
            panic!("component {comp} has no curl term along {along}")
        }
    }
}

/// Behaviour of one entry of the material table.
///
/// Models are shared by all workers during a phase and must not keep
/// per-voxel state in `self`: that state lives in the auxiliary memory
/// handed to each hook through [`VoxelBlock`].
pub trait MaterialModel: Send + Sync {
    /// Model name for diagnostics.
    fn name(&self) -> &str;

    /// Bind the grid spacing and timestep. Called before any
    /// [`coeffs`](Self::coeffs) query.
    fn link_fdtd(&mut self, spacing: [f64; 3], dt: f64);

    /// Update coefficients for the E component along `axis`.
    fn coeffs(&self, axis: Axis) -> UpdateCoeffs;

    /// Whether the model reads the per-step D increment (`dt_D` grids).
    fn needs_d_field(&self) -> bool {
        false
    }

    /// Whether the model reads the per-step B increment (`dt_B` grids).
    fn needs_b_field(&self) -> bool {
        false
    }

    /// Number of `f64` auxiliary values per owned voxel and component.
    fn aux_per_voxel(&self) -> usize {
        0
    }

    /// Whether the hooks do any work. Models returning false own no voxel
    /// list and are skipped by the hook phases.
    fn uses_hooks(&self) -> bool {
        true
    }

    /// First hook of the E cycle, before the curl update.
    fn ante_compute(&self, _block: &mut VoxelBlock<'_>) {}

    /// Second hook, right after the curl update.
    fn apply_e(&self, _block: &mut VoxelBlock<'_>) {}

    /// Third hook.
    fn post_compute(&self, _block: &mut VoxelBlock<'_>) {}

    /// Fourth hook.
    fn self_compute(&self, _block: &mut VoxelBlock<'_>) {}
}

/// View over a contiguous run of the voxels one material owns, for one
/// E component.
///
/// Everything is addressed by the position `n` within the block, so a hook
/// can only touch its own voxels.
pub struct VoxelBlock<'a> {
    axis: Axis,
    cells: &'a [usize],
    aux: &'a mut [f64],
    stride: usize,
    field: *mut f64,
    dt_d: Option<*const f64>,
    _marker: PhantomData<&'a mut f64>,
}

impl<'a> VoxelBlock<'a> {
    /// Build a block over raw field buffers.
    ///
    /// # Safety
    /// `field` (and `dt_d` when present) must be valid for every index in
    /// `cells` for `'a`, and no other live reference may touch those
    /// elements while the block exists.
    pub(crate) unsafe fn from_raw(
        axis: Axis,
        cells: &'a [usize],
        aux: &'a mut [f64],
        stride: usize,
        field: *mut f64,
        dt_d: Option<*const f64>,
    ) -> Self {
        debug_assert_eq!(aux.len(), cells.len() * stride);
        Self {
            axis,
            cells,
            aux,
            stride,
            field,
            dt_d,
            _marker: PhantomData,
        }
    }

    /// Build a block over ordinary slices, e.g. to drive a model outside the
    /// engine.
    ///
    /// # Panics
    /// Panics if a cell index is out of range for `field`/`dt_d` or if
    /// `aux.len() != cells.len() * stride`.
    pub fn from_slices(
        axis: Axis,
        cells: &'a [usize],
        field: &'a mut [f64],
        dt_d: Option<&'a [f64]>,
        aux: &'a mut [f64],
        stride: usize,
    ) -> Self {
        assert!(cells.iter().all(|&c| c < field.len()), "cell outside field");
        if let Some(d) = dt_d {
            assert!(cells.iter().all(|&c| c < d.len()), "cell outside dt_D");
        }
        assert_eq!(aux.len(), cells.len() * stride, "aux length mismatch");
        Self {
            axis,
            cells,
            aux,
            stride,
            field: field.as_mut_ptr(),
            dt_d: dt_d.map(|d| d.as_ptr()),
            _marker: PhantomData,
        }
    }

    /// Component this block belongs to.
    #[inline]
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Number of voxels in the block.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the block is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Linear field index of voxel `n`.
    #[inline]
    pub fn cell(&self, n: usize) -> usize {
        self.cells[n]
    }

    /// Field value at voxel `n`.
    #[inline]
    pub fn e(&self, n: usize) -> f64 {
        let c = self.cells[n];
        // SAFETY: the constructor guarantees `c` is valid for `field`
        unsafe { *self.field.add(c) }
    }

    /// Overwrite the field value at voxel `n`.
    #[inline]
    pub fn set_e(&mut self, n: usize, value: f64) {
        let c = self.cells[n];
        // SAFETY: the constructor guarantees `c` is valid and exclusive
        unsafe { *self.field.add(c) = value }
    }

    /// D increment of the last curl update at voxel `n`; 0 when the D grids
    /// are not allocated.
    #[inline]
    pub fn dt_d(&self, n: usize) -> f64 {
        match self.dt_d {
            // SAFETY: the constructor guarantees `c` is valid for `dt_d`
            Some(p) => unsafe { *p.add(self.cells[n]) },
            None => 0.0,
        }
    }

    /// Auxiliary values of voxel `n`.
    #[inline]
    pub fn aux(&mut self, n: usize) -> &mut [f64] {
        let s = self.stride;
        &mut self.aux[n * s..(n + 1) * s]
    }

    /// Field value and auxiliary values of voxel `n` together.
    #[inline]
    pub fn voxel(&mut self, n: usize) -> (f64, &mut [f64]) {
        let e = self.e(n);
        (e, self.aux(n))
    }
}

/// Non-dispersive, possibly lossy dielectric.
#[derive(Debug, Clone)]
pub struct ConstantModel {
    eps_r: f64,
    sigma: f64,
    coeffs: [UpdateCoeffs; 3],
}

impl ConstantModel {
    /// Create a model with relative permittivity `eps_r` and conductivity
    /// `sigma` (S/m).
    pub fn new(eps_r: f64, sigma: f64) -> Self {
        Self {
            eps_r,
            sigma,
            coeffs: [UpdateCoeffs::default(); 3],
        }
    }

    /// Vacuum.
    pub fn vacuum() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl MaterialModel for ConstantModel {
    fn name(&self) -> &str {
        "constant"
    }

    fn link_fdtd(&mut self, spacing: [f64; 3], dt: f64) {
        // Semi-implicit conduction term: (1 - s)/(1 + s), s = sigma*dt/(2*eps)
        let loss = self.sigma * dt / (2.0 * EPS0 * self.eps_r);
        let c1 = (1.0 - loss) / (1.0 + loss);
        let c2 = |d: f64| dt / (d * EPS0 * self.eps_r) / (1.0 + loss);

        for axis in Axis::ALL {
            let (a1, a2) = axis.cyclic();
            self.coeffs[axis.index()] = UpdateCoeffs {
                c1,
                c2a: c2(spacing[a1.index()]),
                c2b: c2(spacing[a2.index()]),
            };
        }
    }

    fn coeffs(&self, axis: Axis) -> UpdateCoeffs {
        self.coeffs[axis.index()]
    }

    fn uses_hooks(&self) -> bool {
        false
    }
}

/// Physical description of a material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// High-frequency relative permittivity
    pub eps_inf: f64,
    /// Conductivity (S/m)
    pub sigma: f64,
    /// Dispersion poles
    pub poles: Vec<Pole>,
}

impl Default for Material {
    fn default() -> Self {
        Self::vacuum()
    }
}

impl Material {
    /// Vacuum: eps = 1, no loss, no dispersion.
    pub fn vacuum() -> Self {
        Self::dielectric(1.0)
    }

    /// Lossless, non-dispersive dielectric.
    pub fn dielectric(eps_r: f64) -> Self {
        Self {
            eps_inf: eps_r,
            sigma: 0.0,
            poles: Vec::new(),
        }
    }

    /// Lossless dielectric from a refractive index.
    pub fn from_index(n: f64) -> Self {
        Self::dielectric(n * n)
    }

    /// Conductive dielectric.
    pub fn conductor(eps_r: f64, sigma: f64) -> Self {
        Self {
            eps_inf: eps_r,
            sigma,
            poles: Vec::new(),
        }
    }

    /// Add a dispersion pole.
    pub fn with_pole(mut self, pole: impl Into<Pole>) -> Self {
        self.poles.push(pole.into());
        self
    }

    /// Whether the material has any dispersion pole.
    pub fn is_dispersive(&self) -> bool {
        !self.poles.is_empty()
    }

    /// Reject parameters that would produce NaN/Inf coefficients.
    pub fn validate(&self) -> Result<()> {
        if !(self.eps_inf.is_finite() && self.eps_inf > 0.0) {
            return Err(Error::Numerical(format!(
                "eps_inf must be positive and finite, got {}",
                self.eps_inf
            )));
        }
        if !(self.sigma.is_finite() && self.sigma >= 0.0) {
            return Err(Error::Numerical(format!(
                "conductivity must be non-negative and finite, got {}",
                self.sigma
            )));
        }
        for pole in &self.poles {
            pole.validate()?;
        }
        Ok(())
    }

    /// Build the model that implements this material.
    pub fn into_model(self) -> Box<dyn MaterialModel> {
        if self.poles.is_empty() {
            Box::new(ConstantModel::new(self.eps_inf, self.sigma))
        } else {
            Box::new(DispersiveModel::new(self.eps_inf, self.sigma, self.poles))
        }
    }
}
