//! Convolutional Perfectly Matched Layer (CPML) implementation.
//!
//! This implements CPML using auxiliary differential equations (ADE) with
//! recursive convolution. Unlike UPML, CPML doesn't require modifying the
//! main operator coefficients - it stretches the curl with `1/kappa` and adds
//! correction terms after each field update.
//!
//! Reference: Roden & Gedney, "Convolutional PML (CPML): An efficient FDTD
//! implementation of the CFS-PML for arbitrary media", Microwave and Optical
//! Technology Letters, Vol. 27, No. 5, 2000.
//!
//! For a face normal to axis `d` every transverse component gets
//!   E_new = E_update ± C2 * psi_E
//!   H_new = H_update ∓ dt/(mu0*d) * psi_H
//!
//! Where psi is updated as:
//!   psi^{n+1} = b * psi^n + c * (difference across d)
//!
//! The coefficients b and c are computed from the graded profile:
//!   b = exp(-(sigma/kappa + alpha) * dt / eps0)
//!   c = sigma * (b - 1) / (sigma*kappa + kappa^2*alpha)

use std::fmt;

use crate::arrays::{Grid1, Grid3};
use crate::constants::{EPS0, Z0};
use crate::{Axis, Error, Result};

/// Low or high end of an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Towards index 0
    Low = 0,
    /// Towards index N-1
    High = 1,
}

/// One of the six outer faces of the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Face {
    /// Normal axis
    pub axis: Axis,
    /// Which end of the axis
    pub side: Side,
}

impl Face {
    /// All faces in storage order `[x-, x+, y-, y+, z-, z+]`.
    pub const ALL: [Face; 6] = [
        Face::new(Axis::X, Side::Low),
        Face::new(Axis::X, Side::High),
        Face::new(Axis::Y, Side::Low),
        Face::new(Axis::Y, Side::High),
        Face::new(Axis::Z, Side::Low),
        Face::new(Axis::Z, Side::High),
    ];

    /// Create a face.
    pub const fn new(axis: Axis, side: Side) -> Self {
        Self { axis, side }
    }

    /// Position in `[x-, x+, y-, y+, z-, z+]`.
    #[inline]
    pub fn index(self) -> usize {
        self.axis.index() * 2 + self.side as usize
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.side {
            Side::Low => '-',
            Side::High => '+',
        };
        write!(f, "{}{}", self.axis, sign)
    }
}

/// CPML parameters for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmlSide {
    /// Number of CPML layers. 0 disables the face.
    pub width: usize,
    /// Polynomial grading order (typically 3-4)
    pub grading_order: f64,
    /// Target reflection coefficient (e.g., 1e-6 for -120 dB), used when
    /// `sigma_max` is not given
    pub reflection_coeff: f64,
    /// Explicit peak conductivity (S/m)
    pub sigma_max: Option<f64>,
    /// Alpha scaling factor for CFS-PML (S/m, typically 0.0 to 0.05)
    pub alpha_max: f64,
    /// Kappa max for coordinate stretching (typically 1.0 to 15.0)
    pub kappa_max: f64,
}

impl Default for PmlSide {
    fn default() -> Self {
        Self::disabled()
    }
}

impl PmlSide {
    /// No absorbing layer.
    pub const fn disabled() -> Self {
        Self {
            width: 0,
            grading_order: 3.0,
            reflection_coeff: 1e-6,
            sigma_max: None,
            alpha_max: 0.0, // Standard PML without CFS
            kappa_max: 1.0, // No coordinate stretching
        }
    }

    /// Layer of `width` cells with the default grading.
    pub const fn new(width: usize) -> Self {
        Self {
            width,
            ..Self::disabled()
        }
    }

    /// Derive sigma_max from this target reflection.
    pub fn with_reflection(mut self, reflection: f64) -> Self {
        self.reflection_coeff = reflection;
        self.sigma_max = None;
        self
    }

    /// Set sigma_max explicitly.
    pub fn with_sigma_max(mut self, sigma_max: f64) -> Self {
        self.sigma_max = Some(sigma_max);
        self
    }

    /// Set kappa_max.
    pub fn with_kappa_max(mut self, kappa_max: f64) -> Self {
        self.kappa_max = kappa_max;
        self
    }

    /// Set alpha_max.
    pub fn with_alpha_max(mut self, alpha_max: f64) -> Self {
        self.alpha_max = alpha_max;
        self
    }

    /// Set the grading order.
    pub fn with_grading_order(mut self, order: f64) -> Self {
        self.grading_order = order;
        self
    }

    /// Whether the face absorbs at all.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.width > 0
    }

    /// Peak conductivity for cells of size `delta`.
    pub fn sigma_max_for(&self, delta: f64) -> f64 {
        match self.sigma_max {
            Some(s) => s,
            None => {
                // sigma_max = -(m+1) * ln(R) / (2 * Z0 * d)
                let d = self.width.max(1) as f64 * delta;
                -(self.grading_order + 1.0) * self.reflection_coeff.ln() / (2.0 * Z0 * d)
            }
        }
    }

    fn validate(&self, face: Face) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }
        let r = self.reflection_coeff;
        let sigma_ok = match self.sigma_max {
            Some(s) => s.is_finite() && s >= 0.0,
            None => r.is_finite() && r > 0.0 && r < 1.0,
        };
        if !sigma_ok
            || !(self.kappa_max.is_finite() && self.kappa_max >= 1.0)
            || !(self.alpha_max.is_finite() && self.alpha_max >= 0.0)
            || !(self.grading_order.is_finite() && self.grading_order >= 0.0)
        {
            return Err(Error::Config(format!(
                "invalid CPML parameters on face {face}: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// CPML configuration for all 6 faces.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpmlBoundaries {
    /// Per-face parameters in `[x-, x+, y-, y+, z-, z+]` order
    pub sides: [PmlSide; 6],
}

impl CpmlBoundaries {
    /// Create with uniform CPML on all boundaries.
    pub fn uniform(layers: usize) -> Self {
        Self {
            sides: [PmlSide::new(layers); 6],
        }
    }

    /// Replace the parameters of one face.
    pub fn with_side(mut self, face: Face, side: PmlSide) -> Self {
        self.sides[face.index()] = side;
        self
    }

    /// Parameters of one face.
    pub fn side(&self, face: Face) -> &PmlSide {
        &self.sides[face.index()]
    }

    /// Layer counts in `[x-, x+, y-, y+, z-, z+]` order.
    pub fn widths(&self) -> [usize; 6] {
        self.sides.map(|s| s.width)
    }

    /// Check if any CPML is enabled.
    pub fn any_enabled(&self) -> bool {
        self.sides.iter().any(PmlSide::is_enabled)
    }
}

/// Graded CPML profile along one axis for one field type, covering the full
/// axis extent.
#[derive(Debug, Clone)]
pub struct CpmlProfile {
    /// Coordinate stretching, 1 outside the layers
    pub kappa: Grid1<f64>,
    /// `1/kappa`, read by the Yee kernels
    pub inv_kappa: Grid1<f64>,
    /// Conductivity, 0 outside the layers
    pub sigma: Grid1<f64>,
    /// CFS shift, 0 outside the layers
    pub alpha: Grid1<f64>,
    /// Recursive convolution decay
    pub b: Grid1<f64>,
    /// Recursive convolution weight
    pub c: Grid1<f64>,
}

impl CpmlProfile {
    fn transparent(n: usize) -> Self {
        Self {
            kappa: Grid1::filled([n], 1.0),
            inv_kappa: Grid1::filled([n], 1.0),
            sigma: Grid1::new([n]),
            alpha: Grid1::new([n]),
            b: Grid1::filled([n], 1.0),
            c: Grid1::new([n]),
        }
    }

    fn set(&mut self, i: usize, side: &PmlSide, rho: f64, sigma_max: f64, dt: f64) {
        let graded = rho.powf(side.grading_order);
        let sigma = sigma_max * graded;
        let kappa = 1.0 + (side.kappa_max - 1.0) * graded;
        let alpha = side.alpha_max * (1.0 - rho);

        let b = (-(sigma / kappa + alpha) * dt / EPS0).exp();
        let denom = sigma * kappa + kappa * kappa * alpha;
        let c = if denom.abs() > 1e-20 {
            sigma * (b - 1.0) / denom
        } else {
            0.0
        };

        self.kappa[[i]] = kappa;
        self.inv_kappa[[i]] = 1.0 / kappa;
        self.sigma[[i]] = sigma;
        self.alpha[[i]] = alpha;
        self.b[[i]] = b;
        self.c[[i]] = c;
    }
}

/// CPML psi field storage for one face and one field type.
///
/// For a face normal to `d`, `psi_pos` belongs to component `d+2` and
/// `psi_neg` to component `d+1` (cyclically), named after the sign with
/// which they enter the E curl.
#[derive(Debug)]
struct PsiField {
    psi_pos: Grid3<f64>,
    psi_neg: Grid3<f64>,
}

impl PsiField {
    fn new(dims: [usize; 3]) -> Result<Self> {
        Ok(Self {
            psi_pos: Grid3::try_new(dims)?,
            psi_neg: Grid3::try_new(dims)?,
        })
    }

    fn clear(&mut self) {
        self.psi_pos.clear();
        self.psi_neg.clear();
    }
}

/// Raw view of one face's psi memories, handed to the worker phases.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FaceRaw {
    pub face: Face,
    /// First index along the face axis covered by the layer
    pub start: usize,
    /// Layer count
    pub width: usize,
    psi_dims: [usize; 3],
    psi_pos: *mut f64,
    psi_neg: *mut f64,
    b: *const f64,
    c: *const f64,
}

// SAFETY: workers only touch the psi cells of their own slab
unsafe impl Send for FaceRaw {}
unsafe impl Sync for FaceRaw {}

impl FaceRaw {
    /// Whether `p` lies inside the layer.
    #[inline]
    pub fn contains(&self, p: [usize; 3]) -> bool {
        let x = p[self.face.axis.index()];
        x >= self.start && x < self.start + self.width
    }

    /// Advance both memories at `p` and return the new `(psi_pos, psi_neg)`.
    ///
    /// # Safety
    /// `p` must be inside the layer and inside the logical extent, and no
    /// other thread may access the same cell concurrently.
    #[inline]
    pub unsafe fn step(&self, p: [usize; 3], delta_pos: f64, delta_neg: f64) -> (f64, f64) {
        let a = self.face.axis.index();
        let global = p[a];
        let mut local = p;
        local[a] = global - self.start;
        let idx = local[0] + self.psi_dims[0] * (local[1] + self.psi_dims[1] * local[2]);

        let b = *self.b.add(global);
        let c = *self.c.add(global);
        let pos = self.psi_pos.add(idx);
        let neg = self.psi_neg.add(idx);
        *pos = b * *pos + c * delta_pos;
        *neg = b * *neg + c * delta_neg;
        (*pos, *neg)
    }
}

/// CPML absorbing boundary condition.
///
/// Owns the graded profiles along every axis and the psi memories of every
/// enabled face. A face with zero width has no memory and no work.
#[derive(Debug)]
pub struct Cpml {
    extent: [usize; 3],
    spacing: [f64; 3],
    dt: f64,
    boundaries: CpmlBoundaries,
    profile_e: [CpmlProfile; 3],
    profile_h: [CpmlProfile; 3],
    psi_e: [Option<PsiField>; 6],
    psi_h: [Option<PsiField>; 6],
    dirty: bool,
}

impl Cpml {
    /// Create a new CPML for a domain of `extent` cells.
    pub fn new(
        extent: [usize; 3],
        spacing: [f64; 3],
        dt: f64,
        boundaries: CpmlBoundaries,
    ) -> Result<Self> {
        for axis in Axis::ALL {
            let a = axis.index();
            let (lo, hi) = (boundaries.sides[2 * a].width, boundaries.sides[2 * a + 1].width);
            if lo + hi >= extent[a] {
                return Err(Error::Config(format!(
                    "CPML layers on {axis} ({lo} + {hi}) leave no interior cell in extent {}",
                    extent[a]
                )));
            }
        }
        for face in Face::ALL {
            boundaries.side(face).validate(face)?;
        }

        let mut psi_e: [Option<PsiField>; 6] = Default::default();
        let mut psi_h: [Option<PsiField>; 6] = Default::default();
        for face in Face::ALL {
            let width = boundaries.side(face).width;
            if width > 0 {
                let mut dims = extent;
                dims[face.axis.index()] = width;
                psi_e[face.index()] = Some(PsiField::new(dims)?);
                psi_h[face.index()] = Some(PsiField::new(dims)?);
            }
        }

        let mut cpml = Self {
            extent,
            spacing,
            dt,
            boundaries,
            profile_e: extent.map(CpmlProfile::transparent),
            profile_h: extent.map(CpmlProfile::transparent),
            psi_e,
            psi_h,
            dirty: true,
        };
        cpml.pml_coeff_calc();
        Ok(cpml)
    }

    /// Current configuration.
    pub fn boundaries(&self) -> &CpmlBoundaries {
        &self.boundaries
    }

    /// Fill the kappa/sigma/alpha/b/c profiles of every axis.
    ///
    /// Depth runs from 0 at the interior interface to 1 at the outer edge.
    /// E samples sit on integer positions, H samples half a cell further.
    pub fn pml_coeff_calc(&mut self) {
        for axis in Axis::ALL {
            let a = axis.index();
            let n = self.extent[a];
            let lo = &self.boundaries.sides[2 * a];
            let hi = &self.boundaries.sides[2 * a + 1];
            let sigma_lo = lo.sigma_max_for(self.spacing[a]);
            let sigma_hi = hi.sigma_max_for(self.spacing[a]);

            let mut prof_e = CpmlProfile::transparent(n);
            let mut prof_h = CpmlProfile::transparent(n);

            for i in 0..n {
                for (x, prof) in [(i as f64, &mut prof_e), (i as f64 + 0.5, &mut prof_h)] {
                    if lo.width > 0 && i < lo.width {
                        let w = lo.width as f64;
                        let rho = ((w - x) / w).clamp(0.0, 1.0);
                        prof.set(i, lo, rho, sigma_lo, self.dt);
                    } else if hi.width > 0 && i >= n - hi.width {
                        let w = hi.width as f64;
                        let rho = ((x - (n - hi.width) as f64) / w).clamp(0.0, 1.0);
                        prof.set(i, hi, rho, sigma_hi, self.dt);
                    }
                }
            }

            self.profile_e[a] = prof_e;
            self.profile_h[a] = prof_h;
        }
        self.dirty = false;
    }

    /// Replace one face's grading. The width must stay the same since psi
    /// memory is sized at construction.
    pub fn set_side(&mut self, face: Face, side: PmlSide) -> Result<()> {
        let current = self.boundaries.side(face).width;
        if side.width != current {
            return Err(Error::Config(format!(
                "CPML width on face {face} is fixed at {current}, got {}",
                side.width
            )));
        }
        side.validate(face)?;
        if *self.boundaries.side(face) != side {
            self.boundaries.sides[face.index()] = side;
            self.dirty = true;
        }
        Ok(())
    }

    /// Whether the profiles lag behind the parameters.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Recompute the profiles if a parameter changed. Returns whether it did.
    pub fn recalc_if_dirty(&mut self) -> bool {
        if self.dirty {
            self.pml_coeff_calc();
            true
        } else {
            false
        }
    }

    /// Profile along `axis` sampled at E positions.
    pub fn profile_e(&self, axis: Axis) -> &CpmlProfile {
        &self.profile_e[axis.index()]
    }

    /// Profile along `axis` sampled at H positions.
    pub fn profile_h(&self, axis: Axis) -> &CpmlProfile {
        &self.profile_h[axis.index()]
    }

    /// Check if CPML is active.
    pub fn is_active(&self) -> bool {
        self.boundaries.any_enabled()
    }

    /// Get the number of active CPML regions.
    pub fn num_regions(&self) -> usize {
        self.boundaries.sides.iter().filter(|s| s.is_enabled()).count()
    }

    /// Bytes held by the psi memories.
    pub fn memory_bytes(&self) -> usize {
        self.psi_e
            .iter()
            .chain(self.psi_h.iter())
            .flatten()
            .map(|p| (p.psi_pos.len() + p.psi_neg.len()) * std::mem::size_of::<f64>())
            .sum()
    }

    /// Reset all psi fields to zero.
    pub fn reset(&mut self) {
        for psi in self.psi_e.iter_mut().chain(self.psi_h.iter_mut()).flatten() {
            psi.clear();
        }
    }

    /// Raw views of the E-side memories.
    pub(crate) fn raw_faces_e(&mut self) -> Vec<FaceRaw> {
        Self::raw_faces(&mut self.psi_e, &self.profile_e, &self.boundaries, self.extent)
    }

    /// Raw views of the H-side memories.
    pub(crate) fn raw_faces_h(&mut self) -> Vec<FaceRaw> {
        Self::raw_faces(&mut self.psi_h, &self.profile_h, &self.boundaries, self.extent)
    }

    fn raw_faces(
        psi: &mut [Option<PsiField>; 6],
        profiles: &[CpmlProfile; 3],
        boundaries: &CpmlBoundaries,
        extent: [usize; 3],
    ) -> Vec<FaceRaw> {
        let mut faces = Vec::new();
        for face in Face::ALL {
            let Some(field) = psi[face.index()].as_mut() else {
                continue;
            };
            let a = face.axis.index();
            let width = boundaries.side(face).width;
            let start = match face.side {
                Side::Low => 0,
                Side::High => extent[a] - width,
            };
            let prof = &profiles[a];
            faces.push(FaceRaw {
                face,
                start,
                width,
                psi_dims: field.psi_pos.dims(),
                psi_pos: field.psi_pos.as_mut_ptr(),
                psi_neg: field.psi_neg.as_mut_ptr(),
                b: prof.b.as_ptr(),
                c: prof.c.as_ptr(),
            });
        }
        faces
    }
}
