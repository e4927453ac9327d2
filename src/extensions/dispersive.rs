//! Dispersive Material Models.
//!
//! Implements frequency-dependent material models using Auxiliary Differential
//! Equation (ADE) methods:
//! - Lorentz model: dielectric resonance
//! - Drude model: metals and plasmas
//! - Debye model: polar molecules
//!
//! The update works on the displacement field. The curl update produces the
//! D increment `dt_D`; the model then recovers E from
//! `D = eps0*eps_inf*E + sum(P) + I`, where `P` are the pole polarizations and
//! `I` the integrated conduction current.

use std::f64::consts::PI;

use crate::constants::EPS0;
use crate::extensions::material::{MaterialModel, UpdateCoeffs, VoxelBlock};
use crate::{Axis, Error, Result};

/// Lorentz oscillator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LorentzParams {
    /// Resonance frequency (rad/s)
    pub omega_0: f64,
    /// Damping frequency (rad/s)
    pub gamma: f64,
    /// Oscillator strength (delta epsilon)
    pub delta_eps: f64,
}

impl LorentzParams {
    /// Create from frequency in Hz.
    pub fn from_hz(f0: f64, gamma: f64, delta_eps: f64) -> Self {
        Self {
            omega_0: 2.0 * PI * f0,
            gamma: 2.0 * PI * gamma,
            delta_eps,
        }
    }
}

/// Drude model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DrudeParams {
    /// Plasma frequency (rad/s)
    pub omega_p: f64,
    /// Collision frequency (rad/s)
    pub gamma: f64,
}

impl DrudeParams {
    /// Create from frequency in Hz.
    pub fn from_hz(fp: f64, gamma: f64) -> Self {
        Self {
            omega_p: 2.0 * PI * fp,
            gamma: 2.0 * PI * gamma,
        }
    }

    /// Create for a typical metal (e.g., gold, silver).
    pub fn metal(plasma_freq_hz: f64, damping_freq_hz: f64) -> Self {
        Self::from_hz(plasma_freq_hz, damping_freq_hz)
    }
}

/// Debye relaxation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DebyeParams {
    /// Relaxation time (seconds)
    pub tau: f64,
    /// Static permittivity increment
    pub delta_eps: f64,
}

impl DebyeParams {
    /// Create from relaxation time in seconds.
    pub fn new(tau: f64, delta_eps: f64) -> Self {
        Self { tau, delta_eps }
    }
}

/// One dispersion pole of a material.
#[derive(Debug, Clone, PartialEq)]
pub enum Pole {
    /// Lorentz oscillator
    Lorentz(LorentzParams),
    /// Drude free-electron term
    Drude(DrudeParams),
    /// Debye relaxation
    Debye(DebyeParams),
}

impl From<LorentzParams> for Pole {
    fn from(p: LorentzParams) -> Self {
        Pole::Lorentz(p)
    }
}

impl From<DrudeParams> for Pole {
    fn from(p: DrudeParams) -> Self {
        Pole::Drude(p)
    }
}

impl From<DebyeParams> for Pole {
    fn from(p: DebyeParams) -> Self {
        Pole::Debye(p)
    }
}

impl Pole {
    /// Pole name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Pole::Lorentz(_) => "Lorentz",
            Pole::Drude(_) => "Drude",
            Pole::Debye(_) => "Debye",
        }
    }

    /// Reject parameters that give NaN or unbounded coefficients.
    pub fn validate(&self) -> Result<()> {
        let ok = match self {
            Pole::Lorentz(p) => {
                p.omega_0.is_finite()
                    && p.omega_0 >= 0.0
                    && p.gamma.is_finite()
                    && p.gamma >= 0.0
                    && p.delta_eps.is_finite()
            }
            Pole::Drude(p) => {
                p.omega_p.is_finite() && p.gamma.is_finite() && p.gamma >= 0.0
            }
            Pole::Debye(p) => p.tau.is_finite() && p.tau > 0.0 && p.delta_eps.is_finite(),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Numerical(format!("invalid {} pole: {:?}", self.name(), self)))
        }
    }

    /// Recurrence coefficients for `P^{n+1} = a*P^n + b*P^{n-1} + c*E^n`.
    fn recurrence(&self, dt: f64) -> PoleCoeffs {
        match self {
            Pole::Lorentz(p) => {
                // d²P/dt² + gamma*dP/dt + omega_0²*P = eps0*delta_eps*omega_0²*E
                // with central differences around t^n
                let w2dt2 = p.omega_0 * p.omega_0 * dt * dt;
                let denom = 1.0 + p.gamma * dt / 2.0;
                PoleCoeffs {
                    a: (2.0 - w2dt2) / denom,
                    b: (p.gamma * dt / 2.0 - 1.0) / denom,
                    c: EPS0 * p.delta_eps * w2dt2 / denom,
                }
            }
            Pole::Drude(p) => {
                // Lorentz with omega_0 -> 0 and the strength carried by omega_p
                let denom = 1.0 + p.gamma * dt / 2.0;
                PoleCoeffs {
                    a: 2.0 / denom,
                    b: (p.gamma * dt / 2.0 - 1.0) / denom,
                    c: EPS0 * p.omega_p * p.omega_p * dt * dt / denom,
                }
            }
            Pole::Debye(p) => {
                // tau*dP/dt + P = eps0*delta_eps*E, exact over one step for constant E
                let decay = (-dt / p.tau).exp();
                PoleCoeffs {
                    a: decay,
                    b: 0.0,
                    c: (1.0 - decay) * EPS0 * p.delta_eps,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PoleCoeffs {
    a: f64,
    b: f64,
    c: f64,
}

// Auxiliary layout per voxel
const AUX_E: usize = 0;
const AUX_I: usize = 1;
const AUX_POLES: usize = 2;
// Per pole: P^{n-1}, P^n, P^{n+1}
const POLE_STRIDE: usize = 3;

/// Multi-pole dispersive medium with optional conductivity.
#[derive(Debug, Clone)]
pub struct DispersiveModel {
    eps_inf: f64,
    sigma: f64,
    poles: Vec<Pole>,
    dt: f64,
    recurrences: Vec<PoleCoeffs>,
    coeffs: [UpdateCoeffs; 3],
}

impl DispersiveModel {
    /// Create a model with high-frequency permittivity `eps_inf`,
    /// conductivity `sigma` and the given poles.
    pub fn new(eps_inf: f64, sigma: f64, poles: Vec<Pole>) -> Self {
        Self {
            eps_inf,
            sigma,
            poles,
            dt: 0.0,
            recurrences: Vec::new(),
            coeffs: [UpdateCoeffs::default(); 3],
        }
    }

    /// Poles of this model.
    pub fn poles(&self) -> &[Pole] {
        &self.poles
    }

    #[inline]
    fn pole_base(p: usize) -> usize {
        AUX_POLES + p * POLE_STRIDE
    }
}

impl MaterialModel for DispersiveModel {
    fn name(&self) -> &str {
        "dispersive"
    }

    fn link_fdtd(&mut self, spacing: [f64; 3], dt: f64) {
        self.dt = dt;
        self.recurrences = self.poles.iter().map(|p| p.recurrence(dt)).collect();

        // The curl update result is replaced in apply_e; only dt_D matters,
        // but keep the coefficients meaningful for a lossless eps_inf medium.
        let c2 = |d: f64| dt / (d * EPS0 * self.eps_inf);
        for axis in Axis::ALL {
            let (a1, a2) = axis.cyclic();
            self.coeffs[axis.index()] = UpdateCoeffs {
                c1: 1.0,
                c2a: c2(spacing[a1.index()]),
                c2b: c2(spacing[a2.index()]),
            };
        }
    }

    fn coeffs(&self, axis: Axis) -> UpdateCoeffs {
        self.coeffs[axis.index()]
    }

    fn needs_d_field(&self) -> bool {
        true
    }

    fn aux_per_voxel(&self) -> usize {
        AUX_POLES + POLE_STRIDE * self.poles.len()
    }

    fn ante_compute(&self, block: &mut VoxelBlock<'_>) {
        for n in 0..block.len() {
            let (e, aux) = block.voxel(n);
            aux[AUX_E] = e;
            for (p, r) in self.recurrences.iter().enumerate() {
                let base = Self::pole_base(p);
                aux[base + 2] = r.a * aux[base + 1] + r.b * aux[base] + r.c * e;
            }
        }
    }

    /// Solves `D^{n+1} = eps*E^{n+1} + P^{n+1} + I^{n+1}` with the
    /// conduction current averaged over the step,
    /// `I^{n+1} = I^n + sigma*dt*(E^n + E^{n+1})/2`, so `I^n` cancels.
    fn apply_e(&self, block: &mut VoxelBlock<'_>) {
        let eps = EPS0 * self.eps_inf;
        let half_sigma_dt = 0.5 * self.sigma * self.dt;
        let n_poles = self.recurrences.len();
        for n in 0..block.len() {
            let dt_d = block.dt_d(n);
            let aux = block.aux(n);

            let mut p_now = 0.0;
            let mut p_next = 0.0;
            for p in 0..n_poles {
                let base = Self::pole_base(p);
                p_now += aux[base + 1];
                p_next += aux[base + 2];
            }
            let e_next = ((eps - half_sigma_dt) * aux[AUX_E] + p_now - p_next + dt_d)
                / (eps + half_sigma_dt);
            block.set_e(n, e_next);
        }
    }

    fn post_compute(&self, block: &mut VoxelBlock<'_>) {
        let half_sigma_dt = 0.5 * self.sigma * self.dt;
        let n_poles = self.recurrences.len();
        for n in 0..block.len() {
            let (e, aux) = block.voxel(n);
            aux[AUX_I] += half_sigma_dt * (aux[AUX_E] + e);
            for p in 0..n_poles {
                let base = Self::pole_base(p);
                aux[base] = aux[base + 1];
                aux[base + 1] = aux[base + 2];
            }
        }
    }
}
