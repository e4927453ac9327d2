//! Physical constants (SI units).

/// Speed of light in vacuum (m/s)
pub const C0: f64 = 299_792_458.0;

/// Vacuum permeability (H/m)
pub const MU0: f64 = 1.256_637_062_12e-6;

/// Vacuum permittivity (F/m)
pub const EPS0: f64 = 8.854_187_812_8e-12;

/// Impedance of free space (Ohm)
pub const Z0: f64 = 376.730_313_668;

/// Courant limit for a 3-D Yee grid with the given cell sizes.
///
/// `dt_max = 1 / (c0 * sqrt(1/dx^2 + 1/dy^2 + 1/dz^2))`
pub fn courant_limit(spacing: [f64; 3]) -> f64 {
    let inv_sq: f64 = spacing.iter().map(|d| 1.0 / (d * d)).sum();
    1.0 / (C0 * inv_sq.sqrt())
}
