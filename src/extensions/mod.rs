//! Material models and boundary conditions plugged into the field update.
//!
//! - [`material`]: the [`MaterialModel`] trait with its four E-cycle hooks,
//!   the [`Material`] description and the non-dispersive [`ConstantModel`]
//! - [`dispersive`]: Lorentz, Drude and Debye poles driven by an ADE in D-form
//! - [`cpml`]: convolutional PML profiles and psi memories

pub mod cpml;
pub mod dispersive;
pub mod material;

pub use cpml::{Cpml, CpmlBoundaries, CpmlProfile, Face, PmlSide, Side};
pub use dispersive::{DebyeParams, DispersiveModel, DrudeParams, LorentzParams, Pole};
pub use material::{ConstantModel, Material, MaterialModel, UpdateCoeffs, VoxelBlock};
