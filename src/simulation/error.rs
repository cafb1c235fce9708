//! Error types for profile construction and relaxation
//!
//! Every [`RelaxError`] is fatal to the relaxation attempt only: method
//! options have been restored by the time it reaches the caller, who may
//! carry on with the unrelaxed particles.

use thiserror::Error;

pub type RelaxResult<T> = Result<T, RelaxError>;

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile columns differ in length: r {r}, rho {rho}, pressure {pressure}")]
    LengthMismatch { r: usize, rho: usize, pressure: usize },

    #[error("profile needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("profile radius not strictly increasing at index {index}")]
    NotMonotonic { index: usize },

    #[error("profile density {value} at index {index} is not positive")]
    NonPositiveDensity { index: usize, value: f64 },

    #[error("adiabatic index {0} must exceed 1")]
    InvalidGamma(f64),
}

#[derive(Error, Debug)]
pub enum RelaxError {
    #[error("particle setup failed validation: {errors} errors, {warnings} warnings")]
    SetupErrors { errors: usize, warnings: usize },

    #[error("cannot relax star: tabulated thermal energy {value} at index {index} is not positive")]
    NonPositiveThermalEnergy { index: usize, value: f64 },

    #[error("cannot relax star: thermal energy {etherm:e} exceeds |potential energy| {epot_abs:e}, star is unbound")]
    Unbound { etherm: f64, epot_abs: f64 },

    #[error("invalid profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("relaxation output: {0}")]
    Output(#[from] std::io::Error),

    #[error("relaxation dump: {0}")]
    Dump(#[from] serde_yaml::Error),
}
