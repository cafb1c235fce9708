//! Configuration types for loading scenarios from YAML.
//!
//! A thin, `serde`-deserializable mirror of the runtime types. A scenario
//! consists of:
//!
//! - [`EngineConfig`]    – run mode, exchange scheme, species filtering, threads
//! - [`UnitsConfig`]     – code units in cgs and mean molecular weight
//! - [`OptionsConfig`]   – equation of state, gamma, hfact, damping
//! - [`RadiationConfig`] – timestep and step count for the exchange run
//! - [`RelaxConfig`]     – iteration budget, tolerances, diagnostic output
//! - [`ProfileConfig`]   – target radial profile
//! - [`ParticleConfig`]  – initial state of each particle
//! - [`HydroConfig`]     – SPH pressure force and adaptive smoothing lengths
//! - [`ScenarioConfig`]  – top-level wrapper
//!
//! # YAML format
//!
//! ```yaml
//! engine:
//!   mode: "relax"               # relax | exchange
//!   exchange: "implicit"        # implicit | explicit | explicit_substeps | implicit_substeps
//!   strict_species_filter: false
//!   threads: 4                  # omit to use every core
//!
//! units:
//!   udist: 6.959894677e10       # cm
//!   umass: 1.98892e33           # g, utime chosen so G = 1 when omitted
//!
//! options:
//!   eos: "adiabatic"            # or !isothermal { polyk: 0.1 }
//!   gamma: 1.6666667
//!   hfact: 1.2
//!   damping: "off"              # or !constant { coefficient: 0.05 }
//!
//! relax:
//!   maxits: 500
//!   tol_ekin: 1.0e-7
//!   tol_dens: 1.0               # percent
//!   thermal_reset: "utherm"     # or "entropy"
//!   log_file: "relax.ev"        # omit to disable
//!
//! profile:
//!   r:        [0.0, 0.5, 1.0]
//!   rho:      [1.0, 0.5, 0.01]
//!   pressure: [0.1, 0.04, 1.0e-4]
//!
//! masses:
//!   gas: 1.0e-3
//!
//! hydro:
//!   pressure: true              # SPH pressure-gradient force
//!   adaptive_h: true            # h from the summation density after moves
//!
//! particles:
//!   - x: [0.1, 0.0, 0.0]
//!     h: 0.12
//!     u: 0.1
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::simulation::eos::Eos;
use crate::simulation::exchange::ExchangeScheme;
use crate::simulation::params::Damping;
use crate::simulation::profile::ThermalReset;
use crate::simulation::relax::{DEFAULT_DAMPING, DEFAULT_MAXITS, DEFAULT_TOL_DENS, DEFAULT_TOL_EKIN};
use crate::simulation::states::{ParticleType, SpeciesMasses};

/// What the binary does with the scenario
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeConfig {
    #[serde(rename = "relax")] // Relax the particles onto `profile`
    #[default]
    Relax,

    #[serde(rename = "exchange")] // Apply the radiation update `radiation.nsteps` times
    Exchange,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub exchange: ExchangeScheme,
    #[serde(default)]
    pub strict_species_filter: bool, // only gas particles exchange energy
    pub threads: Option<usize>, // size of the rayon pool, all cores when omitted
}

#[derive(Deserialize, Debug, Clone)]
pub struct UnitsConfig {
    pub udist: f64,
    pub umass: f64,
    pub utime: Option<f64>, // G = 1 when omitted
    pub gmw: Option<f64>, // mean molecular weight
}

#[derive(Deserialize, Debug, Clone)]
pub struct OptionsConfig {
    pub eos: Eos,
    pub gamma: f64,
    pub hfact: f64,
    #[serde(default)]
    pub damping: Damping,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RadiationConfig {
    pub dt: f64, // code units
    #[serde(default = "default_nsteps")]
    pub nsteps: usize,
}

fn default_nsteps() -> usize {
    1
}

#[derive(Deserialize, Debug, Clone)]
pub struct RelaxConfig {
    #[serde(default = "default_maxits")]
    pub maxits: usize,
    #[serde(default = "default_tol_ekin")]
    pub tol_ekin: f64,
    #[serde(default = "default_tol_dens")]
    pub tol_dens: f64,
    #[serde(default)]
    pub thermal_reset: ThermalReset,
    #[serde(default = "default_damping")]
    pub damping: f64,
    pub log_file: Option<PathBuf>,
    pub dump_every: Option<usize>,
    pub dump_dir: Option<PathBuf>,
}

impl Default for RelaxConfig {
    fn default() -> Self {
        Self {
            maxits: DEFAULT_MAXITS,
            tol_ekin: DEFAULT_TOL_EKIN,
            tol_dens: DEFAULT_TOL_DENS,
            thermal_reset: ThermalReset::default(),
            damping: DEFAULT_DAMPING,
            log_file: None,
            dump_every: None,
            dump_dir: None,
        }
    }
}

fn default_maxits() -> usize {
    DEFAULT_MAXITS
}

fn default_tol_ekin() -> f64 {
    DEFAULT_TOL_EKIN
}

fn default_tol_dens() -> f64 {
    DEFAULT_TOL_DENS
}

fn default_damping() -> f64 {
    DEFAULT_DAMPING
}

/// Tabulated target profile, sorted by radius
#[derive(Deserialize, Debug, Clone)]
pub struct ProfileConfig {
    pub r: Vec<f64>,
    pub rho: Vec<f64>,
    pub pressure: Vec<f64>,
}

/// Initial state of a single particle
#[derive(Deserialize, Debug, Clone)]
pub struct ParticleConfig {
    pub x: [f64; 3],
    pub h: f64,
    #[serde(default)]
    pub v: [f64; 3],
    #[serde(default)]
    pub u: f64,
    #[serde(default)]
    pub xi: f64,
    #[serde(default)]
    pub kappa: f64,
    #[serde(default, rename = "type")]
    pub kind: ParticleType,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PointMassConfig {
    pub x: [f64; 3],
    #[serde(default)]
    pub v: [f64; 3],
    pub m: f64,
    #[serde(default)]
    pub h_soft: f64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GravityConfig {
    #[serde(default = "default_g")]
    pub g: f64,
    #[serde(default)]
    pub eps2: f64, // softening
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self { g: default_g(), eps2: 0.0 }
    }
}

fn default_g() -> f64 {
    1.0
}

/// Reference SPH hydrodynamics used by relaxation runs
#[derive(Deserialize, Debug, Clone)]
pub struct HydroConfig {
    #[serde(default = "default_true")]
    pub pressure: bool, // pressure-gradient force
    #[serde(default = "default_true")]
    pub adaptive_h: bool, // smoothing lengths from summation density after moves
}

impl Default for HydroConfig {
    fn default() -> Self {
        Self { pressure: true, adaptive_h: true }
    }
}

fn default_true() -> bool {
    true
}

/// Fixed central point-mass potential
#[derive(Deserialize, Debug, Clone)]
pub struct ExternalConfig {
    pub mass: f64,
    #[serde(default)]
    pub centre: [f64; 3],
    #[serde(default)]
    pub softening: f64,
}

/// Top-level scenario configuration loaded from YAML.
#[derive(Deserialize, Debug, Clone)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub units: UnitsConfig,
    pub options: OptionsConfig,
    pub radiation: Option<RadiationConfig>,
    #[serde(default)]
    pub relax: RelaxConfig,
    pub profile: Option<ProfileConfig>,
    pub masses: SpeciesMasses,
    pub particles: Vec<ParticleConfig>,
    #[serde(default)]
    pub point_masses: Vec<PointMassConfig>,
    #[serde(default)]
    pub gravity: GravityConfig,
    #[serde(default)]
    pub hydro: HydroConfig,
    pub external: Option<ExternalConfig>,
    pub heating: Option<f64>, // uniform dudt
}
