pub mod simulation;
pub mod configuration;
pub mod benchmark;

pub use simulation::states::{Particle, ParticleState, ParticleType, PointMass, SpeciesMasses, Derivatives, NVec3, rhoh, hrho};
pub use simulation::params::{MethodOptions, Damping, OptionsGuard};
pub use simulation::units::UnitSystem;
pub use simulation::eos::Eos;
pub use simulation::exchange::{ExchangeScheme, ExchangeInput, ExchangeSolution, solve_internal_energy_implicit};
pub use simulation::radiation::{update_radenergy, update_radenergy_with, ExchangeConstants, ExchangeReport, RadiationAnomaly, RadiationSettings};
pub use simulation::forces::{DerivativeEvaluator, DerivativeTerm, ForceSet, SelfGravity, PointMassGravity, CentralPotential, ConstantHeating};
pub use simulation::diagnostics::{SetupValidator, SetupReport, BasicSetupCheck, EnergyDiagnostics, Energies, DirectEnergies};
pub use simulation::integrator::{shift_particles, TimeIntegrator, Leapfrog};
pub use simulation::profile::{TargetProfile, ThermalReset, ResampleResult, interpolate, get_mstar, reset_u_and_get_errors};
pub use simulation::relax::{StarRelaxer, RelaxSettings, RelaxOutcome, RelaxStatus, RelaxPhase, Stepping, Collaborators};
pub use simulation::error::{RelaxError, ProfileError};
pub use simulation::scenario::Scenario;

pub use configuration::config::{ScenarioConfig, EngineConfig, ModeConfig};

pub use benchmark::benchmark::{bench_radiation, bench_shift};
