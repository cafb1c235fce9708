//! Build fully-initialized runs from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces the runtime bundle
//! `Scenario` containing:
//! - engine settings (`Engine`)
//! - unit system and method options
//! - particle state at t = 0
//! - the active derivative terms (`ForceSet`), including SPH pressure and
//!   adaptive smoothing lengths unless disabled, and energy diagnostics
//! - the target profile and relaxation settings, when relaxing

use nalgebra::Vector3;

use crate::configuration::config::{ParticleConfig, ScenarioConfig};
use crate::simulation::diagnostics::{BasicSetupCheck, DirectEnergies};
use crate::simulation::engine::Engine;
use crate::simulation::error::{ProfileError, RelaxResult};
use crate::simulation::forces::{
    CentralPotential, ConstantHeating, DerivativeEvaluator, ForceSet, PointMassGravity, SelfGravity,
};
use crate::simulation::integrator::Leapfrog;
use crate::simulation::output::RelaxOutput;
use crate::simulation::params::MethodOptions;
use crate::simulation::profile::TargetProfile;
use crate::simulation::radiation::{update_radenergy, ExchangeReport, RadiationSettings};
use crate::simulation::relax::{Collaborators, RelaxOutcome, RelaxSettings, StarRelaxer};
use crate::simulation::sph::SphPressure;
use crate::simulation::states::{Derivatives, Particle, ParticleState, PointMass};
use crate::simulation::units::UnitSystem;

/// Everything needed to run relaxation or the radiation exchange
pub struct Scenario {
    pub engine: Engine,
    pub units: UnitSystem,
    pub options: MethodOptions,
    pub state: ParticleState,
    pub derivs: Derivatives,
    pub forces: ForceSet,
    pub energies: DirectEnergies,
    pub profile: Option<TargetProfile>,
    pub relax: RelaxSettings,
    pub dt: f64, // radiation exchange timestep
    pub nsteps: usize, // radiation exchange steps
}

impl Scenario {
    pub fn build_scenario(cfg: ScenarioConfig) -> Result<Self, ProfileError> {
        // Particles: map `ParticleConfig` -> runtime `Particle`
        let particles: Vec<Particle> = cfg
            .particles
            .iter()
            .map(|pc: &ParticleConfig| Particle {
                x: Vector3::from(pc.x),
                h: pc.h,
                v: Vector3::from(pc.v),
                u: pc.u,
                xi: pc.xi,
                kappa: pc.kappa,
                kind: pc.kind,
                optically_thick: false,
            })
            .collect();
        let mut state = ParticleState::new(particles, cfg.masses);
        state.point_masses = cfg
            .point_masses
            .iter()
            .map(|pm| PointMass {
                x: Vector3::from(pm.x),
                v: Vector3::from(pm.v),
                m: pm.m,
                h_soft: pm.h_soft,
            })
            .collect();

        let u_cfg = cfg.units;
        let mut units = match u_cfg.utime {
            Some(utime) => UnitSystem { udist: u_cfg.udist, umass: u_cfg.umass, utime, ..UnitSystem::default() },
            None => UnitSystem::with_g_one(u_cfg.udist, u_cfg.umass),
        };
        if let Some(gmw) = u_cfg.gmw {
            units.gmw = gmw;
        }

        let o_cfg = cfg.options;
        let options = MethodOptions {
            eos: o_cfg.eos,
            gamma: o_cfg.gamma,
            hfact: o_cfg.hfact,
            damping: o_cfg.damping,
        };

        let engine = Engine {
            mode: cfg.engine.mode,
            radiation: RadiationSettings {
                scheme: cfg.engine.exchange,
                strict_species_filter: cfg.engine.strict_species_filter,
            },
            threads: cfg.engine.threads,
        };

        let profile = cfg
            .profile
            .map(|p| TargetProfile::new(p.r, p.rho, p.pressure, options.gamma))
            .transpose()?;

        let r_cfg = cfg.relax;
        let relax = RelaxSettings {
            maxits: r_cfg.maxits,
            tol_ekin: r_cfg.tol_ekin,
            tol_dens: r_cfg.tol_dens,
            thermal_reset: r_cfg.thermal_reset,
            damping: r_cfg.damping,
            output: RelaxOutput {
                log_file: r_cfg.log_file,
                dump_every: r_cfg.dump_every,
                dump_dir: r_cfg.dump_dir.unwrap_or_else(|| ".".into()),
            },
        };

        // Forces: self gravity, pressure, then whatever else is configured
        let g = cfg.gravity.g;
        let mut forces = ForceSet::new().with(SelfGravity { g, eps2: cfg.gravity.eps2 });
        if cfg.hydro.pressure {
            forces = forces.with(SphPressure);
        }
        if cfg.hydro.adaptive_h {
            forces = forces.with_adaptive_smoothing();
        }
        let mut energies = DirectEnergies::new(g, cfg.gravity.eps2);
        if !state.point_masses.is_empty() {
            forces = forces.with(PointMassGravity { g });
        }
        if let Some(ext) = cfg.external {
            let centre = Vector3::from(ext.centre);
            forces = forces.with(CentralPotential { g, mass: ext.mass, centre, softening: ext.softening });
            energies.central = Some(CentralPotential { g, mass: ext.mass, centre, softening: ext.softening });
        }
        if let Some(dudt) = cfg.heating {
            forces = forces.with(ConstantHeating { dudt });
        }

        let (dt, nsteps) = cfg.radiation.map(|r| (r.dt, r.nsteps)).unwrap_or((0.0, 0));
        let derivs = Derivatives::zeros(state.len());

        Ok(Self {
            engine,
            units,
            options,
            state,
            derivs,
            forces,
            energies,
            profile,
            relax,
            dt,
            nsteps,
        })
    }

    /// Relax the particles onto the configured profile.
    /// Returns `None` when the scenario has no profile.
    pub fn run_relax(&mut self) -> Option<RelaxResult<RelaxOutcome>> {
        let profile = self.profile.as_ref()?;
        let mut integrator = Leapfrog::default();
        let mut relaxer = StarRelaxer::new(self.relax.clone());
        let mut collab = Collaborators {
            evaluator: &mut self.forces,
            validator: &BasicSetupCheck,
            energies: &mut self.energies,
            integrator: &mut integrator,
        };
        Some(relaxer.relax_star(profile, &mut self.state, &mut self.derivs, &mut self.options, &mut collab))
    }

    /// Evaluate heating rates and apply the radiation exchange `nsteps` times
    pub fn run_exchange(&mut self) -> Vec<ExchangeReport> {
        (0..self.nsteps)
            .map(|_| {
                self.forces.evaluate_derivatives(&self.state, &self.options, &mut self.derivs);
                let report = update_radenergy(
                    &mut self.state,
                    &self.derivs,
                    &self.options,
                    &self.units,
                    &self.engine.radiation,
                    self.dt,
                );
                self.state.t += self.dt;
                let tmax = self
                    .state
                    .particles
                    .iter()
                    .map(|p| self.units.temperature(p.u, self.options.gamma))
                    .fold(0.0, f64::max);
                log::debug!("exchange: t = {:.4e}, max gas temperature {:.4e} K", self.state.t, tmax);
                report
            })
            .collect()
    }
}
