//! Iterative relaxation of a particle set onto a target radial profile
//!
//! Each iteration resets thermal energies from the profile, moves the
//! particles one pseudo-step (asynchronous shift, or the real
//! time-integrator when external forces or point masses are present) and
//! refreshes the energy totals. Iteration stops once the kinetic energy and
//! the density error are both small, or the iteration budget is spent.
//!
//! Method options are overridden for the duration of the run through an
//! [`OptionsGuard`] and are restored on every exit path, after which the
//! derivatives are recomputed with the physical options.

use std::fmt;

use crate::simulation::diagnostics::{Energies, EnergyDiagnostics, SetupValidator};
use crate::simulation::eos::Eos;
use crate::simulation::error::{RelaxError, RelaxResult};
use crate::simulation::forces::DerivativeEvaluator;
use crate::simulation::integrator::{shift_particles, TimeIntegrator};
use crate::simulation::output::{write_dump, RelaxLog, RelaxOutput};
use crate::simulation::params::{Damping, MethodOptions, OptionsGuard};
use crate::simulation::profile::{dynamical_time, reset_u_and_get_errors, TargetProfile, ThermalReset};
use crate::simulation::states::{Derivatives, ParticleState};

pub const DEFAULT_MAXITS: usize = 500;
pub const DEFAULT_TOL_EKIN: f64 = 1e-7;
pub const DEFAULT_TOL_DENS: f64 = 1.0; // percent
pub const DEFAULT_DAMPING: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct RelaxSettings {
    pub maxits: usize, // iteration budget
    pub tol_ekin: f64, // on ekin / |epot|
    pub tol_dens: f64, // on RMS density error, percent
    pub thermal_reset: ThermalReset,
    pub damping: f64, // constant damping used when tdyn is not positive
    pub output: RelaxOutput,
}

impl Default for RelaxSettings {
    fn default() -> Self {
        Self {
            maxits: DEFAULT_MAXITS,
            tol_ekin: DEFAULT_TOL_EKIN,
            tol_dens: DEFAULT_TOL_DENS,
            thermal_reset: ThermalReset::Utherm,
            damping: DEFAULT_DAMPING,
            output: RelaxOutput::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxPhase {
    Idle,
    Initializing,
    Iterating,
    Converged,
    IterationBudgetExhausted,
    Restoring,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelaxStatus {
    Converged,
    BudgetExhausted,
}

/// How particles are moved each iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stepping {
    Shift,
    Integrator,
}

impl fmt::Display for Stepping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stepping::Shift => write!(f, "asynchronous shift"),
            Stepping::Integrator => write!(f, "time-integrator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelaxOutcome {
    pub status: RelaxStatus,
    pub nits: usize,
    pub t: f64, // fictitious relaxation time
    pub rmserr: f64,
    pub rmax: f64,
    pub energies: Energies,
    pub mstar: f64,
    pub tdyn: f64,
    pub stepping: Stepping,
}

/// External collaborators the relaxation drives
pub struct Collaborators<'a> {
    pub evaluator: &'a mut dyn DerivativeEvaluator,
    pub validator: &'a dyn SetupValidator,
    pub energies: &'a mut dyn EnergyDiagnostics,
    pub integrator: &'a mut dyn TimeIntegrator,
}

/// Relaxation controller and its diagnostic state
#[derive(Debug, Clone)]
pub struct StarRelaxer {
    settings: RelaxSettings,
    phase: RelaxPhase,
    nits: usize,
    t: f64,
    rmserr: f64,
    rmax: f64,
    energies: Energies,
}

impl StarRelaxer {
    pub fn new(settings: RelaxSettings) -> Self {
        Self {
            settings,
            phase: RelaxPhase::Idle,
            nits: 0,
            t: 0.0,
            rmserr: 0.0,
            rmax: 0.0,
            energies: Energies::default(),
        }
    }

    pub fn settings(&self) -> &RelaxSettings {
        &self.settings
    }

    pub fn phase(&self) -> RelaxPhase {
        self.phase
    }

    pub fn nits(&self) -> usize {
        self.nits
    }

    pub fn rmserr(&self) -> f64 {
        self.rmserr
    }

    pub fn energies(&self) -> Energies {
        self.energies
    }

    fn enter(&mut self, phase: RelaxPhase) {
        log::debug!("relax: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Relax `state` onto `profile`
    ///
    /// On success and on every error the options in `opts` are left exactly
    /// as they were on entry and `derivs` holds the derivatives of the final
    /// state evaluated with those options.
    pub fn relax_star(
        &mut self,
        profile: &TargetProfile,
        state: &mut ParticleState,
        derivs: &mut Derivatives,
        opts: &mut MethodOptions,
        collab: &mut Collaborators<'_>,
    ) -> RelaxResult<RelaxOutcome> {
        self.enter(RelaxPhase::Initializing);
        let t_start = state.t;

        let result = {
            let mut guard = OptionsGuard::new(opts);
            self.run(profile, state, derivs, &mut guard, collab)
        };

        self.enter(RelaxPhase::Restoring);
        state.t = t_start;
        collab.evaluator.evaluate_derivatives(state, opts, derivs);
        self.enter(RelaxPhase::Done);

        match &result {
            Ok(outcome) if outcome.status == RelaxStatus::Converged => {
                log::info!("relax: converged after {} iterations, rms error {:.3e}", outcome.nits, outcome.rmserr)
            }
            Ok(outcome) => log::warn!(
                "relax: stopped after {} iterations without converging, rms error {:.3e}",
                outcome.nits,
                outcome.rmserr
            ),
            Err(e) => log::error!("relax: {e}"),
        }
        result
    }

    fn run(
        &mut self,
        profile: &TargetProfile,
        state: &mut ParticleState,
        derivs: &mut Derivatives,
        opts: &mut MethodOptions,
        collab: &mut Collaborators<'_>,
    ) -> RelaxResult<RelaxOutcome> {
        let mstar = profile.mstar();
        let rstar = profile.rstar();
        let tdyn = dynamical_time(rstar, mstar);

        let report = collab.validator.check_setup(state, opts);
        if report.errors > 0 {
            return Err(RelaxError::SetupErrors { errors: report.errors, warnings: report.warnings });
        }
        if let Some((index, value)) = profile.first_nonpositive_utherm() {
            return Err(RelaxError::NonPositiveThermalEnergy { index, value });
        }

        opts.eos = Eos::Adiabatic;
        opts.damping = if tdyn > 0.0 {
            Damping::DynamicalTime { tdyn }
        } else {
            Damping::Constant { coefficient: self.settings.damping }
        };

        // shifting is undefined with external forces or point masses
        let stepping = if !state.point_masses.is_empty() || collab.evaluator.has_external_forces() {
            Stepping::Integrator
        } else {
            Stepping::Shift
        };
        log::info!(
            "relax: {} particles, mstar = {:.4e}, rstar = {:.4e}, tdyn = {:.4e}, using {}",
            state.len(),
            mstar,
            rstar,
            tdyn,
            stepping
        );

        let mode = self.settings.thermal_reset;
        self.t = 0.0;
        collab.evaluator.update_smoothing_lengths(state, opts);
        let initial = reset_u_and_get_errors(state, profile, mode, opts);
        self.rmserr = initial.rmserr;
        self.rmax = initial.rmax;
        collab.evaluator.evaluate_derivatives(state, opts, derivs);
        self.energies = collab.energies.compute_energies(state, opts, self.t);
        if self.energies.etherm > self.energies.epot.abs() {
            return Err(RelaxError::Unbound {
                etherm: self.energies.etherm,
                epot_abs: self.energies.epot.abs(),
            });
        }

        let mut dt = match stepping {
            Stepping::Integrator => collab.integrator.init_step(state, derivs, opts),
            Stepping::Shift => 0.0,
        };
        let output = self.settings.output.clone();
        if output.is_enabled() {
            log::info!("relax: writing log {:?}, dumps every {:?} iterations", output.log_file, output.dump_every);
        }
        let mut relax_log = output.log_file.as_deref().map(RelaxLog::create).transpose()?;

        self.enter(RelaxPhase::Iterating);
        self.nits = 0;
        let (tol_ekin, tol_dens, maxits) = (self.settings.tol_ekin, self.settings.tol_dens, self.settings.maxits);

        let status = loop {
            if self.nits >= maxits {
                break RelaxStatus::BudgetExhausted;
            }

            let errors = reset_u_and_get_errors(state, profile, mode, opts);
            self.rmserr = errors.rmserr;
            self.rmax = errors.rmax;

            match stepping {
                Stepping::Shift => {
                    let dtmin = shift_particles(state, &mut *collab.evaluator, derivs, opts);
                    if dtmin.is_finite() {
                        self.t += dtmin;
                    }
                }
                Stepping::Integrator => {
                    let dtnext = collab.integrator.step(state, &mut *collab.evaluator, derivs, opts, dt);
                    self.t += dt;
                    dt = dtnext;
                }
            }
            self.nits += 1;

            self.energies = collab.energies.compute_energies(state, opts, self.t);
            let ekin_ratio = self.energies.ekin / self.energies.epot.abs();
            log::debug!(
                "relax: nits = {}, t = {:.4e}, rmax = {:.4e}, ekin/epot = {:.3e}, rmserr = {:.3e}",
                self.nits,
                self.t,
                self.rmax,
                ekin_ratio,
                self.rmserr
            );
            if let Some(relax_log) = relax_log.as_mut() {
                relax_log.write_line(self.nits, self.rmax, &self.energies, self.rmserr)?;
            }
            if let Some(every) = output.dump_every.filter(|&n| n > 0) {
                if self.nits % every == 0 {
                    write_dump(&output.dump_dir, self.nits, self.t, state)?;
                }
            }

            let converged = self.energies.ekin > 0.0 && ekin_ratio < tol_ekin && self.rmserr < 0.01 * tol_dens;
            if converged {
                break RelaxStatus::Converged;
            }
        };

        self.enter(match status {
            RelaxStatus::Converged => RelaxPhase::Converged,
            RelaxStatus::BudgetExhausted => RelaxPhase::IterationBudgetExhausted,
        });

        Ok(RelaxOutcome {
            status,
            nits: self.nits,
            t: self.t,
            rmserr: self.rmserr,
            rmax: self.rmax,
            energies: self.energies,
            mstar,
            tdyn,
            stepping,
        })
    }
}
