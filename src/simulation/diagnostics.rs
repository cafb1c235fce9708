//! Setup validation and global energy diagnostics

use rayon::prelude::*;

use crate::simulation::forces::CentralPotential;
use crate::simulation::params::MethodOptions;
use crate::simulation::states::ParticleState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupReport {
    pub warnings: usize,
    pub errors: usize,
}

/// Structural validity check run before relaxation
pub trait SetupValidator {
    fn check_setup(&self, state: &ParticleState, opts: &MethodOptions) -> SetupReport;
}

/// Errors: empty set, non-finite values, non-positive h or particle mass,
/// non-positive hfact. Warnings: negative internal or radiation energy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicSetupCheck;

impl SetupValidator for BasicSetupCheck {
    fn check_setup(&self, state: &ParticleState, opts: &MethodOptions) -> SetupReport {
        let mut report = SetupReport::default();

        if state.is_empty() {
            log::error!("setup: no particles");
            report.errors += 1;
            return report;
        }
        if !(opts.hfact > 0.0) {
            log::error!("setup: hfact = {} must be positive", opts.hfact);
            report.errors += 1;
        }

        for (i, p) in state.particles.iter().enumerate() {
            let finite = p.x.iter().chain(p.v.iter()).all(|c| c.is_finite())
                && p.h.is_finite()
                && p.u.is_finite()
                && p.xi.is_finite();
            if !finite {
                log::error!("setup: particle {i} has non-finite position, velocity or energy");
                report.errors += 1;
                continue;
            }
            if p.h <= 0.0 {
                log::error!("setup: particle {i} has smoothing length {}", p.h);
                report.errors += 1;
            }
            if state.mass_of(p) <= 0.0 {
                log::error!("setup: particle {i} of type {:?} has no mass", p.kind);
                report.errors += 1;
            }
            if p.u < 0.0 {
                log::warn!("setup: particle {i} has negative internal energy {}", p.u);
                report.warnings += 1;
            }
            if p.xi < 0.0 {
                log::warn!("setup: particle {i} has negative radiation energy {}", p.xi);
                report.warnings += 1;
            }
        }
        report
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Energies {
    pub ekin: f64,
    pub epot: f64,
    pub etherm: f64,
}

impl Energies {
    pub fn total(&self) -> f64 {
        self.ekin + self.epot + self.etherm
    }
}

/// Kinetic, potential and thermal energy totals at time `t`
pub trait EnergyDiagnostics {
    fn compute_energies(&mut self, state: &ParticleState, opts: &MethodOptions, t: f64) -> Energies;
}

/// Direct summation of all three totals. Potential uses the same softening
/// as [`SelfGravity`](crate::simulation::forces::SelfGravity), plus point
/// masses and an optional central potential.
pub struct DirectEnergies {
    pub g: f64,
    pub eps2: f64,
    pub central: Option<CentralPotential>,
}

impl DirectEnergies {
    pub fn new(g: f64, eps2: f64) -> Self {
        Self { g, eps2, central: None }
    }
}

impl EnergyDiagnostics for DirectEnergies {
    fn compute_energies(&mut self, state: &ParticleState, _opts: &MethodOptions, _t: f64) -> Energies {
        let parts = &state.particles;

        let (ekin, etherm) = parts
            .par_iter()
            .map(|p| {
                let m = state.mass_of(p);
                (0.5 * m * p.v.norm_squared(), m * p.u)
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

        let epot_pairs: f64 = (0..parts.len())
            .into_par_iter()
            .map(|i| {
                let pi = &parts[i];
                let mi = state.mass_of(pi);
                let mut e = 0.0;
                for pj in &parts[i + 1..] {
                    let d = ((pj.x - pi.x).norm_squared() + self.eps2).sqrt();
                    e -= self.g * mi * state.mass_of(pj) / d;
                }
                for pm in &state.point_masses {
                    let d = ((pm.x - pi.x).norm_squared() + pm.h_soft * pm.h_soft).sqrt();
                    e -= self.g * mi * pm.m / d;
                }
                if let Some(c) = &self.central {
                    e += mi * c.potential(&pi.x);
                }
                e
            })
            .sum();

        let ekin_sinks: f64 = state.point_masses.iter().map(|pm| 0.5 * pm.m * pm.v.norm_squared()).sum();

        Energies {
            ekin: ekin + ekin_sinks,
            epot: epot_pairs,
            etherm,
        }
    }
}
