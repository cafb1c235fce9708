//! Force / derivative contributors
//!
//! [`DerivativeEvaluator`] is the contract the relaxation and radiation code
//! call to obtain accelerations and heating rates for the whole particle set.
//! [`ForceSet`] is a composable implementation: a list of
//! [`DerivativeTerm`]s whose contributions are summed into [`Derivatives`].

use crate::simulation::params::MethodOptions;
use crate::simulation::sph;
use crate::simulation::states::{Derivatives, NVec3, ParticleState};

/// Fills acceleration and heating-rate buffers for every particle.
/// Synchronous and whole-array.
pub trait DerivativeEvaluator {
    fn evaluate_derivatives(&mut self, state: &ParticleState, opts: &MethodOptions, out: &mut Derivatives);

    /// True when an external potential contributes to the accelerations
    fn has_external_forces(&self) -> bool {
        false
    }

    /// Bring smoothing lengths in line with the current positions. Called
    /// after particles move; no-op for evaluators that keep h fixed.
    fn update_smoothing_lengths(&mut self, _state: &mut ParticleState, _opts: &MethodOptions) {}
}

/// One contribution to the derivatives (gravity, external potential, heating)
/// Implementations add into `out`, never overwrite
pub trait DerivativeTerm {
    fn accumulate(&self, state: &ParticleState, opts: &MethodOptions, out: &mut Derivatives);

    fn is_external(&self) -> bool {
        false
    }
}

/// Collection of derivative terms
#[derive(Default)]
pub struct ForceSet {
    terms: Vec<Box<dyn DerivativeTerm + Send + Sync>>,
    adaptive_h: bool,
}

impl ForceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self { terms: Vec::new(), adaptive_h: false }
    }

    /// Recompute smoothing lengths from the summation density after moves
    pub fn with_adaptive_smoothing(mut self) -> Self {
        self.adaptive_h = true;
        self
    }

    /// Add a term
    pub fn with(mut self, term: impl DerivativeTerm + Send + Sync + 'static) -> Self {
        self.terms.push(Box::new(term));
        self
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl DerivativeEvaluator for ForceSet {
    /// Zero the buffers, then let every term add its contribution
    fn evaluate_derivatives(&mut self, state: &ParticleState, opts: &MethodOptions, out: &mut Derivatives) {
        out.reset(state.len());
        for term in &self.terms {
            term.accumulate(state, opts, out);
        }
    }

    fn has_external_forces(&self) -> bool {
        self.terms.iter().any(|t| t.is_external())
    }

    fn update_smoothing_lengths(&mut self, state: &mut ParticleState, opts: &MethodOptions) {
        if !self.adaptive_h {
            return;
        }
        let unconverged = sph::update_smoothing_lengths(state, opts.hfact);
        if unconverged > 0 {
            log::debug!("smoothing lengths: {unconverged} particles did not converge");
        }
    }
}

/// Newtonian self gravity between SPH particles, direct n^2 sum with
/// Plummer softening `eps2`
pub struct SelfGravity {
    pub g: f64,
    pub eps2: f64,
}

impl DerivativeTerm for SelfGravity {
    fn accumulate(&self, state: &ParticleState, _opts: &MethodOptions, out: &mut Derivatives) {
        let parts = &state.particles;
        let n = parts.len();

        // each unordered pair once, equal and opposite
        for i in 0..n {
            let pi = &parts[i];
            let mi = state.mass_of(pi);
            for j in (i + 1)..n {
                let pj = &parts[j];
                let mj = state.mass_of(pj);

                let r = pj.x - pi.x;
                let inv_r = (r.dot(&r) + self.eps2).sqrt().recip();
                let coef = self.g * inv_r * inv_r * inv_r;

                out.accel[i] += coef * mj * r;
                out.accel[j] -= coef * mi * r;
            }
        }
    }
}

/// Gravity of the sink particles on the gas (sinks are not moved here)
pub struct PointMassGravity {
    pub g: f64,
}

impl DerivativeTerm for PointMassGravity {
    fn accumulate(&self, state: &ParticleState, _opts: &MethodOptions, out: &mut Derivatives) {
        for (i, p) in state.particles.iter().enumerate() {
            for pm in &state.point_masses {
                let r = pm.x - p.x;
                let inv_r = (r.dot(&r) + pm.h_soft * pm.h_soft).sqrt().recip();
                out.accel_ext[i] += self.g * pm.m * inv_r * inv_r * inv_r * r;
            }
        }
    }

    fn is_external(&self) -> bool {
        true
    }
}

/// Fixed softened point-mass potential at `centre`
pub struct CentralPotential {
    pub g: f64,
    pub mass: f64,
    pub centre: NVec3,
    pub softening: f64,
}

impl CentralPotential {
    pub fn potential(&self, x: &NVec3) -> f64 {
        let r2 = (x - self.centre).norm_squared() + self.softening * self.softening;
        -self.g * self.mass / r2.sqrt()
    }
}

impl DerivativeTerm for CentralPotential {
    fn accumulate(&self, state: &ParticleState, _opts: &MethodOptions, out: &mut Derivatives) {
        for (a, p) in out.accel_ext.iter_mut().zip(state.particles.iter()) {
            let r = self.centre - p.x;
            let inv_r = (r.dot(&r) + self.softening * self.softening).sqrt().recip();
            *a += self.g * self.mass * inv_r * inv_r * inv_r * r;
        }
    }

    fn is_external(&self) -> bool {
        true
    }
}

/// Uniform heating (or cooling, if negative) rate
pub struct ConstantHeating {
    pub dudt: f64,
}

impl DerivativeTerm for ConstantHeating {
    fn accumulate(&self, _state: &ParticleState, _opts: &MethodOptions, out: &mut Derivatives) {
        for d in out.dudt.iter_mut() {
            *d += self.dudt;
        }
    }
}
