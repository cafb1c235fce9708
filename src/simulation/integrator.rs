//! Particle movers used by relaxation
//!
//! - [`shift_particles`]: asynchronous shift, every particle moves by its own
//!   local Courant-like timestep. Not a physically consistent step.
//! - [`Leapfrog`]: kick-drift-kick velocity-Verlet time-integrator with
//!   optional velocity damping, used when external forces or point masses
//!   make the shift ill defined.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;

use super::forces::DerivativeEvaluator;
use super::params::MethodOptions;
use super::states::{Derivatives, NVec3, ParticleState};

/// Courant factor for the shift and the leapfrog timestep
pub const C_COUR: f64 = 0.3;
/// Force timestep factor for the leapfrog
pub const C_FORCE: f64 = 0.25;

/// Lock-free running minimum over `f64` values
pub struct AtomicMinF64(AtomicU64);

impl AtomicMinF64 {
    pub fn new(init: f64) -> Self {
        Self(AtomicU64::new(init.to_bits()))
    }

    /// Compare-and-swap until `v` is stored or a smaller value is present
    pub fn fetch_min(&self, v: f64) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            (v < f64::from_bits(cur)).then_some(v.to_bits())
        });
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Shift every particle by its own local pseudo-timestep
///
/// Evaluates the derivatives once into `derivs`, then per particle:
/// `dt_i = 0.3 h_i / cs_i`, `dx = 0.5 dt_i^2 (a_hydro + a_ext)`, moves the
/// particle by `dx` and sets its velocity to `dx / dt_i` so the kinetic
/// energy measures the size of the shift. Particles with no sound speed are
/// left in place with zero velocity. Smoothing lengths are refreshed from
/// the new positions before returning.
///
/// Returns the minimum `dt_i`, or infinity if no particle moved.
pub fn shift_particles(
    state: &mut ParticleState,
    evaluator: &mut dyn DerivativeEvaluator,
    derivs: &mut Derivatives,
    opts: &MethodOptions,
) -> f64 {
    evaluator.evaluate_derivatives(state, opts, derivs);
    if !derivs.covers(state.len()) {
        log::warn!(
            "shift: accelerations given for {} of {} particles, the rest taken as zero",
            derivs.accel.len().min(derivs.accel_ext.len()),
            state.len()
        );
    }

    let dtmin = AtomicMinF64::new(f64::INFINITY);
    let eos = opts.eos;
    let gamma = opts.gamma;
    let accels: &Derivatives = derivs;

    state
        .particles
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, p)| {
            let cs = eos.sound_speed(gamma, p.u);
            if !(cs > 0.0) {
                p.v = NVec3::zeros();
                return;
            }
            let dti = C_COUR * p.h / cs;
            let dx = 0.5 * dti * dti * accels.total_accel(i);
            p.x += dx;
            p.v = dx / dti;
            dtmin.fetch_min(dti);
        });

    evaluator.update_smoothing_lengths(state, opts);
    dtmin.load()
}

/// Physical time-integrator driven by a [`DerivativeEvaluator`]
pub trait TimeIntegrator {
    /// Timestep to take first, given derivatives of the current state
    fn init_step(&mut self, state: &ParticleState, derivs: &Derivatives, opts: &MethodOptions) -> f64;

    /// Advance all particles by `dt`. `derivs` must hold the derivatives of
    /// the current state and holds those of the new state on return.
    /// Returns the next suggested timestep.
    fn step(
        &mut self,
        state: &mut ParticleState,
        evaluator: &mut dyn DerivativeEvaluator,
        derivs: &mut Derivatives,
        opts: &MethodOptions,
        dt: f64,
    ) -> f64;
}

/// Velocity-Verlet (kick-drift-kick) with damping `a -= rate * v`
///
/// Point masses are held fixed.
#[derive(Debug, Clone)]
pub struct Leapfrog {
    pub dtmax: f64,
}

impl Leapfrog {
    pub fn new(dtmax: f64) -> Self {
        Self { dtmax }
    }

    /// min over particles of Courant and force timesteps, capped at dtmax
    fn timestep(&self, state: &ParticleState, derivs: &Derivatives, opts: &MethodOptions) -> f64 {
        let dt = state
            .particles
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                let cs = opts.eos.sound_speed(opts.gamma, p.u);
                let dtc = if cs > 0.0 { C_COUR * p.h / cs } else { f64::INFINITY };
                let amag = derivs.total_accel(i).norm();
                let dtf = if amag > 0.0 { C_FORCE * (p.h / amag).sqrt() } else { f64::INFINITY };
                dtc.min(dtf)
            })
            .reduce(|| f64::INFINITY, f64::min);
        dt.min(self.dtmax)
    }

    fn kick(state: &mut ParticleState, derivs: &Derivatives, rate: f64, half_dt: f64) {
        state
            .particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, p)| {
                let a = derivs.total_accel(i) - rate * p.v;
                p.v += half_dt * a;
                p.u += half_dt * derivs.dudt_of(i);
            });
    }
}

impl Default for Leapfrog {
    fn default() -> Self {
        Self::new(f64::INFINITY)
    }
}

impl TimeIntegrator for Leapfrog {
    fn init_step(&mut self, state: &ParticleState, derivs: &Derivatives, opts: &MethodOptions) -> f64 {
        self.timestep(state, derivs, opts)
    }

    fn step(
        &mut self,
        state: &mut ParticleState,
        evaluator: &mut dyn DerivativeEvaluator,
        derivs: &mut Derivatives,
        opts: &MethodOptions,
        dt: f64,
    ) -> f64 {
        if state.is_empty() {
            return dt;
        }
        let half_dt = 0.5 * dt;
        let rate = opts.damping.rate();

        // Kick: v_n+1/2 = v_n + (dt/2) a_n
        Self::kick(state, derivs, rate, half_dt);

        // Drift: x_n+1 = x_n + dt v_n+1/2
        for p in state.particles.iter_mut() {
            p.x += dt * p.v;
        }
        state.t += dt;

        // a_n+1 from x_n+1
        evaluator.update_smoothing_lengths(state, opts);
        evaluator.evaluate_derivatives(state, opts, derivs);

        // Second kick: v_n+1 = v_n+1/2 + (dt/2) a_n+1
        Self::kick(state, derivs, rate, half_dt);

        self.timestep(state, derivs, opts)
    }
}
