//! Gas/radiation energy exchange for a single particle
//!
//! Solves for the new specific internal energy given the old gas and
//! radiation energies, with the total `etot = u + xi` held fixed:
//!
//! ```text
//! unew = u0 + dt dudt + dt ack ( rho (etot - unew) / a - (unew cv1)^4 )
//! ```
//!
//! `ack = 4 sigma kappa` sets the coupling strength. The default strategy is
//! backward Euler solved with Newton-Raphson; the explicit and substepped
//! strategies are kept behind the same interface.

use serde::Deserialize;

/// Hard cap on Newton-Raphson iterations. Not a convergence guarantee.
pub const MAX_NEWTON_ITERATIONS: usize = 10;

/// Relative change between successive substep refinements that ends the
/// doubling in the substepped strategies
pub const SUBSTEP_TOLERANCE: f64 = 1e-8;
pub const MAX_SUBSTEPS: usize = 1024;

/// Which scheme solves the exchange equation
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeScheme {
    #[serde(rename = "implicit")] // Backward Euler, Newton-Raphson. Unconditionally stable
    #[default]
    Implicit,

    #[serde(rename = "explicit")] // Single forward Euler step
    Explicit,

    #[serde(rename = "explicit_substeps")] // Forward Euler, substeps doubled until converged
    ExplicitSubsteps,

    #[serde(rename = "implicit_substeps")] // Backward Euler, substeps doubled until converged
    ImplicitSubsteps,
}

/// Per-particle inputs to the exchange solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeInput {
    pub u0: f64, // gas energy at start of step
    pub etot: f64, // u0 + xi0
    pub rho: f64,
    pub dudt: f64, // heating rate from hydrodynamics
    pub ack: f64, // 4 sigma kappa
    pub a: f64, // radiation constant
    pub cv1: f64, // T = u cv1
    pub dt: f64,
}

impl ExchangeInput {
    /// Right-hand side du/dt at gas energy `u`
    #[inline]
    fn rate(&self, u: f64) -> f64 {
        self.dudt + self.ack * (self.rho * (self.etot - u) / self.a - (u * self.cv1).powi(4))
    }
}

/// Result of one exchange solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeSolution {
    pub u: f64,
    pub xi: f64,
    pub iterations: usize, // Newton iterations or substeps used
}

impl ExchangeScheme {
    /// Solve for the new gas energy; radiation energy is `etot - u`
    pub fn solve(&self, input: &ExchangeInput) -> ExchangeSolution {
        let (u, iterations) = match self {
            ExchangeScheme::Implicit => implicit_step(input, input.u0, input.dt),
            ExchangeScheme::Explicit => (explicit_step(input, input.u0, input.dt), 1),
            ExchangeScheme::ExplicitSubsteps => substepped(input, explicit_substeps),
            ExchangeScheme::ImplicitSubsteps => substepped(input, implicit_substeps),
        };
        ExchangeSolution { u, xi: input.etot - u, iterations }
    }
}

/// Backward Euler for the default path
pub fn solve_internal_energy_implicit(input: &ExchangeInput) -> f64 {
    implicit_step(input, input.u0, input.dt).0
}

/// One backward-Euler step of length `dt` from `ustart`.
///
/// Newton-Raphson on
/// f(u) = u - ustart - dt dudt - dt ack (rho (etot - u)/a - (u cv1)^4),
/// starting from `ustart`, stopped when successive iterates agree to
/// machine epsilon or after [`MAX_NEWTON_ITERATIONS`].
fn implicit_step(input: &ExchangeInput, ustart: f64, dt: f64) -> (f64, usize) {
    let cv1_4 = input.cv1.powi(4);
    let mut unew = ustart;
    let mut its = 0;

    while its < MAX_NEWTON_ITERATIONS {
        its += 1;
        let uold = unew;
        let fu = unew - ustart - dt * input.rate(unew);
        let dfu = 1.0 + dt * input.ack * (input.rho / input.a + 4.0 * unew.powi(3) * cv1_4);
        unew = uold - fu / dfu;
        if (unew - uold).abs() < f64::EPSILON {
            break;
        }
    }
    (unew, its)
}

fn explicit_step(input: &ExchangeInput, ustart: f64, dt: f64) -> f64 {
    ustart + dt * input.rate(ustart)
}

fn explicit_substeps(input: &ExchangeInput, nsteps: usize) -> f64 {
    let dts = input.dt / nsteps as f64;
    (0..nsteps).fold(input.u0, |u, _| explicit_step(input, u, dts))
}

fn implicit_substeps(input: &ExchangeInput, nsteps: usize) -> f64 {
    let dts = input.dt / nsteps as f64;
    (0..nsteps).fold(input.u0, |u, _| implicit_step(input, u, dts).0)
}

/// Double the number of substeps until two successive refinements agree to
/// [`SUBSTEP_TOLERANCE`] relative change, or [`MAX_SUBSTEPS`] is reached.
fn substepped(input: &ExchangeInput, integrate: fn(&ExchangeInput, usize) -> f64) -> (f64, usize) {
    let mut nsteps = 1;
    let mut uprev = integrate(input, nsteps);

    while nsteps < MAX_SUBSTEPS {
        nsteps *= 2;
        let unew = integrate(input, nsteps);
        let scale = unew.abs().max(f64::MIN_POSITIVE);
        let converged = (unew - uprev).abs() / scale < SUBSTEP_TOLERANCE;
        uprev = unew;
        if converged {
            break;
        }
    }
    (uprev, nsteps)
}
