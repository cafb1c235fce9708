//! Reference SPH hydrodynamics for relaxation runs
//!
//! Cubic spline (M4) kernel with compact support `2h`, smoothing lengths
//! solved from the summation density and the symmetric pressure-gradient
//! force. Neighbours are found by direct search over all pairs.

use std::f64::consts::PI;

use rayon::prelude::*;

use crate::simulation::forces::DerivativeTerm;
use crate::simulation::params::MethodOptions;
use crate::simulation::states::{hrho, rhoh, Derivatives, NVec3, ParticleState};

/// Kernel support in units of h
pub const RADKERN: f64 = 2.0;
/// Relative change in h accepted as converged
pub const H_TOLERANCE: f64 = 1e-4;
pub const MAX_H_ITERATIONS: usize = 30;

const CNORM: f64 = 1.0 / PI;

/// Dimensionless kernel shape f(q), W = f(q) / (pi h^3)
#[inline]
pub fn kernel(q: f64) -> f64 {
    if q < 1.0 {
        1.0 - 1.5 * q * q + 0.75 * q * q * q
    } else if q < RADKERN {
        0.25 * (2.0 - q).powi(3)
    } else {
        0.0
    }
}

/// df/dq
#[inline]
pub fn kernel_grad(q: f64) -> f64 {
    if q < 1.0 {
        -3.0 * q + 2.25 * q * q
    } else if q < RADKERN {
        -0.75 * (2.0 - q).powi(2)
    } else {
        0.0
    }
}

/// Summation density at particle `i` for trial smoothing length `h`, and
/// its derivative with respect to `h`
fn density_sum(state: &ParticleState, i: usize, h: f64) -> (f64, f64) {
    let xi = state.particles[i].x;
    let h3 = h * h * h;
    let (mut rho, mut drhodh) = (0.0, 0.0);
    for pj in &state.particles {
        let q = (pj.x - xi).norm() / h;
        if q >= RADKERN {
            continue;
        }
        let m = state.mass_of(pj);
        let f = kernel(q);
        rho += m * CNORM * f / h3;
        drhodh -= m * CNORM * (3.0 * f + q * kernel_grad(q)) / (h3 * h);
    }
    (rho, drhodh)
}

/// Solve rhoh(h) = summation density for one particle. Newton-Raphson,
/// falling back to a fixed-point step when Newton leaves [h/2, 2h].
/// Returns the new h and whether it converged.
fn solve_h(state: &ParticleState, i: usize, hfact: f64) -> (f64, bool) {
    let p = &state.particles[i];
    let m = state.mass_of(p);
    let mut h = p.h;
    for _ in 0..MAX_H_ITERATIONS {
        let (rho_sum, drho_sum) = density_sum(state, i, h);
        let rho_h = rhoh(h, m, hfact);
        let func = rho_h - rho_sum;
        let dfunc = -3.0 * rho_h / h - drho_sum;

        let newton = h - func / dfunc;
        let hnew = if newton > 0.5 * h && newton < 2.0 * h { newton } else { hrho(rho_sum, m, hfact) };
        let converged = ((hnew - h) / h).abs() < H_TOLERANCE;
        h = hnew;
        if converged {
            return (h, true);
        }
    }
    (h, false)
}

/// Set every particle's smoothing length from the density of its
/// neighbours at the current positions
///
/// Returns the number of particles whose iteration did not converge; those
/// keep the last iterate.
pub fn update_smoothing_lengths(state: &mut ParticleState, hfact: f64) -> usize {
    let current: &ParticleState = state;
    let solved: Vec<(f64, bool)> = (0..current.len())
        .into_par_iter()
        .map(|i| solve_h(current, i, hfact))
        .collect();

    let mut unconverged = 0;
    for (p, (h, converged)) in state.particles.iter_mut().zip(solved) {
        if h.is_finite() && h > 0.0 {
            p.h = h;
        }
        if !converged {
            unconverged += 1;
        }
    }
    unconverged
}

/// Pressure-gradient acceleration
///
/// `a_i = -sum_j m_j (P_i / rho_i^2 grad W(h_i) + P_j / rho_j^2 grad W(h_j))`
/// with densities from the smoothing lengths and pressures from the
/// configured equation of state.
pub struct SphPressure;

impl DerivativeTerm for SphPressure {
    fn accumulate(&self, state: &ParticleState, opts: &MethodOptions, out: &mut Derivatives) {
        let parts = &state.particles;
        let (eos, gamma, hfact) = (opts.eos, opts.gamma, opts.hfact);

        // P / rho^2 per particle
        let pterm: Vec<f64> = parts
            .par_iter()
            .map(|p| {
                let rho = rhoh(p.h, state.mass_of(p), hfact);
                eos.pressure(gamma, rho, p.u) / (rho * rho)
            })
            .collect();

        let accel: Vec<NVec3> = (0..parts.len())
            .into_par_iter()
            .map(|i| {
                let pi = &parts[i];
                let mut a = NVec3::zeros();
                for (j, pj) in parts.iter().enumerate() {
                    if j == i {
                        continue;
                    }
                    let rij = pi.x - pj.x;
                    let r = rij.norm();
                    if r == 0.0 {
                        continue;
                    }
                    let gi = CNORM * kernel_grad(r / pi.h) / pi.h.powi(4);
                    let gj = CNORM * kernel_grad(r / pj.h) / pj.h.powi(4);
                    a -= state.mass_of(pj) * (pterm[i] * gi + pterm[j] * gj) / r * rij;
                }
                a
            })
            .collect();

        for (o, a) in out.accel.iter_mut().zip(accel) {
            *o += a;
        }
    }
}
