use std::time::Instant;

use crate::simulation::exchange::ExchangeScheme;
use crate::simulation::forces::{DerivativeTerm, ForceSet, SelfGravity};
use crate::simulation::integrator::shift_particles;
use crate::simulation::params::MethodOptions;
use crate::simulation::radiation::{update_radenergy_with, ExchangeConstants, RadiationSettings};
use crate::simulation::states::{Derivatives, NVec3, Particle, ParticleState, SpeciesMasses};

/// Helper to build a particle set of size `n`
/// deterministic positions, no rand needed
fn make_state(n: usize) -> ParticleState {
    let particles = (0..n)
        .map(|i| {
            let i_f = i as f64;
            let x = NVec3::new((i_f * 0.37).sin(), (i_f * 0.13).cos(), (i_f * 0.07).sin());
            let mut p = Particle::gas(x, 0.05, 1.0 + 0.5 * (i_f * 0.11).sin());
            p.xi = 0.5 + 0.25 * (i_f * 0.19).cos();
            p.kappa = 1.0;
            p
        })
        .collect();
    ParticleState::new(particles, SpeciesMasses::gas_only(1.0 / n as f64))
}

/// Constant acceleration towards the origin, O(n)
struct CentralPull;

impl DerivativeTerm for CentralPull {
    fn accumulate(&self, state: &ParticleState, _opts: &MethodOptions, out: &mut Derivatives) {
        for (a, p) in out.accel.iter_mut().zip(state.particles.iter()) {
            *a -= p.x;
        }
    }
}

/// Radiation exchange wall time per call for every scheme
/// Paste output directly into a spreadsheet to graph
pub fn bench_radiation() {
    let consts = ExchangeConstants { a: 1.0, cv1: 1.0, steboltz: 0.25 };
    let opts = MethodOptions::default();
    let schemes = [
        ExchangeScheme::Implicit,
        ExchangeScheme::Explicit,
        ExchangeScheme::ExplicitSubsteps,
        ExchangeScheme::ImplicitSubsteps,
    ];

    println!("N,scheme,ms");
    for n in [10_000, 100_000, 1_000_000] {
        let template = make_state(n);
        let derivs = Derivatives::zeros(n);

        for scheme in schemes {
            let settings = RadiationSettings { scheme, strict_species_filter: false };
            let mut state = template.clone();

            // Warm up
            update_radenergy_with(&mut state, &derivs, &opts, &consts, &settings, 1e-3);

            let t0 = Instant::now();
            update_radenergy_with(&mut state, &derivs, &opts, &consts, &settings, 1e-3);
            let ms = t0.elapsed().as_secs_f64() * 1000.0;

            println!("{},{:?},{:.6}", n, scheme, ms);
        }
    }
}

/// Shift integrator wall time per call, with an O(n) force and with direct
/// self gravity for the smaller sizes
pub fn bench_shift() {
    let opts = MethodOptions::default();

    println!("N,central_ms,gravity_ms");
    for n in [200, 800, 3200, 12800] {
        let mut derivs = Derivatives::zeros(n);

        let mut state = make_state(n);
        let mut central = ForceSet::new().with(CentralPull);
        let t0 = Instant::now();
        shift_particles(&mut state, &mut central, &mut derivs, &opts);
        let ms_central = t0.elapsed().as_secs_f64() * 1000.0;

        let mut state = make_state(n);
        let mut gravity = ForceSet::new().with(SelfGravity { g: 1.0, eps2: 1e-4 });
        let t1 = Instant::now();
        shift_particles(&mut state, &mut gravity, &mut derivs, &opts);
        let ms_gravity = t1.elapsed().as_secs_f64() * 1000.0;

        println!("{},{:.6},{:.6}", n, ms_central, ms_gravity);
    }
}
