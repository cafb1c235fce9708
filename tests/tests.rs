use approx::assert_relative_eq;

use radrelax::simulation::integrator::AtomicMinF64;
use radrelax::simulation::output::RelaxOutput;
use radrelax::simulation::sph::{kernel, update_smoothing_lengths, SphPressure};
use radrelax::{
    get_mstar, interpolate, reset_u_and_get_errors, shift_particles, update_radenergy, update_radenergy_with,
    BasicSetupCheck, Collaborators, Damping, DerivativeEvaluator, DerivativeTerm, Derivatives, DirectEnergies,
    EnergyDiagnostics, Eos, ExchangeConstants, ExchangeInput, ExchangeScheme, ForceSet, Leapfrog, MethodOptions, NVec3,
    OptionsGuard,
    Particle, ParticleState, ParticleType, ProfileError, RadiationAnomaly, RadiationSettings, RelaxError,
    RelaxPhase, RelaxSettings, RelaxStatus, Scenario, ScenarioConfig, SetupReport, SetupValidator, SpeciesMasses,
    StarRelaxer, Stepping, TargetProfile, ThermalReset, TimeIntegrator, UnitSystem,
};

/// Exchange inputs with a = cv1 = 1
pub fn exchange_input(u0: f64, xi0: f64, rho: f64, dudt: f64, ack: f64, dt: f64) -> ExchangeInput {
    ExchangeInput {
        u0,
        etot: u0 + xi0,
        rho,
        dudt,
        ack,
        a: 1.0,
        cv1: 1.0,
        dt,
    }
}

/// ack = 4 steboltz kappa = kappa
pub fn unit_constants() -> ExchangeConstants {
    ExchangeConstants { a: 1.0, cv1: 1.0, steboltz: 0.25 }
}

pub fn test_options() -> MethodOptions {
    MethodOptions {
        eos: Eos::Adiabatic,
        gamma: 5.0 / 3.0,
        hfact: 1.0,
        damping: Damping::Off,
    }
}

/// Options that relaxation is known to override
pub fn physical_options() -> MethodOptions {
    MethodOptions {
        eos: Eos::Isothermal { polyk: 0.3 },
        gamma: 1.4,
        hfact: 1.0,
        damping: Damping::Constant { coefficient: 0.7 },
    }
}

/// Table with r = 0, 1, 2 and rho = 64, 8, 1 and constant u = 0.015 at gamma 5/3
pub fn three_point_profile(pressure: [f64; 3]) -> TargetProfile {
    TargetProfile::new(vec![0.0, 1.0, 2.0], vec![64.0, 8.0, 1.0], pressure.to_vec(), 5.0 / 3.0).unwrap()
}

/// Three unit-mass particles sitting exactly on the table radii with
/// smoothing lengths giving exactly the tabulated density at hfact = 1
pub fn sampled_state() -> ParticleState {
    let particles = vec![
        Particle::gas(NVec3::new(0.0, 0.0, 0.0), 0.25, 0.0),
        Particle::gas(NVec3::new(1.0, 0.0, 0.0), 0.5, 0.0),
        Particle::gas(NVec3::new(0.0, 2.0, 0.0), 1.0, 0.0),
    ];
    ParticleState::new(particles, SpeciesMasses::gas_only(1.0))
}

/// a = -strength * x for every particle, optionally flagged as external.
/// Records the options of every call.
pub struct Pull {
    pub strength: f64,
    pub external: bool,
    pub calls: usize,
    pub seen: Vec<MethodOptions>,
}

impl Pull {
    pub fn new(strength: f64) -> Self {
        Self { strength, external: false, calls: 0, seen: Vec::new() }
    }

    pub fn last_opts(&self) -> Option<&MethodOptions> {
        self.seen.last()
    }
}

impl DerivativeEvaluator for Pull {
    fn evaluate_derivatives(&mut self, state: &ParticleState, opts: &MethodOptions, out: &mut Derivatives) {
        out.reset(state.len());
        for (i, p) in state.particles.iter().enumerate() {
            let a = -self.strength * p.x;
            if self.external {
                out.accel_ext[i] = a;
            } else {
                out.accel[i] = a;
            }
        }
        self.calls += 1;
        self.seen.push(opts.clone());
    }

    fn has_external_forces(&self) -> bool {
        self.external
    }
}

/// Time-integrator that only counts its calls and keeps the damping it was
/// stepped with
#[derive(Default)]
pub struct CountingIntegrator {
    pub inits: usize,
    pub steps: usize,
    pub damping: Vec<Damping>,
}

impl TimeIntegrator for CountingIntegrator {
    fn init_step(&mut self, _state: &ParticleState, _derivs: &Derivatives, _opts: &MethodOptions) -> f64 {
        self.inits += 1;
        0.1
    }

    fn step(
        &mut self,
        _state: &mut ParticleState,
        _evaluator: &mut dyn DerivativeEvaluator,
        _derivs: &mut Derivatives,
        opts: &MethodOptions,
        dt: f64,
    ) -> f64 {
        self.steps += 1;
        self.damping.push(opts.damping);
        dt
    }
}

pub struct RejectAll;

impl SetupValidator for RejectAll {
    fn check_setup(&self, _state: &ParticleState, _opts: &MethodOptions) -> SetupReport {
        SetupReport { warnings: 1, errors: 2 }
    }
}

/// Evaluator that never writes its buffers
pub struct Silent;

impl DerivativeEvaluator for Silent {
    fn evaluate_derivatives(&mut self, _state: &ParticleState, _opts: &MethodOptions, _out: &mut Derivatives) {}
}

/// n^3 unit-spaced lattice of unit-mass gas particles centred on the origin
pub fn lattice(n: usize, h: f64, u: f64) -> ParticleState {
    let c = 0.5 * (n as f64 - 1.0);
    let mut particles = Vec::with_capacity(n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let x = NVec3::new(i as f64 - c, j as f64 - c, k as f64 - c);
                particles.push(Particle::gas(x, h, u));
            }
        }
    }
    ParticleState::new(particles, SpeciesMasses::gas_only(1.0))
}

pub fn relax_settings(maxits: usize) -> RelaxSettings {
    RelaxSettings { maxits, ..RelaxSettings::default() }
}

// ==================================================================================
// Energy exchange solver tests
// ==================================================================================

#[test]
fn exchange_decoupled_returns_initial_energy() {
    let input = exchange_input(2.5, 1.0, 3.0, 0.0, 0.0, 0.1);
    let sol = ExchangeScheme::Implicit.solve(&input);
    assert_eq!(sol.u, 2.5);
    assert_eq!(sol.xi, 1.0);
}

#[test]
fn exchange_decoupled_with_heating_is_linear() {
    let input = exchange_input(2.0, 1.0, 3.0, 4.0, 0.0, 0.25);
    let sol = ExchangeScheme::Implicit.solve(&input);
    assert_relative_eq!(sol.u, 3.0, epsilon = 1e-14);
    assert_relative_eq!(sol.u + sol.xi, input.etot, epsilon = 1e-14);
}

#[test]
fn exchange_conserves_total_energy() {
    for scheme in [
        ExchangeScheme::Implicit,
        ExchangeScheme::Explicit,
        ExchangeScheme::ExplicitSubsteps,
        ExchangeScheme::ImplicitSubsteps,
    ] {
        let input = exchange_input(1.3, 0.4, 2.0, 0.0, 0.05, 0.1);
        let sol = scheme.solve(&input);
        assert_relative_eq!(sol.u + sol.xi, input.etot, epsilon = 1e-14);
    }
}

#[test]
fn implicit_solution_stays_between_zero_and_total() {
    let cases = [
        (1.0, 0.0, 1.0, 10.0, 1.0),
        (0.0, 2.0, 1.0, 10.0, 1.0),
        (1.0, 1.0, 100.0, 1e6, 1e-3),
        (1e-3, 5.0, 0.1, 1e4, 10.0),
        (3.0, 1e-6, 1.0, 1e2, 0.5),
    ];
    for (u0, xi0, rho, ack, dt) in cases {
        let input = exchange_input(u0, xi0, rho, 0.0, ack, dt);
        let u = ExchangeScheme::Implicit.solve(&input).u;
        assert!(u >= 0.0 && u <= input.etot, "u = {u} outside [0, {}]", input.etot);
    }
}

#[test]
fn strong_coupling_equalises_temperatures() {
    let input = exchange_input(1.0, 2.0, 1.0, 0.0, 1e9, 1.0);
    let u = ExchangeScheme::Implicit.solve(&input).u;

    let radiation = input.rho * (input.etot - u) / input.a;
    let gas = (u * input.cv1).powi(4);
    assert!((radiation - gas).abs() < 1e-6, "radiation {radiation} vs gas {gas}");
    assert_relative_eq!(u, 1.1640, epsilon = 1e-3);
}

#[test]
fn newton_iterations_are_capped() {
    let input = exchange_input(1e-6, 1e6, 1.0, 0.0, 1e12, 1.0);
    let sol = ExchangeScheme::Implicit.solve(&input);
    assert!(sol.iterations <= 10);
    assert!(sol.u.is_finite());
}

#[test]
fn schemes_agree_for_weak_coupling() {
    let input = exchange_input(1.0, 0.5, 1.0, 0.0, 1e-3, 1e-2);
    let implicit = ExchangeScheme::Implicit.solve(&input).u;
    for scheme in [
        ExchangeScheme::Explicit,
        ExchangeScheme::ExplicitSubsteps,
        ExchangeScheme::ImplicitSubsteps,
    ] {
        let u = scheme.solve(&input).u;
        assert_relative_eq!(u, implicit, max_relative = 1e-8);
    }
}

#[test]
fn substeps_double_up_to_cap() {
    let input = exchange_input(1.0, 0.5, 1.0, 0.0, 1.0, 1.0);
    let sol = ExchangeScheme::ExplicitSubsteps.solve(&input);
    assert!(sol.iterations.is_power_of_two());
    assert!(sol.iterations > 1 && sol.iterations <= 1024);
}

#[test]
fn explicit_overshoots_where_implicit_is_stable() {
    let input = exchange_input(1.0, 2.0, 1.0, 0.0, 1e3, 1.0);
    let explicit = ExchangeScheme::Explicit.solve(&input).u;
    let implicit = ExchangeScheme::Implicit.solve(&input).u;
    assert!(explicit > input.etot);
    assert!(implicit > 0.0 && implicit < input.etot);
}

// ==================================================================================
// Radiation field update tests
// ==================================================================================

fn particle_with(u: f64, xi: f64, kappa: f64, kind: ParticleType) -> Particle {
    let mut p = Particle::gas(NVec3::zeros(), 1.0, u);
    p.xi = xi;
    p.kappa = kappa;
    p.kind = kind;
    p
}

#[test]
fn radiation_update_never_leaves_negative_energies() {
    let signs = [(1.0, -1.0), (-1.0, 1.0), (-2.0, -3.0), (0.5, -0.1), (-0.1, 0.05), (4.0, 2.0)];
    let particles = signs
        .iter()
        .enumerate()
        .map(|(i, &(u, xi))| particle_with(u, xi, 0.1 * (i + 1) as f64, ParticleType::Gas))
        .collect();
    let mut state = ParticleState::new(particles, SpeciesMasses::gas_only(1.0));
    let derivs = Derivatives::zeros(state.len());

    let report = update_radenergy_with(
        &mut state,
        &derivs,
        &test_options(),
        &unit_constants(),
        &RadiationSettings::default(),
        0.5,
    );

    for p in &state.particles {
        assert!(p.u >= 0.0, "negative u {}", p.u);
        assert!(p.xi >= 0.0, "negative xi {}", p.xi);
    }
    assert_eq!(report.updated, signs.len());
    assert!(!report.anomalies.is_empty());
}

#[test]
fn radiation_update_reports_negative_input_in_index_order() {
    let particles = vec![
        particle_with(1.0, 0.5, 0.0, ParticleType::Gas),
        particle_with(1.0, -0.5, 0.0, ParticleType::Gas),
        particle_with(1.0, 0.5, 0.0, ParticleType::Gas),
        particle_with(1.0, -0.25, 0.0, ParticleType::Gas),
    ];
    let mut state = ParticleState::new(particles, SpeciesMasses::gas_only(1.0));
    let derivs = Derivatives::zeros(state.len());

    let report = update_radenergy_with(
        &mut state,
        &derivs,
        &test_options(),
        &unit_constants(),
        &RadiationSettings::default(),
        0.1,
    );

    let before: Vec<_> = report
        .anomalies
        .iter()
        .filter(|a| matches!(a, RadiationAnomaly::NegativeRadiationBefore { .. }))
        .map(|a| a.index())
        .collect();
    assert_eq!(before, vec![1, 3]);
    let indices: Vec<_> = report.anomalies.iter().map(|a| a.index()).collect();
    assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(state.particles[1].xi, 0.0);
}

#[test]
fn radiation_update_matches_per_particle_solve() {
    let particles: Vec<Particle> = (0..257)
        .map(|i| {
            let f = i as f64;
            particle_with(1.0 + 0.3 * (0.7 * f).sin(), 0.8 + 0.5 * (0.3 * f).cos(), 0.01 * f, ParticleType::Gas)
        })
        .collect();
    let original = particles.clone();
    let mut state = ParticleState::new(particles, SpeciesMasses::gas_only(2.0));
    let mut derivs = Derivatives::zeros(state.len());
    for (i, d) in derivs.dudt.iter_mut().enumerate() {
        *d = 0.01 * i as f64;
    }
    let opts = test_options();
    let consts = unit_constants();
    let dt = 0.2;

    update_radenergy_with(&mut state, &derivs, &opts, &consts, &RadiationSettings::default(), dt);

    for (i, (p, p0)) in state.particles.iter().zip(original.iter()).enumerate() {
        let input = ExchangeInput {
            u0: p0.u,
            etot: p0.u + p0.xi,
            rho: radrelax::rhoh(p0.h, 2.0, opts.hfact),
            dudt: derivs.dudt[i],
            ack: consts.ack(p0.kappa),
            a: consts.a,
            cv1: consts.cv1,
            dt,
        };
        let sol = ExchangeScheme::Implicit.solve(&input);
        assert_eq!(p.u, sol.u);
        assert_eq!(p.xi, sol.xi);
    }
}

#[test]
fn strict_species_filter_skips_non_gas() {
    let make = || {
        ParticleState::new(
            vec![
                particle_with(1.0, 2.0, 1.0, ParticleType::Gas),
                particle_with(1.0, 2.0, 1.0, ParticleType::Dust),
            ],
            SpeciesMasses { gas: 1.0, dust: 1.0, boundary: 0.0 },
        )
    };
    let derivs = Derivatives::zeros(2);
    let opts = test_options();
    let consts = unit_constants();

    let mut strict = make();
    let settings = RadiationSettings { strict_species_filter: true, ..RadiationSettings::default() };
    let report = update_radenergy_with(&mut strict, &derivs, &opts, &consts, &settings, 0.1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(strict.particles[1].u, 1.0);
    assert_eq!(strict.particles[1].xi, 2.0);
    assert_ne!(strict.particles[0].u, 1.0);

    let mut open = make();
    let report = update_radenergy_with(&mut open, &derivs, &opts, &consts, &RadiationSettings::default(), 0.1);
    assert_eq!(report.updated, 2);
    assert_eq!(open.particles[0].u, open.particles[1].u);
}

#[test]
fn radiation_update_treats_missing_heating_as_zero() {
    let make = || {
        ParticleState::new(
            vec![particle_with(1.0, 2.0, 1.0, ParticleType::Gas), particle_with(0.5, 0.1, 2.0, ParticleType::Gas)],
            SpeciesMasses::gas_only(1.0),
        )
    };
    let opts = test_options();
    let consts = unit_constants();
    let settings = RadiationSettings::default();

    let mut short = make();
    let report = update_radenergy_with(&mut short, &Derivatives::default(), &opts, &consts, &settings, 0.1);
    let mut full = make();
    update_radenergy_with(&mut full, &Derivatives::zeros(2), &opts, &consts, &settings, 0.1);

    assert_eq!(report.updated, 2);
    assert_ne!(short.particles[0].u, 1.0);
    for (a, b) in short.particles.iter().zip(full.particles.iter()) {
        assert_eq!(a.u, b.u);
        assert_eq!(a.xi, b.xi);
    }
}

#[test]
fn physical_units_move_energy_from_hot_gas_to_radiation() {
    let units = UnitSystem { udist: 1.0, umass: 1.0, utime: 1.0, gmw: 0.6 };
    let opts = MethodOptions { hfact: 1.2, ..MethodOptions::default() };
    // rho = 1e-9 g/cm^3, T ~ 1e6 K gas with no radiation
    let h = radrelax::hrho(1e-9, 1e-12, opts.hfact);
    let u0 = 1e6 / units.cv1(opts.gamma);
    let mut p = Particle::gas(NVec3::zeros(), h, u0);
    p.kappa = 0.4;
    let mut state = ParticleState::new(vec![p], SpeciesMasses::gas_only(1e-12));
    let derivs = Derivatives::zeros(1);

    let report = update_radenergy(&mut state, &derivs, &opts, &units, &RadiationSettings::default(), 1e-6);

    let p = &state.particles[0];
    assert!(report.anomalies.is_empty());
    assert!(p.u < u0);
    assert!(p.xi > 0.0);
    assert_relative_eq!(p.u + p.xi, u0, max_relative = 1e-12);
}

// ==================================================================================
// Shift integrator tests
// ==================================================================================

#[test]
fn atomic_min_is_race_free() {
    use rayon::prelude::*;

    let min = AtomicMinF64::new(f64::INFINITY);
    (0..10_000).into_par_iter().for_each(|i| min.fetch_min(1.0 + ((i * 7919) % 10_000) as f64));
    assert_eq!(min.load(), 1.0);
}

#[test]
fn shift_moves_by_local_timestep() {
    let opts = test_options();
    let u = 0.6;
    let mut state = ParticleState::new(
        vec![
            Particle::gas(NVec3::new(2.0, 0.0, 0.0), 0.5, u),
            Particle::gas(NVec3::new(0.0, -1.0, 0.0), 0.1, u),
        ],
        SpeciesMasses::gas_only(1.0),
    );
    let mut pull = Pull::new(0.5);
    let mut derivs = Derivatives::default();

    let dtmin = shift_particles(&mut state, &mut pull, &mut derivs, &opts);

    let cs = (opts.gamma * (opts.gamma - 1.0) * u).sqrt();
    let dt0 = 0.3 * 0.5 / cs;
    let dt1 = 0.3 * 0.1 / cs;
    assert_relative_eq!(dtmin, dt1, epsilon = 1e-14);
    assert_eq!(pull.calls, 1);

    let dx0 = 0.5 * dt0 * dt0 * (-0.5 * 2.0);
    assert_relative_eq!(state.particles[0].x.x, 2.0 + dx0, epsilon = 1e-14);
    assert_relative_eq!(state.particles[0].v.x, dx0 / dt0, epsilon = 1e-14);
    assert_eq!(state.particles[0].x.y, 0.0);
}

#[test]
fn shift_includes_external_acceleration() {
    let opts = test_options();
    let mut state = ParticleState::new(vec![Particle::gas(NVec3::new(1.0, 0.0, 0.0), 0.3, 1.0)], SpeciesMasses::gas_only(1.0));
    let mut hydro = Pull::new(1.0);
    let mut external = Pull { external: true, ..Pull::new(1.0) };
    let mut derivs = Derivatives::default();

    let mut a = state.clone();
    shift_particles(&mut a, &mut hydro, &mut derivs, &opts);
    shift_particles(&mut state, &mut external, &mut derivs, &opts);
    assert_relative_eq!(a.particles[0].x.x, state.particles[0].x.x, epsilon = 1e-15);
}

#[test]
fn shift_leaves_cold_particles_in_place() {
    let opts = test_options();
    let mut state = ParticleState::new(vec![Particle::gas(NVec3::new(1.0, 0.0, 0.0), 0.3, 0.0)], SpeciesMasses::gas_only(1.0));
    let mut pull = Pull::new(1.0);
    let mut derivs = Derivatives::default();

    let dtmin = shift_particles(&mut state, &mut pull, &mut derivs, &opts);
    assert!(dtmin.is_infinite());
    assert_eq!(state.particles[0].x, NVec3::new(1.0, 0.0, 0.0));
    assert_eq!(state.particles[0].v, NVec3::zeros());
}

#[test]
fn shift_without_accelerations_keeps_particles_in_place() {
    let opts = test_options();
    let x0 = NVec3::new(1.0, -2.0, 0.5);
    let mut state = ParticleState::new(
        vec![Particle::gas(x0, 0.3, 1.0), Particle::gas(NVec3::zeros(), 0.2, 1.0)],
        SpeciesMasses::gas_only(1.0),
    );
    let mut derivs = Derivatives::default();

    let dtmin = shift_particles(&mut state, &mut Silent, &mut derivs, &opts);

    let cs = (opts.gamma * (opts.gamma - 1.0)).sqrt();
    assert_relative_eq!(dtmin, 0.3 * 0.2 / cs, epsilon = 1e-14);
    assert_eq!(state.particles[0].x, x0);
    assert_eq!(state.particles[0].v, NVec3::zeros());
    assert!(derivs.accel.is_empty());
}

// ==================================================================================
// Leapfrog tests
// ==================================================================================

#[test]
fn leapfrog_free_particle_drifts() {
    let opts = test_options();
    let mut p = Particle::gas(NVec3::zeros(), 1.0, 1.0);
    p.v = NVec3::new(1.0, 0.0, 0.0);
    let mut state = ParticleState::new(vec![p], SpeciesMasses::gas_only(1.0));
    let mut forces = ForceSet::new();
    let mut derivs = Derivatives::zeros(1);
    let mut lf = Leapfrog::default();

    lf.step(&mut state, &mut forces, &mut derivs, &opts, 0.1);
    assert_relative_eq!(state.particles[0].x.x, 0.1, epsilon = 1e-15);
    assert_relative_eq!(state.t, 0.1, epsilon = 1e-15);
}

#[test]
fn leapfrog_damping_slows_particles() {
    let opts = MethodOptions { damping: Damping::Constant { coefficient: 1.0 }, ..test_options() };
    let mut p = Particle::gas(NVec3::zeros(), 1.0, 1.0);
    p.v = NVec3::new(1.0, 0.0, 0.0);
    let mut state = ParticleState::new(vec![p], SpeciesMasses::gas_only(1.0));
    let mut forces = ForceSet::new();
    let mut derivs = Derivatives::zeros(1);
    let mut lf = Leapfrog::new(1.0);

    let dtnext = lf.step(&mut state, &mut forces, &mut derivs, &opts, 0.1);
    assert_relative_eq!(state.particles[0].v.x, 0.95 * 0.95, epsilon = 1e-14);
    assert!(dtnext > 0.0 && dtnext <= 1.0);
}

// ==================================================================================
// Profile tests
// ==================================================================================

#[test]
fn interpolation_is_linear_and_clamped() {
    let xs = [0.0, 1.0, 3.0];
    let ys = [10.0, 20.0, 0.0];
    assert_eq!(interpolate(&xs, &ys, -1.0), 10.0);
    assert_eq!(interpolate(&xs, &ys, 5.0), 0.0);
    assert_eq!(interpolate(&xs, &ys, 1.0), 20.0);
    assert_relative_eq!(interpolate(&xs, &ys, 0.5), 15.0, epsilon = 1e-14);
    assert_relative_eq!(interpolate(&xs, &ys, 2.0), 10.0, epsilon = 1e-14);
}

#[test]
fn mstar_of_uniform_sphere_converges_quadratically() {
    let (radius, rho0): (f64, f64) = (2.0, 3.0);
    let exact = 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3) * rho0;
    let error = |n: usize| {
        let r: Vec<f64> = (0..n).map(|i| radius * i as f64 / (n - 1) as f64).collect();
        let rho = vec![rho0; n];
        (get_mstar(&rho, &r) - exact).abs()
    };

    let (e1, e2) = (error(101), error(201));
    assert!(e1 / exact < 1e-3);
    let ratio = e2 / e1;
    assert!((ratio - 0.25).abs() < 0.01, "error ratio {ratio}");
}

#[test]
fn profile_rejects_bad_tables() {
    assert!(matches!(
        TargetProfile::new(vec![0.0, 1.0], vec![1.0], vec![1.0, 1.0], 5.0 / 3.0),
        Err(ProfileError::LengthMismatch { .. })
    ));
    assert!(matches!(
        TargetProfile::new(vec![0.0, 1.0, 1.0], vec![1.0; 3], vec![1.0; 3], 5.0 / 3.0),
        Err(ProfileError::NotMonotonic { index: 2 })
    ));
    assert!(matches!(
        TargetProfile::new(vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0; 2], 5.0 / 3.0),
        Err(ProfileError::NonPositiveDensity { index: 1, .. })
    ));
}

#[test]
fn resample_error_vanishes_on_exact_sampling() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();

    let res = reset_u_and_get_errors(&mut state, &profile, ThermalReset::Utherm, &test_options());
    assert_eq!(res.rmserr, 0.0);
    assert_eq!(res.rmax, 2.0);
    for p in &state.particles {
        assert_relative_eq!(p.u, 0.015, epsilon = 1e-15);
    }
}

#[test]
fn resample_from_entropy_matches_utherm_when_density_matches() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut from_u = sampled_state();
    let mut from_s = sampled_state();
    let opts = test_options();

    reset_u_and_get_errors(&mut from_u, &profile, ThermalReset::Utherm, &opts);
    reset_u_and_get_errors(&mut from_s, &profile, ThermalReset::Entropy, &opts);
    for (a, b) in from_u.particles.iter().zip(from_s.particles.iter()) {
        assert_relative_eq!(a.u, b.u, max_relative = 1e-12);
    }
}

#[test]
fn resample_error_is_normalised_by_central_density() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    // density 8 at the centre instead of 64
    state.particles[0].h = 0.5;

    let res = reset_u_and_get_errors(&mut state, &profile, ThermalReset::Utherm, &test_options());
    let expected = ((56.0_f64 * 56.0) / 3.0).sqrt() / 64.0;
    assert_relative_eq!(res.rmserr, expected, epsilon = 1e-14);
}

// ==================================================================================
// SPH tests
// ==================================================================================

#[test]
fn kernel_is_normalised() {
    // 4 pi int_0^2 q^2 f(q) dq / pi
    let n = 20_000;
    let dq = 2.0 / n as f64;
    let integral: f64 = (0..n)
        .map(|i| {
            let q = (i as f64 + 0.5) * dq;
            4.0 * q * q * kernel(q) * dq
        })
        .sum();
    assert_relative_eq!(integral, 1.0, max_relative = 1e-6);
    assert_eq!(kernel(2.0), 0.0);
}

#[test]
fn smoothing_lengths_converge_on_a_lattice() {
    let mut state = lattice(9, 0.8, 1.0);
    let unconverged = update_smoothing_lengths(&mut state, 1.2);
    assert_eq!(unconverged, 0);

    let centre = &state.particles[state.len() / 2];
    assert_eq!(centre.x, NVec3::zeros());
    assert_relative_eq!(centre.h, 1.19967, max_relative = 1e-3);

    // sparser neighbourhood on the corner
    assert!(state.particles[0].h > centre.h);

    // independent of the starting guess
    let mut from_above = lattice(9, 2.0, 1.0);
    update_smoothing_lengths(&mut from_above, 1.2);
    assert_relative_eq!(from_above.particles[state.len() / 2].h, centre.h, max_relative = 1e-3);
}

#[test]
fn pressure_pushes_a_pair_apart() {
    let state = ParticleState::new(
        vec![Particle::gas(NVec3::new(-0.5, 0.0, 0.0), 1.0, 1.0), Particle::gas(NVec3::new(0.5, 0.0, 0.0), 1.0, 1.0)],
        SpeciesMasses::gas_only(1.0),
    );
    let mut out = Derivatives::zeros(2);
    SphPressure.accumulate(&state, &test_options(), &mut out);

    let a = 1.0 / std::f64::consts::PI;
    assert_relative_eq!(out.accel[0], NVec3::new(-a, 0.0, 0.0), epsilon = 1e-14);
    assert_relative_eq!(out.accel[1], NVec3::new(a, 0.0, 0.0), epsilon = 1e-14);
}

#[test]
fn pressure_cancels_at_the_centre_of_a_lattice() {
    let state = lattice(3, 1.2, 1.0);
    let mut out = Derivatives::zeros(state.len());
    SphPressure.accumulate(&state, &test_options(), &mut out);

    assert_relative_eq!(out.accel[13], NVec3::zeros(), epsilon = 1e-12);
    let corner = &state.particles[0];
    assert!(out.accel[0].dot(&corner.x) > 0.0);

    let total: NVec3 = out.accel.iter().sum();
    assert_relative_eq!(total, NVec3::zeros(), epsilon = 1e-12);
}

#[test]
fn force_set_refreshes_smoothing_lengths_only_when_adaptive() {
    let opts = MethodOptions { hfact: 1.2, ..test_options() };

    let mut fixed = lattice(3, 0.8, 1.0);
    ForceSet::new().with(SphPressure).update_smoothing_lengths(&mut fixed, &opts);
    assert!(fixed.particles.iter().all(|p| p.h == 0.8));

    let mut adaptive = lattice(3, 0.8, 1.0);
    ForceSet::new().with(SphPressure).with_adaptive_smoothing().update_smoothing_lengths(&mut adaptive, &opts);
    assert!(adaptive.particles.iter().all(|p| p.h != 0.8 && p.h > 0.0));
}

// ==================================================================================
// Relaxation tests
// ==================================================================================

#[test]
fn relax_converges_at_once_when_already_equilibrated() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = test_options();
    let before = opts.clone();

    let mut pull = Pull::new(1e-6);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(500));
    let outcome = {
        let mut collab = Collaborators {
            evaluator: &mut pull,
            validator: &BasicSetupCheck,
            energies: &mut energies,
            integrator: &mut integrator,
        };
        relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap()
    };

    assert_eq!(outcome.status, RelaxStatus::Converged);
    assert_eq!(outcome.nits, 1);
    assert_eq!(outcome.stepping, Stepping::Shift);
    assert_eq!(relaxer.phase(), RelaxPhase::Done);
    assert_eq!(integrator.steps, 0);
    assert!(outcome.tdyn > 0.0);
    assert_eq!(opts, before);
    // initial, one shift, one with restored options
    assert_eq!(pull.calls, 3);
    assert_eq!(pull.last_opts(), Some(&before));
    assert_eq!(derivs.accel.len(), 3);
}

#[test]
fn relax_aborts_on_nonpositive_thermal_energy() {
    let profile = three_point_profile([0.64, 0.0, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = physical_options();
    let before = opts.clone();

    let mut pull = Pull::new(1e-6);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(500));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let err = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap_err();

    assert!(matches!(err, RelaxError::NonPositiveThermalEnergy { index: 1, .. }));
    assert_eq!(relaxer.nits(), 0);
    assert_eq!(relaxer.phase(), RelaxPhase::Done);
    assert_eq!(opts, before);
}

#[test]
fn relax_aborts_on_setup_errors() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = physical_options();
    let before = opts.clone();

    let mut pull = Pull::new(1e-6);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(500));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &RejectAll,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let err = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap_err();

    assert!(matches!(err, RelaxError::SetupErrors { errors: 2, warnings: 1 }));
    assert_eq!(relaxer.nits(), 0);
    assert_eq!(opts, before);
}

#[test]
fn relax_aborts_when_unbound() {
    // u = 150 everywhere, far above |epot| ~ 1.8
    let profile = three_point_profile([6400.0, 800.0, 100.0]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = physical_options();
    let before = opts.clone();

    let mut pull = Pull::new(1e-6);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(500));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let err = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap_err();

    assert!(matches!(err, RelaxError::Unbound { .. }));
    assert_eq!(relaxer.nits(), 0);
    assert_eq!(opts, before);
    // still re-evaluated with the restored options
    assert_eq!(pull.last_opts(), Some(&before));
}

#[test]
fn relax_stops_at_iteration_budget() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = physical_options();
    let before = opts.clone();

    // no force, no shift, zero kinetic energy: never converges
    let mut pull = Pull::new(0.0);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(3));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let outcome = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap();

    assert_eq!(outcome.status, RelaxStatus::BudgetExhausted);
    assert_eq!(outcome.nits, 3);
    assert_eq!(relaxer.settings().maxits, 3);
    assert_eq!(relaxer.rmserr(), outcome.rmserr);
    assert_eq!(relaxer.energies(), outcome.energies);
    assert_eq!(opts, before);
}

#[test]
fn relax_iterates_with_overridden_options() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = physical_options();
    let before = opts.clone();

    let mut pull = Pull::new(0.0);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(2));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let outcome = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap();

    // initial evaluation, two shifts, then the restored options
    assert_eq!(pull.seen.len(), 4);
    let (during, after) = pull.seen.split_at(3);
    for seen in during {
        assert_eq!(seen.eos, Eos::Adiabatic);
        assert_eq!(seen.damping, Damping::DynamicalTime { tdyn: outcome.tdyn });
        assert_eq!(seen.gamma, before.gamma);
    }
    assert_eq!(after, &[before]);
}

#[test]
fn relax_uses_time_integrator_with_external_forces() {
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = test_options();

    let mut pull = Pull { external: true, ..Pull::new(1e-6) };
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(relax_settings(4));
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    let outcome = relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap();

    assert_eq!(outcome.stepping, Stepping::Integrator);
    assert_eq!(outcome.status, RelaxStatus::BudgetExhausted);
    assert_eq!(integrator.inits, 1);
    assert_eq!(integrator.steps, 4);
    assert!(integrator.damping.iter().all(|d| *d == Damping::DynamicalTime { tdyn: outcome.tdyn }));
    assert_relative_eq!(outcome.t, 0.4, epsilon = 1e-12);
    assert_eq!(state.t, 0.0);
}

#[test]
fn relax_writes_log_and_dumps() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("relax.ev");
    let settings = RelaxSettings {
        maxits: 2,
        output: RelaxOutput {
            log_file: Some(log_file.clone()),
            dump_every: Some(1),
            dump_dir: dir.path().to_path_buf(),
        },
        ..RelaxSettings::default()
    };
    let profile = three_point_profile([0.64, 0.08, 0.01]);
    let mut state = sampled_state();
    let mut derivs = Derivatives::default();
    let mut opts = test_options();

    let mut pull = Pull::new(0.0);
    let mut energies = DirectEnergies::new(1.0, 0.0);
    let mut integrator = CountingIntegrator::default();
    let mut relaxer = StarRelaxer::new(settings);
    let mut collab = Collaborators {
        evaluator: &mut pull,
        validator: &BasicSetupCheck,
        energies: &mut energies,
        integrator: &mut integrator,
    };
    relaxer.relax_star(&profile, &mut state, &mut derivs, &mut opts, &mut collab).unwrap();

    let text = std::fs::read_to_string(&log_file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with('#'));
    assert_eq!(lines[1].split_whitespace().count(), 6);
    let dump_time = |name: &str| -> f64 {
        let text = std::fs::read_to_string(dir.path().join(name)).unwrap();
        let dump: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        dump["t"].as_f64().unwrap()
    };
    let (t1, t2) = (dump_time("relax_00001.yaml"), dump_time("relax_00002.yaml"));
    assert!(t1 > 0.0);
    assert_relative_eq!(t2, 2.0 * t1, max_relative = 1e-12);
    assert_eq!(state.t, 0.0);
}

// ==================================================================================
// Options, diagnostics and configuration tests
// ==================================================================================

#[test]
fn options_guard_restores_on_drop() {
    let mut opts = physical_options();
    let before = opts.clone();
    {
        let mut guard = OptionsGuard::new(&mut opts);
        guard.eos = Eos::Adiabatic;
        guard.damping = Damping::DynamicalTime { tdyn: 3.0 };
        guard.hfact = 2.0;
        assert_eq!(guard.saved(), &before);
    }
    assert_eq!(opts, before);
    {
        let _guard = OptionsGuard::new(&mut opts);
    }
    assert_eq!(opts, before);
}

#[test]
fn setup_check_counts_errors_and_warnings() {
    let mut state = sampled_state();
    state.particles[0].h = 0.0;
    state.particles[1].u = -1.0;
    state.particles[2].x = NVec3::new(f64::NAN, 0.0, 0.0);

    let report = BasicSetupCheck.check_setup(&state, &test_options());
    assert_eq!(report, SetupReport { warnings: 1, errors: 2 });

    let empty = ParticleState::new(Vec::new(), SpeciesMasses::gas_only(1.0));
    assert_eq!(BasicSetupCheck.check_setup(&empty, &test_options()).errors, 1);
}

#[test]
fn direct_energies_of_two_particles() {
    let mut a = Particle::gas(NVec3::zeros(), 0.0, 2.0);
    a.v = NVec3::new(0.0, 3.0, 0.0);
    let b = Particle::gas(NVec3::new(2.0, 0.0, 0.0), 0.0, 1.0);
    let state = ParticleState::new(vec![a, b], SpeciesMasses::gas_only(0.5));

    let e = DirectEnergies::new(1.0, 0.0).compute_energies(&state, &test_options(), 0.0);
    assert_relative_eq!(e.ekin, 0.5 * 0.5 * 9.0, epsilon = 1e-14);
    assert_relative_eq!(e.etherm, 0.5 * 3.0, epsilon = 1e-14);
    assert_relative_eq!(e.epot, -0.25 / 2.0, epsilon = 1e-14);
}

#[test]
fn units_with_g_one() {
    let units = UnitSystem::default();
    assert_relative_eq!(units.g_code(), 1.0, epsilon = 1e-12);
    assert!(units.radconst_code() > 0.0);
    assert_relative_eq!(units.radconst_code(), 4.0 * units.steboltz_code() / units.c_code(), max_relative = 1e-12);
}

const EXCHANGE_YAML: &str = r#"
engine:
  mode: "exchange"
  exchange: "implicit"
  strict_species_filter: true
units:
  udist: 1.0
  umass: 1.0
  utime: 1.0
options:
  eos: "adiabatic"
  gamma: 1.6666667
  hfact: 1.2
radiation:
  dt: 1.0e-3
  nsteps: 2
gravity:
  g: 0.0
masses:
  gas: 1.0
  dust: 1.0
particles:
  - { x: [0.0, 0.0, 0.0], h: 1.0, u: 2.0, xi: 1.0, kappa: 1.0 }
  - { x: [1.0, 0.0, 0.0], h: 1.0, u: 2.0, xi: 1.0, kappa: 1.0, type: "dust" }
"#;

#[test]
fn scenario_from_yaml_runs_exchange() {
    let cfg: ScenarioConfig = serde_yaml::from_str(EXCHANGE_YAML).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    assert!(scenario.profile.is_none());
    assert_eq!(scenario.relax.maxits, 500);
    assert_eq!(scenario.state.particles[1].kind, ParticleType::Dust);

    let reports = scenario.run_exchange();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.updated == 1 && r.skipped == 1));

    let gas = &scenario.state.particles[0];
    assert_relative_eq!(gas.u + gas.xi, 3.0, max_relative = 1e-12);
    assert_eq!(scenario.state.particles[1].u, 2.0);
    assert!(scenario.run_relax().is_none());
}

#[test]
fn bundled_star_scenario_relaxes_towards_profile() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/scenarios/relax_star.yaml");
    let text = std::fs::read_to_string(path).unwrap();
    let cfg: ScenarioConfig = serde_yaml::from_str(&text).unwrap();
    let mut scenario = Scenario::build_scenario(cfg).unwrap();
    scenario.relax.maxits = 20;
    scenario.relax.output = RelaxOutput::default();

    let baseline = {
        let profile = scenario.profile.as_ref().unwrap();
        let mut start = scenario.state.clone();
        update_smoothing_lengths(&mut start, scenario.options.hfact);
        reset_u_and_get_errors(&mut start, profile, ThermalReset::Utherm, &scenario.options).rmserr
    };

    let outcome = scenario.run_relax().unwrap().unwrap();
    assert_eq!(outcome.nits, 20);
    assert!(outcome.rmserr < baseline);
    assert!(outcome.rmax > 0.7 && outcome.rmax < 1.0);
    assert!(outcome.energies.ekin < 1e-3 * outcome.energies.epot.abs());
    assert_eq!(scenario.options.eos, Eos::Adiabatic);
    assert_eq!(scenario.state.t, 0.0);
}
