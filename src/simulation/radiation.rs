//! Radiation energy update over the whole particle set
//!
//! Applies the per-particle exchange solve to every eligible particle in
//! parallel. Particles never read each other's post-update state, so the
//! loop is order independent. Negative energies are reported as
//! [`RadiationAnomaly`] values, gathered per worker and logged after the
//! parallel region.

use std::fmt;

use rayon::prelude::*;

use super::exchange::{ExchangeInput, ExchangeScheme};
use super::params::MethodOptions;
use super::states::{rhoh, Derivatives, ParticleState, ParticleType};
use super::units::UnitSystem;

/// Radiation energies below this are reported before the exchange
pub const NEGATIVE_XI_TOLERANCE: f64 = f64::EPSILON;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RadiationSettings {
    pub scheme: ExchangeScheme,
    /// Only update gas particles. Off: every particle is eligible.
    pub strict_species_filter: bool,
}

/// Constants of the exchange equation, computed once per update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeConstants {
    pub a: f64, // radiation constant
    pub cv1: f64,
    pub steboltz: f64,
}

impl ExchangeConstants {
    pub fn from_units(units: &UnitSystem, gamma: f64) -> Self {
        Self {
            a: units.radconst_code(),
            cv1: units.cv1(gamma),
            steboltz: units.steboltz_code(),
        }
    }

    pub fn ack(&self, kappa: f64) -> f64 {
        4.0 * self.steboltz * kappa
    }
}

/// Non-fatal physical anomaly found while exchanging energy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RadiationAnomaly {
    NegativeRadiationBefore { index: usize, xi: f64 },
    NegativeRadiationAfter { index: usize, xi: f64 },
    NegativeThermalAfter { index: usize, u: f64 },
}

impl RadiationAnomaly {
    pub fn index(&self) -> usize {
        match *self {
            RadiationAnomaly::NegativeRadiationBefore { index, .. }
            | RadiationAnomaly::NegativeRadiationAfter { index, .. }
            | RadiationAnomaly::NegativeThermalAfter { index, .. } => index,
        }
    }
}

impl fmt::Display for RadiationAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadiationAnomaly::NegativeRadiationBefore { index, xi } => {
                write!(f, "radiation energy negative before exchange: particle {index}, xi = {xi:e}")
            }
            RadiationAnomaly::NegativeRadiationAfter { index, xi } => {
                write!(f, "radiation energy negative after exchange: particle {index}, xi = {xi:e}")
            }
            RadiationAnomaly::NegativeThermalAfter { index, u } => {
                write!(f, "thermal energy negative after exchange: particle {index}, u = {u:e}")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeReport {
    pub updated: usize,
    pub skipped: usize,
    pub anomalies: Vec<RadiationAnomaly>, // sorted by particle index
}

#[derive(Default)]
struct Partial {
    updated: usize,
    skipped: usize,
    anomalies: Vec<RadiationAnomaly>,
}

impl Partial {
    fn merge(mut self, mut other: Partial) -> Partial {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.anomalies.append(&mut other.anomalies);
        self
    }
}

/// Exchange energy between gas and radiation for every eligible particle
///
/// Writes the new internal energy and radiation energy in place and clamps
/// negative results to zero. `derivs.dudt` supplies the heating rate; a
/// particle beyond the end of a short buffer is exchanged with no heating.
pub fn update_radenergy(
    state: &mut ParticleState,
    derivs: &Derivatives,
    opts: &MethodOptions,
    units: &UnitSystem,
    settings: &RadiationSettings,
    dt: f64,
) -> ExchangeReport {
    let consts = ExchangeConstants::from_units(units, opts.gamma);
    update_radenergy_with(state, derivs, opts, &consts, settings, dt)
}

/// As [`update_radenergy`] with explicit constants
pub fn update_radenergy_with(
    state: &mut ParticleState,
    derivs: &Derivatives,
    opts: &MethodOptions,
    consts: &ExchangeConstants,
    settings: &RadiationSettings,
    dt: f64,
) -> ExchangeReport {
    let masses = state.masses;
    let hfact = opts.hfact;
    let scheme = settings.scheme;
    let strict = settings.strict_species_filter;
    if !derivs.covers(state.len()) {
        log::warn!(
            "radiation: heating rates given for {} of {} particles, the rest taken as zero",
            derivs.dudt.len(),
            state.len()
        );
    }

    let partial = state
        .particles
        .par_iter_mut()
        .enumerate()
        .fold(Partial::default, |mut acc, (i, p)| {
            if strict && p.kind != ParticleType::Gas {
                acc.skipped += 1;
                return acc;
            }

            let rho = rhoh(p.h, masses.of(p.kind), hfact);
            let etot = p.u + p.xi;
            if p.xi < -NEGATIVE_XI_TOLERANCE {
                acc.anomalies.push(RadiationAnomaly::NegativeRadiationBefore { index: i, xi: p.xi });
            }

            let input = ExchangeInput {
                u0: p.u,
                etot,
                rho,
                dudt: derivs.dudt_of(i),
                ack: consts.ack(p.kappa),
                a: consts.a,
                cv1: consts.cv1,
                dt,
            };
            let unew = scheme.solve(&input).u;
            p.u = unew;
            p.xi = etot - unew;

            if p.xi < 0.0 {
                acc.anomalies.push(RadiationAnomaly::NegativeRadiationAfter { index: i, xi: p.xi });
                p.xi = 0.0;
            }
            if p.u < 0.0 {
                acc.anomalies.push(RadiationAnomaly::NegativeThermalAfter { index: i, u: p.u });
                p.u = 0.0;
            }
            acc.updated += 1;
            acc
        })
        .reduce(Partial::default, Partial::merge);

    let mut anomalies = partial.anomalies;
    anomalies.sort_by_key(|a| a.index());
    for anomaly in &anomalies {
        log::warn!("{anomaly}");
    }

    ExchangeReport {
        updated: partial.updated,
        skipped: partial.skipped,
        anomalies,
    }
}
