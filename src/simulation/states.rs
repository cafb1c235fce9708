//! Core state types for the SPH particle set.
//!
//! Defines the per-particle record (`Particle`), sink/point masses
//! (`PointMass`), the whole-array container (`ParticleState`) and the
//! derivative buffers filled by the force evaluator (`Derivatives`).
//!
//! Density is never stored: it is derived from the smoothing length and the
//! fixed per-species particle mass through [`rhoh`].

use nalgebra::Vector3;
use serde::Deserialize;

pub type NVec3 = Vector3<f64>;

/// Particle type / phase tag
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticleType {
    #[serde(rename = "gas")]
    #[default]
    Gas,
    #[serde(rename = "dust")]
    Dust,
    #[serde(rename = "boundary")]
    Boundary,
}

#[derive(Debug, Clone)]
pub struct Particle {
    pub x: NVec3, // position
    pub h: f64, // smoothing length
    pub v: NVec3, // velocity
    pub u: f64, // specific internal energy
    pub xi: f64, // specific radiation energy
    pub kappa: f64, // opacity, code units
    pub kind: ParticleType,
    pub optically_thick: bool, // only read by ray-tracing analysis
}

impl Particle {
    /// Gas particle at rest with no radiation energy
    pub fn gas(x: NVec3, h: f64, u: f64) -> Self {
        Self {
            x,
            h,
            v: NVec3::zeros(),
            u,
            xi: 0.0,
            kappa: 0.0,
            kind: ParticleType::Gas,
            optically_thick: false,
        }
    }

    pub fn radius(&self) -> f64 {
        self.x.norm()
    }
}

/// Sink particle / point mass
#[derive(Debug, Clone)]
pub struct PointMass {
    pub x: NVec3,
    pub v: NVec3,
    pub m: f64,
    pub h_soft: f64, // softening length
}

/// Fixed particle mass per species
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SpeciesMasses {
    pub gas: f64,
    #[serde(default)]
    pub dust: f64,
    #[serde(default)]
    pub boundary: f64,
}

impl SpeciesMasses {
    pub fn gas_only(gas: f64) -> Self {
        Self { gas, dust: 0.0, boundary: 0.0 }
    }

    pub fn of(&self, kind: ParticleType) -> f64 {
        match kind {
            ParticleType::Gas => self.gas,
            ParticleType::Dust => self.dust,
            ParticleType::Boundary => self.boundary,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticleState {
    pub particles: Vec<Particle>,
    pub point_masses: Vec<PointMass>,
    pub masses: SpeciesMasses,
    pub t: f64, // time
}

impl ParticleState {
    pub fn new(particles: Vec<Particle>, masses: SpeciesMasses) -> Self {
        Self {
            particles,
            point_masses: Vec::new(),
            masses,
            t: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn mass_of(&self, p: &Particle) -> f64 {
        self.masses.of(p.kind)
    }
}

/// Accelerations and heating rates for every particle, as written by a
/// [`DerivativeEvaluator`](crate::simulation::forces::DerivativeEvaluator).
///
/// `accel` holds the hydrodynamic (and self-gravity) part, `accel_ext` the
/// contribution of external potentials and point masses.
#[derive(Debug, Clone, Default)]
pub struct Derivatives {
    pub accel: Vec<NVec3>,
    pub accel_ext: Vec<NVec3>,
    pub dudt: Vec<f64>,
}

impl Derivatives {
    pub fn zeros(n: usize) -> Self {
        Self {
            accel: vec![NVec3::zeros(); n],
            accel_ext: vec![NVec3::zeros(); n],
            dudt: vec![0.0; n],
        }
    }

    /// Zero every buffer, resizing to `n` first
    pub fn reset(&mut self, n: usize) {
        self.accel.clear();
        self.accel.resize(n, NVec3::zeros());
        self.accel_ext.clear();
        self.accel_ext.resize(n, NVec3::zeros());
        self.dudt.clear();
        self.dudt.resize(n, 0.0);
    }

    /// True when every buffer has an entry for each of `n` particles
    pub fn covers(&self, n: usize) -> bool {
        self.accel.len() >= n && self.accel_ext.len() >= n && self.dudt.len() >= n
    }

    /// Hydrodynamic plus external acceleration of particle `i`. Entries
    /// missing from a short buffer count as zero.
    pub fn total_accel(&self, i: usize) -> NVec3 {
        let a = self.accel.get(i).copied().unwrap_or_else(NVec3::zeros);
        let ext = self.accel_ext.get(i).copied().unwrap_or_else(NVec3::zeros);
        a + ext
    }

    /// Heating rate of particle `i`, zero when the buffer is short
    pub fn dudt_of(&self, i: usize) -> f64 {
        self.dudt.get(i).copied().unwrap_or(0.0)
    }
}

/// Density from smoothing length: rho = m (hfact / h)^3
#[inline]
pub fn rhoh(h: f64, pmass: f64, hfact: f64) -> f64 {
    pmass * (hfact / h.abs()).powi(3)
}

/// Inverse of [`rhoh`]
#[inline]
pub fn hrho(rho: f64, pmass: f64, hfact: f64) -> f64 {
    hfact * (pmass / rho).cbrt()
}
