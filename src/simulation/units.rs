//! Unit system and physical constants
//!
//! Code units are fixed by a length, mass and time scale in cgs. Temperature
//! is never rescaled. All constants below are cgs.

use serde::Deserialize;

pub const STEBOLTZ: f64 = 5.670_374_419e-5; // erg cm^-2 s^-1 K^-4
pub const C_LIGHT: f64 = 2.997_924_58e10; // cm s^-1
pub const RADCONST: f64 = 4.0 * STEBOLTZ / C_LIGHT; // erg cm^-3 K^-4
pub const GAS_CONSTANT: f64 = 8.314_462_618e7; // erg K^-1 mol^-1
pub const GRAV_CONSTANT: f64 = 6.674_30e-8; // cm^3 g^-1 s^-2

pub const SOLAR_MASS: f64 = 1.988_92e33;
pub const SOLAR_RADIUS: f64 = 6.959_894_677e10;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct UnitSystem {
    pub udist: f64, // cm
    pub umass: f64, // g
    pub utime: f64, // s
    #[serde(default = "default_gmw")]
    pub gmw: f64, // mean molecular weight
}

fn default_gmw() -> f64 {
    2.381
}

impl Default for UnitSystem {
    /// Solar units with G = 1
    fn default() -> Self {
        Self::with_g_one(SOLAR_RADIUS, SOLAR_MASS)
    }
}

impl UnitSystem {
    /// Choose utime so that G = 1 in code units
    pub fn with_g_one(udist: f64, umass: f64) -> Self {
        let utime = (udist.powi(3) / (GRAV_CONSTANT * umass)).sqrt();
        Self { udist, umass, utime, gmw: default_gmw() }
    }

    pub fn unit_energ(&self) -> f64 {
        self.umass * self.udist * self.udist / (self.utime * self.utime)
    }

    /// Specific energy, erg/g
    pub fn unit_ergg(&self) -> f64 {
        self.udist * self.udist / (self.utime * self.utime)
    }

    pub fn unit_density(&self) -> f64 {
        self.umass / self.udist.powi(3)
    }

    pub fn unit_velocity(&self) -> f64 {
        self.udist / self.utime
    }

    /// Gravitational constant in code units
    pub fn g_code(&self) -> f64 {
        GRAV_CONSTANT * self.umass * self.utime * self.utime / self.udist.powi(3)
    }

    pub fn c_code(&self) -> f64 {
        C_LIGHT / self.unit_velocity()
    }

    /// Radiation constant a in code units (energy / volume / K^4)
    pub fn radconst_code(&self) -> f64 {
        RADCONST * self.udist.powi(3) / self.unit_energ()
    }

    /// Stefan-Boltzmann constant in code units (energy / area / time / K^4)
    pub fn steboltz_code(&self) -> f64 {
        STEBOLTZ * self.udist * self.udist * self.utime / self.unit_energ()
    }

    /// Converts code specific internal energy to temperature: T = u cv1
    pub fn cv1(&self, gamma: f64) -> f64 {
        (gamma - 1.0) * self.gmw * self.unit_ergg() / GAS_CONSTANT
    }

    pub fn temperature(&self, u: f64, gamma: f64) -> f64 {
        u * self.cv1(gamma)
    }
}
