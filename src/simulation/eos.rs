//! Equation-of-state selector and sound speed

use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Eos {
    /// Fixed sound speed, cs^2 = polyk
    #[serde(rename = "isothermal")]
    Isothermal { polyk: f64 },

    /// P = (gamma - 1) rho u
    #[serde(rename = "adiabatic")]
    Adiabatic,
}

impl Eos {
    pub fn sound_speed(&self, gamma: f64, u: f64) -> f64 {
        match *self {
            Eos::Isothermal { polyk } => polyk.max(0.0).sqrt(),
            Eos::Adiabatic => (gamma * (gamma - 1.0) * u).max(0.0).sqrt(),
        }
    }

    pub fn pressure(&self, gamma: f64, rho: f64, u: f64) -> f64 {
        match *self {
            Eos::Isothermal { polyk } => polyk * rho,
            Eos::Adiabatic => (gamma - 1.0) * rho * u,
        }
    }
}
