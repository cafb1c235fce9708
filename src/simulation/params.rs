//! Numerical-method options shared by every phase of a run
//!
//! `MethodOptions` replaces process-wide option globals: it is passed by
//! reference to whatever needs it. Relaxation overrides some of these for
//! its own purposes through an [`OptionsGuard`], which snapshots the values
//! on creation and writes them back when dropped, on every exit path.

use std::ops::{Deref, DerefMut};

use serde::Deserialize;

use super::eos::Eos;

/// Velocity damping applied by the time-integrator
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub enum Damping {
    #[serde(rename = "off")]
    #[default]
    Off,

    /// a -= coefficient * v
    #[serde(rename = "constant")]
    Constant { coefficient: f64 },

    /// a -= v / tdyn
    #[serde(rename = "dynamical_time")]
    DynamicalTime { tdyn: f64 },
}

impl Damping {
    /// Damping rate multiplying the velocity
    pub fn rate(&self) -> f64 {
        match *self {
            Damping::Off => 0.0,
            Damping::Constant { coefficient } => coefficient,
            Damping::DynamicalTime { tdyn } if tdyn > 0.0 => 1.0 / tdyn,
            Damping::DynamicalTime { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodOptions {
    pub eos: Eos,
    pub gamma: f64, // adiabatic index
    pub hfact: f64, // smoothing length in units of mean particle spacing
    pub damping: Damping,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            eos: Eos::Adiabatic,
            gamma: 5.0 / 3.0,
            hfact: 1.2,
            damping: Damping::Off,
        }
    }
}

/// Scoped override of [`MethodOptions`]
///
/// Derefs to the options so callers mutate them in place; the snapshot taken
/// in [`OptionsGuard::new`] is restored on drop.
pub struct OptionsGuard<'a> {
    opts: &'a mut MethodOptions,
    saved: MethodOptions,
}

impl<'a> OptionsGuard<'a> {
    pub fn new(opts: &'a mut MethodOptions) -> Self {
        let saved = opts.clone();
        Self { opts, saved }
    }

    /// Options as they were when the guard was taken
    pub fn saved(&self) -> &MethodOptions {
        &self.saved
    }
}

impl Deref for OptionsGuard<'_> {
    type Target = MethodOptions;

    fn deref(&self) -> &MethodOptions {
        self.opts
    }
}

impl DerefMut for OptionsGuard<'_> {
    fn deref_mut(&mut self) -> &mut MethodOptions {
        self.opts
    }
}

impl Drop for OptionsGuard<'_> {
    fn drop(&mut self) {
        log::debug!("restoring method options: {:?}", self.saved);
        *self.opts = self.saved.clone();
    }
}
