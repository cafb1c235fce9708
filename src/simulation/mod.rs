pub mod states;
pub mod params;
pub mod units;
pub mod eos;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod radiation;
pub mod forces;
pub mod sph;
pub mod diagnostics;
pub mod integrator;
pub mod profile;
pub mod output;
pub mod relax;
pub mod scenario;
