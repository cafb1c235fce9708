//! High-level runtime engine settings
//!
//! Selects what the binary runs, how the radiation exchange is solved and
//! how many worker threads the per-particle loops use.

use crate::configuration::config::ModeConfig;
use crate::simulation::radiation::RadiationSettings;

#[derive(Debug, Clone)]
pub struct Engine {
    pub mode: ModeConfig, // relax or exchange
    pub radiation: RadiationSettings, // exchange scheme and species filter
    pub threads: Option<usize>, // None = all cores
}

impl Engine {
    /// Size the global rayon pool. Only the first call in a process has an effect.
    pub fn init_thread_pool(&self) {
        if let Some(n) = self.threads {
            if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
                log::warn!("thread pool already initialised: {e}");
            }
        }
        log::info!("using {} worker threads", rayon::current_num_threads());
    }
}
