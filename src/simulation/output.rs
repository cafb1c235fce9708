//! Optional relaxation output: iteration log and particle dumps
//!
//! Both are off by default. Writes happen between iterations only.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::simulation::diagnostics::Energies;
use crate::simulation::error::RelaxResult;
use crate::simulation::states::ParticleState;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelaxOutput {
    pub log_file: Option<PathBuf>, // plain-text iteration log
    pub dump_every: Option<usize>, // iterations between dumps
    pub dump_dir: PathBuf,
}

impl RelaxOutput {
    pub fn is_enabled(&self) -> bool {
        self.log_file.is_some() || self.dump_every.is_some()
    }
}

/// Plain-text log, one line per iteration
pub struct RelaxLog {
    out: BufWriter<File>,
}

impl RelaxLog {
    pub fn create(path: &Path) -> RelaxResult<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(
            out,
            "# {:>8} {:>14} {:>14} {:>14} {:>14} {:>14}",
            "nits", "rmax", "etherm", "epot", "ekin/epot", "rmserr"
        )?;
        Ok(Self { out })
    }

    pub fn write_line(&mut self, nits: usize, rmax: f64, energies: &Energies, rmserr: f64) -> RelaxResult<()> {
        writeln!(
            self.out,
            "{:>10} {:>14.6e} {:>14.6e} {:>14.6e} {:>14.6e} {:>14.6e}",
            nits,
            rmax,
            energies.etherm,
            energies.epot,
            energies.ekin / energies.epot.abs(),
            rmserr
        )?;
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct ParticleDump {
    x: [f64; 3],
    h: f64,
    v: [f64; 3],
    u: f64,
    xi: f64,
}

#[derive(Serialize)]
struct DumpFile {
    t: f64,
    nits: usize,
    particles: Vec<ParticleDump>,
}

/// Write the full particle state to `dir/relax_NNNNN.yaml`, stamped with
/// the relaxation time `t` rather than the simulation clock
pub fn write_dump(dir: &Path, nits: usize, t: f64, state: &ParticleState) -> RelaxResult<PathBuf> {
    let path = dir.join(format!("relax_{nits:05}.yaml"));
    let dump = DumpFile {
        t,
        nits,
        particles: state
            .particles
            .iter()
            .map(|p| ParticleDump {
                x: [p.x.x, p.x.y, p.x.z],
                h: p.h,
                v: [p.v.x, p.v.y, p.v.z],
                u: p.u,
                xi: p.xi,
            })
            .collect(),
    };
    let file = BufWriter::new(File::create(&path)?);
    serde_yaml::to_writer(file, &dump)?;
    Ok(path)
}
