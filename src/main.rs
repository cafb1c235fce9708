use radrelax::{bench_radiation, bench_shift};
use radrelax::{ModeConfig, Scenario, ScenarioConfig};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, default_value = "relax_star.yaml")]
    file_name: String,

    /// Run the scaling benchmarks instead of the scenario
    #[arg(long)]
    bench: bool,

    /// error, warn, info, debug or trace; falls back to RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    let log_level = level
        .and_then(|l| l.parse::<LevelFilter>().ok())
        .or_else(|| std::env::var("RUST_LOG").ok().and_then(|v| v.parse().ok()))
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            let secs = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() % 86_400)
                .unwrap_or(0);
            writeln!(
                buf,
                "[{:02}:{:02}:{:02} {:5}] {}",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60,
                record.level(),
                record.args()
            )
        })
        .init();
}

// load here to keep main clean
fn load_scenario_from_yaml(file_name: &str) -> Result<ScenarioConfig> {
    let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name);
    let file = File::open(&config_path).with_context(|| format!("opening {}", config_path.display()))?;
    let reader = BufReader::new(file);
    let scenario_cfg: ScenarioConfig = serde_yaml::from_reader(reader)?;
    Ok(scenario_cfg)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    if args.bench {
        bench_radiation();
        bench_shift();
        return Ok(());
    }

    let scenario_cfg = load_scenario_from_yaml(&args.file_name)?;
    let mut scenario = Scenario::build_scenario(scenario_cfg)?;
    scenario.engine.init_thread_pool();

    match scenario.engine.mode {
        ModeConfig::Relax => match scenario.run_relax() {
            Some(Ok(outcome)) => println!(
                "{:?} after {} iterations: rmserr = {:.4e}, ekin/epot = {:.4e}",
                outcome.status,
                outcome.nits,
                outcome.rmserr,
                outcome.energies.ekin / outcome.energies.epot.abs()
            ),
            // relaxation failures leave the particles usable, report and carry on
            Some(Err(e)) => println!("relaxation aborted: {e}"),
            None => anyhow::bail!("relax mode needs a `profile` section"),
        },
        ModeConfig::Exchange => {
            let reports = scenario.run_exchange();
            let anomalies: usize = reports.iter().map(|r| r.anomalies.len()).sum();
            let (u, xi) = scenario
                .state
                .particles
                .iter()
                .fold((0.0, 0.0), |(u, xi), p| (u + p.u, xi + p.xi));
            println!(
                "{} steps: sum u = {:.6e}, sum xi = {:.6e}, {} anomalies",
                reports.len(),
                u,
                xi,
                anomalies
            );
        }
    }

    Ok(())
}
