use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use log::info;
use md4_config::{ConfigError, Md4Config, Result, sweep_configs};
use tracing_subscriber::filter::LevelFilter;

/// Writes the configuration of every work unit of an MD4 sweep.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Base configuration, the CIFAR-10 setup when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit only the base configuration.
    #[arg(long)]
    nosweep: bool,

    /// Directory receiving one `work_unit_<i>.json` per work unit, stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let base = match &args.config {
        Some(path) => Md4Config::load(path)?,
        None => Md4Config::cifar10(),
    };

    let work_units = if args.nosweep {
        vec![base]
    } else {
        sweep_configs(&base)?
    };

    match &args.output {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.clone(),
                source,
            })?;
            for (idx, config) in work_units.iter().enumerate() {
                let path = dir.join(format!("work_unit_{idx}.json"));
                config.save(&path)?;
                info!("Wrote {}", path.display());
            }
        }
        None => {
            let mut stdout = io::stdout().lock();
            for config in &work_units {
                let line = serde_json::to_string(config)?;
                writeln!(stdout, "{line}").map_err(|source| ConfigError::Io {
                    path: PathBuf::from("<stdout>"),
                    source,
                })?;
            }
        }
    }

    info!("Emitted {} work units", work_units.len());
    Ok(())
}
