mod commands;
mod input;
mod logging;
mod settings;

use clap::Parser;
use settings::{Command, Settings};
use std::time::Duration;

/// Errors surfaced to the command line
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Library(#[from] map_cluster_lib::ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

fn main() -> Result<(), CliError> {
    logging::setup_logging();
    let settings = Settings::parse();
    tracing::debug!(?settings, "parsed arguments");

    match settings.command {
        Command::Cluster {
            input,
            zoom,
            max_distance,
            min_cluster_size,
            timeout,
            output,
        } => {
            let report = commands::cluster(commands::ClusterArgs {
                input,
                zoom,
                max_distance,
                min_cluster_size,
                timeout: Duration::from_secs(timeout),
            })?;
            commands::write_json(&report, output.as_deref())?;
        }
        Command::Heatmap {
            input,
            x,
            y,
            zoom,
            radius,
            opacity,
            output,
        } => {
            commands::heatmap(commands::HeatmapArgs {
                input,
                x,
                y,
                zoom,
                radius,
                opacity,
                output,
            })?;
        }
        Command::Encode { input } => println!("{}", commands::encode(&input)?),
        Command::Decode { polyline } => {
            for point in commands::decode(&polyline)? {
                println!("{},{}", point.latitude, point.longitude);
            }
        }
        Command::Distance { from, to } => {
            commands::write_json(&commands::distance(&from, &to)?, None)?;
        }
        Command::Area { input, contains } => {
            commands::write_json(&commands::area(&input, contains.as_deref())?, None)?;
        }
    }

    profiling::finish_frame!();
    Ok(())
}
