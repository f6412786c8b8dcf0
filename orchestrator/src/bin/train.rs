use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use orchestrator::{configs::TrainArgs, logging, run_training};

fn main() -> ExitCode {
    let args = TrainArgs::parse();
    logging::init(&args.model_dir, "train", args.rank());

    match run_training(&args) {
        Ok(report) => {
            if let Some(best) = report.best {
                info!(best = best; "training finished");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("training failed: {e}");
            ExitCode::FAILURE
        }
    }
}
