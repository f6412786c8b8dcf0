use std::process::ExitCode;

use clap::Parser;
use log::error;

use orchestrator::{configs::EvaluateArgs, logging, run_evaluation};

fn main() -> ExitCode {
    let args = EvaluateArgs::parse();
    logging::init(&args.model_dir, "evaluate", args.rank());

    match run_evaluation(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("evaluation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
