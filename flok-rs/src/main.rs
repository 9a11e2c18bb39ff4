use std::process::ExitCode;

use clap::Parser;

use flok::cli::{self, Cli};
use flok::config::EngineConfig;
use flok::logging::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    let config = match EngineConfig::discover(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("flok: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.debug);

    let mut stdout = std::io::stdout();
    match cli::execute(args, &config, &mut stdout).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("flok: {e}");
            ExitCode::FAILURE
        }
    }
}
