// Entrypoint for the CLI application.
// - Sets up logging and the Ctrl-C handler, then hands over to `cli::run`.
// - Any error that reaches this point is printed and ends the process.

use clap::CommandFactory;
use tracing_subscriber::EnvFilter;
use vt_submit::cli::{self, Args, CliError};
use vt_submit::ui;

fn main() {
    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_help();
        eprintln!("\nerror: {}", CliError::NoArguments);
        std::process::exit(1);
    }
    let args = Args::from_argv(std::env::args_os()).unwrap_or_else(|e| e.exit());

    // RUST_LOG wins over -v when set.
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(|| ui::LogWriter)
        .init();

    if let Err(e) = ctrlc::set_handler(|| {
        println!("\nInterrupted, bye!");
        std::process::exit(0);
    }) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    if let Err(e) = cli::run(args) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
