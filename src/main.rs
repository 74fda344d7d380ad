use clap::Parser;
use taskzero::cli::commands::{Cli, Commands};
use taskzero::cli::handlers;
use tracing_subscriber::EnvFilter;

/// Log to stderr; `TZ_LOG` overrides the level picked by `-v`
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("TZ_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("taskzero={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        // Init is handled before vault discovery
        Some(Commands::Init(args)) => handlers::cmd_init(args, cli.vault_dir.as_deref()),
        _ => handlers::dispatch(cli),
    };
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
