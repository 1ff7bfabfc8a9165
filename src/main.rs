use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bunker")]
#[command(about = "Secure file backup client", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding transfer.info, port.info and me.info
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // --verbose opts into wire-level debug output; default stays at info.
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    bunker::commands::backup::run(&cli.dir).await?;

    Ok(())
}
