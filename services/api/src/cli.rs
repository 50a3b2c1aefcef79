use crate::demo::{run_bootstrap, run_demo, BootstrapArgs, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use stagebloom::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "StageBloom",
    about = "Run and demonstrate the StageBloom internship lifecycle engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Validate seed and offer files and print what loading them would change
    Bootstrap(BootstrapArgs),
    /// Walk one application from submission to an archived report
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON seed with companies, staff and candidates to load at startup
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// CSV offer catalogue to load at startup
    #[arg(long)]
    pub(crate) offers: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Bootstrap(args) => run_bootstrap(args),
        Command::Demo(args) => run_demo(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["stagebloom"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn serve_accepts_seed_files() {
        let cli = Cli::try_parse_from([
            "stagebloom",
            "serve",
            "--port",
            "8080",
            "--seed",
            "seed.json",
            "--offers",
            "offers.csv",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.seed, Some(PathBuf::from("seed.json")));
                assert_eq!(args.offers, Some(PathBuf::from("offers.csv")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
