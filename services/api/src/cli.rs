use crate::demo::{
    run_demo, run_explain, run_fixture, run_validate, DemoArgs, ExplainArgs, RunArgs,
    ValidateArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use comp_engine::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Compensation Engine",
    about = "Serve, run and inspect compensation plan calculations",
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
    /// Calculate every entity in a fixture directory for one period
    Run(RunArgs),
    /// Check a plan definition for configuration errors
    Validate(ValidateArgs),
    /// Calculate and narrate a single entity without persisting
    Explain(ExplainArgs),
    /// Run the built-in optical retail plan end to end
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
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Run(args) => run_fixture(args).await,
        Command::Validate(args) => run_validate(args),
        Command::Explain(args) => run_explain(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
