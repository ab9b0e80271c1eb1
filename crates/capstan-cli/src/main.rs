//! Capstan CLI entrypoint.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "capstan")]
#[command(author, version, about = "Run CI pipelines locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Run {
            pipeline,
            event,
            git_ref,
            target_branch,
            action,
            max_parallel,
            vars,
            secrets,
            workspace,
            no_trigger_check,
            format,
        } => {
            let code = handlers::run(handlers::RunArgs {
                pipeline,
                event,
                git_ref,
                target_branch,
                action,
                max_parallel,
                vars,
                secrets,
                workspace,
                no_trigger_check,
                format,
            })
            .await?;
            std::process::exit(code);
        }
    }

    Ok(())
}
