//! Deployguard CLI: the `deployguard` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands, IdentityCommands};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config;
    match cli.command {
        Commands::Sign { plan, json } => commands::sign::run(plan, json),

        Commands::Verify { plan, json } => commands::verify::run(plan, json),

        Commands::Scope {
            plan,
            work_dir,
            json,
        } => commands::scope::run(&config_path, plan, work_dir, json),

        Commands::Identity { command } => match command {
            IdentityCommands::PreAuth { client_id, json } => {
                commands::identity::run_pre_auth(&config_path, client_id, json)
            }
            IdentityCommands::PostAuth { token_file, json } => {
                commands::identity::run_post_auth(&config_path, token_file, json)
            }
        },

        Commands::State { command } => commands::state::run(&config_path, command),

        Commands::Classify { message, json } => commands::classify::run(message, json),

        Commands::Check {
            plan,
            work_dir,
            token_file,
            json,
        } => commands::check::run(commands::check::Args {
            config_path,
            plan,
            work_dir,
            token_file,
            json,
        }),
    }
}
