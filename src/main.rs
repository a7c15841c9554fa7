use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use yournal::cli::{
    handle_config_command, handle_history_command, handle_profile_command, handle_record_command,
    handle_replay_command, handle_write_command, Cli, CliCommand,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        CliCommand::Record(args) => handle_record_command(args).await,
        CliCommand::Write(args) => handle_write_command(args).await,
        CliCommand::Replay(args) => handle_replay_command(args).await,
        CliCommand::History(args) => handle_history_command(args).await,
        CliCommand::Profile(args) => handle_profile_command(args).await,
        CliCommand::Config => handle_config_command(),
        CliCommand::Version => {
            println!("Yournal {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
