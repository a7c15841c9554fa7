use crate::config::Config;
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

pub mod entry;
pub mod history;
pub mod profile;

pub use entry::{handle_record_command, handle_replay_command, handle_write_command};
pub use history::handle_history_command;
pub use profile::handle_profile_command;

#[derive(Parser, Debug)]
#[command(name = "yournal")]
#[command(about = "Voice and text journaling with mood insights", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Record a voice entry from the microphone
    Record(RecordCliArgs),
    /// Submit a typed entry
    Write(WriteCliArgs),
    /// Submit an existing audio file as a voice entry
    Replay(ReplayCliArgs),
    /// Show saved entries for the days around a date
    History(HistoryCliArgs),
    /// Look up or complete your profile
    Profile(ProfileCliArgs),
    /// Show the configuration file location and contents
    Config,
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct RecordCliArgs {
    /// Also keep the recording as a WAV file at this path
    #[arg(long, value_name = "PATH")]
    pub keep: Option<PathBuf>,
    /// Keep the recording as a WAV file in the recordings directory
    #[arg(long, conflicts_with = "keep")]
    pub archive: bool,
    /// Send without asking for confirmation after stopping
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(ClapArgs, Debug)]
pub struct WriteCliArgs {
    /// Entry text; prompted for when omitted
    pub text: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ReplayCliArgs {
    /// Audio file to submit
    pub file: PathBuf,
    /// Deliver the file at the configured timeslice instead of all at once
    #[arg(long)]
    pub realtime: bool,
}

#[derive(ClapArgs, Debug)]
pub struct HistoryCliArgs {
    /// Center day (YYYY-MM-DD format); today when omitted
    #[arg(long)]
    pub date: Option<String>,
    /// Days to show before and after the center day
    #[arg(short, long, default_value = "3")]
    pub days: u64,
}

#[derive(ClapArgs, Debug)]
pub struct ProfileCliArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Fetch and print the profile linked to an auth identity
    Show {
        /// Auth identity (the identity provider's user id)
        #[arg(long)]
        auth_id: String,
        /// Store the profile id as the journaling user in the config file
        #[arg(long)]
        save: bool,
    },
    /// Fill in name and age for a profile
    Onboard {
        #[arg(long)]
        auth_id: String,
    },
}

pub fn handle_config_command() -> Result<()> {
    let config = Config::load()?;
    let path = Config::config_path()?;

    println!("Config file: {}", path.display());
    println!();

    let mut shown = config.clone();
    if shown.storage.service_key.is_some() {
        shown.storage.service_key = Some("********".to_string());
    }
    if shown.user.access_token.is_some() {
        shown.user.access_token = Some("********".to_string());
    }

    let rendered = toml::to_string_pretty(&shown).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}
