//! CLI handlers for profile lookup and onboarding.

use anyhow::{Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm, Input};

use crate::app::build_profile_client;
use crate::cli::{ProfileCliArgs, ProfileCommand};
use crate::config::Config;
use crate::profile::{Profile, ProfileUpdate};

pub async fn handle_profile_command(args: ProfileCliArgs) -> Result<()> {
    match args.command {
        ProfileCommand::Show { auth_id, save } => handle_show(&auth_id, save).await,
        ProfileCommand::Onboard { auth_id } => handle_onboard(&auth_id).await,
    }
}

async fn handle_show(auth_id: &str, save: bool) -> Result<()> {
    let config = Config::load()?;
    let client = build_profile_client(&config, config.user.access_token.clone())?;
    let profile = client.fetch_by_auth_id(auth_id).await?;

    print_profile(&profile);
    if profile.needs_onboarding() {
        println!();
        println!("Profile is incomplete. Run: yournal profile onboard --auth-id {}", auth_id);
    }

    if save {
        remember_user(&profile)?;
    }
    Ok(())
}

async fn handle_onboard(auth_id: &str) -> Result<()> {
    let config = Config::load()?;
    let client = build_profile_client(&config, config.user.access_token.clone())?;
    let profile = client.fetch_by_auth_id(auth_id).await?;

    if !profile.needs_onboarding() {
        println!("Profile is already complete.");
        print_profile(&profile);
        return Ok(());
    }

    let valid = tokio::task::spawn_blocking(move || -> Result<_> {
        let theme = ColorfulTheme::default();
        loop {
            let name: String = Input::with_theme(&theme)
                .with_prompt("What is your name?")
                .allow_empty(true)
                .interact_text()?;
            let age: String = Input::with_theme(&theme)
                .with_prompt("How old are you?")
                .allow_empty(true)
                .interact_text()?;

            match ProfileUpdate::new(name, age).validate() {
                Ok(valid) => return Ok(valid),
                Err(e) => eprintln!("{}", e),
            }
        }
    })
    .await
    .context("Prompt task failed")??;

    let updated = client.update(&profile.id, &valid).await?;
    println!("Welcome, {}!", valid.name);
    print_profile(&updated);

    let save = tokio::task::spawn_blocking(|| {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Use this profile for new entries?")
            .default(true)
            .interact()
    })
    .await
    .context("Prompt task failed")??;

    if save {
        remember_user(&updated)?;
    }
    Ok(())
}

/// Store the profile id in the config file. Env overrides are not written back.
fn remember_user(profile: &Profile) -> Result<()> {
    let path = Config::config_path()?;
    let mut stored = Config::load_from(&path)?;
    stored.user.user_id = Some(profile.id.clone());
    stored.save_to(&path)?;

    println!("Saved user {} to {}", profile.id, path.display());
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("Profile {}", profile.id);
    println!(
        "  Name: {}",
        profile.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or("<not set>")
    );
    match profile.age {
        Some(age) => println!("  Age:  {}", age),
        None => println!("  Age:  <not set>"),
    }
}
