use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};

use crate::app::build_journal_client;
use crate::config::Config;
use crate::profile::UserContext;
use crate::remote::{window_around, JournalDays};

use super::HistoryCliArgs;

pub async fn handle_history_command(args: HistoryCliArgs) -> Result<()> {
    let config = Config::load()?;
    let context = UserContext::from_config(&config.user)?;

    let center = match args.date.as_deref() {
        Some(date) => NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .with_context(|| format!("Invalid date {:?}, expected YYYY-MM-DD", date))?,
        None => Local::now().date_naive(),
    };
    let (start, end) = window_around(center, args.days);

    let client = build_journal_client(&config, &context)?;
    let days = client.fetch_range(&context.user_id, start, end).await?;

    if days.is_empty() {
        println!("No entries between {} and {}.", start, end);
        return Ok(());
    }

    print!("{}", render_days(&days, start, end));
    Ok(())
}

/// One block per calendar day, including the days without an entry.
fn render_days(days: &JournalDays, start: NaiveDate, end: NaiveDate) -> String {
    let mut out = String::new();
    for day in start.iter_days().take_while(|d| *d <= end) {
        out.push_str(&format!("{}\n", day.format("%a %Y-%m-%d")));
        match days.get(&day) {
            Some(content) => out.push_str(&format!("{}\n", content.trim())),
            None => out.push_str("No entry for this day.\n"),
        }
        out.push_str("---\n");
    }
    out
}
