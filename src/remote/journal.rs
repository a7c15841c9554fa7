use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::http_failure;
use crate::retry::RetryPolicy;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Saved entries keyed by calendar day, one entry per day.
pub type JournalDays = BTreeMap<NaiveDate, String>;

/// The backend answers with a `date -> content` map, bare or wrapped in `data`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DaysEnvelope {
    Wrapped { data: HashMap<String, String> },
    Bare(HashMap<String, String>),
}

/// Parse a history response, keeping only days inside `start..=end`.
pub(crate) fn parse_days(body: &str, start: NaiveDate, end: NaiveDate) -> Result<JournalDays> {
    let raw = match serde_json::from_str::<DaysEnvelope>(body)
        .context("Failed to parse journal history response")?
    {
        DaysEnvelope::Wrapped { data } => data,
        DaysEnvelope::Bare(days) => days,
    };

    let mut days = JournalDays::new();
    for (key, content) in raw {
        match NaiveDate::parse_from_str(key.trim(), DATE_FORMAT) {
            Ok(day) if day >= start && day <= end => {
                days.insert(day, content);
            }
            Ok(day) => debug!("Ignoring entry for {} outside the requested range", day),
            Err(_) => warn!("Ignoring journal entry with unreadable date {:?}", key),
        }
    }
    Ok(days)
}

/// The `radius` days before and after `center`, inclusive.
pub fn window_around(center: NaiveDate, radius: u64) -> (NaiveDate, NaiveDate) {
    let start = center
        .checked_sub_days(Days::new(radius))
        .unwrap_or(NaiveDate::MIN);
    let end = center
        .checked_add_days(Days::new(radius))
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

/// Reads saved entries back from the journal endpoint.
pub struct JournalClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
    retry: RetryPolicy,
}

impl JournalClient {
    pub fn new(
        base_url: &str,
        path: &str,
        access_token: Option<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build journal history HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
            access_token,
            retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the user's entries for every day in `start..=end`, retrying per policy.
    pub async fn fetch_range(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<JournalDays> {
        let days = self
            .retry
            .run("fetch journal history", move |attempt| {
                debug!(
                    "Fetching entries {}..{} for {} (attempt {})",
                    start, end, user_id, attempt
                );
                self.fetch_once(user_id, start, end)
            })
            .await
            .context("Failed to fetch journal history")?;

        info!("Loaded {} journal day(s) between {} and {}", days.len(), start, end);
        Ok(days)
    }

    async fn fetch_once(&self, user_id: &str, start: NaiveDate, end: NaiveDate) -> Result<JournalDays> {
        let start_date = start.format(DATE_FORMAT).to_string();
        let end_date = end.format(DATE_FORMAT).to_string();

        let mut request = self.client.get(&self.endpoint).query(&[
            ("userId", user_id),
            ("startDate", start_date.as_str()),
            ("endDate", end_date.as_str()),
        ]);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("Failed to send journal history request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read journal history response")?;

        if !status.is_success() {
            return Err(http_failure("Journal API", status, &body));
        }

        parse_days(&body, start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_window_spans_a_week() {
        let (start, end) = window_around(day("2024-03-01"), 3);
        assert_eq!(start, day("2024-02-27"));
        assert_eq!(end, day("2024-03-04"));
        assert_eq!(start.iter_days().take_while(|d| *d <= end).count(), 7);
    }

    #[test]
    fn test_parse_bare_and_wrapped_days() {
        let (start, end) = window_around(day("2024-03-01"), 3);
        let bare = parse_days(r#"{"2024-03-01":"Buen día"}"#, start, end).unwrap();
        let wrapped = parse_days(r#"{"data":{"2024-03-01":"Buen día"}}"#, start, end).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.get(&day("2024-03-01")).map(String::as_str), Some("Buen día"));
    }

    #[test]
    fn test_parse_drops_unreadable_and_out_of_range_days() {
        let (start, end) = window_around(day("2024-03-01"), 3);
        let days = parse_days(
            r#"{"2024-02-28":"antes","2024-03-20":"lejos","ayer":"???"}"#,
            start,
            end,
        )
        .unwrap();
        assert_eq!(days.len(), 1);
        assert!(days.contains_key(&day("2024-02-28")));

        assert!(parse_days(r#"["no", "map"]"#, start, end).is_err());
    }
}
