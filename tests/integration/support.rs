//! Shared fixtures: a scripted provider and temp-dir run configuration

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use racing_backfill::backfill::{BackfillConfig, FetchPolicy};
use racing_backfill::fetcher::{FetchClient, Page, PageResponse, ProviderClient, ProviderError};
use racing_backfill::shutdown::SharedShutdown;
use racing_backfill::RegionFilter;

/// What the provider does for one date.
#[derive(Clone)]
pub enum Day {
    /// One page of race entries
    Races(Vec<Value>),
    /// HTTP 404
    NotFound,
    /// Fail every attempt with this error
    Fail(ProviderError),
    /// Never respond
    Hang,
    /// Request shutdown, then return these entries
    CancelAfter(SharedShutdown, Vec<Value>),
    /// One race per page, always claiming another page follows
    Endless,
}

/// Provider replaying a per-date script and recording every call.
#[derive(Default)]
pub struct ScriptedProvider {
    days: HashMap<NaiveDate, Day>,
    calls: Mutex<Vec<NaiveDate>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day(mut self, date: NaiveDate, day: Day) -> Self {
        self.days.insert(date, day);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Dates requested so far, in call order (one per attempt).
    pub fn calls(&self) -> Vec<NaiveDate> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn fetch_page(
        &self,
        date: NaiveDate,
        _region: &RegionFilter,
        skip: usize,
        _limit: usize,
    ) -> Result<PageResponse, ProviderError> {
        self.calls.lock().unwrap().push(date);
        let page = |records: Vec<Value>| -> Result<PageResponse, ProviderError> {
            Ok(PageResponse::Page(Page {
                records,
                has_more: false,
            }))
        };
        match self.days.get(&date).cloned() {
            None | Some(Day::NotFound) => Ok(PageResponse::NotFound),
            Some(Day::Races(records)) => page(records),
            Some(Day::Fail(error)) => Err(error),
            Some(Day::Hang) => std::future::pending().await,
            Some(Day::CancelAfter(shutdown, records)) => {
                shutdown.request_shutdown();
                page(records)
            }
            Some(Day::Endless) => Ok(PageResponse::Page(Page {
                records: vec![race(&format!("endless{skip}"), date, &["h1"])],
                has_more: true,
            })),
        }
    }
}

pub fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

/// Race entry with one runner per horse id.
pub fn race(race_id: &str, date: NaiveDate, horses: &[&str]) -> Value {
    let runners: Vec<Value> = horses
        .iter()
        .enumerate()
        .map(|(i, horse)| {
            json!({
                "horse_id": horse,
                "horse": format!("Horse {horse}"),
                "number": i + 1,
                "position": (i + 1).to_string(),
                "jockey_id": format!("jky_{}", i % 2),
                "jockey": "J Rider",
                "trainer_id": "trn_1",
                "trainer": "T Trainer",
                "sire_id": format!("sire_{horse}"),
            })
        })
        .collect();
    json!({
        "race_id": race_id,
        "date": date.format("%Y-%m-%d").to_string(),
        "region": "GB",
        "course": "Ascot",
        "dist_f": "8f",
        "going": "Good",
        "runners": runners,
    })
}

/// Policy that never waits long: high request budget, tiny backoff.
pub fn fast_policy() -> FetchPolicy {
    FetchPolicy {
        requests_per_second: 1000.0,
        max_attempts: 2,
        base_backoff: Duration::from_millis(5),
        throttle_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        page_size: 50,
    }
}

pub fn fetch_client(provider: Arc<ScriptedProvider>) -> FetchClient {
    FetchClient::new(provider, fast_policy()).unwrap()
}

/// Run configuration with checkpoint and error log inside `dir`, fast mode.
pub fn config(dir: &TempDir, start: NaiveDate, end: NaiveDate) -> BackfillConfig {
    BackfillConfig::new(start, end)
        .with_region(RegionFilter::new(["gb"]))
        .with_skip_enrichment(true)
        .with_checkpoint_path(dir.path().join("checkpoint.json"))
        .with_error_log_path(dir.path().join("errors.jsonl"))
}
