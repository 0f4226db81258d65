//! End-to-end runs of the backfill engine against a scripted provider

use pretty_assertions::assert_eq;
use racing_backfill::backfill::config::MAX_PAGES_PER_UNIT;
use racing_backfill::backfill::{
    BackfillEngine, BackfillError, PipelineStage, ResultsTransformer, RunPhase, TransformError,
    TransformOptions, TransformOutput, Transformer,
};
use racing_backfill::fetcher::ProviderError;
use racing_backfill::resume::{read_checkpoint, ErrorLog, ResumeError};
use racing_backfill::shutdown::ShutdownCoordinator;
use racing_backfill::store::MemoryStore;
use racing_backfill::RawPayload;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::support::{config, d, fetch_client, race, Day, ScriptedProvider};

fn every_day_one_race(days: std::ops::RangeInclusive<u32>) -> ScriptedProvider {
    days.fold(ScriptedProvider::new(), |provider, n| {
        provider.day(d(n), Day::Races(vec![race(&format!("r{n}"), d(n), &["h1"])]))
    })
}

#[tokio::test(start_paused = true)]
async fn test_three_day_run_loads_and_checkpoints_every_date() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new()
        .day(
            d(1),
            Day::Races(vec![
                race("r1", d(1), &["h1", "h2"]),
                race("r2", d(1), &["h3", "h4"]),
            ]),
        )
        .day(d(2), Day::NotFound)
        .day(d(3), Day::Races(vec![race("r3", d(3), &["h5", "h6", "h7"])]))
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(3));
    let checkpoint_path = cfg.checkpoint_path.clone();
    let error_log_path = cfg.error_log_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(provider.clone()), store.clone()).unwrap();
    let summary = engine.run().await.unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.phase, RunPhase::Done);
    assert_eq!(summary.planned, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.counters.dates_with_data, 2);
    assert_eq!(summary.counters.dates_no_data, 1);
    assert_eq!(summary.counters.races, 3);
    assert_eq!(summary.counters.runners, 7);
    assert_eq!(summary.counters.records_loaded, 10);
    assert_eq!(summary.counters.errors, 0);
    assert_eq!(summary.fetch.requests, 3);

    assert_eq!(store.len("races"), 3);
    assert_eq!(store.len("runners"), 7);
    assert_eq!(store.get("runners", "r1:h2").unwrap().record_date, Some(d(1)));
    // Fast mode writes no enrichment tables
    assert_eq!(store.tables(), vec!["races".to_string(), "runners".to_string()]);

    let checkpoint = read_checkpoint(&checkpoint_path).unwrap().unwrap();
    assert_eq!(checkpoint.processed_dates, BTreeSet::from([d(1), d(2), d(3)]));
    assert_eq!(checkpoint.last_date, Some(d(3)));
    assert_eq!(checkpoint.stats, summary.counters);

    assert!(ErrorLog::new(error_log_path).read_all().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_day_failure_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let provider = every_day_one_race(1..=10)
        .day(
            d(5),
            Day::Fail(ProviderError::Server {
                status: 503,
                message: "maintenance".into(),
            }),
        )
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(10));
    let checkpoint_path = cfg.checkpoint_path.clone();
    let error_log_path = cfg.error_log_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(provider.clone()), store.clone()).unwrap();
    let summary = engine.run().await.unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].date, d(5));
    assert_eq!(summary.failures[0].stage, PipelineStage::Fetch);
    assert_eq!(summary.counters.units_processed, 10);
    assert_eq!(summary.counters.dates_with_data, 9);
    assert_eq!(summary.counters.errors, 1);
    assert_eq!(summary.counters.records_loaded, 18);
    // Nine single-attempt days plus two attempts for the failing one
    assert_eq!(provider.calls().len(), 11);

    let log = ErrorLog::new(error_log_path);
    let entries = log.read_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].date, d(5));
    assert_eq!(entries[0].stage, PipelineStage::Fetch);
    assert!(entries[0].error.contains("maintenance"));
    assert_eq!(log.failed_dates().unwrap(), BTreeSet::from([d(5)]));

    // The failed date is recorded too: resume never retries it automatically
    let checkpoint = read_checkpoint(&checkpoint_path).unwrap().unwrap();
    assert_eq!(checkpoint.processed_dates.len(), 10);
    assert!(checkpoint.is_processed(d(5)));
}

#[tokio::test(start_paused = true)]
async fn test_resume_skips_processed_dates() {
    let dir = TempDir::new().unwrap();
    let provider = every_day_one_race(1..=5).shared();
    let store = Arc::new(MemoryStore::new());

    let mut first =
        BackfillEngine::new(config(&dir, d(1), d(3)), fetch_client(provider.clone()), store.clone())
            .unwrap();
    first.run().await.unwrap();
    drop(first);
    assert_eq!(provider.calls(), vec![d(1), d(2), d(3)]);

    // Same range again: nothing left to do
    let mut again = BackfillEngine::new(
        config(&dir, d(1), d(3)).with_resume(true),
        fetch_client(provider.clone()),
        store.clone(),
    )
    .unwrap();
    let prepared = again.prepare().unwrap();
    assert!(prepared.resumed);
    assert!(prepared.is_empty());
    assert_eq!(prepared.skipped, 3);
    let summary = again.execute(prepared).await.unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.processed, 0);
    drop(again);
    assert_eq!(provider.calls().len(), 3);

    // Extended range: only the new days are fetched
    let mut extended = BackfillEngine::new(
        config(&dir, d(1), d(5)).with_resume(true),
        fetch_client(provider.clone()),
        store.clone(),
    )
    .unwrap();
    let summary = extended.run().await.unwrap();
    assert_eq!(provider.calls()[3..].to_vec(), vec![d(4), d(5)]);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.counters.units_processed, 5);
    assert_eq!(summary.counters.total_units, 5);
    assert_eq!(summary.counters.records_loaded, 10);
    assert_eq!(store.len("races"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_without_resume_updates_instead_of_duplicating() {
    let dir = TempDir::new().unwrap();
    let provider = every_day_one_race(1..=2).shared();
    let store = Arc::new(MemoryStore::new());

    for _ in 0..2 {
        let mut engine = BackfillEngine::new(
            config(&dir, d(1), d(2)),
            fetch_client(provider.clone()),
            store.clone(),
        )
        .unwrap();
        let summary = engine.run().await.unwrap();
        // Counters restart on a fresh run
        assert_eq!(summary.counters.units_processed, 2);
        assert_eq!(summary.counters.records_loaded, 4);
    }
    assert_eq!(provider.calls().len(), 4);
    assert_eq!(store.len("races"), 2);
    assert_eq!(store.len("runners"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_crash_loses_at_most_one_checkpoint_interval() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let hanging = every_day_one_race(1..=4).day(d(5), Day::Hang).shared();

    let cfg = config(&dir, d(1), d(6)).with_checkpoint_every(2);
    let checkpoint_path = cfg.checkpoint_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(hanging.clone()), store.clone()).unwrap();
    // Dropping the run future mid-unit stands in for the process dying
    let outcome = tokio::time::timeout(Duration::from_secs(60), engine.run()).await;
    assert!(outcome.is_err());
    drop(engine);

    let before = read_checkpoint(&checkpoint_path).unwrap().unwrap();
    assert_eq!(before.processed_dates, BTreeSet::from([d(1), d(2), d(3), d(4)]));

    let healthy = ScriptedProvider::new()
        .day(d(5), Day::Races(vec![race("r5", d(5), &["h1"])]))
        .shared();
    let mut resumed = BackfillEngine::new(
        config(&dir, d(1), d(6)).with_checkpoint_every(2).with_resume(true),
        fetch_client(healthy.clone()),
        store.clone(),
    )
    .unwrap();
    let summary = resumed.run().await.unwrap();
    assert!(summary.is_success());
    assert_eq!(healthy.calls(), vec![d(5), d(6)]);

    let after = read_checkpoint(&checkpoint_path).unwrap().unwrap();
    assert!(after.processed_dates.is_superset(&before.processed_dates));
    assert_eq!(after.processed_dates.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_between_units_and_flushes_checkpoint() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let provider = every_day_one_race(1..=5)
        .day(
            d(3),
            Day::CancelAfter(shutdown.clone(), vec![race("r3", d(3), &["h1"])]),
        )
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(5));
    let checkpoint_path = cfg.checkpoint_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(provider.clone()), store.clone())
        .unwrap()
        .with_shutdown(shutdown);
    let summary = engine.run().await.unwrap();

    assert!(summary.cancelled);
    assert!(!summary.is_success());
    assert_eq!(summary.phase, RunPhase::Interrupted);
    assert_eq!(engine.phase(), RunPhase::Interrupted);
    assert_eq!(summary.processed, 3);
    // The unit in flight when cancellation arrived still completed
    assert_eq!(store.len("races"), 3);
    assert_eq!(provider.calls(), vec![d(1), d(2), d(3)]);

    let checkpoint = read_checkpoint(&checkpoint_path).unwrap().unwrap();
    assert_eq!(checkpoint.processed_dates, BTreeSet::from([d(1), d(2), d(3)]));
}

#[tokio::test(start_paused = true)]
async fn test_second_engine_on_same_checkpoint_fails_fast() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new().shared();
    let store = Arc::new(MemoryStore::new());

    let first =
        BackfillEngine::new(config(&dir, d(1), d(2)), fetch_client(provider.clone()), store.clone())
            .unwrap();
    let second =
        BackfillEngine::new(config(&dir, d(1), d(2)), fetch_client(provider.clone()), store.clone());
    match second {
        Err(BackfillError::Resume(ResumeError::Locked { pid, .. })) => {
            assert_eq!(pid, Some(std::process::id()));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second engine acquired a held checkpoint"),
    }

    drop(first);
    assert!(
        BackfillEngine::new(config(&dir, d(1), d(2)), fetch_client(provider), store).is_ok(),
        "lock must be released when the first engine is dropped"
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_entries_are_logged_without_failing_the_unit() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new()
        .day(
            d(1),
            Day::Races(vec![
                race("r1", d(1), &["h1", "h2"]),
                json!({ "course": "Ascot", "runners": [] }),
            ]),
        )
        .day(d(2), Day::Races(vec![json!({ "course": "Kempton" })]))
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(2));
    let error_log_path = cfg.error_log_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(provider), store.clone()).unwrap();
    let summary = engine.run().await.unwrap();

    // Day 1 loads its valid race; day 2 has nothing usable and fails
    assert_eq!(store.len("races"), 1);
    assert_eq!(store.len("runners"), 2);
    assert_eq!(summary.counters.rejected_entries, 1);
    assert_eq!(summary.counters.dates_with_data, 2);
    assert_eq!(summary.counters.errors, 2);
    assert_eq!(summary.counters.records_loaded, 3);

    let entries = ErrorLog::new(error_log_path).read_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.stage == PipelineStage::Transform));
    assert_eq!(entries[0].date, d(1));
    assert!(entries[0].error.contains("missing race_id"));
    assert_eq!(entries[1].date, d(2));
}

#[tokio::test(start_paused = true)]
async fn test_full_mode_loads_deduplicated_enrichment() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new()
        .day(d(1), Day::Races(vec![race("r1", d(1), &["h1", "h2", "h3"])]))
        .shared();
    let store = Arc::new(MemoryStore::new());

    let mut engine = BackfillEngine::new(
        config(&dir, d(1), d(1)).with_skip_enrichment(false),
        fetch_client(provider),
        store.clone(),
    )
    .unwrap();
    let summary = engine.run().await.unwrap();

    assert_eq!(store.len("horses"), 3);
    // Three runners ridden by two jockeys for one trainer
    assert_eq!(store.len("jockeys"), 2);
    assert_eq!(store.len("trainers"), 1);
    assert_eq!(store.len("pedigrees"), 3);
    assert_eq!(store.len("owners"), 0);
    assert_eq!(summary.counters.enrichment, 9);
    assert_eq!(summary.counters.records_loaded, 13);
}

#[tokio::test(start_paused = true)]
async fn test_failed_day_replays_under_its_own_checkpoint() {
    let dir = TempDir::new().unwrap();
    let flaky = every_day_one_race(1..=10)
        .day(
            d(5),
            Day::Fail(ProviderError::Server {
                status: 502,
                message: "bad gateway".into(),
            }),
        )
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(10));
    let main_checkpoint = cfg.checkpoint_path.clone();
    let error_log_path = cfg.error_log_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(flaky), store.clone()).unwrap();
    engine.run().await.unwrap();
    drop(engine);
    assert_eq!(
        ErrorLog::new(&error_log_path).failed_dates().unwrap(),
        BTreeSet::from([d(5)])
    );
    let before = read_checkpoint(&main_checkpoint).unwrap().unwrap();

    // Resuming the main run never revisits the failed day
    let healthy = every_day_one_race(1..=10).shared();
    let mut resumed = BackfillEngine::new(
        config(&dir, d(1), d(10)).with_resume(true),
        fetch_client(healthy.clone()),
        store.clone(),
    )
    .unwrap();
    assert!(resumed.prepare().unwrap().is_empty());
    drop(resumed);

    let replay_cfg =
        config(&dir, d(5), d(5)).with_checkpoint_path(dir.path().join("replay_checkpoint.json"));
    let mut replay = BackfillEngine::new(replay_cfg, fetch_client(healthy.clone()), store.clone())
        .unwrap();
    let summary = replay.run().await.unwrap();

    assert!(summary.is_success());
    assert_eq!(healthy.calls(), vec![d(5)]);
    assert!(store.get("races", "r5").is_some());
    assert_eq!(store.len("races"), 10);
    // The multi-day run's resume state is untouched
    assert_eq!(read_checkpoint(&main_checkpoint).unwrap().unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_day_exceeding_the_page_cap_is_logged_not_truncated() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new()
        .day(d(1), Day::Endless)
        .day(d(2), Day::Races(vec![race("r2", d(2), &["h1"])]))
        .shared();
    let store = Arc::new(MemoryStore::new());

    let cfg = config(&dir, d(1), d(2));
    let error_log_path = cfg.error_log_path.clone();
    let mut engine = BackfillEngine::new(cfg, fetch_client(provider.clone()), store.clone()).unwrap();
    let summary = engine.run().await.unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].date, d(1));
    assert_eq!(summary.failures[0].stage, PipelineStage::Fetch);
    assert!(summary.failures[0].error.contains("page cap exceeded"));
    assert_eq!(
        provider.calls().iter().filter(|date| **date == d(1)).count(),
        MAX_PAGES_PER_UNIT as usize
    );
    // Nothing from the capped day is loaded
    assert_eq!(store.len("races"), 1);
    assert!(store.get("races", "r2").is_some());

    let entries = ErrorLog::new(error_log_path).read_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].date, d(1));
}

/// Keeps only the races batch of the results transformer.
struct RacesOnly;

impl Transformer for RacesOnly {
    fn transform(
        &self,
        payload: &RawPayload,
        options: &TransformOptions,
    ) -> Result<TransformOutput, TransformError> {
        let mut output = ResultsTransformer::new().transform(payload, options)?;
        output.batches.retain(|batch| batch.table == "races");
        Ok(output)
    }
}

#[tokio::test(start_paused = true)]
async fn test_custom_transformer_decides_what_is_loaded() {
    let dir = TempDir::new().unwrap();
    let provider = every_day_one_race(1..=2).shared();
    let store = Arc::new(MemoryStore::new());

    let mut engine =
        BackfillEngine::new(config(&dir, d(1), d(2)), fetch_client(provider), store.clone())
            .unwrap()
            .with_transformer(Arc::new(RacesOnly));
    let summary = engine.run().await.unwrap();

    assert!(summary.is_success());
    assert_eq!(store.len("races"), 2);
    assert_eq!(store.len("runners"), 0);
    assert_eq!(summary.counters.runners, 0);
    assert_eq!(summary.counters.records_loaded, 2);
}
