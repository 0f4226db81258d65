//! Unit tests for the results transformer

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use racing_backfill::backfill::{
    ResultsTransformer, TransformError, TransformOptions, Transformer,
};
use racing_backfill::{RawPayload, RecordKind};
use serde_json::{json, Value};

fn payload(entries: Vec<Value>) -> RawPayload {
    RawPayload {
        date: NaiveDate::from_ymd_opt(2023, 6, 20).unwrap(),
        entries,
        pages: 1,
    }
}

fn full_entry() -> Value {
    json!({
        "race_id": "rac_100",
        "date": "2023-06-20",
        "region": "GB",
        "course": "Ascot",
        "off": "2:30",
        "race_name": "Queen Anne Stakes",
        "type": "Flat",
        "class": "Class 1",
        "dist_f": "8f",
        "dist_m": "1609",
        "going": "Good To Firm",
        "runners": [
            {
                "horse_id": "hrs_1",
                "horse": "Fast One",
                "sex": "c",
                "number": "3",
                "position": "1",
                "btn": "0",
                "sp_dec": "4.5",
                "prize": "£283,550",
                "jockey_id": "jky_1",
                "jockey": "A Rider",
                "trainer_id": "trn_1",
                "trainer": "B Trainer",
                "owner_id": "own_1",
                "owner": "C Owner",
                "sire": "Frankel",
                "sire_id": "hrs_900",
                "dam": "Some Mare",
                "dam_id": "hrs_901"
            },
            {
                "horse_id": 2,
                "horse": "Pulled Up",
                "position": "PU",
                "jockey_id": "jky_1",
                "trainer_id": "trn_1"
            }
        ]
    })
}

#[test]
fn test_entry_maps_to_race_runners_and_enrichment() {
    let out = ResultsTransformer::new()
        .transform(&payload(vec![full_entry()]), &TransformOptions::default())
        .unwrap();

    let tables: Vec<_> = out.batches.iter().map(|b| b.table.as_str()).collect();
    assert_eq!(
        tables,
        vec!["races", "runners", "horses", "jockeys", "trainers", "owners", "pedigrees"]
    );
    assert_eq!(out.count(RecordKind::Parent), 1);
    assert_eq!(out.count(RecordKind::Child), 2);
    // horses 2, jockeys 1, trainers 1, owners 1, pedigrees 1
    assert_eq!(out.count(RecordKind::Enrichment), 6);
    assert_eq!(out.total_records(), 9);
    assert!(out.rejected.is_empty());

    let race = &out.batches[0].records[0];
    assert_eq!(race.key, "rac_100");
    assert_eq!(race.fields["distance_f"], json!(8.0));
    assert_eq!(race.fields["distance_m"], json!(1609));
    assert_eq!(race.fields["runner_count"], json!(2));

    let winner = &out.batches[1].records[0];
    assert_eq!(winner.key, "rac_100:hrs_1");
    assert_eq!(winner.fields["prize"], json!(283550.0));
    assert_eq!(winner.fields["number"], json!(3));
    let pulled_up = &out.batches[1].records[1];
    assert_eq!(pulled_up.key, "rac_100:2");
    assert_eq!(pulled_up.fields["position"], json!("PU"));
    assert_eq!(pulled_up.fields["prize"], Value::Null);

    let pedigree = &out.batches[6].records[0];
    assert_eq!(pedigree.key, "hrs_1");
    assert_eq!(pedigree.fields["sire"], json!("Frankel"));
    assert_eq!(pedigree.fields["damsire"], Value::Null);
}

#[test]
fn test_fast_mode_skips_enrichment() {
    let out = ResultsTransformer::new()
        .transform(
            &payload(vec![full_entry()]),
            &TransformOptions {
                skip_enrichment: true,
            },
        )
        .unwrap();
    let tables: Vec<_> = out.batches.iter().map(|b| b.table.as_str()).collect();
    assert_eq!(tables, vec!["races", "runners"]);
    assert_eq!(out.count(RecordKind::Enrichment), 0);
}

#[test]
fn test_entries_without_identity_are_rejected_individually() {
    let out = ResultsTransformer::new()
        .transform(
            &payload(vec![
                json!("not an object"),
                full_entry(),
                json!({ "race_id": "", "runners": [] }),
                json!({ "race_id": "rac_2", "runners": [{ "horse": "Anonymous" }] }),
            ]),
            &TransformOptions {
                skip_enrichment: true,
            },
        )
        .unwrap();

    assert_eq!(out.count(RecordKind::Parent), 2);
    assert_eq!(out.count(RecordKind::Child), 2);
    let reasons: Vec<_> = out
        .rejected
        .iter()
        .map(|r| (r.index, r.reason.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (0, "entry is not an object"),
            (2, "missing race_id"),
            (3, "race rac_2: runner 0 missing horse_id"),
        ]
    );
}

#[test]
fn test_all_entries_rejected_fails_the_unit() {
    let err = ResultsTransformer::new()
        .transform(
            &payload(vec![json!({ "course": "Ascot" }), json!(null)]),
            &TransformOptions::default(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        TransformError::NoValidEntries {
            rejected: 2,
            first_reason: "missing race_id".to_string(),
        }
    );
}

#[test]
fn test_empty_payload_produces_no_batches() {
    let out = ResultsTransformer::new()
        .transform(&payload(Vec::new()), &TransformOptions::default())
        .unwrap();
    assert!(out.batches.is_empty());
    assert!(out.rejected.is_empty());
}
