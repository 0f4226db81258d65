//! Raw result entries to normalized record batches
//!
//! Each provider entry is one race with its runners. Optional fields that are
//! missing or malformed become `null`; an entry (or runner) without its
//! identity field is rejected and reported, and the rest of the unit loads.

use crate::{NormalizedRecord, RawPayload, RecordBatch, RecordKind};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Parent table
pub const RACES_TABLE: &str = "races";
/// Child table
pub const RUNNERS_TABLE: &str = "runners";
/// Enrichment tables, in load order
pub const ENRICHMENT_TABLES: [&str; 5] = ["horses", "jockeys", "trainers", "owners", "pedigrees"];

/// Per-run transformation switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Fast mode: emit races and runners only
    pub skip_enrichment: bool,
}

/// An entry (or runner within an entry) dropped for missing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedEntry {
    /// Position of the entry in the raw payload
    pub index: usize,
    /// Why it was rejected
    pub reason: String,
}

/// Batches produced for one unit, parents first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    /// Non-empty batches in load order
    pub batches: Vec<RecordBatch>,
    /// Rejected entries
    pub rejected: Vec<RejectedEntry>,
}

impl TransformOutput {
    /// Records of the given kind across all batches.
    pub fn count(&self, kind: RecordKind) -> usize {
        self.batches
            .iter()
            .filter(|b| b.kind == kind)
            .map(RecordBatch::len)
            .sum()
    }

    /// Records across all batches.
    pub fn total_records(&self) -> usize {
        self.batches.iter().map(RecordBatch::len).sum()
    }
}

/// Transformation failures that make the whole unit unusable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    /// Every entry of a non-empty payload was rejected
    #[error("no usable entries: all {rejected} entries rejected (first: {first_reason})")]
    NoValidEntries {
        /// Entries rejected
        rejected: usize,
        /// Reason for the first rejection
        first_reason: String,
    },
}

/// Turns a raw payload into record batches.
pub trait Transformer: Send + Sync {
    /// Normalize `payload`.
    fn transform(
        &self,
        payload: &RawPayload,
        options: &TransformOptions,
    ) -> Result<TransformOutput, TransformError>;
}

/// Transformer for the racing results feed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultsTransformer;

impl ResultsTransformer {
    /// New transformer.
    pub fn new() -> Self {
        Self
    }
}

#[derive(Default)]
struct Collected {
    races: Vec<NormalizedRecord>,
    runners: Vec<NormalizedRecord>,
    enrichment: BTreeMap<&'static str, BTreeMap<String, NormalizedRecord>>,
    rejected: Vec<RejectedEntry>,
    accepted_entries: usize,
}

impl Collected {
    fn enrich(&mut self, table: &'static str, key: String, fields: Map<String, Value>) {
        self.enrichment.entry(table).or_default().insert(
            key.clone(),
            NormalizedRecord {
                key,
                record_date: None,
                fields,
            },
        );
    }
}

impl Transformer for ResultsTransformer {
    fn transform(
        &self,
        payload: &RawPayload,
        options: &TransformOptions,
    ) -> Result<TransformOutput, TransformError> {
        let mut collected = Collected::default();

        for (index, entry) in payload.entries.iter().enumerate() {
            let Some(race) = entry.as_object() else {
                collected.rejected.push(RejectedEntry {
                    index,
                    reason: "entry is not an object".to_string(),
                });
                continue;
            };
            let Some(race_id) = identity(race.get("race_id")) else {
                collected.rejected.push(RejectedEntry {
                    index,
                    reason: "missing race_id".to_string(),
                });
                continue;
            };

            collected.accepted_entries += 1;
            let race_date = date(race.get("date")).unwrap_or(payload.date);
            let runners = race
                .get("runners")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            collected.races.push(NormalizedRecord {
                key: race_id.clone(),
                record_date: Some(race_date),
                fields: race_fields(race, &race_id, race_date, runners.len()),
            });

            for (position, runner) in runners.iter().enumerate() {
                let horse_id = runner
                    .as_object()
                    .and_then(|r| identity(r.get("horse_id")).map(|id| (r, id)));
                let Some((runner, horse_id)) = horse_id else {
                    collected.rejected.push(RejectedEntry {
                        index,
                        reason: format!("race {race_id}: runner {position} missing horse_id"),
                    });
                    continue;
                };

                collected.runners.push(NormalizedRecord {
                    key: format!("{race_id}:{horse_id}"),
                    record_date: Some(race_date),
                    fields: runner_fields(runner, &race_id, &horse_id),
                });

                if !options.skip_enrichment {
                    collect_enrichment(&mut collected, runner, &horse_id);
                }
            }
        }

        if collected.accepted_entries == 0 && !collected.rejected.is_empty() {
            return Err(TransformError::NoValidEntries {
                rejected: collected.rejected.len(),
                first_reason: collected.rejected[0].reason.clone(),
            });
        }

        let mut batches = vec![
            RecordBatch {
                table: RACES_TABLE.to_string(),
                kind: RecordKind::Parent,
                records: collected.races,
            },
            RecordBatch {
                table: RUNNERS_TABLE.to_string(),
                kind: RecordKind::Child,
                records: collected.runners,
            },
        ];
        for table in ENRICHMENT_TABLES {
            if let Some(rows) = collected.enrichment.remove(table) {
                batches.push(RecordBatch {
                    table: table.to_string(),
                    kind: RecordKind::Enrichment,
                    records: rows.into_values().collect(),
                });
            }
        }
        batches.retain(|b| !b.is_empty());

        Ok(TransformOutput {
            batches,
            rejected: collected.rejected,
        })
    }
}

fn race_fields(
    race: &Map<String, Value>,
    race_id: &str,
    race_date: NaiveDate,
    runner_count: usize,
) -> Map<String, Value> {
    let mut f = Map::new();
    f.insert("race_id".into(), Value::from(race_id));
    f.insert("date".into(), Value::from(race_date.format("%Y-%m-%d").to_string()));
    f.insert("region".into(), text(race.get("region")));
    f.insert("course".into(), text(race.get("course")));
    f.insert("course_id".into(), text(race.get("course_id")));
    f.insert("off_time".into(), text(race.get("off")));
    f.insert("race_name".into(), text(race.get("race_name")));
    f.insert("race_type".into(), text(race.get("type")));
    f.insert("race_class".into(), text(race.get("class")));
    f.insert("pattern".into(), text(race.get("pattern")));
    f.insert("age_band".into(), text(race.get("age_band")));
    f.insert("rating_band".into(), text(race.get("rating_band")));
    f.insert("distance_f".into(), furlongs(race.get("dist_f")));
    f.insert("distance_m".into(), int(race.get("dist_m")));
    f.insert("going".into(), text(race.get("going")));
    f.insert("surface".into(), text(race.get("surface")));
    f.insert("runner_count".into(), Value::from(runner_count));
    f
}

fn runner_fields(runner: &Map<String, Value>, race_id: &str, horse_id: &str) -> Map<String, Value> {
    let mut f = Map::new();
    f.insert("race_id".into(), Value::from(race_id));
    f.insert("horse_id".into(), Value::from(horse_id));
    f.insert("horse".into(), text(runner.get("horse")));
    f.insert("number".into(), int(runner.get("number")));
    f.insert("draw".into(), int(runner.get("draw")));
    // Non-finishers carry codes such as "PU" or "F"
    f.insert("position".into(), text(runner.get("position")));
    f.insert("beaten_lengths".into(), float(runner.get("btn")));
    f.insert("age".into(), int(runner.get("age")));
    f.insert("weight_lbs".into(), int(runner.get("weight_lbs")));
    f.insert("headgear".into(), text(runner.get("headgear")));
    f.insert("starting_price".into(), text(runner.get("sp")));
    f.insert("starting_price_decimal".into(), float(runner.get("sp_dec")));
    f.insert("official_rating".into(), int(runner.get("or")));
    f.insert("rpr".into(), int(runner.get("rpr")));
    f.insert("prize".into(), float(runner.get("prize")));
    f.insert("time".into(), text(runner.get("time")));
    f.insert("jockey_id".into(), text(runner.get("jockey_id")));
    f.insert("trainer_id".into(), text(runner.get("trainer_id")));
    f.insert("owner_id".into(), text(runner.get("owner_id")));
    f.insert("comment".into(), text(runner.get("comment")));
    f
}

fn collect_enrichment(collected: &mut Collected, runner: &Map<String, Value>, horse_id: &str) {
    let mut horse = Map::new();
    horse.insert("horse_id".into(), Value::from(horse_id));
    horse.insert("name".into(), text(runner.get("horse")));
    horse.insert("sex".into(), text(runner.get("sex")));
    horse.insert("sire_id".into(), text(runner.get("sire_id")));
    horse.insert("dam_id".into(), text(runner.get("dam_id")));
    collected.enrich("horses", horse_id.to_string(), horse);

    for (table, id_field, name_field) in [
        ("jockeys", "jockey_id", "jockey"),
        ("trainers", "trainer_id", "trainer"),
        ("owners", "owner_id", "owner"),
    ] {
        if let Some(id) = identity(runner.get(id_field)) {
            let mut person = Map::new();
            person.insert(id_field.into(), Value::from(id.clone()));
            person.insert("name".into(), text(runner.get(name_field)));
            collected.enrich(table, id, person);
        }
    }

    let lineage = ["sire", "sire_id", "dam", "dam_id", "damsire", "damsire_id"];
    if lineage.iter().any(|field| !text(runner.get(*field)).is_null()) {
        let mut pedigree = Map::new();
        pedigree.insert("horse_id".into(), Value::from(horse_id));
        for field in lineage {
            pedigree.insert(field.into(), text(runner.get(field)));
        }
        collected.enrich("pedigrees", horse_id.to_string(), pedigree);
    }
}

/// Non-empty identifier, from a string or an integer.
fn identity(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date(value: Option<&Value>) -> Option<NaiveDate> {
    value?
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

fn text(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Value::from(s.trim()),
        Some(Value::Number(n)) => Value::from(n.to_string()),
        Some(Value::Bool(b)) => Value::from(b.to_string()),
        _ => Value::Null,
    }
}

fn int(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Number(n)) => n.as_i64().map_or(Value::Null, Value::from),
        Some(Value::String(s)) => s.trim().parse::<i64>().map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}

fn float(value: Option<&Value>) -> Value {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        // Prize money arrives as "£3,245"; odds as "4.5"
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches(['£', '€', '$'])
            .replace(',', "")
            .parse::<f64>()
            .ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .map_or(Value::Null, Value::from)
}

/// Distance in furlongs, from `8` or `"8.5f"`.
fn furlongs(value: Option<&Value>) -> Value {
    match value {
        Some(Value::String(s)) => float(Some(&Value::from(s.trim().trim_end_matches('f')))),
        other => float(other),
    }
}
