//! Fetch-transform-load pipeline for one work unit
//!
//! The three stages are separate methods returning typed results, so a failure
//! is attributed to its stage without inspecting messages. [`Pipeline::process`]
//! never returns an error: a failed unit is reported in its [`UnitResult`] and
//! the run loop moves on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

use super::transform::{RejectedEntry, TransformError, TransformOptions, TransformOutput, Transformer};
use crate::fetcher::{FetchClient, FetchError, FetchOutcome};
use crate::store::{StoreClient, StoreError, UpsertCounts};
use crate::{RawPayload, RecordKind, UnitStatus, WorkUnit};
use chrono::NaiveDate;

/// Pipeline stage, as recorded in the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Provider fetch (rate gate, retries, pagination)
    Fetch,
    /// Normalization of raw entries
    Transform,
    /// Store upserts
    Load,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Load => "load",
        };
        write!(f, "{name}")
    }
}

/// Unit failure, tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Fetch client gave up
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Payload unusable
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    /// Store rejected a batch
    #[error("load into {table} failed: {source}")]
    Load {
        /// Table being written
        table: String,
        /// Store failure
        #[source]
        source: StoreError,
    },
}

impl PipelineError {
    /// Stage that failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Fetch(_) => PipelineStage::Fetch,
            Self::Transform(_) => PipelineStage::Transform,
            Self::Load { .. } => PipelineStage::Load,
        }
    }
}

/// Outcome of processing one unit.
#[derive(Debug)]
pub struct UnitResult {
    /// Unit date
    pub date: NaiveDate,
    /// Final lifecycle state
    pub status: UnitStatus,
    /// Whether the fetch stage completed
    pub fetched: bool,
    /// Whether the provider returned any entries
    pub has_data: bool,
    /// Raw entries received
    pub records_fetched: usize,
    /// Records inserted or updated
    pub records_loaded: u64,
    /// Inserted/updated split
    pub upserts: UpsertCounts,
    /// Parent records loaded
    pub parents: u64,
    /// Child records loaded
    pub children: u64,
    /// Enrichment records loaded
    pub enrichment: u64,
    /// Entries dropped for missing identity
    pub rejected: Vec<RejectedEntry>,
    /// Failure, if the unit failed
    pub error: Option<PipelineError>,
}

impl UnitResult {
    fn pending(date: NaiveDate) -> Self {
        Self {
            date,
            status: UnitStatus::Pending,
            fetched: false,
            has_data: false,
            records_fetched: 0,
            records_loaded: 0,
            upserts: UpsertCounts::default(),
            parents: 0,
            children: 0,
            enrichment: 0,
            rejected: Vec::new(),
            error: None,
        }
    }

    /// Units attempted by this result (always one).
    pub fn dates_attempted(&self) -> u64 {
        1
    }

    /// Whether the unit succeeded.
    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }

    fn advance(&mut self, next: UnitStatus) {
        match self.status.advance(next) {
            Ok(status) => self.status = status,
            Err(e) => warn!(date = %self.date, error = %e, "Ignoring unit transition"),
        }
    }

    fn fail(&mut self, error: PipelineError) {
        self.advance(UnitStatus::Failed);
        self.error = Some(error);
    }

    fn add_loaded(&mut self, kind: RecordKind, counts: UpsertCounts) {
        self.upserts += counts;
        self.records_loaded += counts.total();
        match kind {
            RecordKind::Parent => self.parents += counts.total(),
            RecordKind::Child => self.children += counts.total(),
            RecordKind::Enrichment => self.enrichment += counts.total(),
        }
    }
}

/// Fetch client, transformer and store client for one run.
pub struct Pipeline {
    fetch: FetchClient,
    transformer: Arc<dyn Transformer>,
    store: Arc<dyn StoreClient>,
    options: TransformOptions,
}

impl Pipeline {
    /// Assemble a pipeline.
    pub fn new(
        fetch: FetchClient,
        transformer: Arc<dyn Transformer>,
        store: Arc<dyn StoreClient>,
        options: TransformOptions,
    ) -> Self {
        Self {
            fetch,
            transformer,
            store,
            options,
        }
    }

    /// Fetch client in use.
    pub fn fetch_client(&self) -> &FetchClient {
        &self.fetch
    }

    /// Replace the transformer.
    pub fn set_transformer(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformer = transformer;
    }

    /// Stage 1: fetch every page of the unit.
    pub async fn fetch_stage(&self, unit: &WorkUnit) -> Result<FetchOutcome, PipelineError> {
        Ok(self.fetch.fetch(unit).await?)
    }

    /// Stage 2: normalize the raw payload.
    pub fn transform_stage(&self, payload: &RawPayload) -> Result<TransformOutput, PipelineError> {
        Ok(self.transformer.transform(payload, &self.options)?)
    }

    /// Stage 3: upsert each batch in order (parents before children).
    ///
    /// Stops at the first failing batch; counts for batches already written
    /// are kept in `result`.
    async fn load_stage(
        &self,
        output: &TransformOutput,
        result: &mut UnitResult,
    ) -> Result<(), PipelineError> {
        for batch in &output.batches {
            let counts = self
                .store
                .upsert_batch(&batch.table, &batch.records)
                .await
                .map_err(|source| PipelineError::Load {
                    table: batch.table.clone(),
                    source,
                })?;
            debug!(
                table = %batch.table,
                inserted = counts.inserted,
                updated = counts.updated,
                "Loaded batch"
            );
            result.add_loaded(batch.kind, counts);
        }
        Ok(())
    }

    /// Run all stages for `unit`. Failures are captured in the result.
    pub async fn process(&self, unit: &WorkUnit) -> UnitResult {
        let span = info_span!("process_unit", date = %unit.date());
        self.process_inner(unit).instrument(span).await
    }

    async fn process_inner(&self, unit: &WorkUnit) -> UnitResult {
        let mut result = UnitResult::pending(unit.date());

        let payload = match self.fetch_stage(unit).await {
            Ok(FetchOutcome::NoData) => {
                result.fetched = true;
                result.advance(UnitStatus::Fetched);
                result.advance(UnitStatus::Succeeded);
                debug!("No records for date");
                return result;
            }
            Ok(FetchOutcome::Data(payload)) => payload,
            Err(e) => {
                result.fail(e);
                return result;
            }
        };

        result.fetched = true;
        result.has_data = true;
        result.records_fetched = payload.entries.len();
        result.advance(UnitStatus::Fetched);

        let output = match self.transform_stage(&payload) {
            Ok(output) => output,
            Err(e) => {
                result.fail(e);
                return result;
            }
        };
        if !output.rejected.is_empty() {
            warn!(
                rejected = output.rejected.len(),
                first = %output.rejected[0].reason,
                "Rejected entries without identity"
            );
        }
        result.rejected = output.rejected.clone();

        match self.load_stage(&output, &mut result).await {
            Ok(()) => result.advance(UnitStatus::Succeeded),
            Err(e) => result.fail(e),
        }

        debug!(
            fetched = result.records_fetched,
            loaded = result.records_loaded,
            status = ?result.status,
            "Unit processed"
        );
        result
    }
}
