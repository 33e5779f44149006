use crate::error::PipelineError;
use crate::filter::build_incremental_filter;
use catalog::{DetailStatus, SyncCatalog, SyncLog, SyncLogDetail, SyncMapping, SyncState};
use chrono::{DateTime, Utc};
use common::error::error_chain;
use common::sanitize::clean_for_json;
use common::{Record, RecordExt};
use components::{
    Extractor, Loader, QueryParams, RecordOutcome, ScopedExtractor, TransformedRecord, Transformer,
};
use log::{debug, error, info, warn};
use logging::RunContext;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Options for one [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: usize,
    /// Only pull records changed since the last successful sync.
    pub incremental: bool,
    pub query: QueryParams,
    pub fail_on_filter_error: bool,
    pub update_existing: bool,
}

impl RunOptions {
    pub fn new(batch_size: usize) -> Result<Self, PipelineError> {
        if batch_size == 0 {
            return Err(PipelineError::invalid_batch_size(batch_size));
        }
        Ok(Self {
            batch_size,
            incremental: true,
            query: QueryParams::default(),
            fail_on_filter_error: false,
            update_existing: true,
        })
    }

    pub fn full(mut self) -> Self {
        self.incremental = false;
        self
    }

    pub fn with_query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn fail_on_filter_error(mut self, fail: bool) -> Self {
        self.fail_on_filter_error = fail;
        self
    }

    pub fn update_existing(mut self, update: bool) -> Self {
        self.update_existing = update;
        self
    }
}

/// Counters and details of one batch, applied to the run's log afterwards.
#[derive(Default)]
struct BatchTally {
    succeeded: usize,
    failed: usize,
    created: usize,
    updated: usize,
    skipped: usize,
    details: Vec<SyncLogDetail>,
}

impl BatchTally {
    fn apply_to(&self, log: &mut SyncLog) {
        log.records_processed += self.succeeded + self.failed + self.skipped;
        log.records_succeeded += self.succeeded;
        log.records_failed += self.failed;
        log.records_created += self.created;
        log.records_updated += self.updated;
        log.records_skipped += self.skipped;
    }
}

/// One extractor, one transformer and one loader wired to a mapping.
pub struct Pipeline {
    mapping: SyncMapping,
    extractor: Box<dyn Extractor>,
    transformer: Box<dyn Transformer>,
    loader: Box<dyn Loader>,
    catalog: Arc<dyn SyncCatalog>,
    key_field: String,
}

impl Pipeline {
    pub fn new(
        mapping: SyncMapping,
        extractor: Box<dyn Extractor>,
        transformer: Box<dyn Transformer>,
        loader: Box<dyn Loader>,
        catalog: Arc<dyn SyncCatalog>,
    ) -> Self {
        let key_field = mapping
            .target_config
            .get("unique_field")
            .and_then(Value::as_str)
            .unwrap_or("legacy_id")
            .to_string();
        Self {
            mapping,
            extractor,
            transformer,
            loader,
            catalog,
            key_field,
        }
    }

    pub fn mapping(&self) -> &SyncMapping {
        &self.mapping
    }

    /// Run one sync cycle. Never fails: the returned log's status says how
    /// the run ended.
    pub fn run(&mut self, opts: &RunOptions, ctx: &RunContext) -> SyncLog {
        let span = ctx.span();
        let _entered = span.enter();

        let started = Utc::now();
        let mut log = SyncLog::started(
            self.mapping.id,
            !opts.incremental,
            sync_params(opts, &opts.query),
        );
        info!(
            "Starting {} sync of {}",
            if opts.incremental { "incremental" } else { "full" },
            self.mapping.name
        );

        if let Err(err) = self.catalog.create_log(&log) {
            error!("Could not record sync log: {err}");
            log.mark_failed(err.to_string(), Some(error_chain(&err)));
            return log;
        }

        let state = match self.catalog.try_begin_sync(self.mapping.id, started) {
            Ok(state) => state,
            Err(err) => {
                warn!("Not starting {}: {err}", self.mapping.name);
                log.mark_failed(err.to_string(), Some(error_chain(&err)));
                self.save_log(&log);
                return log;
            }
        };

        match self.execute(opts, ctx, &state, &mut log) {
            Ok(()) => {
                log.mark_completed(log.records_succeeded, log.records_failed);
                self.save_log(&log);
                self.finish(log.records_failed == 0, started, None);
                info!(
                    "Sync of {} finished with status {}: {} processed, {} created, {} updated, {} skipped, {} failed",
                    self.mapping.name,
                    log.status,
                    log.records_processed,
                    log.records_created,
                    log.records_updated,
                    log.records_skipped,
                    log.records_failed
                );
            }
            Err(err) => {
                error!("Sync of {} failed: {err}", self.mapping.name);
                log.mark_failed(err.to_string(), Some(error_chain(&err)));
                self.save_log(&log);
                self.finish(false, started, Some(err.to_string()));
            }
        }
        log
    }

    fn execute(
        &mut self,
        opts: &RunOptions,
        ctx: &RunContext,
        state: &SyncState,
        log: &mut SyncLog,
    ) -> Result<(), PipelineError> {
        let query = self.effective_query(opts, state)?;
        log.sync_params = sync_params(opts, &query);
        self.catalog.update_log(log)?;

        let records = {
            let mut source = ScopedExtractor::open(self.extractor.as_mut())?;
            source.extract(&query, opts.fail_on_filter_error)?
        };
        info!("Extracted {} records", records.len());

        let batches = records.len().div_ceil(opts.batch_size);
        for (n, batch) in records.chunks(opts.batch_size).enumerate() {
            let tally = self.process_batch(log.id, batch, opts, ctx);
            tally.apply_to(log);
            self.catalog.add_details(tally.details)?;
            self.catalog.update_log(log)?;
            info!(
                "Batch {}/{batches}: {} succeeded, {} skipped, {} failed",
                n + 1,
                tally.succeeded,
                tally.skipped,
                tally.failed
            );
        }
        Ok(())
    }

    fn effective_query(
        &self,
        opts: &RunOptions,
        state: &SyncState,
    ) -> Result<QueryParams, PipelineError> {
        let mut query = opts.query.clone();
        if !opts.incremental {
            return Ok(query);
        }
        let Some(incremental) = &self.mapping.mapping_config.incremental else {
            debug!("{} has no incremental filter format, extracting everything", self.mapping.name);
            return Ok(query);
        };
        match state.last_successful_sync_time {
            Some(watermark) => {
                let filter =
                    build_incremental_filter(&incremental.timestamp_filter_format, watermark)?;
                info!("Incremental filter since {watermark}: {filter}");
                query.merge_filter(filter);
            }
            None => info!("No previous successful sync, extracting everything"),
        }
        Ok(query)
    }

    fn process_batch(
        &self,
        log_id: Uuid,
        batch: &[Record],
        opts: &RunOptions,
        ctx: &RunContext,
    ) -> BatchTally {
        let mut tally = BatchTally::default();

        let transformed = match self.transformer.transform(batch) {
            Ok(out) if out.is_empty() => {
                warn!("Transformation produced no data for a batch of {}", batch.len());
                self.fail_batch(&mut tally, log_id, batch, "transformation produced no data");
                return tally;
            }
            Ok(out) => out,
            Err(err) => {
                error!("Batch transformation failed: {err}");
                let message = format!("batch transformation failed: {err}");
                self.fail_batch(&mut tally, log_id, batch, &message);
                return tally;
            }
        };

        let mut unanswered: Vec<&Record> = batch.iter().collect();
        for rec in &transformed {
            if let Some(pos) = unanswered.iter().position(|source| **source == rec.source) {
                unanswered.remove(pos);
            }
        }
        if !unanswered.is_empty() {
            warn!(
                "Transformer returned no output for {} of {} records",
                unanswered.len(),
                batch.len()
            );
            for source in unanswered {
                self.fail_record(&mut tally, log_id, source, "transformer returned no output for record");
            }
        }

        let (ready, rejected): (Vec<TransformedRecord>, Vec<TransformedRecord>) =
            transformed.into_iter().partition(TransformedRecord::is_ok);

        for rec in rejected {
            let message = rec.errors.join("; ");
            if ctx.is_verbose() {
                debug!("Record rejected by transformer: {message}");
            }
            let mut detail =
                SyncLogDetail::new(log_id, self.record_id(&rec.source, None), DetailStatus::Failed);
            detail.source_data = clean_for_json(&rec.source);
            detail.error_message = Some(message);
            tally.failed += 1;
            tally.details.push(detail);
        }

        let targets: Vec<Record> = ready.iter().filter_map(|r| r.target.clone()).collect();
        let result = self.loader.load(&targets, opts.update_existing);
        if result.outcomes.len() != targets.len() {
            warn!(
                "Loader reported {} outcomes for {} records",
                result.outcomes.len(),
                targets.len()
            );
        }

        for (i, rec) in ready.iter().enumerate() {
            let outcome = result.outcomes.get(i).cloned().unwrap_or(RecordOutcome::Failed {
                stage: components::LoadStage::Load,
                error: "loader reported no outcome for record".to_string(),
            });
            let status = match &outcome {
                RecordOutcome::Created { .. } => {
                    tally.created += 1;
                    tally.succeeded += 1;
                    DetailStatus::Success
                }
                RecordOutcome::Updated { .. } => {
                    tally.updated += 1;
                    tally.succeeded += 1;
                    DetailStatus::Success
                }
                RecordOutcome::Unchanged { .. } => {
                    tally.succeeded += 1;
                    DetailStatus::Success
                }
                RecordOutcome::Skipped { .. } => {
                    tally.skipped += 1;
                    DetailStatus::Skipped
                }
                RecordOutcome::Failed { .. } => {
                    tally.failed += 1;
                    DetailStatus::Failed
                }
            };
            if ctx.is_verbose() {
                debug!("Record {:?}: {:?}", self.record_id(&rec.source, rec.target.as_ref()), outcome);
            }

            let mut detail = SyncLogDetail::new(
                log_id,
                self.record_id(&rec.source, rec.target.as_ref()),
                status,
            );
            detail.source_data = clean_for_json(&rec.source);
            detail.transformed_data = clean_for_json(&rec.target);
            detail.result_data = clean_for_json(&outcome);
            detail.error_message = match &outcome {
                RecordOutcome::Failed { stage, error } => Some(format!("{stage}: {error}")),
                RecordOutcome::Skipped { reason } => Some(reason.clone()),
                _ => None,
            };
            tally.details.push(detail);
        }
        tally
    }

    fn fail_batch(
        &self,
        tally: &mut BatchTally,
        log_id: Uuid,
        batch: &[Record],
        message: &str,
    ) {
        for source in batch {
            self.fail_record(tally, log_id, source, message);
        }
    }

    fn fail_record(&self, tally: &mut BatchTally, log_id: Uuid, source: &Record, message: &str) {
        let mut detail =
            SyncLogDetail::new(log_id, self.record_id(source, None), DetailStatus::Failed);
        detail.source_data = clean_for_json(source);
        detail.error_message = Some(message.to_string());
        tally.failed += 1;
        tally.details.push(detail);
    }

    /// Target unique field when the record got that far, else the source key.
    fn record_id(&self, source: &Record, target: Option<&Record>) -> Option<String> {
        target
            .and_then(|t| t.key_string(&self.key_field))
            .or_else(|| self.source_key().and_then(|k| source.key_string(k)))
    }

    fn source_key(&self) -> Option<&str> {
        self.mapping.source_config.get("key_field").and_then(Value::as_str)
    }

    fn save_log(&self, log: &SyncLog) {
        if let Err(err) = self.catalog.update_log(log) {
            error!("Could not update sync log {}: {err}", log.id);
        }
    }

    fn finish(&self, success: bool, at: DateTime<Utc>, error: Option<String>) {
        if let Err(err) = self
            .catalog
            .update_sync_completed(self.mapping.id, success, at, error)
        {
            error!("Could not close sync state of {}: {err}", self.mapping.name);
        }
    }
}

fn sync_params(opts: &RunOptions, query: &QueryParams) -> Value {
    json!({
        "incremental": opts.incremental,
        "batch_size": opts.batch_size,
        "fail_on_filter_error": opts.fail_on_filter_error,
        "update_existing": opts.update_existing,
        "query": clean_for_json(query),
    })
}
