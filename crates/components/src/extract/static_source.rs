use super::{validate_config, ExtractError, Extractor, QueryParams};
use common::Record;
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared view of what a [`StaticExtractor`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct ExtractorProbe {
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<QueryParams>>>,
}

impl ExtractorProbe {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every query passed to `extract`, in call order.
    pub fn queries(&self) -> Vec<QueryParams> {
        self.queries.lock().clone()
    }
}

/// Serves a fixed set of records, either given directly or read from a JSON
/// export (`source_config.path`, an array of objects).
///
/// The source has no filter language of its own. With `supports_filter:
/// false` any filter is treated as rejected.
#[derive(Debug)]
pub struct StaticExtractor {
    records: Vec<Record>,
    supports_filter: bool,
    fail_on_connect: bool,
    connected: bool,
    probe: ExtractorProbe,
}

impl StaticExtractor {
    pub const REQUIRED_FIELDS: &'static [&'static str] = &["path"];

    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            supports_filter: true,
            fail_on_connect: false,
            connected: false,
            probe: ExtractorProbe::default(),
        }
    }

    pub fn from_config(config: &Value) -> Result<Self, ExtractError> {
        validate_config("StaticExtractor", config, Self::REQUIRED_FIELDS)?;
        let path = config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractError::failed_to_extract("StaticExtractor: 'path' must be a string"))?;
        let mut extractor = Self::from_json_file(path)?;
        if let Some(flag) = config.get("supports_filter").and_then(Value::as_bool) {
            extractor.supports_filter = flag;
        }
        Ok(extractor)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let body = std::fs::read_to_string(path).map_err(|e| ExtractError::FailedToConnect {
            context: common::diag!("cannot read {}: {}", path.display(), e),
            source: Some(Box::new(e)),
        })?;
        let rows: Vec<Record> =
            serde_json::from_str(&body).map_err(|e| ExtractError::FailedToExtract {
                context: common::diag!("{} is not a JSON array of objects", path.display()),
                source: Some(Box::new(e)),
            })?;
        Ok(Self::new(rows))
    }

    pub fn without_filter_support(mut self) -> Self {
        self.supports_filter = false;
        self
    }

    pub fn fail_on_connect(mut self) -> Self {
        self.fail_on_connect = true;
        self
    }

    pub fn probe(&self) -> ExtractorProbe {
        self.probe.clone()
    }
}

impl Extractor for StaticExtractor {
    fn required_config_fields(&self) -> &'static [&'static str] {
        Self::REQUIRED_FIELDS
    }

    fn connect(&mut self) -> Result<(), ExtractError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_connect {
            return Err(ExtractError::failed_to_connect("static source is unavailable"));
        }
        self.connected = true;
        Ok(())
    }

    fn extract(
        &mut self,
        query: &QueryParams,
        fail_on_filter_error: bool,
    ) -> Result<Vec<Record>, ExtractError> {
        self.probe.queries.lock().push(query.clone());
        if !self.connected {
            return Err(ExtractError::failed_to_extract("extract called before connect"));
        }

        if let Some(filter) = query.filter.as_deref().filter(|_| !self.supports_filter) {
            if fail_on_filter_error {
                return Err(ExtractError::filter_rejected(format!(
                    "static source cannot apply filter '{filter}'"
                )));
            }
            warn!("Filter '{filter}' not supported by static source, returning all records");
        }

        let mut rows = self.records.clone();
        if let Some(top) = query.top {
            rows.truncate(top);
        }
        debug!("Static source returned {} records", rows.len());
        Ok(rows)
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }
}
