use super::{validate_config, ExtractError, Extractor, QueryParams};
use common::Record;
use log::{info, warn};
use serde_json::Value;
use shared_clients::{FetchParams, TableFetch};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

/// Reads one table of the legacy ERP through a [`TableFetch`] client.
///
/// Config: `table` (required), `key_field`, `page_size`.
pub struct LegacyApiExtractor<C: TableFetch> {
    client: Arc<C>,
    table: String,
    key_field: Option<String>,
    runtime: Option<Runtime>,
    connected: bool,
}

impl<C: TableFetch> LegacyApiExtractor<C> {
    pub const REQUIRED_FIELDS: &'static [&'static str] = &["table"];

    pub fn from_config(client: Arc<C>, config: &Value) -> Result<Self, ExtractError> {
        validate_config("LegacyApiExtractor", config, Self::REQUIRED_FIELDS)?;
        let table = config
            .get("table")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ExtractError::failed_to_extract("LegacyApiExtractor: 'table' must be a string")
            })?
            .to_string();
        let key_field = config
            .get("key_field")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            client,
            table,
            key_field,
            runtime: None,
            connected: false,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_field(&self) -> Option<&str> {
        self.key_field.as_deref()
    }

    fn runtime(&mut self) -> Result<&Runtime, ExtractError> {
        if self.runtime.is_none() {
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| ExtractError::FailedToConnect {
                    context: common::diag!("cannot start I/O runtime: {}", e),
                    source: Some(Box::new(e)),
                })?;
            self.runtime = Some(rt);
        }
        self.runtime
            .as_ref()
            .ok_or_else(|| ExtractError::failed_to_connect("I/O runtime unavailable"))
    }

    fn fetch_params(query: &QueryParams) -> FetchParams {
        FetchParams {
            filter: query.filter.clone(),
            top: query.top,
            extra: query
                .params
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect(),
        }
    }
}

impl<C: TableFetch + 'static> Extractor for LegacyApiExtractor<C> {
    fn required_config_fields(&self) -> &'static [&'static str] {
        Self::REQUIRED_FIELDS
    }

    fn connect(&mut self) -> Result<(), ExtractError> {
        if self.connected {
            return Ok(());
        }
        let client = Arc::clone(&self.client);
        self.runtime()?.block_on(client.login())?;
        self.connected = true;
        info!("Connected to legacy table '{}'", self.table);
        Ok(())
    }

    fn extract(
        &mut self,
        query: &QueryParams,
        fail_on_filter_error: bool,
    ) -> Result<Vec<Record>, ExtractError> {
        if !self.connected {
            return Err(ExtractError::failed_to_extract("extract called before connect"));
        }
        let client = Arc::clone(&self.client);
        let table = self.table.clone();
        let params = Self::fetch_params(query);
        let rt = self.runtime()?;

        match rt.block_on(client.fetch_table(&table, &params)) {
            Ok(rows) => Ok(rows),
            Err(err) if err.is_filter_rejection() && !fail_on_filter_error => {
                warn!(
                    "Filter {:?} rejected by '{}', retrying without filter: {}",
                    params.filter, table, err
                );
                Ok(rt.block_on(client.fetch_table(&table, &params.without_filter()))?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        let client = Arc::clone(&self.client);
        if let Some(rt) = &self.runtime {
            if let Err(err) = rt.block_on(client.logout()) {
                warn!("Logout from legacy API failed: {err}");
            }
        }
    }
}
