//! Client for the legacy ERP's table API.
//!
//! The API is a thin REST wrapper around the old database: a cookie-backed
//! session is opened with `/login`, tables are read page by page from
//! `/tables/{table}/records` using `$top`/`$skip`, and an optional OData-like
//! `$filter` narrows the result. The server only allows a handful of
//! concurrent sessions and answers `402` once that limit is hit; the client
//! then drops its session, logs in again and retries a bounded number of
//! times.

use async_trait::async_trait;
use common::config::SourceConnection;
use common::error::diagnostics::DiagnosticMessage;
use common::Record;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connectivity error: {context}")]
    FailedToConnect { context: DiagnosticMessage },
    #[error("login failed: {context}")]
    LoginFailed { context: DiagnosticMessage },
    #[error("session limit reached: {context}")]
    SessionLimit { context: DiagnosticMessage },
    #[error("filter rejected: {context}")]
    FilterRejected { context: DiagnosticMessage },
    #[error("invalid response body: {context}")]
    Decode { context: DiagnosticMessage },
    #[error("unexpected response: {context}")]
    UnexpectedError { context: DiagnosticMessage },
}

impl ClientError {
    #[track_caller]
    pub fn failed_to_connect(message: impl Into<String>) -> Self {
        Self::FailedToConnect {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn login_failed(message: impl Into<String>) -> Self {
        Self::LoginFailed {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn session_limit(message: impl Into<String>) -> Self {
        Self::SessionLimit {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn filter_rejected(message: impl Into<String>) -> Self {
        Self::FilterRejected {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedError {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    pub fn is_filter_rejection(&self) -> bool {
        matches!(self, ClientError::FilterRejected { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    #[track_caller]
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ClientError::failed_to_connect(err.to_string())
        } else if err.is_decode() {
            ClientError::decode(err.to_string())
        } else {
            ClientError::unexpected(format!(
                "Unexpected error sending legacy API request: {}",
                err
            ))
        }
    }
}

/// Query options for one table read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchParams {
    /// Source-side filter expression, sent quoted as `$filter`.
    pub filter: Option<String>,
    /// Upper bound on the number of records returned across all pages.
    pub top: Option<usize>,
    /// Extra query pairs passed through untouched.
    pub extra: Vec<(String, String)>,
}

impl FetchParams {
    pub fn without_filter(&self) -> Self {
        Self {
            filter: None,
            ..self.clone()
        }
    }
}

/// Anything that can read a legacy table into records.
#[async_trait]
pub trait TableFetch: Send + Sync {
    async fn login(&self) -> Result<(), ClientError>;
    async fn logout(&self) -> Result<(), ClientError>;
    async fn fetch_table(
        &self,
        table: &str,
        params: &FetchParams,
    ) -> Result<Vec<Record>, ClientError>;
}

#[derive(Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug)]
pub struct LegacyApiClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    page_size: usize,
    max_login_retries: u32,
    logged_in: AtomicBool,
}

impl LegacyApiClient {
    pub fn new(conn: &SourceConnection) -> Result<Self, ClientError> {
        let mut builder = Client::builder().cookie_store(true);
        if let Some(secs) = conn.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            http: builder.build()?,
            base_url: conn.base_url.trim_end_matches('/').to_string(),
            username: conn.username.clone().unwrap_or_default(),
            password: conn.password.clone().unwrap_or_default(),
            page_size: conn.page_size.max(1),
            max_login_retries: conn.max_login_retries,
            logged_in: AtomicBool::new(false),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    async fn ensure_session(&self) -> Result<(), ClientError> {
        if !self.logged_in.load(Ordering::SeqCst) {
            self.login().await?;
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        table: &str,
        params: &FetchParams,
        skip: usize,
        top: usize,
    ) -> Result<Vec<Record>, ClientError> {
        let url = format!("{}/tables/{}/records", self.base_url, table);
        let mut query: Vec<(String, String)> = vec![
            ("$top".to_string(), top.to_string()),
            ("$skip".to_string(), skip.to_string()),
        ];
        if let Some(filter) = &params.filter {
            query.push(("$filter".to_string(), format!("'{}'", filter)));
        }
        query.extend(params.extra.iter().cloned());

        let mut relogins = 0;
        loop {
            self.ensure_session().await?;
            let resp = self.http.get(&url).query(&query).send().await?;
            let status = resp.status();

            if status.is_success() {
                let body: Value = resp.json().await?;
                return records_from_body(body);
            }

            if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::UNAUTHORIZED {
                if relogins >= self.max_login_retries {
                    return Err(ClientError::session_limit(format!(
                        "{} still answered {} after {} re-login attempt(s)",
                        table, status, relogins
                    )));
                }
                relogins += 1;
                warn!(
                    "legacy API answered {} for {}, re-login attempt {}/{}",
                    status, table, relogins, self.max_login_retries
                );
                if let Err(e) = self.logout().await {
                    debug!("ignoring logout failure before re-login: {e}");
                }
                self.logged_in.store(false, Ordering::SeqCst);
                continue;
            }

            let body = resp.text().await.unwrap_or_default();
            if params.filter.is_some()
                && (status == StatusCode::BAD_REQUEST || status.is_server_error())
            {
                return Err(ClientError::filter_rejected(format!(
                    "{} rejected filter {:?} with {}: {}",
                    table, params.filter, status, body
                )));
            }
            return Err(ClientError::unexpected(format!(
                "{} answered {}: {}",
                table, status, body
            )));
        }
    }
}

fn records_from_body(body: Value) -> Result<Vec<Record>, ClientError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Array(rows)) => rows,
            _ => return Err(ClientError::decode("expected an array or a `data` array")),
        },
        other => {
            return Err(ClientError::decode(format!(
                "expected an array of records, got {}",
                other
            )))
        }
    };
    rows.into_iter()
        .map(|row| match row {
            Value::Object(map) => Ok(map),
            other => Err(ClientError::decode(format!("record is not an object: {other}"))),
        })
        .collect()
}

#[async_trait]
impl TableFetch for LegacyApiClient {
    async fn login(&self) -> Result<(), ClientError> {
        let url = format!("{}/login", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&LoginBody {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::login_failed(format!(
                "{} answered {}",
                url,
                resp.status()
            )));
        }
        self.logged_in.store(true, Ordering::SeqCst);
        debug!("opened legacy API session at {}", self.base_url);
        Ok(())
    }

    async fn logout(&self) -> Result<(), ClientError> {
        if !self.logged_in.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let url = format!("{}/logout", self.base_url);
        let resp = self.http.post(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::unexpected(format!(
                "{} answered {}",
                url,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn fetch_table(
        &self,
        table: &str,
        params: &FetchParams,
    ) -> Result<Vec<Record>, ClientError> {
        let mut records = Vec::new();
        let mut skip = 0;
        loop {
            let top = match params.top {
                Some(limit) if limit <= records.len() => break,
                Some(limit) => self.page_size.min(limit - records.len()),
                None => self.page_size,
            };
            let page = self.fetch_page(table, params, skip, top).await?;
            let fetched = page.len();
            records.extend(page);
            skip += fetched;
            if fetched < top {
                break;
            }
        }
        info!("fetched {} record(s) from {}", records.len(), table);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, page_size: usize) -> LegacyApiClient {
        LegacyApiClient::new(&SourceConnection {
            base_url: server.uri(),
            username: Some("sync".into()),
            password: Some("secret".into()),
            page_size,
            max_login_retries: 2,
            timeout_secs: Some(5),
        })
        .unwrap()
    }

    async fn mount_session(server: &MockServer, expected_logins: u64) {
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(expected_logins)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_pages_until_short_page() -> Result<(), ClientError> {
        let server = MockServer::start().await;
        mount_session(&server, 1).await;
        for (skip, body) in [
            ("0", json!([{"id": 1}, {"id": 2}])),
            ("2", json!({"data": [{"id": 3}, {"id": 4}]})),
            ("4", json!([{"id": 5}])),
        ] {
            Mock::given(method("GET"))
                .and(path("/tables/Kunden/records"))
                .and(query_param("$top", "2"))
                .and(query_param("$skip", skip))
                .respond_with(ResponseTemplate::new(200).set_body_json(body))
                .expect(1)
                .mount(&server)
                .await;
        }

        let rows = client(&server, 2)
            .fetch_table("Kunden", &FetchParams::default())
            .await?;
        let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_top_limits_total_records() -> Result<(), ClientError> {
        let server = MockServer::start().await;
        mount_session(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/tables/Kunden/records"))
            .and(query_param("$top", "3"))
            .and(query_param("$skip", "0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}, {"id": 3}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let params = FetchParams {
            top: Some(3),
            ..FetchParams::default()
        };
        let rows = client(&server, 10).fetch_table("Kunden", &params).await?;
        assert_eq!(rows.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_limit_triggers_relogin() -> Result<(), ClientError> {
        let server = MockServer::start().await;
        mount_session(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/tables/Artikel/records"))
            .respond_with(ResponseTemplate::new(402))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tables/Artikel/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 7}])))
            .mount(&server)
            .await;

        let rows = client(&server, 100)
            .fetch_table("Artikel", &FetchParams::default())
            .await?;
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_limit_gives_up_after_retries() {
        let server = MockServer::start().await;
        mount_session(&server, 3).await;
        Mock::given(method("GET"))
            .and(path("/tables/Artikel/records"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;

        let res = client(&server, 100)
            .fetch_table("Artikel", &FetchParams::default())
            .await;
        assert!(matches!(res, Err(ClientError::SessionLimit { .. })));
    }

    #[tokio::test]
    async fn test_filter_is_quoted_and_rejection_is_typed() {
        let server = MockServer::start().await;
        mount_session(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/tables/Artikel/records"))
            .and(query_param("$filter", "'modified >= 2025-03-09'"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad filter"))
            .expect(1)
            .mount(&server)
            .await;

        let params = FetchParams {
            filter: Some("modified >= 2025-03-09".into()),
            ..FetchParams::default()
        };
        let err = client(&server, 100)
            .fetch_table("Artikel", &params)
            .await
            .unwrap_err();
        assert!(err.is_filter_rejection());
    }
}
