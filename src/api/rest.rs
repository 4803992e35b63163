//! Implements the `RemoteStore` trait against a PostgREST-style HTTP interface using `reqwest`.
//!
//! Tables live under `{remote_url}/rest/v1/{table}` and every request carries the project's public
//! `apikey` header and the user's bearer token. The realtime feed is a long-lived streaming `GET`
//! on `{remote_url}/realtime/v1/changes` that delivers one JSON change event per line.

use crate::api::{ChangeEvent, Notice, RemoteData, RemoteStore, Singleton, Subscription, Table};
use crate::config::Credentials;
use crate::error::Res;
use crate::model::MonthlyReport;
use crate::reconcile::{self, CalculatorDataRow, GlobalNotesRow, MonthlyReportRow};
use anyhow::{bail, Context};
use futures::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

/// How long to wait before reopening a realtime feed that dropped.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Conflict target of the `monthly_reports` upsert.
const REPORT_CONFLICT_COLUMNS: &str = "user_id,year,month";

/// Talks to the hosted database over HTTP.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    base: Url,
    api_key: String,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

impl RestStore {
    pub fn new(remote_url: &str, api_key: &str, credentials: Credentials) -> Res<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: base_url(remote_url)?,
            api_key: api_key.to_string(),
            credentials,
        })
    }

    /// Signs in with an email and password and returns the session credentials.
    pub async fn sign_in(
        remote_url: &str,
        api_key: &str,
        email: &str,
        password: &str,
    ) -> Res<Credentials> {
        let mut url = base_url(remote_url)?
            .join("auth/v1/token")
            .context("Unable to build the sign-in URL")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        debug!("Signing in as {email}");
        let response = reqwest::Client::new()
            .post(url)
            .header("apikey", api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .context("Failed to send the sign-in request")?;
        let token: TokenResponse = check(response, "sign in")
            .await?
            .json()
            .await
            .context("Unable to parse the sign-in response")?;
        Ok(Credentials::new(token.user.id, token.access_token))
    }

    fn table_url(&self, table: Table) -> Res<Url> {
        self.base
            .join(&format!("rest/v1/{table}"))
            .with_context(|| format!("Unable to build the URL for {table}"))
    }

    /// The URL of `table` filtered to the current user.
    fn user_url(&self, table: Table) -> Res<Url> {
        let mut url = self.table_url(table)?;
        url.query_pairs_mut()
            .append_pair("user_id", &eq(&self.credentials.user_id));
        Ok(url)
    }

    fn changes_url(&self) -> Res<Url> {
        let mut url = self
            .base
            .join("realtime/v1/changes")
            .context("Unable to build the realtime URL")?;
        url.query_pairs_mut()
            .append_pair("user_id", &eq(&self.credentials.user_id));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.credentials.access_token)
    }

    async fn get_rows<T: DeserializeOwned>(&self, url: Url, what: &str) -> Res<Vec<T>> {
        trace!("GET {url}");
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .with_context(|| format!("Failed to send request for {what}"))?;
        check(response, what)
            .await?
            .json()
            .await
            .with_context(|| format!("Unable to parse {what}"))
    }

    async fn fetch_singleton<T: DeserializeOwned>(&self, table: Table) -> Res<Option<T>> {
        let mut url = self.user_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("limit", "1");
        let rows: Vec<T> = self.get_rows(url, &table.to_string()).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_reports(&self) -> Res<Vec<MonthlyReportRow>> {
        let mut url = self.user_url(Table::MonthlyReports)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "year.desc,month.desc");
        self.get_rows(url, "monthly reports").await
    }

    /// Looks up the id of the current user's row in a singleton table.
    async fn singleton_id(&self, table: Table) -> Res<Option<serde_json::Value>> {
        let mut url = self.user_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "id")
            .append_pair("limit", "1");
        let rows: Vec<IdRow> = self.get_rows(url, &format!("{table} id")).await?;
        Ok(rows.into_iter().next().map(|r| r.id))
    }
}

#[async_trait::async_trait]
impl RemoteStore for RestStore {
    async fn fetch_rows(&self) -> Res<RemoteData> {
        debug!("Fetching all rows for user {}", self.credentials.user_id);
        let (reports, global_notes, calculator) = tokio::join!(
            self.fetch_reports(),
            self.fetch_singleton::<GlobalNotesRow>(Table::GlobalNotes),
            self.fetch_singleton::<CalculatorDataRow>(Table::CalculatorData),
        );
        let reports = reports?;
        debug!("Fetched {} monthly reports", reports.len());
        let mut unavailable = Vec::new();
        let global_notes =
            singleton_or_unavailable(global_notes, Table::GlobalNotes, &mut unavailable);
        let calculator =
            singleton_or_unavailable(calculator, Table::CalculatorData, &mut unavailable);
        Ok(RemoteData {
            reports,
            global_notes,
            calculator,
            unavailable,
        })
    }

    async fn upsert_report(&self, report: &MonthlyReport) -> Res<()> {
        let what = format!("upsert of report {}-{:02}", report.year, report.month);
        let mut url = self.table_url(Table::MonthlyReports)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", REPORT_CONFLICT_COLUMNS);
        let row = reconcile::row_from_report(&self.credentials.user_id, report);
        trace!("POST {url}");
        let response = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .with_context(|| format!("Failed to send {what}"))?;
        check(response, &what).await?;
        Ok(())
    }

    async fn upsert_singleton(&self, singleton: &Singleton) -> Res<()> {
        let table = singleton.table();
        let mut body = singleton.columns()?;
        let request = match self.singleton_id(table).await? {
            Some(id) => {
                let mut url = self.table_url(table)?;
                url.query_pairs_mut().append_pair("id", &eq(&id_text(&id)));
                trace!("PATCH {url}");
                self.request(Method::PATCH, url)
            }
            None => {
                if let Some(map) = body.as_object_mut() {
                    map.insert(
                        "user_id".to_string(),
                        serde_json::Value::String(self.credentials.user_id.clone()),
                    );
                }
                let url = self.table_url(table)?;
                trace!("POST {url}");
                self.request(Method::POST, url)
            }
        };
        let what = format!("write of {table}");
        let response = request
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send {what}"))?;
        check(response, &what).await?;
        Ok(())
    }

    /// The first connection is opened before this returns. When it cannot be opened the feed keeps
    /// retrying in the background, and the first successful connection starts with a
    /// `Notice::Resync`, as does every later reconnect.
    async fn subscribe(&self) -> Res<Option<Subscription>> {
        let url = self.changes_url()?;
        let (tx, rx) = Subscription::channel();
        let store = self.clone();
        debug!("Opening realtime feed for user {}", self.credentials.user_id);
        let first = match self.open_feed(url.clone()).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("Realtime feed is not available yet: {e:#}");
                None
            }
        };
        let task = tokio::spawn(async move {
            let mut open = first;
            while !tx.is_closed() {
                if let Some(response) = open.take() {
                    if let Err(e) = read_changes(response, &tx).await {
                        warn!("Realtime feed dropped: {e:#}");
                    }
                }
                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
                debug!("Reopening realtime feed");
                match store.open_feed(url.clone()).await {
                    Ok(response) => {
                        // Whatever changed while disconnected was not delivered.
                        if tx.send(Notice::Resync).await.is_err() {
                            break;
                        }
                        open = Some(response);
                    }
                    Err(e) => warn!("Unable to reopen the realtime feed: {e:#}"),
                }
            }
        });
        Ok(Some(Subscription::new(rx, task)))
    }
}

impl RestStore {
    async fn open_feed(&self, url: Url) -> Res<Response> {
        trace!("GET {url}");
        let response = self
            .request(Method::GET, url)
            .header("Accept", "application/x-ndjson")
            .send()
            .await
            .context("Failed to open the realtime feed")?;
        check(response, "realtime feed").await
    }
}

/// Reads newline-delimited change events from one connection until it ends or the receiver goes
/// away.
async fn read_changes(response: Response, tx: &mpsc::Sender<Notice>) -> Res<()> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error while reading the realtime feed")?;
        buffer.extend_from_slice(&chunk);
        for line in drain_lines(&mut buffer) {
            let Some(event) = parse_event(&line) else {
                continue;
            };
            if tx.send(Notice::Change(event)).await.is_err() {
                return Ok(());
            }
        }
    }
    bail!("The realtime feed was closed by the server")
}

/// Unwraps the result of a singleton fetch. A failure is logged and recorded in `unavailable`.
fn singleton_or_unavailable<T>(
    fetched: Res<Option<T>>,
    table: Table,
    unavailable: &mut Vec<Table>,
) -> Option<T> {
    match fetched {
        Ok(row) => row,
        Err(e) => {
            warn!("Unable to fetch {table}, keeping what is already known: {e:#}");
            unavailable.push(table);
            None
        }
    }
}

/// Removes every complete line from `buffer` and returns them, leaving any partial line behind.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line).trim().to_string();
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Parses one line of the realtime feed. Keep-alive lines and unparseable lines yield `None`.
fn parse_event(line: &str) -> Option<ChangeEvent> {
    match serde_json::from_str::<ChangeEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            if serde_json::from_str::<serde_json::Value>(line).is_err() {
                warn!("Skipping non-JSON line on the realtime feed: {e}");
            } else {
                trace!("Skipping non-event message on the realtime feed");
            }
            None
        }
    }
}

/// Returns the response if its status is a success, otherwise an error carrying the status and
/// body.
async fn check(response: Response, what: &str) -> Res<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read response body".to_string());
    bail!("The {what} failed with status {status}: {body}")
}

/// Parses the configured URL and makes sure it ends with `/` so that joins append to it.
fn base_url(remote_url: &str) -> Res<Url> {
    let trimmed = remote_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).with_context(|| format!("Invalid remote URL '{remote_url}'"))
}

/// A PostgREST equality filter.
fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn id_text(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
