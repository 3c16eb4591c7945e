//! Notion database backend
//!
//! Maps [`TestProperties`] onto the columns of a Notion "tests" database and
//! talks to the public REST API with `reqwest`. Every request is retried
//! once after a fixed delay; anything beyond that is the caller's problem.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::schema::{
    icon_from_url, icon_url, replace_counter, HeaderUpdate, KnownRecord, PersonRef, RecordId,
    RecordPatch, StoreHeader, TestProperties, TestStatus,
};
use crate::storage_traits::{StorageResult, TestStore};

const DEFAULT_API_BASE: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";

/// Column names and types the tests database must carry.
pub const REQUIRED_PROPERTIES: [(&str, &str); 9] = [
    (columns::NAME, "title"),
    (columns::PROJECT, "select"),
    (columns::TAG, "select"),
    (columns::FILE, "select"),
    (columns::ASSIGNED, "people"),
    (columns::IMPORTANCE, "select"),
    (columns::STATUS, "status"),
    (columns::ARCHIVED, "checkbox"),
    (columns::ACTIVE, "checkbox"),
];

pub mod columns {
    pub const NAME: &str = "Name";
    pub const PROJECT: &str = "Project";
    pub const TAG: &str = "Tag";
    pub const FILE: &str = "File";
    pub const ASSIGNED: &str = "Assigned";
    pub const IMPORTANCE: &str = "Importance";
    pub const STATUS: &str = "Status";
    pub const ARCHIVED: &str = "Archived";
    pub const ACTIVE: &str = "Active";
}

/// Notion connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    /// Integration token
    pub token: String,
    /// Id of the tests database
    pub database_id: String,
    /// API root, overridable for tests and proxies
    pub api_base: String,
    /// Pause before the single retry of a failed request
    pub retry_delay: Duration,
}

impl NotionConfig {
    pub fn new(token: &str, database_id: &str) -> Self {
        NotionConfig {
            token: token.to_string(),
            database_id: database_id.replace('-', ""),
            api_base: DEFAULT_API_BASE.to_string(),
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Read `NOTION_KEY` and `NOTION_TESTS_DB`. Returns `None` if either is unset.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("NOTION_KEY").ok().filter(|v| !v.is_empty())?;
        let db = std::env::var("NOTION_TESTS_DB")
            .ok()
            .filter(|v| !v.is_empty())?;
        Some(Self::new(&token, &db))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }
}

/// Test store backed by a Notion database
pub struct NotionTestStore {
    config: NotionConfig,
    http: reqwest::Client,
}

impl NotionTestStore {
    pub fn new(config: NotionConfig) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("testsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(NotionTestStore { config, http })
    }

    /// Create the client and verify the database schema before any record
    /// is read. A mistyped column would otherwise decode as a default value
    /// and make every record look changed.
    pub async fn connect(config: NotionConfig) -> StorageResult<Self> {
        let store = Self::new(config)?;
        store.check_schema().await?;
        Ok(store)
    }

    /// Verify the database carries every column in [`REQUIRED_PROPERTIES`].
    ///
    /// All problems are reported at once in a single `StorageError::Schema`.
    pub async fn check_schema(&self) -> StorageResult<()> {
        info!(database = %self.config.database_id, "Checking database schema");
        let url = self.database_url();
        let database = self.send(|http| http.get(&url)).await?;
        let issues = schema_issues(&database);
        if issues.is_empty() {
            info!("Schema is valid");
            Ok(())
        } else {
            Err(StorageError::Schema { issues })
        }
    }

    fn database_url(&self) -> String {
        format!("{}/v1/databases/{}", self.config.api_base, self.config.database_id)
    }

    async fn query_filtered(&self, filter: Value) -> StorageResult<Vec<KnownRecord>> {
        let url = format!("{}/query", self.database_url());
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({ "filter": filter });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            let page = self.send(|http| http.post(&url).json(&body)).await?;

            for row in page["results"].as_array().into_iter().flatten() {
                records.push(record_from_page(row)?);
            }

            cursor = match (page["has_more"].as_bool(), page["next_cursor"].as_str()) {
                (Some(true), Some(next)) => Some(next.to_string()),
                _ => break,
            };
        }

        debug!(count = records.len(), "Queried Notion records");
        Ok(records)
    }

    async fn send<F>(&self, build: F) -> StorageResult<Value>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        match self.send_once(&build).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "Notion API error, retrying");
                tokio::time::sleep(self.config.retry_delay).await;
                self.send_once(&build).await
            }
        }
    }

    async fn send_once<F>(&self, build: &F) -> StorageResult<Value>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = build(&self.http)
            .bearer_auth(&self.config.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TestStore for NotionTestStore {
    async fn query(&self, namespace: &str) -> StorageResult<Vec<KnownRecord>> {
        self.query_filtered(json!({
            "property": columns::PROJECT,
            "select": { "equals": namespace },
        }))
        .await
    }

    async fn create(&self, props: &TestProperties) -> StorageResult<KnownRecord> {
        let url = format!("{}/v1/pages", self.config.api_base);
        let mut body = page_body(&RecordPatch::from(props));
        body["parent"] = json!({ "database_id": self.config.database_id });
        let page = self.send(|http| http.post(&url).json(&body)).await?;
        record_from_page(&page)
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StorageResult<()> {
        let url = format!("{}/v1/pages/{}", self.config.api_base, id);
        let body = page_body(patch);
        self.send(|http| http.patch(&url).json(&body))
            .await
            .map_err(|e| match e {
                StorageError::Http { status: 404, .. } => {
                    StorageError::RecordNotFound { id: id.0.clone() }
                }
                other => other,
            })?;
        Ok(())
    }

    async fn tracked(&self) -> StorageResult<Vec<KnownRecord>> {
        self.query_filtered(json!({
            "and": [
                { "property": columns::ARCHIVED, "checkbox": { "equals": false } },
                { "property": columns::ACTIVE, "checkbox": { "equals": true } },
            ],
        }))
        .await
    }

    async fn header(&self) -> StorageResult<StoreHeader> {
        let url = self.database_url();
        let database = self.send(|http| http.get(&url)).await?;
        Ok(StoreHeader {
            title: rich_text(&database["title"]),
            icon: external_icon(&database["icon"]),
        })
    }

    async fn update_header(&self, update: &HeaderUpdate) -> StorageResult<()> {
        let url = self.database_url();
        let mut body = Map::new();

        if let Some(counter) = &update.counter {
            let database = self.send(|http| http.get(&url)).await?;
            match rewrite_title_counter(&database["title"], counter) {
                Some(title) => {
                    body.insert("title".to_string(), Value::Array(title));
                }
                None => debug!("Database title has no counter, leaving it as is"),
            }
        }
        if let Some(icon) = &update.icon {
            body.insert("icon".to_string(), external_icon_json(icon));
        }
        if body.is_empty() {
            return Ok(());
        }

        let body = Value::Object(body);
        self.send(|http| http.patch(&url).json(&body)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Payload mapping
// ---------------------------------------------------------------------------

fn external_icon_json(icon: &str) -> Value {
    json!({ "type": "external", "external": { "url": icon_url(icon) } })
}

fn external_icon(icon: &Value) -> Option<String> {
    icon["external"]["url"].as_str().and_then(icon_from_url)
}

fn select(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

/// Request body (`properties` + optional `icon`) for a page create/update.
pub fn page_body(patch: &RecordPatch) -> Value {
    let mut properties = Map::new();
    if let Some(title) = &patch.title {
        properties.insert(
            columns::NAME.to_string(),
            json!({ "title": [{ "text": { "content": title } }] }),
        );
    }
    if let Some(project) = &patch.project {
        properties.insert(columns::PROJECT.to_string(), select(project));
    }
    if let Some(tag) = &patch.tag {
        properties.insert(columns::TAG.to_string(), select(tag));
    }
    if let Some(file_name) = &patch.file_name {
        properties.insert(columns::FILE.to_string(), select(file_name));
    }
    if let Some(status) = patch.status {
        properties.insert(
            columns::STATUS.to_string(),
            json!({ "status": { "name": status.as_str() } }),
        );
    }
    if let Some(archived) = patch.archived {
        properties.insert(columns::ARCHIVED.to_string(), json!({ "checkbox": archived }));
    }
    if let Some(active) = patch.active {
        properties.insert(columns::ACTIVE.to_string(), json!({ "checkbox": active }));
    }

    let mut body = json!({ "properties": properties });
    if let Some(icon) = &patch.icon {
        body["icon"] = external_icon_json(icon);
    }
    body
}

fn rich_text(parts: &Value) -> String {
    parts
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|part| {
            part["plain_text"]
                .as_str()
                .or_else(|| part["text"]["content"].as_str())
        })
        .collect()
}

/// Rewrite the counter inside the first text run that carries one.
///
/// Runs keep their type, content object and annotations, so links, mentions
/// and formatting survive. Read-only fields (`plain_text`, `href`) are
/// dropped. Returns `None` when no text run has a counter.
pub fn rewrite_title_counter(runs: &Value, counter: &str) -> Option<Vec<Value>> {
    let runs = runs.as_array()?;
    let mut rewritten = false;

    let title: Vec<Value> = runs
        .iter()
        .map(|run| {
            let kind = run["type"].as_str().unwrap_or("text");
            let mut out = Map::new();
            out.insert("type".to_string(), json!(kind));

            let mut content = run[kind].clone();
            if kind == "text" && !rewritten {
                if let Some(text) = content["content"]
                    .as_str()
                    .and_then(|text| replace_counter(text, counter))
                {
                    content["content"] = json!(text);
                    rewritten = true;
                }
            }
            out.insert(kind.to_string(), content);

            if !run["annotations"].is_null() {
                out.insert("annotations".to_string(), run["annotations"].clone());
            }
            Value::Object(out)
        })
        .collect();

    rewritten.then_some(title)
}

fn select_name(prop: &Value) -> Option<String> {
    prop["select"]["name"].as_str().map(str::to_string)
}

/// Decode a Notion page object into a [`KnownRecord`].
pub fn record_from_page(page: &Value) -> StorageResult<KnownRecord> {
    let id = page["id"]
        .as_str()
        .ok_or_else(|| StorageError::Malformed("page without id".to_string()))?;
    let props = &page["properties"];

    let last_edited = page["last_edited_time"]
        .as_str()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(KnownRecord {
        id: RecordId(id.to_string()),
        url: page["url"].as_str().unwrap_or_default().to_string(),
        properties: TestProperties {
            title: rich_text(&props[columns::NAME]["title"]),
            project: select_name(&props[columns::PROJECT]).unwrap_or_default(),
            tag: select_name(&props[columns::TAG]).unwrap_or_default(),
            file_name: select_name(&props[columns::FILE]).unwrap_or_default(),
            status: props[columns::STATUS]["status"]["name"]
                .as_str()
                .map(TestStatus::parse),
            archived: props[columns::ARCHIVED]["checkbox"].as_bool().unwrap_or(false),
            active: props[columns::ACTIVE]["checkbox"].as_bool().unwrap_or(false),
            icon: external_icon(&page["icon"]),
        },
        priority: select_name(&props[columns::IMPORTANCE]),
        assigned: props[columns::ASSIGNED]["people"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|p| p["id"].as_str())
            .map(|id| PersonRef { id: id.to_string() })
            .collect(),
        last_edited,
    })
}

/// Compare a database object against [`REQUIRED_PROPERTIES`].
pub fn schema_issues(database: &Value) -> Vec<String> {
    let present = &database["properties"];
    REQUIRED_PROPERTIES
        .iter()
        .filter_map(|(name, required)| match present[*name]["type"].as_str() {
            None => Some(format!("Missing property '{name}' (type: {required})")),
            Some(actual) if actual != *required => Some(format!(
                "Invalid type for property '{name}': expected '{required}', got '{actual}'"
            )),
            Some(_) => None,
        })
        .collect()
}
