use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;

/// Prefix of ids generated while operating in fallback mode.
///
/// Remote ids never carry it, so provisional records can always be told apart.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// The kinds of content the site publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Article,
    Event,
    Recording,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Article,
        ResourceType::Event,
        ResourceType::Recording,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Article => "article",
            ResourceType::Event => "event",
            ResourceType::Recording => "recording",
        }
    }

    /// Route prefix of the resource's HTTP endpoints (e.g. `/articles`).
    pub fn route_prefix(&self) -> &'static str {
        match self {
            ResourceType::Article => "/articles",
            ResourceType::Event => "/events",
            ResourceType::Recording => "/recordings",
        }
    }

    /// Resolve the resource owning a request path.
    ///
    /// Matching is per path segment: `/articles/7` belongs to articles,
    /// `/articles-old` does not.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|resource| path_has_prefix(path, resource.route_prefix()))
    }

    /// Key of the resource's list in a fallback store.
    pub fn store_key(&self) -> String {
        format!("content:{}", self.as_str())
    }
}

/// Whether `path` equals `prefix` or continues it with a new segment or a query.
pub fn path_has_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "article" | "articles" => Ok(ResourceType::Article),
            "event" | "events" => Ok(ResourceType::Event),
            "recording" | "recordings" => Ok(ResourceType::Recording),
            other => Err(ValidationError::new(
                "type",
                format!("unknown resource type '{}'", other),
            )),
        }
    }
}

/// Publication status of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    #[default]
    Draft,
    Published,
}

impl ContentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "draft",
            ContentStatus::Published => "published",
        }
    }
}

impl fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(ContentStatus::Draft),
            "published" => Ok(ContentStatus::Published),
            other => Err(ValidationError::new(
                "status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleFields {
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Type-specific fields of a record, tagged by resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPayload {
    Article(ArticleFields),
    Event(EventFields),
    Recording(RecordingFields),
}

impl ContentPayload {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ContentPayload::Article(_) => ResourceType::Article,
            ContentPayload::Event(_) => ResourceType::Event,
            ContentPayload::Recording(_) => ResourceType::Recording,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ContentPayload::Article(a) => &a.title,
            ContentPayload::Event(e) => &e.title,
            ContentPayload::Recording(r) => &r.title,
        }
    }

    /// Check the variant's field rules.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title().trim().is_empty() {
            return Err(ValidationError::new("title", "must not be empty"));
        }

        match self {
            ContentPayload::Article(article) => {
                let slug_ok = !article.slug.is_empty()
                    && article
                        .slug
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
                if !slug_ok {
                    return Err(ValidationError::new(
                        "slug",
                        "must be lowercase letters, digits and dashes",
                    ));
                }
                if article.body.trim().is_empty() {
                    return Err(ValidationError::new("body", "must not be empty"));
                }
            }
            ContentPayload::Event(event) => {
                if let Some(ends_at) = event.ends_at {
                    if ends_at < event.starts_at {
                        return Err(ValidationError::new("endsAt", "must not precede startsAt"));
                    }
                }
                if let Some(url) = &event.registration_url {
                    check_http_url("registrationUrl", url)?;
                }
            }
            ContentPayload::Recording(recording) => {
                check_http_url("mediaUrl", &recording.media_url)?;
            }
        }

        Ok(())
    }
}

fn check_http_url(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
        _ => Err(ValidationError::new(field, "must be an http(s) URL")),
    }
}

/// Caller-supplied content for a create or a full-replacement update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentDraft {
    #[serde(default)]
    pub status: ContentStatus,
    pub payload: ContentPayload,
}

impl ContentDraft {
    pub fn new(status: ContentStatus, payload: ContentPayload) -> Self {
        Self { status, payload }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.payload.resource_type()
    }

    /// Validate the draft for the resource it is submitted to.
    pub fn validate_for(&self, resource: ResourceType) -> Result<(), ValidationError> {
        if self.resource_type() != resource {
            return Err(ValidationError::new(
                "type",
                format!(
                    "payload is a {} but was submitted as a {}",
                    self.resource_type(),
                    resource
                ),
            ));
        }
        self.payload.validate()
    }
}

/// A single piece of publishable content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    pub status: ContentStatus,
    pub payload: ContentPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentRecord {
    /// Materialize a draft under an assigned id.
    pub fn from_draft(id: impl Into<String>, draft: ContentDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: draft.status,
            payload: draft.payload,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the content, keeping identity and creation time.
    pub fn apply(&mut self, draft: ContentDraft, now: DateTime<Utc>) {
        self.status = draft.status;
        self.payload = draft.payload;
        self.updated_at = now;
    }

    pub fn resource_type(&self) -> ResourceType {
        self.payload.resource_type()
    }

    /// Created while the remote store was unreachable and never confirmed by it.
    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }
}

/// Optional narrowing of a list read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn published() -> Self {
        Self {
            status: Some(ContentStatus::Published),
            limit: None,
        }
    }

    pub fn matches(&self, record: &ContentRecord) -> bool {
        self.status.map_or(true, |status| record.status == status)
    }

    /// Apply the filter to an ordered list, keeping order.
    pub fn apply(&self, records: Vec<ContentRecord>) -> Vec<ContentRecord> {
        let matching = records.into_iter().filter(|r| self.matches(r));
        match self.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}
