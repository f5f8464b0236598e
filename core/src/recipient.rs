use std::collections::{BTreeMap, HashSet};

use http::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ValidationError;

/// Where and how a firing is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// Outbound HTTP request.
    Http(HttpRecipient),
    /// Write the payload to the local log. Always succeeds.
    Log(LogRecipient),
}

/// Dispatch-table key for [`Recipient`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    Http,
    Log,
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientKind::Http => write!(f, "http"),
            RecipientKind::Log => write!(f, "log"),
        }
    }
}

impl Recipient {
    pub fn kind(&self) -> RecipientKind {
        match self {
            Recipient::Http(_) => RecipientKind::Http,
            Recipient::Log(_) => RecipientKind::Log,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Recipient::Http(http) => http.validate(),
            Recipient::Log(_) => Ok(()),
        }
    }
}

/// Standard HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// One request header. Order is preserved when sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Request body, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Payload {
    /// Default `Content-Type` for this kind, used when no header overrides it.
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text/plain; charset=utf-8",
            Payload::Binary(_) => "application/octet-stream",
            Payload::Json(_) => "application/json",
        }
    }

    /// Body bytes as they go on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Text(s) => s.as_bytes().to_vec(),
            Payload::Binary(b) => b.clone(),
            Payload::Json(v) => v.to_string().into_bytes(),
        }
    }
}

/// HTTP endpoint description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRecipient {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<Payload>,
}

impl HttpRecipient {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            query_params: BTreeMap::new(),
            payload: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(Header { name: name.into(), value: value.into() });
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h.name.eq_ignore_ascii_case(name))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let parsed = Url::parse(&self.url).map_err(|_| ValidationError::InvalidUrl(self.url.clone()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::InvalidUrl(self.url.clone()));
        }

        let mut seen = HashSet::new();
        for h in &self.headers {
            if h.name.trim().is_empty() {
                return Err(ValidationError::EmptyHeaderName);
            }
            if HeaderName::from_bytes(h.name.as_bytes()).is_err() || HeaderValue::from_str(&h.value).is_err() {
                return Err(ValidationError::InvalidHeader(h.name.clone()));
            }
            if !seen.insert(h.name.to_ascii_lowercase()) {
                return Err(ValidationError::DuplicateHeader(h.name.clone()));
            }
        }
        Ok(())
    }
}

/// Local log recipient.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogRecipient {
    /// Free-form label included in the log line.
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub payload: Option<Payload>,
}
