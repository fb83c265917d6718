//! Source adapter contract + the rental listing sources flatwatch ships with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flatwatch_core::{Disposition, DispositionSet, Listing, SourceIdentity};
use flatwatch_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Selector};
use serde::Deserialize;
use thiserror::Error;

mod sources;

pub use sources::bezrealitky::BezRealitky;
pub use sources::bravis::Bravis;
pub use sources::idnes::IdnesReality;
pub use sources::realcity::Realcity;
pub use sources::realingo::Realingo;
pub use sources::ulovdomov::UlovDomov;

pub const CRATE_NAME: &str = "flatwatch-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("source did not finish within {0:?}")]
    Timeout(Duration),
}

/// Query narrowing shared by every adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterSettings {
    pub dispositions: DispositionSet,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn identity(&self) -> &Arc<SourceIdentity>;

    /// Source-specific query tokens for the given categories. One category may expand to
    /// several tokens or to none.
    fn category_tokens(&self, dispositions: DispositionSet) -> Vec<String>;

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<Listing>, AdapterError>;

    fn name(&self) -> &str {
        &self.identity().name
    }
}

/// Ordered, immutable list of adapters assembled at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    /// Every shipped source, configured with the same settings.
    pub fn all(settings: AdapterSettings) -> Self {
        Self::builder()
            .with(Bravis::new(settings))
            .with(IdnesReality::new(settings))
            .with(Realcity::new(settings))
            .with(Realingo::new(settings))
            .with(UlovDomov::new(settings))
            .with(BezRealitky::new(settings))
            .build()
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Keep only adapters whose name matches one of `names` (case-insensitive).
    pub fn retain_named<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.adapters.retain(|adapter| {
            names
                .iter()
                .any(|name| name.as_ref().trim().eq_ignore_ascii_case(adapter.name()))
        });
        self
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl AdapterRegistryBuilder {
    pub fn with(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    pub fn with_shared(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            adapters: self.adapters,
        }
    }
}

/// Expand a disposition set through an adapter mapping, dropping repeated tokens.
pub(crate) fn mapped_tokens(
    dispositions: DispositionSet,
    mapping: fn(Disposition) -> &'static [&'static str],
) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for disposition in dispositions.iter() {
        for token in mapping(disposition) {
            if !tokens.iter().any(|t| t == token) {
                tokens.push((*token).to_string());
            }
        }
    }
    tokens
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Parse(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn select_first_text(element: ElementRef<'_>, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(element
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

pub(crate) fn select_first_attr(
    element: ElementRef<'_>,
    css: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(element
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

pub(crate) fn require<T>(value: Option<T>, what: &str, source: &str) -> Result<T, AdapterError> {
    value.ok_or_else(|| AdapterError::Parse(format!("{source}: listing is missing {what}")))
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    pub(crate) fn into_data(self) -> Result<T, AdapterError> {
        if !self.errors.is_empty() {
            let messages = self
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AdapterError::Protocol(messages));
        }
        self.data
            .ok_or_else(|| AdapterError::Protocol("response carried no data".to_string()))
    }
}
