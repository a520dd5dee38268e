use chrono::{DateTime, Utc};
use serde::Serialize;

/// One playable audio item. Immutable once produced by the fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Episode {
    pub title: String,
    pub source_url: String,
    pub published_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(
        title: impl Into<String>,
        source_url: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
            published_at,
        }
    }
}
