//! RSS feed fetching.
//!
//! The fetcher periodically produces the full episode collection and swaps it
//! into the queue. Fetch failures are logged and retried on the next tick;
//! they never erase previously fetched data.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use castvox_foundation::FeedError;

use crate::episode::Episode;
use crate::queue::EpisodeQueue;

/// Source of the episode collection. Abstraction allows swapping the RSS
/// implementation for a fixture in tests.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the full collection, sorted ascending by publish time.
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError>;
}

/// RSS 2.0 fetcher over HTTP.
pub struct RssFetcher {
    client: reqwest::Client,
    feed_url: String,
}

impl RssFetcher {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            feed_url: feed_url.into(),
        }
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(&self) -> Result<Vec<Episode>, FeedError> {
        let response = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| FeedError::Http(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let mut episodes = parse_rss(&body)?;
        if episodes.is_empty() {
            return Err(FeedError::Empty);
        }
        // Oldest first, so the queue is consumed chronologically.
        episodes.sort_by_key(|e| e.published_at);
        Ok(episodes)
    }
}

/// Which child of `<item>` we are currently reading text for.
enum ItemField {
    Title,
    PubDate,
    Other,
}

/// Parse RSS 2.0 `<item>`s into episodes. Items without an audio enclosure
/// or with an unparseable publish date are skipped with a debug log.
pub fn parse_rss(xml: &str) -> Result<Vec<Episode>, FeedError> {
    let mut reader = Reader::from_str(xml);

    let mut episodes = Vec::new();
    let mut in_item = false;
    let mut field = ItemField::Other;
    let mut title = String::new();
    let mut enclosure_url: Option<String> = None;
    let mut pub_date: Option<DateTime<Utc>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" => {
                    in_item = true;
                    field = ItemField::Other;
                    title.clear();
                    enclosure_url = None;
                    pub_date = None;
                }
                b"title" if in_item => field = ItemField::Title,
                b"pubDate" if in_item => field = ItemField::PubDate,
                b"enclosure" if in_item => {
                    enclosure_url = read_enclosure_url(&e);
                }
                _ => field = ItemField::Other,
            },
            Ok(Event::Empty(e)) => {
                if in_item && e.local_name().as_ref() == b"enclosure" {
                    enclosure_url = read_enclosure_url(&e);
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .xml_content()
                    .map_err(|e| FeedError::Parse(e.to_string()))?;
                append_field(in_item, &field, text.trim(), &mut title, &mut pub_date);
            }
            Ok(Event::CData(t)) => {
                let raw = t.into_inner();
                let text = String::from_utf8_lossy(&raw);
                append_field(in_item, &field, text.trim(), &mut title, &mut pub_date);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" => {
                    in_item = false;
                    match (enclosure_url.take(), pub_date.take()) {
                        (Some(url), Some(published_at)) => {
                            episodes.push(Episode::new(title.clone(), url, published_at));
                        }
                        _ => {
                            debug!(title = %title, "Skipping item without enclosure or pubDate");
                        }
                    }
                }
                _ => field = ItemField::Other,
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FeedError::Parse(e.to_string())),
        }
    }

    Ok(episodes)
}

fn read_enclosure_url(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    let attr = e.try_get_attribute("url").ok().flatten()?;
    let value = attr.unescape_value().ok()?;
    match Url::parse(&value) {
        Ok(_) => Some(value.into_owned()),
        Err(err) => {
            debug!(url = %value, "Skipping enclosure with invalid URL: {}", err);
            None
        }
    }
}

fn append_field(
    in_item: bool,
    field: &ItemField,
    text: &str,
    title: &mut String,
    pub_date: &mut Option<DateTime<Utc>>,
) {
    if !in_item || text.is_empty() {
        return;
    }
    match field {
        ItemField::Title => {
            if !title.is_empty() {
                title.push(' ');
            }
            title.push_str(text);
        }
        ItemField::PubDate => match DateTime::parse_from_rfc2822(text) {
            Ok(dt) => *pub_date = Some(dt.with_timezone(&Utc)),
            Err(err) => debug!(value = %text, "Unparseable pubDate: {}", err),
        },
        ItemField::Other => {}
    }
}

/// Spawn the periodic refresh task. Each tick fetches the collection and
/// swaps it into the queue; failures keep the previous collection.
pub fn spawn_refresh_task(
    queue: Arc<EpisodeQueue>,
    fetcher: Arc<dyn FeedFetcher>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; the initial fetch already happened at
        // startup, so skip the first tick.
        tick.tick().await;
        loop {
            tick.tick().await;
            match fetcher.fetch().await {
                Ok(episodes) => {
                    let count = episodes.len();
                    if queue.replace(episodes) {
                        info!(episodes = count, "Feed refreshed");
                    }
                }
                Err(e) => {
                    warn!("Feed refresh failed, keeping previous collection: {}", e);
                }
            }
        }
    })
}
