//! Chat collector: pull recent chat messages into the raw listing store.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::{
    config::Config,
    dates::parse_timestamp,
    domain::{ListingId, RawListing},
    errors::Error,
    store::{load_json_or_default, save_json, RawStore},
    Result,
};

const PROGRESS_EVERY: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhotoRef {
    pub file_id: String,
}

/// One message as delivered by a chat source.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: ListingId,
    pub text: Option<String>,
    pub date: DateTime<Utc>,
    pub sender: Option<String>,
    pub has_media: bool,
    /// Largest photo size, when the message carries a photo.
    pub photo: Option<PhotoRef>,
    /// Album id shared by messages sent as one media group.
    pub group_id: Option<String>,
    pub link: String,
}

impl ChatMessage {
    fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Port for reading a chat's history.
///
/// Either call may fail with [`Error::RateLimited`]; the collector then sleeps
/// and repeats the same call.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Next message, newest first. `None` once history is exhausted.
    async fn next_message(&mut self) -> Result<Option<ChatMessage>>;

    async fn download_photo(&self, photo: &PhotoRef, dest: &Path) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub collected: usize,
    pub added: usize,
    pub total: usize,
}

/// Lower bound for a collection run: `now - days`, extended back to the
/// oldest stored post so gaps in the store are refilled. Negative `days`
/// count as zero; an out-of-range window reaches back to the earliest instant.
pub fn collection_since(store: &RawStore, now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    let window_start = Duration::try_days(days.max(0))
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    store
        .listings
        .iter()
        .filter_map(|l| parse_timestamp(&l.date))
        .map(|d| d.with_timezone(&Utc))
        .min()
        .map_or(window_start, |oldest| oldest.min(window_start))
}

pub fn photo_file_name(message_id: ListingId, n: usize) -> String {
    format!("photo_{message_id}_{n}.jpg")
}

/// Read messages newer than `since` and turn them into raw listings, newest
/// first.
///
/// A source error other than rate limiting ends the read and what was read so
/// far is kept. If nothing was read yet, the error is returned.
pub async fn collect(
    source: &mut dyn ChatSource,
    since: DateTime<Utc>,
    media_dir: &Path,
    tz: Tz,
) -> Result<Vec<RawListing>> {
    let messages = read_since(source, since).await?;

    let mut groups: HashMap<&str, Vec<&ChatMessage>> = HashMap::new();
    for m in &messages {
        if let Some(g) = m.group_id.as_deref() {
            groups.entry(g).or_default().push(m);
        }
    }
    for members in groups.values_mut() {
        members.sort_by_key(|m| m.id);
    }

    let mut attached: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for m in &messages {
        if m.text().is_none() && (m.group_id.is_some() || m.photo.is_none()) {
            continue;
        }

        let album: Vec<&ChatMessage> = match m.group_id.as_deref() {
            Some(g) if attached.insert(g) => groups.get(g).cloned().unwrap_or_default(),
            _ => vec![m],
        };
        let photo_paths = if m.has_media {
            download_photos(&*source, m.id, &album, media_dir).await
        } else {
            Vec::new()
        };
        if !photo_paths.is_empty() {
            tracing::info!("Downloaded {} photos for message {}", photo_paths.len(), m.id);
        }

        out.push(RawListing {
            id: m.id,
            text: m.text.clone().unwrap_or_default(),
            date: m.date.with_timezone(&tz).to_rfc3339(),
            from_user: m.sender.clone(),
            media: m.has_media,
            photo_paths: (!photo_paths.is_empty()).then_some(photo_paths),
            link: m.link.clone(),
        });

        if out.len() % PROGRESS_EVERY == 0 {
            tracing::info!("Processed {} messages", out.len());
        }
    }

    tracing::info!("Total messages processed: {}", out.len());
    Ok(out)
}

async fn read_since(
    source: &mut dyn ChatSource,
    since: DateTime<Utc>,
) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    loop {
        match source.next_message().await {
            Ok(Some(m)) if m.date < since => break,
            Ok(Some(m)) => messages.push(m),
            Ok(None) => break,
            Err(Error::RateLimited { retry_after }) => {
                tracing::warn!("Hit rate limit, waiting {} seconds", retry_after.as_secs());
                tokio::time::sleep(retry_after).await;
            }
            Err(e) if messages.is_empty() => return Err(e),
            Err(e) => {
                tracing::error!("Error collecting messages: {e}");
                break;
            }
        }
    }
    Ok(messages)
}

/// Download the album's photos as `photo_{id}_{n}.jpg`, `n` being the
/// 1-based position in the album. Files already on disk are reused; any
/// failure costs photos, never the message.
async fn download_photos(
    source: &dyn ChatSource,
    message_id: ListingId,
    album: &[&ChatMessage],
    media_dir: &Path,
) -> Vec<String> {
    if let Err(e) = tokio::fs::create_dir_all(media_dir).await {
        tracing::error!(
            "Error creating media dir {} for message {message_id}: {e}",
            media_dir.display()
        );
        return Vec::new();
    }

    let mut paths = Vec::new();
    for (i, member) in album.iter().enumerate() {
        let Some(photo) = member.photo.as_ref() else {
            continue;
        };
        let dest = media_dir.join(photo_file_name(message_id, i + 1));
        if !dest.exists() {
            if let Err(e) = download_with_wait(source, photo, &dest).await {
                tracing::error!("Error downloading photo {} for message {message_id}: {e}", i + 1);
                continue;
            }
        }
        paths.push(path_string(&dest));
    }
    paths
}

async fn download_with_wait(source: &dyn ChatSource, photo: &PhotoRef, dest: &Path) -> Result<()> {
    loop {
        match source.download_photo(photo, dest).await {
            Err(Error::RateLimited { retry_after }) => {
                tracing::warn!("Hit rate limit, waiting {} seconds", retry_after.as_secs());
                tokio::time::sleep(retry_after).await;
            }
            other => return other,
        }
    }
}

fn path_string(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Full collection run against the configured raw store.
pub async fn run(
    cfg: &Config,
    source: &mut dyn ChatSource,
    days: i64,
    now: DateTime<Utc>,
) -> Result<CollectReport> {
    let mut store: RawStore = load_json_or_default(&cfg.listings_file);
    let since = collection_since(&store, now, days);
    tracing::info!(
        "Collecting messages since: {}",
        since.with_timezone(&cfg.timezone).format("%Y-%m-%d %H:%M:%S")
    );

    let collected = collect(source, since, &cfg.media_dir, cfg.timezone).await?;
    let fetched = collected.len();
    let added = store.merge_new(collected);
    save_json(&cfg.listings_file, &store)?;

    let report = CollectReport {
        collected: fetched,
        added,
        total: store.listings.len(),
    };
    tracing::info!("Added {} new messages to the database", report.added);
    tracing::info!("Total messages in database: {}", report.total);
    Ok(report)
}
