//! Enrichment pipeline: raw store → extraction → anchoring → lifecycle.
//!
//! One run reads the three stores, enriches raw listings whose id has never
//! been enriched, classifies old and new records into active/archived, and
//! rewrites the enriched and archive stores. Calls to the extraction service
//! are made one listing at a time.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::{
    config::Config,
    dates::{anchor_rental_window, Anchor},
    domain::{EnrichedListing, RawListing},
    extraction::{extract, ExtractionClient},
    lifecycle::{advance, LifecycleReport},
    store::{
        load_json, load_json_or_default, processed_ids, save_json, ArchiveStore, EnrichedStore,
        RawStore,
    },
    Result,
};

const PROGRESS_EVERY: usize = 10;

/// Outcome of one enrichment run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Raw listings that went through extraction.
    pub processed: usize,
    /// Enriched records produced from them (≥ `processed`).
    pub produced: usize,
    pub lifecycle: LifecycleReport,
}

/// Enrich one raw listing into one record per rental window.
///
/// Dates are anchored on the post date; if that cannot be parsed, on the
/// enrichment date.
pub async fn enrich_listing(
    client: &dyn ExtractionClient,
    raw: &RawListing,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<EnrichedListing> {
    let local_now = now.with_timezone(&tz);
    let anchor = Anchor::from_post_date(&raw.date).unwrap_or_else(|| {
        tracing::warn!(
            "listing {}: unparseable post date {:?}, anchoring on today",
            raw.id,
            raw.date
        );
        Anchor::from_date(local_now.date_naive())
    });
    let enriched_at = local_now.to_rfc3339();

    extract(client, &raw.text)
        .await
        .into_iter()
        .map(|mut extraction| {
            let (start, end) = anchor_rental_window(
                extraction.rental_start.as_deref(),
                extraction.rental_end.as_deref(),
                anchor,
            );
            extraction.rental_start = start;
            extraction.rental_end = end;
            EnrichedListing::new(raw.clone(), extraction, enriched_at.clone())
        })
        .collect()
}

/// Pure part of a run: compute the next active and archive stores.
pub async fn process(
    client: &dyn ExtractionClient,
    raw: &RawStore,
    active: EnrichedStore,
    archive: ArchiveStore,
    now: DateTime<Utc>,
    tz: Tz,
) -> (EnrichedStore, ArchiveStore, EnrichmentReport) {
    let mut seen = processed_ids(&active, &archive);
    let pending: Vec<&RawListing> = raw
        .listings
        .iter()
        .filter(|l| seen.insert(l.id))
        .collect();

    tracing::info!("Found {} new listings to process", pending.len());

    let mut fresh = Vec::new();
    for (i, listing) in pending.iter().enumerate() {
        fresh.extend(enrich_listing(client, listing, now, tz).await);
        if (i + 1) % PROGRESS_EVERY == 0 {
            tracing::info!("Processed {}/{} new listings", i + 1, pending.len());
        }
    }

    let produced = fresh.len();
    let (active, archive, lifecycle) = advance(active, archive, fresh, now, tz);

    (
        active,
        archive,
        EnrichmentReport {
            processed: pending.len(),
            produced,
            lifecycle,
        },
    )
}

/// Full run against the configured store files.
///
/// A missing or unreadable raw store aborts the run; the enriched and archive
/// stores degrade to empty.
pub async fn run(cfg: &Config, client: &dyn ExtractionClient) -> Result<EnrichmentReport> {
    let raw: RawStore = load_json(&cfg.listings_file)?;
    let active: EnrichedStore = load_json_or_default(&cfg.enriched_file);
    let archive: ArchiveStore = load_json_or_default(&cfg.archive_file);

    let (active, archive, report) =
        process(client, &raw, active, archive, Utc::now(), cfg.timezone).await;

    save_json(&cfg.enriched_file, &active)?;
    save_json(&cfg.archive_file, &archive)?;

    tracing::info!("Saved {} active listings", report.lifecycle.active);
    tracing::info!("Archived {} expired listings", report.lifecycle.newly_archived);
    tracing::info!(
        "Total archive size: {} listings",
        report.lifecycle.archive_total
    );

    Ok(report)
}
