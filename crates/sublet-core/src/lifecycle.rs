//! Active/archived partition of enriched listings.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::{
    dates::parse_rental_date,
    domain::EnrichedListing,
    store::{ArchiveStore, EnrichedStore},
};

/// Today's midnight in `tz`, as a UTC instant.
pub fn archive_cutoff(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_midnight = now
        .with_timezone(&tz)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest());
    match local_midnight {
        Some(m) => m.with_timezone(&Utc),
        // Midnight skipped by a DST jump: fall back to the instant itself.
        None => now,
    }
}

/// A listing is expired once its `rental_end` (midnight UTC) lies strictly
/// before `cutoff`. Listings without a parseable end never expire.
pub fn is_expired(listing: &EnrichedListing, cutoff: DateTime<Utc>) -> bool {
    let Some(end) = listing.rental_end.as_deref().and_then(parse_rental_date) else {
        return false;
    };
    let Some(end) = end.and_hms_opt(0, 0, 0) else {
        return false;
    };
    Utc.from_utc_datetime(&end) < cutoff
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Partition {
    pub active: Vec<EnrichedListing>,
    pub archived: Vec<EnrichedListing>,
}

/// Split previously active listings and fresh ones. Relative order is kept:
/// previously active first, then new.
pub fn partition(
    existing: Vec<EnrichedListing>,
    fresh: Vec<EnrichedListing>,
    cutoff: DateTime<Utc>,
) -> Partition {
    let mut out = Partition::default();
    for listing in existing.into_iter().chain(fresh) {
        if is_expired(&listing, cutoff) {
            out.archived.push(listing);
        } else {
            out.active.push(listing);
        }
    }
    out
}

/// Counts reported after a lifecycle pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    pub active: usize,
    pub newly_archived: usize,
    pub archive_total: usize,
}

/// Produce the next active store (replacing the old one) and the next
/// archive (newly archived entries prepended to the existing ones).
pub fn advance(
    active: EnrichedStore,
    archive: ArchiveStore,
    fresh: Vec<EnrichedListing>,
    now: DateTime<Utc>,
    tz: Tz,
) -> (EnrichedStore, ArchiveStore, LifecycleReport) {
    let cutoff = archive_cutoff(now, tz);
    let Partition {
        active: still_active,
        archived: mut newly_archived,
    } = partition(active.listings, fresh, cutoff);

    let report = LifecycleReport {
        active: still_active.len(),
        newly_archived: newly_archived.len(),
        archive_total: newly_archived.len() + archive.listings.len(),
    };

    let stamp = now.with_timezone(&tz).to_rfc3339();
    newly_archived.extend(archive.listings);

    (
        EnrichedStore {
            listings: still_active,
            processed_at: Some(stamp.clone()),
        },
        ArchiveStore {
            listings: newly_archived,
            updated_at: Some(stamp),
        },
        report,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Extraction, ListingType, RawListing};
    use chrono_tz::Europe::Berlin;

    fn listing(id: i64, end: Option<&str>) -> EnrichedListing {
        EnrichedListing::new(
            RawListing {
                id,
                text: String::new(),
                date: "2024-11-10T12:00:00+01:00".to_string(),
                from_user: None,
                media: false,
                photo_paths: None,
                link: String::new(),
            },
            Extraction {
                rental_start: Some("01.12.2024".to_string()),
                rental_end: end.map(str::to_string),
                listing_type: ListingType::RentingOut,
                ..Extraction::default()
            },
            "2024-11-10T13:00:00+01:00".to_string(),
        )
    }

    fn berlin(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Berlin
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn new_year_midnight_in_berlin_archives_last_december_day() {
        let cutoff = archive_cutoff(berlin(2025, 1, 1, 0), Berlin);
        assert!(is_expired(&listing(1, Some("31.12.2024")), cutoff));
        assert!(!is_expired(&listing(2, Some("01.01.2025")), cutoff));
        assert!(!is_expired(&listing(3, None), cutoff));
    }

    #[test]
    fn open_ended_and_unparseable_ends_stay_active() {
        let cutoff = archive_cutoff(berlin(2030, 6, 1, 12), Berlin);
        assert!(!is_expired(&listing(1, None), cutoff));
        assert!(!is_expired(&listing(2, Some("31.12")), cutoff));
        assert!(!is_expired(&listing(3, Some("soon")), cutoff));
    }

    #[test]
    fn cutoff_is_local_midnight() {
        let cutoff = archive_cutoff(berlin(2025, 1, 1, 15), Berlin);
        assert_eq!(cutoff, berlin(2025, 1, 1, 0));
    }

    #[test]
    fn advance_prepends_newly_archived_entries() {
        let active = EnrichedStore {
            listings: vec![listing(1, Some("31.12.2024")), listing(2, None)],
            processed_at: None,
        };
        let archive = ArchiveStore {
            listings: vec![listing(100, Some("01.01.2024"))],
            updated_at: None,
        };
        let fresh = vec![listing(3, Some("15.12.2024")), listing(4, Some("15.03.2025"))];

        let (active, archive, report) =
            advance(active, archive, fresh, berlin(2025, 1, 1, 9), Berlin);

        assert_eq!(
            active.listings.iter().map(|l| l.id()).collect::<Vec<_>>(),
            vec![2, 4]
        );
        assert_eq!(
            archive.listings.iter().map(|l| l.id()).collect::<Vec<_>>(),
            vec![1, 3, 100]
        );
        assert_eq!(
            report,
            LifecycleReport {
                active: 2,
                newly_archived: 2,
                archive_total: 3
            }
        );
        assert_eq!(active.processed_at, archive.updated_at);
        assert!(active
            .processed_at
            .as_deref()
            .is_some_and(|s| s.starts_with("2025-01-01T09:00:00+01:00")));
    }
}
