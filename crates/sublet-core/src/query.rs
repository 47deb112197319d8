//! Read side over the active listings: filtering, sorting, lookup.

use std::{cmp::Ordering, collections::BTreeSet, path::Path};

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::{
    dates::{parse_rental_date, parse_timestamp},
    domain::{EnrichedListing, ListingId, ListingType},
    recency::is_recent_at,
};

/// Inclusive date window, written `DD.MM.YYYY - DD.MM.YYYY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn parse(s: &str) -> Option<Self> {
        let (start, end) = s.split_once(" - ")?;
        Some(Self {
            start: parse_rental_date(start.trim())?,
            end: parse_rental_date(end.trim())?,
        })
    }

    /// Days shared with `[start, end]`, both ends included.
    pub fn overlap_days(&self, start: NaiveDate, end: NaiveDate) -> i64 {
        let from = self.start.max(start);
        let to = self.end.min(end);
        if to < from {
            0
        } else {
            (to - from).num_days() + 1
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
    PriceAsc,
    DateMatch,
}

impl SortOrder {
    /// Unknown names fall back to newest first.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "date-asc" => Self::DateAsc,
            "price-asc" => Self::PriceAsc,
            "date-match" => Self::DateMatch,
            _ => Self::DateDesc,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListingFilter {
    /// Without a type only actionable listings pass, unless
    /// `include_not_listing` is set.
    pub listing_type: Option<ListingType>,
    pub include_not_listing: bool,
    pub city: Option<String>,
    /// Raw window text; an unparseable window disables date filtering.
    pub dates: Option<String>,
}

impl ListingFilter {
    fn window(&self) -> Option<DateWindow> {
        let raw = self.dates.as_deref()?;
        let window = DateWindow::parse(raw);
        if window.is_none() {
            tracing::debug!("ignoring unparseable date window {raw:?}");
        }
        window
    }

    pub fn matches(&self, listing: &EnrichedListing) -> bool {
        match self.listing_type {
            Some(t) if t != listing.listing_type => return false,
            None if !self.include_not_listing && !listing.listing_type.is_actionable() => {
                return false
            }
            _ => {}
        }
        if let Some(city) = self.city.as_deref() {
            if listing.city.as_deref() != Some(city) {
                return false;
            }
        }
        match self.window() {
            Some(w) => overlaps(listing, w),
            None => true,
        }
    }
}

fn rental_window(listing: &EnrichedListing) -> Option<(NaiveDate, NaiveDate)> {
    let start = parse_rental_date(listing.rental_start.as_deref()?)?;
    let end = parse_rental_date(listing.rental_end.as_deref()?)?;
    Some((start, end))
}

/// Listings with an incomplete window always pass.
fn overlaps(listing: &EnrichedListing, w: DateWindow) -> bool {
    match rental_window(listing) {
        Some((start, end)) => start <= w.end && end >= w.start,
        None => true,
    }
}

pub fn filter(listings: &[EnrichedListing], f: &ListingFilter) -> Vec<EnrichedListing> {
    listings.iter().filter(|l| f.matches(l)).cloned().collect()
}

fn cmp_post_date(a: &EnrichedListing, b: &EnrichedListing) -> Ordering {
    match (parse_timestamp(a.date()), parse_timestamp(b.date())) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.date().cmp(b.date()),
    }
}

/// Overlap score for `date-match`: days shared with the window, `-1` for
/// listings without a window.
pub fn match_score(listing: &EnrichedListing, w: DateWindow) -> i64 {
    match rental_window(listing) {
        Some((start, end)) => w.overlap_days(start, end),
        None => -1,
    }
}

/// Stable sort. `window` is only consulted for [`SortOrder::DateMatch`];
/// without it the input order is returned.
pub fn sort(
    mut listings: Vec<EnrichedListing>,
    order: SortOrder,
    window: Option<DateWindow>,
) -> Vec<EnrichedListing> {
    match order {
        SortOrder::DateDesc => listings.sort_by(|a, b| cmp_post_date(b, a)),
        SortOrder::DateAsc => listings.sort_by(cmp_post_date),
        SortOrder::PriceAsc => listings.sort_by(|a, b| {
            let pa = a.price_eur.unwrap_or(f64::INFINITY);
            let pb = b.price_eur.unwrap_or(f64::INFINITY);
            pa.total_cmp(&pb)
        }),
        SortOrder::DateMatch => {
            if let Some(w) = window {
                listings.sort_by_key(|l| std::cmp::Reverse(match_score(l, w)));
            }
        }
    }
    listings
}

/// Newest first, `is_new` set, photo paths made relative to the web
/// `media/` folder. Photos missing from `media_dir` are dropped.
pub fn prepare_for_display(
    listings: Vec<EnrichedListing>,
    recency_window: Duration,
    media_dir: &Path,
    now: DateTime<Utc>,
) -> Vec<EnrichedListing> {
    let mut listings = sort(listings, SortOrder::DateDesc, None);
    for l in &mut listings {
        l.is_new = is_recent_at(l.date(), recency_window, now);
        if let Some(paths) = l.raw.photo_paths.as_mut() {
            *paths = paths
                .iter()
                .filter_map(|p| Path::new(p).file_name())
                .filter(|name| media_dir.join(name).exists())
                .map(|name| format!("media/{}", name.to_string_lossy()))
                .collect();
        }
    }
    listings
}

/// Distinct city names, sorted.
pub fn cities(listings: &[EnrichedListing]) -> Vec<String> {
    listings
        .iter()
        .filter_map(|l| l.city.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Listings per actionable type, keeping order. `not_listing` is left out.
pub fn group_by_type(listings: &[EnrichedListing]) -> Vec<(ListingType, Vec<EnrichedListing>)> {
    ListingType::ACTIONABLE
        .iter()
        .map(|&t| {
            let of_type = listings
                .iter()
                .filter(|l| l.listing_type == t)
                .cloned()
                .collect();
            (t, of_type)
        })
        .collect()
}

/// First record with `id`. Multi-window listings share an id.
pub fn find_by_id(listings: &[EnrichedListing], id: ListingId) -> Option<&EnrichedListing> {
    listings.iter().find(|l| l.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Extraction, RawListing};
    use chrono::TimeZone;
    use std::{
        fs,
        path::PathBuf,
        time::{SystemTime, UNIX_EPOCH},
    };

    fn listing(
        id: i64,
        date: &str,
        t: ListingType,
        city: Option<&str>,
        window: Option<(&str, &str)>,
        price: Option<f64>,
    ) -> EnrichedListing {
        EnrichedListing::new(
            RawListing {
                id,
                text: String::new(),
                date: date.to_string(),
                from_user: None,
                media: false,
                photo_paths: None,
                link: String::new(),
            },
            Extraction {
                city: city.map(str::to_string),
                country: None,
                rental_start: window.map(|w| w.0.to_string()),
                rental_end: window.map(|w| w.1.to_string()),
                price_eur: price,
                listing_type: t,
            },
            String::new(),
        )
    }

    fn sample() -> Vec<EnrichedListing> {
        use ListingType::*;
        vec![
            listing(1, "2024-11-10T12:00:00+01:00", RentingOut, Some("Берлин"), Some(("01.12.2024", "31.12.2024")), Some(40.0)),
            listing(2, "2024-11-11T12:00:00+01:00", RentingOut, Some("Мюнхен"), Some(("01.02.2025", "28.02.2025")), None),
            listing(3, "2024-11-09T12:00:00+01:00", LookingFor, Some("Берлин"), None, Some(25.0)),
            listing(4, "2024-11-12T08:00:00+01:00", RentingOut, Some("Берлин"), Some(("20.12.2024", "05.01.2025")), Some(30.0)),
            listing(5, "2024-11-08T12:00:00+01:00", NotListing, None, None, None),
        ]
    }

    fn ids(xs: &[EnrichedListing]) -> Vec<i64> {
        xs.iter().map(|l| l.id()).collect()
    }

    #[test]
    fn date_window_parses_and_counts_inclusive_overlap() {
        let w = DateWindow::parse("15.12.2024 - 10.01.2025").unwrap();
        let d = |s: &str| parse_rental_date(s).unwrap();
        assert_eq!(w.overlap_days(d("01.12.2024"), d("31.12.2024")), 17);
        assert_eq!(w.overlap_days(d("10.01.2025"), d("20.01.2025")), 1);
        assert_eq!(w.overlap_days(d("11.01.2025"), d("20.01.2025")), 0);
        assert!(DateWindow::parse("15.12.2024").is_none());
        assert!(DateWindow::parse("15.12 - 10.01").is_none());
    }

    #[test]
    fn filters_by_type_city_and_window() {
        let all = sample();
        let f = ListingFilter {
            listing_type: Some(ListingType::RentingOut),
            city: Some("Берлин".to_string()),
            dates: Some("01.01.2025 - 03.01.2025".to_string()),
            ..ListingFilter::default()
        };
        assert_eq!(ids(&filter(&all, &f)), vec![4]);

        let looking = ListingFilter {
            listing_type: Some(ListingType::LookingFor),
            dates: Some("01.06.2030 - 02.06.2030".to_string()),
            ..ListingFilter::default()
        };
        // No window on the listing: always passes the date filter.
        assert_eq!(ids(&filter(&all, &looking)), vec![3]);
    }

    #[test]
    fn unparseable_window_disables_date_filter() {
        let all = sample();
        let f = ListingFilter {
            dates: Some("next week".to_string()),
            include_not_listing: true,
            ..ListingFilter::default()
        };
        assert_eq!(filter(&all, &f).len(), all.len());
    }

    #[test]
    fn untyped_filter_hides_placeholders_by_default() {
        let all = sample();
        assert_eq!(ids(&filter(&all, &ListingFilter::default())), vec![1, 2, 3, 4]);

        let everything = ListingFilter {
            include_not_listing: true,
            ..ListingFilter::default()
        };
        assert_eq!(filter(&all, &everything).len(), 5);

        let placeholders = ListingFilter {
            listing_type: Some(ListingType::NotListing),
            ..ListingFilter::default()
        };
        assert_eq!(ids(&filter(&all, &placeholders)), vec![5]);
    }

    #[test]
    fn desc_then_asc_is_exactly_reversed() {
        let desc = sort(sample(), SortOrder::DateDesc, None);
        let asc = sort(sample(), SortOrder::DateAsc, None);
        assert_eq!(ids(&desc), vec![4, 2, 1, 3, 5]);
        let mut reversed = ids(&asc);
        reversed.reverse();
        assert_eq!(ids(&desc), reversed);
    }

    #[test]
    fn price_sort_puts_missing_prices_last_and_is_stable() {
        assert_eq!(ids(&sort(sample(), SortOrder::PriceAsc, None)), vec![3, 4, 1, 2, 5]);
    }

    #[test]
    fn date_match_ranks_by_overlap_then_undated_last() {
        let w = DateWindow::parse("25.12.2024 - 10.01.2025");
        let sorted = sort(sample(), SortOrder::DateMatch, w);
        // 4: 12 days, 1: 7 days, 2: 0 days, 3 and 5: no window.
        assert_eq!(ids(&sorted), vec![4, 1, 2, 3, 5]);
        assert_eq!(ids(&sort(sample(), SortOrder::DateMatch, None)), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sort_order_names() {
        assert_eq!(SortOrder::parse("date-asc"), SortOrder::DateAsc);
        assert_eq!(SortOrder::parse("price-asc"), SortOrder::PriceAsc);
        assert_eq!(SortOrder::parse("date-match"), SortOrder::DateMatch);
        assert_eq!(SortOrder::parse("whatever"), SortOrder::DateDesc);
    }

    #[test]
    fn cities_groups_and_lookup() {
        let all = sample();
        assert_eq!(cities(&all), vec!["Берлин".to_string(), "Мюнхен".to_string()]);

        let groups = group_by_type(&all);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].0, ListingType::RentingOut);
        assert_eq!(ids(&groups[0].1), vec![1, 2, 4]);
        assert_eq!(ids(&groups[1].1), vec![3]);
        assert!(groups[2].1.is_empty());

        assert_eq!(find_by_id(&all, 3).map(|l| l.id()), Some(3));
        assert!(find_by_id(&all, 42).is_none());
    }

    #[test]
    fn display_preparation_marks_new_and_rewrites_photos() {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let media = PathBuf::from(format!("/tmp/sublet-display-{}-{ts}", std::process::id()));
        fs::create_dir_all(&media).unwrap();
        fs::write(media.join("photo_4_1.jpg"), b"jpg").unwrap();

        let mut all = sample();
        all[3].raw.photo_paths = Some(vec![
            "data/media/photo_4_1.jpg".to_string(),
            "data/media/photo_4_2.jpg".to_string(),
        ]);
        let now = Utc.with_ymd_and_hms(2024, 11, 12, 11, 0, 0).unwrap();

        let shown = prepare_for_display(all, Duration::days(2), &media, now);
        assert_eq!(ids(&shown), vec![4, 2, 1, 3, 5]);
        assert_eq!(
            shown.iter().map(|l| l.is_new).collect::<Vec<_>>(),
            vec![true, true, true, false, false]
        );
        assert_eq!(shown[0].raw.photo_paths, Some(vec!["media/photo_4_1.jpg".to_string()]));
        let _ = fs::remove_dir_all(&media);
    }
}
