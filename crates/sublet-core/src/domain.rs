use std::fmt;

use serde::{Deserialize, Serialize};

/// Scrape-time message id (stable per chat).
pub type ListingId = i64;

/// What a chat post is about.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    RentingOut,
    LookingFor,
    Exchange,
    #[default]
    NotListing,
}

impl ListingType {
    /// Types that get their own listing page.
    pub const ACTIONABLE: [ListingType; 3] = [
        ListingType::RentingOut,
        ListingType::LookingFor,
        ListingType::Exchange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ListingType::RentingOut => "renting_out",
            ListingType::LookingFor => "looking_for",
            ListingType::Exchange => "exchange",
            ListingType::NotListing => "not_listing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "renting_out" => Some(ListingType::RentingOut),
            "looking_for" => Some(ListingType::LookingFor),
            "exchange" => Some(ListingType::Exchange),
            "not_listing" => Some(ListingType::NotListing),
            _ => None,
        }
    }

    pub fn is_actionable(self) -> bool {
        self != ListingType::NotListing
    }
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scraped chat message. Never mutated after collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub id: ListingId,
    #[serde(default)]
    pub text: String,
    /// Post time, ISO-8601 with offset.
    pub date: String,
    #[serde(default)]
    pub from_user: Option<String>,
    #[serde(default)]
    pub media: bool,
    #[serde(default)]
    pub photo_paths: Option<Vec<String>>,
    #[serde(default)]
    pub link: String,
}

/// Structured fields derived from a listing's text.
///
/// Before anchoring, `rental_start`/`rental_end` hold `DD.MM` strings; after
/// anchoring they hold `DD.MM.YYYY`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub city: Option<String>,
    pub country: Option<String>,
    pub rental_start: Option<String>,
    pub rental_end: Option<String>,
    pub price_eur: Option<f64>,
    pub listing_type: ListingType,
}

impl Extraction {
    /// Placeholder used when the extraction service fails.
    pub fn not_listing() -> Self {
        Self::default()
    }
}

/// A raw listing plus extracted fields, one per rental window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedListing {
    #[serde(flatten)]
    pub raw: RawListing,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub rental_start: Option<String>,
    #[serde(default)]
    pub rental_end: Option<String>,
    #[serde(default)]
    pub price_eur: Option<f64>,
    #[serde(rename = "type", default)]
    pub listing_type: ListingType,
    #[serde(default)]
    pub enriched_at: String,
    /// Derived at read time; only serialized when set.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_new: bool,
}

impl EnrichedListing {
    pub fn new(raw: RawListing, extraction: Extraction, enriched_at: String) -> Self {
        Self {
            raw,
            city: extraction.city,
            country: extraction.country,
            rental_start: extraction.rental_start,
            rental_end: extraction.rental_end,
            price_eur: extraction.price_eur,
            listing_type: extraction.listing_type,
            enriched_at,
            is_new: false,
        }
    }

    pub fn id(&self) -> ListingId {
        self.raw.id
    }

    pub fn date(&self) -> &str {
        &self.raw.date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> RawListing {
        RawListing {
            id: 42,
            text: "Сдаю комнату в Берлине".to_string(),
            date: "2024-11-10T12:00:00+01:00".to_string(),
            from_user: Some("anna".to_string()),
            media: false,
            photo_paths: None,
            link: "https://t.me/c/1/42".to_string(),
        }
    }

    #[test]
    fn enriched_listing_flattens_raw_fields() {
        let listing = EnrichedListing::new(
            raw(),
            Extraction {
                city: Some("Берлин".to_string()),
                listing_type: ListingType::RentingOut,
                ..Extraction::default()
            },
            "2024-11-11T10:00:00+01:00".to_string(),
        );

        let v = serde_json::to_value(&listing).unwrap();
        assert_eq!(v["id"], json!(42));
        assert_eq!(v["city"], json!("Берлин"));
        assert_eq!(v["type"], json!("renting_out"));
        assert_eq!(v["rental_end"], json!(null));
        assert!(v.get("is_new").is_none());

        let back: EnrichedListing = serde_json::from_value(v).unwrap();
        assert_eq!(back, listing);
    }

    #[test]
    fn listing_type_parse_is_lenient_about_case() {
        assert_eq!(ListingType::parse(" Exchange "), Some(ListingType::Exchange));
        assert_eq!(ListingType::parse("selling"), None);
        assert!(!ListingType::NotListing.is_actionable());
    }

    #[test]
    fn raw_listing_tolerates_missing_optional_fields() {
        let raw: RawListing =
            serde_json::from_value(json!({"id": 7, "date": "2024-11-10T12:00:00+01:00"})).unwrap();
        assert_eq!(raw.text, "");
        assert_eq!(raw.photo_paths, None);
        assert!(!raw.media);
    }
}
