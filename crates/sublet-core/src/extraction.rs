//! Extraction-service boundary.
//!
//! The service gets the listing text plus [`SYSTEM_PROMPT`] and answers with a
//! JSON object. Its answer is untrusted: every field is optional and checked
//! on its own, and anything that does not look like the expected object
//! degrades to a single `not_listing` placeholder.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    dates::{expand_partial, DateRepr, DateRole},
    domain::{Extraction, ListingType},
    errors::Error,
    Result,
};

pub const SYSTEM_PROMPT: &str = r#"
You are a helpful assistant that extracts structured information from rental listings.
Your task is to extract the following information:
- City where the property is located (ALWAYS translate to Russian, e.g., "Berlin" -> "Берлин", "Munich" -> "Мюнхен")
- Country where the property is located (ALWAYS translate to Russian, e.g., "Germany" -> "Германия", "France" -> "Франция")
- All rental periods mentioned in the text (only day and month, no year)
- Price per day in EUR
- Type of listing

The text may be in English or Russian. Always respond in the following JSON format:
{
    "city": string or null (in Russian),
    "country": string or null (in Russian),
    "date_ranges": [
        {
            "start_date": "DD.MM" or "MM",
            "end_date": "DD.MM" or "MM"
        }
    ],
    "price_eur": number or null,
    "type": "renting_out" | "looking_for" | "exchange" | "not_listing"
}

For the type field:
- "renting_out" - Person is offering their apartment for rent
- "looking_for" - Person is looking for an apartment to rent
- "exchange" - Person wants to exchange apartments
- "not_listing" - Message is not a rental listing

If any information is not found in the text, use null for that field.
For dates:
- Extract only day and month, DO NOT include year
- If only month is mentioned (e.g., "from March"), use "MM" format
- If day is mentioned, use "DD.MM" format
- Extract ALL date ranges mentioned in the text, even if there are multiple
For prices, convert any mentioned price to EUR using approximate conversion rates if needed.
"#;

/// Port for the structured-extraction service (an LLM in production).
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Send `text` with `system_prompt` and return the raw JSON answer.
    async fn complete_json(&self, system_prompt: &str, text: &str) -> Result<String>;
}

/// Rate-limit waits per listing before giving up on it.
const MAX_RATE_LIMIT_WAITS: u32 = 3;

/// Run extraction for one listing text. Never fails: service errors and
/// malformed answers yield exactly one `not_listing` placeholder.
///
/// A rate-limit signal is honoured by sleeping and asking again.
pub async fn extract(client: &dyn ExtractionClient, text: &str) -> Vec<Extraction> {
    let mut waits = 0u32;
    loop {
        match client.complete_json(SYSTEM_PROMPT, text).await {
            Ok(answer) => return interpret_answer(&answer),
            Err(Error::RateLimited { retry_after }) if waits < MAX_RATE_LIMIT_WAITS => {
                waits += 1;
                tracing::warn!(
                    "extraction rate limited, waiting {}s (attempt {waits})",
                    retry_after.as_secs()
                );
                tokio::time::sleep(retry_after).await;
            }
            Err(e) => {
                tracing::warn!("extraction service failed: {e}");
                return vec![Extraction::not_listing()];
            }
        }
    }
}

/// Interpret a raw service answer. One extraction per date range, or one with
/// no dates when the answer has none.
pub fn interpret_answer(answer: &str) -> Vec<Extraction> {
    let Ok(value) = serde_json::from_str::<Value>(strip_code_fence(answer)) else {
        tracing::warn!(
            "extraction answer is not valid JSON: {}",
            answer.chars().take(200).collect::<String>()
        );
        return vec![Extraction::not_listing()];
    };
    let Some(obj) = value.as_object() else {
        tracing::warn!("extraction answer is not a JSON object");
        return vec![Extraction::not_listing()];
    };

    let base = Extraction {
        city: string_field(obj.get("city")),
        country: string_field(obj.get("country")),
        rental_start: None,
        rental_end: None,
        price_eur: price_field(obj.get("price_eur")),
        listing_type: obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(ListingType::parse)
            .unwrap_or_default(),
    };

    let ranges: Vec<&serde_json::Map<String, Value>> = obj
        .get("date_ranges")
        .and_then(Value::as_array)
        .map(|xs| xs.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();

    if ranges.is_empty() {
        return vec![base];
    }

    ranges
        .into_iter()
        .map(|range| {
            let (start, end) = expand_range(
                string_field(range.get("start_date")).as_deref(),
                string_field(range.get("end_date")).as_deref(),
            );
            Extraction {
                rental_start: start,
                rental_end: end,
                ..base.clone()
            }
        })
        .collect()
}

/// Expand month-only bounds. A range given by a single month covers the
/// whole month.
fn expand_range(start: Option<&str>, end: Option<&str>) -> (Option<String>, Option<String>) {
    let is_month = |v: Option<&str>| {
        matches!(
            v.and_then(DateRepr::parse),
            Some(DateRepr::MonthOnly { .. })
        )
    };

    let (start, end) = match (start, end) {
        (Some(s), None) if is_month(Some(s)) => (Some(s), Some(s)),
        (None, Some(e)) if is_month(Some(e)) => (Some(e), Some(e)),
        other => other,
    };

    (
        start.and_then(|s| expand_partial(s, DateRole::Start)),
        end.and_then(|e| expand_partial(e, DateRole::End)),
    )
}

fn string_field(v: Option<&Value>) -> Option<String> {
    let s = match v? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() || s.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(s)
    }
}

fn price_field(v: Option<&Value>) -> Option<f64> {
    let price = match v? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_end_matches(['€', ' '])
            .replace(',', ".")
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    (price.is_finite() && price >= 0.0).then_some(price)
}

/// Some models wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(s: &str) -> &str {
    let t = s.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
