use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono_tz::Tz;

use crate::{errors::Error, Result};

const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Typed configuration for the listing pipeline.
///
/// Credentials are optional at load time; each subcommand asks for the ones it
/// needs via `require_*` so a missing key aborts before any processing starts.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,
    /// Separate bot for the collector. Two pollers cannot share one token.
    pub telegram_collector_token: Option<String>,
    pub telegram_chat_id: Option<i64>,

    // Extraction service
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
    pub extraction_timeout: Duration,

    // Storage
    pub data_dir: PathBuf,
    pub listings_file: PathBuf,
    pub enriched_file: PathBuf,
    pub archive_file: PathBuf,
    pub media_dir: PathBuf,

    // Time
    pub timezone: Tz,
    pub collect_days: i64,
    pub recency_window: chrono::Duration,

    // Bot
    pub verification_code_ttl: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (env in production, maps in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN");
        let telegram_collector_token = get("TELEGRAM_COLLECTOR_TOKEN");
        let telegram_chat_id = match get("TELEGRAM_CHAT_ID") {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("TELEGRAM_CHAT_ID must be a numeric chat id, got {raw}"))
            })?),
            None => None,
        };

        let openai_api_key = get("OPENAI_API_KEY");
        let openai_model = get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let openai_base_url = get("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let extraction_timeout = Duration::from_secs(
            get("EXTRACTION_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(60),
        );

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        let listings_file = data_dir.join("listings.json");
        let enriched_file = data_dir.join("listings_enriched.json");
        let archive_file = data_dir.join("listings_archive.json");
        let media_dir = data_dir.join("media");

        let tz_name = get("TIMEZONE").unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let timezone: Tz = tz_name
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid TIMEZONE {tz_name}: {e}")))?;

        let collect_days = get("COLLECT_DAYS")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .unwrap_or(9)
            .max(0);
        let recency_window = chrono::Duration::days(
            get("RECENCY_DAYS")
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(2),
        );

        let verification_code_ttl = Duration::from_secs(
            get("VERIFICATION_CODE_TTL")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(300),
        );

        Ok(Self {
            telegram_bot_token,
            telegram_collector_token,
            telegram_chat_id,
            openai_api_key,
            openai_model,
            openai_base_url,
            extraction_timeout,
            data_dir,
            listings_file,
            enriched_file,
            archive_file,
            media_dir,
            timezone,
            collect_days,
            recency_window,
            verification_code_ttl,
        })
    }

    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY environment variable is required".to_string())
        })
    }

    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })
    }

    /// Collector token (falling back to the bot token) plus the chat listings
    /// are scraped from.
    pub fn require_telegram(&self) -> Result<(&str, i64)> {
        let token = match self.telegram_collector_token.as_deref() {
            Some(t) => t,
            None => self.require_bot_token()?,
        };
        let chat_id = self.telegram_chat_id.ok_or_else(|| {
            Error::Config("TELEGRAM_CHAT_ID environment variable is required".to_string())
        })?;
        Ok((token, chat_id))
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_point_into_data_dir() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.listings_file, PathBuf::from("data/listings.json"));
        assert_eq!(cfg.enriched_file, PathBuf::from("data/listings_enriched.json"));
        assert_eq!(cfg.archive_file, PathBuf::from("data/listings_archive.json"));
        assert_eq!(cfg.media_dir, PathBuf::from("data/media"));
        assert_eq!(cfg.timezone, chrono_tz::Europe::Berlin);
        assert_eq!(cfg.collect_days, 9);
        assert_eq!(cfg.recency_window, chrono::Duration::days(2));
        assert_eq!(cfg.openai_model, "gpt-4o");
    }

    #[test]
    fn credentials_are_required_lazily() {
        let cfg = load(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert!(cfg.require_openai_key().is_err());
        assert!(cfg.require_bot_token().is_ok());
        assert!(cfg.require_telegram().is_err());

        let cfg = load(&[("TELEGRAM_BOT_TOKEN", "t"), ("TELEGRAM_CHAT_ID", "-1001234")]).unwrap();
        assert_eq!(cfg.require_telegram().unwrap(), ("t", -1001234));
    }

    #[test]
    fn collector_uses_its_own_token_when_set() {
        let cfg = load(&[
            ("TELEGRAM_BOT_TOKEN", "bot"),
            ("TELEGRAM_COLLECTOR_TOKEN", "collector"),
            ("TELEGRAM_CHAT_ID", "-1001234"),
        ])
        .unwrap();
        assert_eq!(cfg.require_bot_token().unwrap(), "bot");
        assert_eq!(cfg.require_telegram().unwrap(), ("collector", -1001234));

        let cfg = load(&[("TELEGRAM_COLLECTOR_TOKEN", "c"), ("TELEGRAM_CHAT_ID", "5")]).unwrap();
        assert!(cfg.require_bot_token().is_err());
        assert_eq!(cfg.require_telegram().unwrap(), ("c", 5));
    }

    #[test]
    fn rejects_bad_timezone_and_chat_id() {
        assert!(matches!(load(&[("TIMEZONE", "Mars/Olympus")]), Err(Error::Config(_))));
        assert!(matches!(load(&[("TELEGRAM_CHAT_ID", "hse")]), Err(Error::Config(_))));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("OPENAI_MODEL", "  "), ("DATA_DIR", "/srv/sublet")]).unwrap();
        assert_eq!(cfg.openai_model, "gpt-4o");
        assert_eq!(cfg.listings_file, PathBuf::from("/srv/sublet/listings.json"));
    }
}
