//! JSON listing stores.
//!
//! Each store is one JSON file rewritten wholesale per run. Writes go to a
//! sibling temp file first and are renamed into place.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    domain::{EnrichedListing, ListingId, RawListing},
    errors::Error,
    Result,
};

/// `{"listings": [RawListing, ...]}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStore {
    #[serde(default)]
    pub listings: Vec<RawListing>,
}

/// `{"listings": [...], "processed_at": ISO-8601}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedStore {
    #[serde(default)]
    pub listings: Vec<EnrichedListing>,
    #[serde(default)]
    pub processed_at: Option<String>,
}

/// `{"listings": [...], "updated_at": ISO-8601}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStore {
    #[serde(default)]
    pub listings: Vec<EnrichedListing>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RawStore {
    pub fn ids(&self) -> HashSet<ListingId> {
        self.listings.iter().map(|l| l.id).collect()
    }

    /// Append listings whose id is not stored yet. Returns how many were added.
    pub fn merge_new(&mut self, incoming: Vec<RawListing>) -> usize {
        let mut known = self.ids();
        let mut added = 0usize;
        for listing in incoming {
            if known.insert(listing.id) {
                self.listings.push(listing);
                added += 1;
            }
        }
        added
    }
}

impl EnrichedStore {
    pub fn ids(&self) -> impl Iterator<Item = ListingId> + '_ {
        self.listings.iter().map(|l| l.id())
    }
}

impl ArchiveStore {
    pub fn ids(&self) -> impl Iterator<Item = ListingId> + '_ {
        self.listings.iter().map(|l| l.id())
    }
}

/// Ids that have already been enriched (active or archived).
pub fn processed_ids(active: &EnrichedStore, archive: &ArchiveStore) -> HashSet<ListingId> {
    active.ids().chain(archive.ids()).collect()
}

/// Load a store, failing if the file is missing or does not parse.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "store file does not exist".to_string(),
        });
    }
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

/// Load a store, degrading to the empty default when it is missing,
/// unreadable, or corrupt.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        tracing::debug!("store {} not found, starting empty", path.display());
        return T::default();
    }
    let loaded: Result<Option<T>> = fs::read_to_string(path)
        .map_err(Error::from)
        .and_then(|txt| {
            if txt.trim().is_empty() {
                return Ok(None);
            }
            serde_json::from_str(&txt).map(Some).map_err(Error::from)
        });
    match loaded {
        Ok(Some(v)) => v,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::error!("error loading {}: {e}", path.display());
            T::default()
        }
    }
}

/// Write a store as pretty JSON (UTF-8, non-ASCII kept verbatim).
pub fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let txt = serde_json::to_string_pretty(data)?;
    let tmp = temp_path_for(path)?;
    fs::write(&tmp, txt)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| Error::InvalidPath {
        path: path.to_path_buf(),
        reason: "store path has no file name".to_string(),
    })?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(format!(".tmp-{}", std::process::id()));
    Ok(path.with_file_name(tmp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}", std::process::id()))
    }

    fn raw(id: ListingId) -> RawListing {
        RawListing {
            id,
            text: format!("listing {id}"),
            date: "2024-11-10T12:00:00+01:00".to_string(),
            from_user: None,
            media: false,
            photo_paths: None,
            link: format!("https://t.me/c/1/{id}"),
        }
    }

    #[test]
    fn save_then_load_keeps_cyrillic_and_creates_dirs() {
        let dir = tmp_dir("sublet-store");
        let path = dir.join("nested").join("listings.json");
        let mut store = RawStore::default();
        let mut listing = raw(1);
        listing.text = "Сдаю квартиру".to_string();
        store.listings.push(listing);

        save_json(&path, &store).unwrap();
        let txt = fs::read_to_string(&path).unwrap();
        assert!(txt.contains("Сдаю квартиру"));

        let back: RawStore = load_json(&path).unwrap();
        assert_eq!(back, store);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_or_missing_store_degrades_to_default() {
        let dir = tmp_dir("sublet-store-corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("listings_enriched.json");

        let missing: EnrichedStore = load_json_or_default(&path);
        assert!(missing.listings.is_empty());

        fs::write(&path, "{ not json").unwrap();
        let corrupt: EnrichedStore = load_json_or_default(&path);
        assert_eq!(corrupt, EnrichedStore::default());
        assert!(load_json::<EnrichedStore>(&path).is_err());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn strict_load_reports_missing_file() {
        let path = tmp_dir("sublet-missing").join("listings.json");
        assert!(matches!(
            load_json::<RawStore>(&path),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn merge_new_skips_known_ids() {
        let mut store = RawStore {
            listings: vec![raw(1), raw(2)],
        };
        let added = store.merge_new(vec![raw(2), raw(3), raw(3)]);
        assert_eq!(added, 1);
        assert_eq!(
            store.listings.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
