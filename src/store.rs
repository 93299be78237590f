// src/store.rs
//! Whole-file JSON documents: fail-soft load, atomic save (tmp file + rename).

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// Load a JSON document. A missing file yields `T::default()`; an unreadable or
/// corrupt one is logged and also yields `T::default()`.
pub fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state file unreadable, using empty state");
            return T::default();
        }
    };
    if raw.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state file corrupt, using empty state");
            T::default()
        }
    }
}

/// Write the full document to `<path>.tmp` and rename it over `path`, so readers
/// only ever see a complete snapshot.
pub fn save_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut f =
            fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)
            .with_context(|| format!("writing {}", tmp.display()))?;
        f.sync_all().ok();
    }
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_corrupt_files_load_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nope.json");
        let v: Vec<u32> = load_or_default(&p);
        assert!(v.is_empty());

        fs::write(&p, "{ not json").unwrap();
        let v: Vec<u32> = load_or_default(&p);
        assert!(v.is_empty());
    }

    #[test]
    fn save_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested/state.json");
        save_atomic(&p, &vec![1u32, 2, 3]).unwrap();
        let v: Vec<u32> = load_or_default(&p);
        assert_eq!(v, vec![1, 2, 3]);
        assert!(!p.with_extension("json.tmp").exists());
    }
}
