// crates/scale-vision-pipeline/src/loader.rs
//
// Checksummed config load + reload-if-changed. The mtime probe makes the
// per-tick reload check a single stat(); the checksum decides whether a
// rewrite actually changed anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use scale_vision_core::AppConfig;

#[derive(Clone)]
pub struct LoadedConfig {
    pub config:   AppConfig,
    pub checksum: String,
    pub mtime:    SystemTime,
}

pub struct ConfigLoader {
    path:   PathBuf,
    cached: Mutex<Option<LoadedConfig>>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cached: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<LoadedConfig> {
        let mut cached = self.cached.lock();
        let loaded = read_and_parse(&self.path)?;
        *cached = Some(loaded.clone());
        Ok(loaded)
    }

    /// Returns `(current, changed)`. `changed` is true only when the file's
    /// mtime moved forward AND the byte-level checksum differs — a touch
    /// without edits reloads but reports unchanged.
    pub fn reload_if_changed(&self) -> Result<(LoadedConfig, bool)> {
        let mut cached = self.cached.lock();
        let Some(previous) = cached.clone() else {
            drop(cached);
            return Ok((self.load()?, true));
        };
        let mtime = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("stat {}", self.path.display()))?;
        if mtime <= previous.mtime {
            return Ok((previous, false));
        }
        let loaded = read_and_parse(&self.path)?;
        let changed = loaded.checksum != previous.checksum;
        *cached = Some(loaded.clone());
        Ok((loaded, changed))
    }
}

fn read_and_parse(path: &Path) -> Result<LoadedConfig> {
    let payload =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&payload)
        .with_context(|| format!("parse {}", path.display()))?;
    let checksum = format!("{:x}", Sha256::digest(payload.as_bytes()));
    let mtime = fs::metadata(path).and_then(|m| m.modified())?;
    Ok(LoadedConfig { config, checksum, mtime })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(path: &Path, body: &str, mtime_bump: Option<Duration>) {
        let mut file = File::create(path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        if let Some(bump) = mtime_bump {
            // Make the rewrite visible even on coarse-mtime filesystems.
            let later = SystemTime::now() + bump;
            file.set_times(std::fs::FileTimes::new().set_modified(later)).unwrap();
        }
    }

    #[test]
    fn load_checksums_and_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, r#"{"mode": "prod"}"#, None);

        let loader = ConfigLoader::new(&path);
        let loaded = loader.load().unwrap();
        assert_eq!(loaded.config.mode, "prod");
        assert_eq!(loaded.checksum.len(), 64);
    }

    #[test]
    fn unchanged_mtime_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, "{}", None);

        let loader = ConfigLoader::new(&path);
        loader.load().unwrap();
        let (_, changed) = loader.reload_if_changed().unwrap();
        assert!(!changed);
    }

    #[test]
    fn rewrite_reports_changed_and_swaps_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, r#"{"mode": "test"}"#, None);

        let loader = ConfigLoader::new(&path);
        loader.load().unwrap();

        write_config(&path, r#"{"mode": "prod"}"#, Some(Duration::from_secs(2)));
        let (loaded, changed) = loader.reload_if_changed().unwrap();
        assert!(changed);
        assert_eq!(loaded.config.mode, "prod");
    }

    #[test]
    fn touch_without_edit_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, r#"{"mode": "test"}"#, None);

        let loader = ConfigLoader::new(&path);
        loader.load().unwrap();

        write_config(&path, r#"{"mode": "test"}"#, Some(Duration::from_secs(2)));
        let (_, changed) = loader.reload_if_changed().unwrap();
        assert!(!changed);
    }

    #[test]
    fn invalid_rewrite_errors_and_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, r#"{"mode": "test"}"#, None);

        let loader = ConfigLoader::new(&path);
        loader.load().unwrap();

        write_config(&path, "{not json", Some(Duration::from_secs(2)));
        assert!(loader.reload_if_changed().is_err());
    }
}
