use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tokens are treated as expired this long before they actually are.
const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS) > now
    }
}

/// JSON file holding the last token pair.
pub struct TokenCache {
    path: PathBuf,
    token: Option<CachedToken>,
}

impl TokenCache {
    /// Never fails: a missing, unreadable or corrupt file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let token = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CachedToken>(&content) {
                Ok(token) => Some(token),
                Err(e) => {
                    tracing::warn!(
                        "Token cache {} is corrupt ({}), starting fresh",
                        path.display(),
                        e
                    );
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(
                    "Token cache {} is unreadable ({}), starting fresh",
                    path.display(),
                    e
                );
                None
            }
        };

        Self { path, token }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Option<&CachedToken> {
        self.token.as_ref()
    }

    pub fn store(&mut self, token: CachedToken) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        // mode() only applies when the file is created
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(serde_json::to_string_pretty(&token)?.as_bytes())?;

        self.token = Some(token);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.token = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn token() -> CachedToken {
        CachedToken {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::load(dir.path().join("token_cache.json"));
        assert!(cache.token().is_none());
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache.json");
        fs::write(&path, "{not json").unwrap();

        let cache = TokenCache::load(&path);
        assert!(cache.token().is_none());
    }

    #[test]
    fn extra_keys_in_file_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache.json");
        fs::write(
            &path,
            r#"{"access_token":"access","expires_at":"2030-01-01T00:00:00Z","account":"Me"}"#,
        )
        .unwrap();

        let cache = TokenCache::load(&path);
        let token = cache.token().unwrap();
        assert_eq!(token.access_token, "access");
        assert_eq!(token.refresh_token, None);
    }

    #[test]
    fn stored_token_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("token_cache.json");

        let mut cache = TokenCache::load(&path);
        cache.store(token()).unwrap();

        let reloaded = TokenCache::load(&path);
        assert_eq!(reloaded.token(), Some(&token()));
    }

    #[cfg(unix)]
    #[test]
    fn stored_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut cache = TokenCache::load(dir.path().join("token_cache.json"));
        cache.store(token()).unwrap();

        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn existing_loose_file_is_tightened_before_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_cache.json");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let mut cache = TokenCache::load(&path);
        cache.store(token()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(TokenCache::load(&path).token(), Some(&token()));
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TokenCache::load(dir.path().join("token_cache.json"));
        cache.store(token()).unwrap();

        cache.clear().unwrap();
        assert!(cache.token().is_none());
        assert!(!cache.path().exists());
        // clearing twice is fine
        cache.clear().unwrap();
    }

    #[test]
    fn freshness_respects_skew() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let mut t = token();

        t.expires_at = now + Duration::seconds(600);
        assert!(t.is_fresh(now));

        t.expires_at = now + Duration::seconds(30);
        assert!(!t.is_fresh(now));

        t.expires_at = now - Duration::seconds(1);
        assert!(!t.is_fresh(now));
    }
}
