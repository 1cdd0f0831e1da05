use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use std::env;
use std::path::{Path, PathBuf};

use medtrack_core::models::PhotoPolicy;

pub const DEFAULT_PHOTO_BUCKET: &str = "medication-photos";

/// Connection settings for a hosted store. Absent means the local SQLite store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
    pub bucket: String,
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub session_path: PathBuf,
    pub remote: Option<RemoteConfig>,
    pub photo_policy: PhotoPolicy,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "medtrack").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Self::from_lookup(&data_dir, |key| env::var(key).ok())
    }

    /// Build the config for `data_dir`, reading settings through `lookup`.
    fn from_lookup(data_dir: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote = match get("MEDTRACK_STORE_URL") {
            Some(url) => Some(RemoteConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key: get("MEDTRACK_STORE_KEY").ok_or_else(|| {
                    anyhow!(
                        "Missing required env var: MEDTRACK_STORE_KEY (needed with MEDTRACK_STORE_URL)"
                    )
                })?,
                bucket: get("MEDTRACK_PHOTO_BUCKET").unwrap_or_else(|| DEFAULT_PHOTO_BUCKET.into()),
            }),
            None => None,
        };

        let photo_policy = match get("MEDTRACK_PHOTO_POLICY") {
            Some(v) => v
                .parse::<PhotoPolicy>()
                .with_context(|| format!("Invalid MEDTRACK_PHOTO_POLICY '{v}'"))?,
            None => PhotoPolicy::default(),
        };

        Ok(Config {
            db_path: data_dir.join("medtrack.db"),
            data_dir: data_dir.to_path_buf(),
            session_path: data_dir.join("session"),
            remote,
            photo_policy,
        })
    }

    /// The signed-in user id, if a session was saved.
    pub fn load_session(&self) -> Result<Option<String>> {
        if !self.session_path.exists() {
            return Ok(None);
        }
        let user =
            std::fs::read_to_string(&self.session_path).context("Failed to read session file")?;
        let user = user.trim();
        Ok((!user.is_empty()).then(|| user.to_string()))
    }

    pub fn save_session(&self, user_id: &str) -> Result<()> {
        std::fs::write(&self.session_path, user_id).context("Failed to write session file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.session_path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set session file permissions")?;
        }
        Ok(())
    }

    /// Remove the saved session. Returns whether there was one.
    pub fn clear_session(&self) -> Result<bool> {
        if !self.session_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.session_path).context("Failed to remove session file")?;
        Ok(true)
    }
}
