use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crawler::filter::FilterRules;
use crate::pipeline::PipelineSettings;

/// Name of the profile used when none is specified
pub const DEFAULT_PROFILE: &str = "default";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CrawlerConfig {
    pub pipeline: PipelineSettings,
    pub site: SiteSettings,
    pub fetch: FetchSettings,
    pub storage: StorageSettings,
}

/// Site-level crawling settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SiteSettings {
    /// Crawler implementation bound to sites created with this profile
    pub crawler_id: String,

    /// URL admission rules; an empty domain allow-list is narrowed to the
    /// crawled site's own domain at job start
    pub rules: FilterRules,
}

/// HTTP fetch settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FetchSettings {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    pub user_agent: String,
}

/// Persistence backend selection
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

/// Storage settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Database file path for the sqlite backend
    pub database_path: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            site: SiteSettings {
                crawler_id: "site".to_string(),
                rules: FilterRules {
                    allowed_domains: vec![],
                    include_patterns: vec![],
                    exclude_patterns: vec![
                        r"\.(jpg|jpeg|png|gif|ico|svg|css|js|woff2?)$".to_string(),
                    ],
                },
            },
            fetch: FetchSettings {
                timeout_secs: 30,
                user_agent: format!("trawler/{}", env!("CARGO_PKG_VERSION")),
            },
            storage: StorageSettings {
                backend: StorageBackend::Sqlite,
                database_path: "trawler.db".to_string(),
            },
        }
    }
}

impl CrawlerConfig {
    /// Every profile, the default included, is one YAML file directly in the
    /// config directory.
    fn profile_path(name: &str) -> PathBuf {
        let dir = directories::ProjectDirs::from("dev", "trawler", "trawler")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./config"));
        dir.join(format!("{}.yaml", name))
    }

    /// Load a profile by name. A missing default profile is written out with
    /// the built-in settings on first use; any other missing profile is an
    /// error.
    pub fn load(name: &str) -> Result<Self> {
        let path = Self::profile_path(name);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_yaml::from_str(&contents).context(format!(
                "Failed to parse profile '{}' at {}",
                name,
                path.display()
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound && name == DEFAULT_PROFILE => {
                info!("No configuration yet, writing defaults to {}", path.display());
                let config = Self::default();
                config.save(DEFAULT_PROFILE)?;
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                anyhow::bail!("Profile '{}' not found (expected {})", name, path.display())
            }
            Err(e) => Err(e).context(format!("Failed to read profile '{}'", name)),
        }
    }

    /// Write this configuration out as the named profile.
    pub fn save(&self, name: &str) -> Result<()> {
        let path = Self::profile_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context(format!(
                "Failed to create config directory: {}",
                parent.display()
            ))?;
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize configuration")?;
        fs::write(&path, contents)
            .context(format!("Failed to write profile to {}", path.display()))
    }

    /// Names of every stored profile, sorted.
    pub fn list_profiles() -> Result<Vec<String>> {
        let dir = Self::profile_path(DEFAULT_PROFILE)
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).context(format!("Failed to read config directory: {}", dir.display()))
            }
        };

        let mut profiles: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(String::from)
            })
            .collect();
        profiles.sort();
        Ok(profiles)
    }
}
