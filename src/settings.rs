#![forbid(unsafe_code)]

//! Per-project knobs stored in `<root>/mirror.toml`. Every key is optional so
//! a hand-trimmed file keeps working.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::write_atomic;

pub const SETTINGS_FILE: &str = "mirror.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub workers: WorkerSettings,
    pub download: DownloadSettings,
    pub http: HttpSettings,
}

/// Upper bounds on concurrently running tasks per work category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Remote playlist listings.
    pub playlists: usize,
    /// Thumbnail fetches, media downloads and legacy import tasks.
    pub videos: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            playlists: 4,
            videos: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub program: String,
    pub format: String,
    /// Caption languages requested from the downloader; empty disables them.
    pub captions: Vec<String>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            format: "bestvideo[height<=1080]+bestaudio/best".to_string(),
            captions: vec!["en".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_thumbnail_bytes: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_thumbnail_bytes: 2 * 1024 * 1024,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl ProjectSettings {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let mut settings: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        settings.workers.playlists = settings.workers.playlists.max(1);
        settings.workers.videos = settings.workers.videos.max(1);
        Ok(settings)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let rendered = toml::to_string_pretty(self).context("serializing project settings")?;
        write_atomic(&root.join(SETTINGS_FILE), rendered.as_bytes())
    }
}
