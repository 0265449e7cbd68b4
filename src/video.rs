#![forbid(unsafe_code)]

//! Metadata record for a single video. Field names mirror the JSON written to
//! `videos.json` so hand inspection of the catalog stays straightforward.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteVideo;

/// One piece of content, metadata-only until its media file is pulled.
///
/// `id` never changes once the record exists. Videos know nothing about the
/// playlists that reference them; that relation lives in the membership index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Remote channel identifier.
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Inline `data:` URI, `None` until a thumbnail fetch succeeds.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Overrides the canonical watch URL derived from `id`.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Media path relative to the project root.
    #[serde(default)]
    pub file_ref: Option<String>,
    #[serde(default)]
    pub caption_refs: Option<Vec<String>>,
}

impl Video {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            channel: String::new(),
            channel_name: String::new(),
            published_at: None,
            thumbnail: None,
            source_url: None,
            file_ref: None,
            caption_refs: None,
        }
    }

    /// Builds a metadata-only record from a remote snippet. The thumbnail is
    /// filled in later by a separate best-effort fetch.
    pub fn from_remote(remote: &RemoteVideo) -> Self {
        Self {
            id: remote.video_id.clone(),
            label: remote.title.clone(),
            description: remote.description.clone(),
            channel: remote.channel_id.clone(),
            channel_name: remote.channel_name.clone(),
            published_at: remote.published_at,
            thumbnail: None,
            source_url: None,
            file_ref: None,
            caption_refs: None,
        }
    }

    /// URL handed to the downloader.
    pub fn url(&self) -> String {
        match &self.source_url {
            Some(url) => url.clone(),
            None => watch_url(&self.id),
        }
    }

    /// A video is complete once its media file has been pulled.
    pub fn is_complete(&self) -> bool {
        self.file_ref.is_some()
    }

    /// Every project-relative file this record points at.
    pub fn file_refs(&self) -> impl Iterator<Item = &str> {
        self.file_ref
            .iter()
            .chain(self.caption_refs.iter().flatten())
            .map(String::as_str)
    }

    /// Single-line label used as the display hint in playlist files.
    pub fn display_label(&self) -> String {
        self.label
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Encodes image bytes as an inline `data:` URI for the `thumbnail` field.
pub fn thumbnail_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Splits a `data:<mime>;base64,<payload>` URI back into mime and bytes.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let (header, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((mime.to_string(), bytes))
}
