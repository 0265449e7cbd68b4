#![forbid(unsafe_code)]

//! Remote playlist/video listing collaborator.
//!
//! The engine only depends on [`RemoteSource`]; [`YouTubeClient`] implements it
//! on top of the YouTube Data API v3 with blocking `ureq` calls, so async
//! callers run it inside `spawn_blocking`.

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: &str = "50";

/// One remote playlist entry or single-video lookup result.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteVideo {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnails: Vec<Thumbnail>,
    /// Private or deleted entries still occupy a slot in the listing.
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
}

impl RemoteVideo {
    /// Widest advertised thumbnail.
    pub fn best_thumbnail(&self) -> Option<&str> {
        self.thumbnails
            .iter()
            .max_by_key(|thumb| thumb.width.unwrap_or(0))
            .map(|thumb| thumb.url.as_str())
    }
}

/// Raw image payload returned by a thumbnail download.
#[derive(Debug, Clone)]
pub struct ThumbnailBytes {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

pub trait RemoteSource: Send + Sync {
    /// Returns every entry of the remote playlist in remote order, following
    /// page cursors until none is returned.
    fn playlist_items(&self, playlist_id: &str) -> Result<Vec<RemoteVideo>>;

    /// Looks up a single video; `Ok(None)` when the remote does not know it.
    fn video(&self, video_id: &str) -> Result<Option<RemoteVideo>>;

    fn thumbnail(&self, url: &str) -> Result<ThumbnailBytes>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsPage {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Snippet,
    #[serde(default)]
    status: Option<ItemStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemStatus {
    privacy_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosPage {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Snippet,
}

/// Shared shape of `playlistItems` and `videos` snippets. Playlist entries
/// carry the uploader under `videoOwner*`, plain videos under `channel*`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<String>,
    channel_id: Option<String>,
    channel_title: Option<String>,
    video_owner_channel_id: Option<String>,
    video_owner_channel_title: Option<String>,
    #[serde(default)]
    thumbnails: std::collections::BTreeMap<String, SnippetThumbnail>,
    resource_id: Option<ResourceId>,
    video_published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnippetThumbnail {
    url: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

impl Snippet {
    fn into_remote(self, video_id: String, privacy: Option<&str>) -> RemoteVideo {
        let unavailable = matches!(privacy, Some("private" | "privacyStatusUnspecified"))
            || self.title == "Private video"
            || self.title == "Deleted video";
        let published_at = self
            .video_published_at
            .as_deref()
            .or(self.published_at.as_deref())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc));
        let thumbnails = self
            .thumbnails
            .into_values()
            .map(|thumb| Thumbnail {
                url: thumb.url,
                width: thumb.width,
            })
            .collect();
        RemoteVideo {
            video_id,
            title: self.title,
            description: self.description,
            channel_id: self
                .video_owner_channel_id
                .or(self.channel_id)
                .unwrap_or_default(),
            channel_name: self
                .video_owner_channel_title
                .or(self.channel_title)
                .unwrap_or_default(),
            published_at,
            thumbnails,
            unavailable,
        }
    }
}

fn parse_playlist_page(raw: &str) -> Result<(Vec<RemoteVideo>, Option<String>)> {
    let page: PlaylistItemsPage =
        serde_json::from_str(raw).context("parsing playlistItems response")?;
    let mut videos = Vec::with_capacity(page.items.len());
    for item in page.items {
        let Some(video_id) = item
            .snippet
            .resource_id
            .as_ref()
            .and_then(|resource| resource.video_id.clone())
        else {
            continue;
        };
        let privacy = item.status.and_then(|status| status.privacy_status);
        videos.push(item.snippet.into_remote(video_id, privacy.as_deref()));
    }
    let next = page.next_page_token.filter(|token| !token.is_empty());
    Ok((videos, next))
}

fn parse_videos_page(raw: &str) -> Result<Option<RemoteVideo>> {
    let page: VideosPage = serde_json::from_str(raw).context("parsing videos response")?;
    Ok(page
        .items
        .into_iter()
        .next()
        .map(|item| item.snippet.into_remote(item.id, None)))
}

/// Blocking YouTube Data API client.
pub struct YouTubeClient {
    agent: ureq::Agent,
    api_key: String,
    api_base: String,
    max_thumbnail_bytes: u64,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration, max_thumbnail_bytes: u64) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            api_key: api_key.into(),
            api_base: API_BASE.to_string(),
            max_thumbnail_bytes,
        }
    }

    fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/{endpoint}", self.api_base);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (key, value) in query {
            request = request.query(key, value);
        }
        match request.call() {
            Ok(response) => response
                .into_string()
                .with_context(|| format!("reading {endpoint} response")),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                bail!("{endpoint} request failed with HTTP {code}: {}", body.trim())
            }
            Err(err) => Err(anyhow!(err)).with_context(|| format!("calling {endpoint}")),
        }
    }
}

impl RemoteSource for YouTubeClient {
    fn playlist_items(&self, playlist_id: &str) -> Result<Vec<RemoteVideo>> {
        let mut videos = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![
                ("part", "snippet,status"),
                ("maxResults", PAGE_SIZE),
                ("playlistId", playlist_id),
            ];
            if let Some(token) = cursor.as_deref() {
                query.push(("pageToken", token));
            }
            let raw = self
                .get_json("playlistItems", &query)
                .with_context(|| format!("listing playlist {playlist_id}"))?;
            let (page, next) = parse_playlist_page(&raw)?;
            videos.extend(page);
            match next {
                Some(token) => cursor = Some(token),
                None => break,
            }
        }
        Ok(videos)
    }

    fn video(&self, video_id: &str) -> Result<Option<RemoteVideo>> {
        let raw = self
            .get_json("videos", &[("part", "snippet"), ("id", video_id)])
            .with_context(|| format!("looking up video {video_id}"))?;
        parse_videos_page(&raw)
    }

    fn thumbnail(&self, url: &str) -> Result<ThumbnailBytes> {
        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("downloading thumbnail {url}"))?;
        let content_type = Some(response.content_type().to_string())
            .filter(|value| value.starts_with("image/"));
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_thumbnail_bytes + 1)
            .read_to_end(&mut bytes)
            .with_context(|| format!("reading thumbnail {url}"))?;
        if bytes.len() as u64 > self.max_thumbnail_bytes {
            bail!("thumbnail {url} exceeds {} bytes", self.max_thumbnail_bytes);
        }
        Ok(ThumbnailBytes {
            content_type,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "nextPageToken": "CAUQAA",
        "items": [
            {
                "snippet": {
                    "publishedAt": "2024-05-01T10:00:00Z",
                    "title": "First upload",
                    "description": "hello",
                    "videoOwnerChannelId": "UCowner",
                    "videoOwnerChannelTitle": "Owner",
                    "channelId": "UCcurator",
                    "channelTitle": "Curator",
                    "thumbnails": {
                        "default": {"url": "https://i/default.jpg", "width": 120, "height": 90},
                        "high": {"url": "https://i/high.jpg", "width": 480, "height": 360}
                    },
                    "resourceId": {"kind": "youtube#video", "videoId": "vid00000001"}
                },
                "status": {"privacyStatus": "public"}
            },
            {
                "snippet": {
                    "title": "Private video",
                    "description": "This video is private.",
                    "resourceId": {"videoId": "vid00000002"}
                },
                "status": {"privacyStatus": "private"}
            },
            {
                "snippet": {"title": "no resource"}
            }
        ]
    }"#;

    #[test]
    fn parses_playlist_page() {
        let (videos, next) = parse_playlist_page(PAGE).unwrap();
        assert_eq!(next.as_deref(), Some("CAUQAA"));
        assert_eq!(videos.len(), 2);

        let first = &videos[0];
        assert_eq!(first.video_id, "vid00000001");
        assert_eq!(first.channel_id, "UCowner");
        assert_eq!(first.channel_name, "Owner");
        assert!(!first.unavailable);
        assert_eq!(first.best_thumbnail(), Some("https://i/high.jpg"));
        assert_eq!(
            first.published_at.map(|ts| ts.to_rfc3339()),
            Some("2024-05-01T10:00:00+00:00".to_string())
        );

        assert!(videos[1].unavailable);
        assert_eq!(videos[1].best_thumbnail(), None);
    }

    #[test]
    fn last_page_has_no_cursor() {
        let (videos, next) = parse_playlist_page(r#"{"items": [], "nextPageToken": ""}"#).unwrap();
        assert!(videos.is_empty());
        assert!(next.is_none());
    }

    #[test]
    fn parses_single_video_lookup() {
        let raw = r#"{"items": [{"id": "abc", "snippet": {
            "title": "Solo", "channelId": "UCx", "channelTitle": "X",
            "publishedAt": "2023-01-02T03:04:05Z", "thumbnails": {}
        }}]}"#;
        let video = parse_videos_page(raw).unwrap().unwrap();
        assert_eq!(video.video_id, "abc");
        assert_eq!(video.channel_id, "UCx");
        assert_eq!(video.channel_name, "X");

        assert!(parse_videos_page(r#"{"items": []}"#).unwrap().is_none());
    }

    #[test]
    fn deleted_entries_are_unavailable() {
        let raw = r#"{"items": [{"snippet": {"title": "Deleted video",
            "resourceId": {"videoId": "gone"}}}]}"#;
        let (videos, _) = parse_playlist_page(raw).unwrap();
        assert!(videos[0].unavailable);
    }
}
