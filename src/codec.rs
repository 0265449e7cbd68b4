#![forbid(unsafe_code)]

//! On-disk formats: the catalog as one JSON object keyed by video id, and one
//! line-oriented text file per playlist:
//!
//! ```text
//! id = <playlist id>
//! url = <remote playlist id>
//!
//! > optional annotation lines
//! <video id> <display hint, ignored on reload>
//! ```
//!
//! Both writers are deterministic so saving an unchanged project rewrites
//! every file byte for byte.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand_core::{OsRng, RngCore};
use tempfile::NamedTempFile;

use crate::catalog::Catalog;
use crate::error::ArchiveError;
use crate::labels::{self, Labels};
use crate::playlist::Playlist;

pub const LABEL_MARKER: char = '>';

pub fn read_catalog(path: &Path) -> Result<Catalog> {
    if !path.exists() {
        return Ok(Catalog::new());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

pub fn render_catalog(catalog: &Catalog) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(catalog).context("serializing catalog")?;
    rendered.push('\n');
    Ok(rendered)
}

pub fn write_catalog(path: &Path, catalog: &Catalog) -> Result<()> {
    write_atomic(path, render_catalog(catalog)?.as_bytes())
}

/// Parses one playlist file. `label` comes from the file name; a missing
/// `id = ` header yields a freshly generated id that is persisted on the next
/// save. Every referenced video must already exist in `catalog`.
pub fn parse_playlist(label: &str, file: &Path, content: &str, catalog: &Catalog) -> Result<Playlist> {
    parse_playlist_with(label, file, content, catalog, generate_playlist_id)
}

/// Like [`parse_playlist`], but a missing `id = ` header takes its id from
/// `fallback_id`.
pub fn parse_playlist_with(
    label: &str,
    file: &Path,
    content: &str,
    catalog: &Catalog,
    fallback_id: impl FnOnce() -> String,
) -> Result<Playlist> {
    let mut id: Option<String> = None;
    let mut source_id: Option<String> = None;
    let mut videos: Vec<String> = Vec::new();
    let mut labels = Labels::new();

    let malformed = |line: usize, reason: String| ArchiveError::MalformedPlaylist {
        file: file.to_path_buf(),
        line,
        reason,
    };

    for (offset, raw) in content.lines().enumerate() {
        let line_number = offset + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(value) = header_value(line, "id") {
            if id.is_some() {
                return Err(malformed(line_number, "duplicate id line".into()).into());
            }
            if value.is_empty() {
                return Err(malformed(line_number, "empty playlist id".into()).into());
            }
            id = Some(value.to_string());
            continue;
        }

        if let Some(value) = header_value(line, "url") {
            source_id = Some(normalize_source(value)).filter(|value| !value.is_empty());
            continue;
        }

        if line.starts_with(LABEL_MARKER) {
            let text = line.trim_start_matches(LABEL_MARKER).trim();
            labels::attach(&mut labels, videos.len(), text);
            continue;
        }

        let video_id = line.split_whitespace().next().unwrap_or(line);
        if !catalog.contains(video_id) {
            return Err(ArchiveError::UnknownVideo {
                file: file.to_path_buf(),
                line: line_number,
                id: video_id.to_string(),
            }
            .into());
        }
        if videos.iter().any(|existing| existing == video_id) {
            return Err(malformed(line_number, format!("video {video_id} listed twice")).into());
        }
        videos.push(video_id.to_string());
    }

    let mut playlist = Playlist::new(id.unwrap_or_else(fallback_id), label, source_id);
    playlist.videos = videos;
    playlist.labels = labels;
    Ok(playlist)
}

pub fn render_playlist(playlist: &Playlist, catalog: &Catalog) -> String {
    let mut out = String::new();
    out.push_str(&format!("id = {}\n", playlist.id));
    if let Some(source) = &playlist.source_id {
        out.push_str(&format!("url = {source}\n"));
    }
    out.push('\n');

    let labels = playlist.labels();
    for (index, video_id) in playlist.videos().iter().enumerate() {
        if let Some(text) = labels.get(&index) {
            push_label(&mut out, text);
        }
        let hint = catalog
            .get(video_id)
            .map(|video| video.display_label())
            .unwrap_or_default();
        if hint.is_empty() {
            out.push_str(&format!("{video_id}\n"));
        } else {
            out.push_str(&format!("{video_id} {hint}\n"));
        }
    }
    for (_, text) in labels.range(playlist.len()..) {
        push_label(&mut out, text);
    }
    out
}

fn push_label(out: &mut String, text: &str) {
    for line in text.split('\n') {
        if line.is_empty() {
            out.push(LABEL_MARKER);
        } else {
            out.push_str(&format!("{LABEL_MARKER} {line}"));
        }
        out.push('\n');
    }
}

/// Matches `key = value` headers, returning the trimmed value.
fn header_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)?
        .trim_start()
        .strip_prefix('=')
        .map(str::trim)
}

/// Accepts a bare playlist id or any URL carrying a `list=` parameter.
pub fn normalize_source(raw: &str) -> String {
    let raw = raw.trim();
    match raw.split_once("list=") {
        Some((_, rest)) => rest.split('&').next().unwrap_or(rest).trim().to_string(),
        None => raw.to_string(),
    }
}

/// 11 URL-safe characters of OS randomness.
pub fn generate_playlist_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Writes through a temporary sibling file and renames it into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temporary file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("writing {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
