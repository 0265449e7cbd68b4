#![forbid(unsafe_code)]

//! Merges a remote playlist listing into the local catalog and playlist.
//!
//! The merge is synchronous: callers fetch the listing first (possibly
//! concurrently for several playlists) and then apply each one here, in order,
//! so a half-merged playlist is never observable. Existing members are never
//! reordered; only videos new to the playlist get placed.

use anyhow::Result;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::error::ArchiveError;
use crate::labels;
use crate::playlist::{Playlist, PlaylistStore};
use crate::remote::RemoteVideo;
use crate::video::Video;

/// Annotation text that marks where freshly discovered videos collect.
pub const NEW_BAND: &str = "New";

/// What a single merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub playlist_id: String,
    /// Videos created in the catalog by this merge.
    pub created: Vec<String>,
    /// Videos inserted into the playlist, in remote order.
    pub inserted: Vec<String>,
    /// Remote entries skipped as private or deleted.
    pub unavailable: Vec<String>,
}

impl MergeReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.inserted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    At(usize),
    /// Append and start a fresh `New` band at the landing index.
    AppendMarked,
}

/// Applies `items` (remote order) to the playlist `playlist_id`.
pub fn merge_remote(
    catalog: &mut Catalog,
    playlists: &mut PlaylistStore,
    playlist_id: &str,
    items: &[RemoteVideo],
) -> Result<MergeReport> {
    let mut report = MergeReport {
        playlist_id: playlist_id.to_string(),
        ..MergeReport::default()
    };
    require(playlists, playlist_id)?;
    let mut seen: Vec<&str> = Vec::with_capacity(items.len());

    for item in items {
        if item.unavailable {
            warn!(playlist = playlist_id, "skipping unavailable video {}", item.video_id);
            report.unavailable.push(item.video_id.clone());
            continue;
        }

        let video_id = item.video_id.as_str();
        if !catalog.contains(video_id) {
            catalog.add(Video::from_remote(item));
            report.created.push(video_id.to_string());
        }

        let playlist = require(playlists, playlist_id)?;
        if !playlist.contains(video_id) {
            match placement(playlist, &seen) {
                Placement::At(index) => {
                    playlists.insert_at(playlist_id, video_id, index)?;
                }
                Placement::AppendMarked => {
                    let index = playlist.len();
                    playlists.insert_at(playlist_id, video_id, index)?;
                    playlists.annotate(playlist_id, index, NEW_BAND)?;
                }
            }
            report.inserted.push(video_id.to_string());
        }
        seen.push(video_id);
    }

    debug!(
        playlist = playlist_id,
        created = report.created.len(),
        inserted = report.inserted.len(),
        "merged remote listing"
    );
    Ok(report)
}

fn require<'a>(playlists: &'a PlaylistStore, playlist_id: &str) -> Result<&'a Playlist> {
    playlists
        .get(playlist_id)
        .ok_or_else(|| ArchiveError::PlaylistNotFound(playlist_id.to_string()).into())
}

/// Picks where a video new to `playlist` goes, given the ids already handled
/// in this batch (remote order).
fn placement(playlist: &Playlist, seen: &[&str]) -> Placement {
    if let Some(anchor) = seen.iter().rev().find_map(|id| playlist.index_of(id)) {
        return Placement::At(anchor + 1);
    }

    let len = playlist.len();
    let bands = playlist.labels();
    if bands.is_empty() {
        return Placement::At(len);
    }
    match labels::find(bands, NEW_BAND) {
        Some(start) => {
            let end = labels::next_after(bands, start).map_or(len, |next| next.min(len));
            Placement::At(end)
        }
        None => Placement::AppendMarked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn remote(id: &str) -> RemoteVideo {
        RemoteVideo {
            video_id: id.into(),
            title: format!("Title {id}"),
            description: String::new(),
            channel_id: "UC1".into(),
            channel_name: "Channel".into(),
            published_at: None,
            thumbnails: Vec::new(),
            unavailable: false,
        }
    }

    fn listing(ids: &[&str]) -> Vec<RemoteVideo> {
        ids.iter().map(|id| remote(id)).collect()
    }

    fn setup(members: &[&str], bands: &[(usize, &str)]) -> (Catalog, PlaylistStore) {
        let mut catalog = Catalog::new();
        let mut playlist = Playlist::new("p", "Synced", Some("PL1".into()));
        for id in members {
            catalog.add(Video::new(*id, format!("Title {id}")));
            playlist.videos.push(id.to_string());
        }
        for (index, text) in bands {
            playlist.labels.insert(*index, text.to_string());
        }
        let store = PlaylistStore::from_playlists([playlist]).unwrap();
        (catalog, store)
    }

    fn videos(store: &PlaylistStore) -> Vec<String> {
        store.get("p").unwrap().videos().to_vec()
    }

    fn bands(store: &PlaylistStore) -> BTreeMap<usize, String> {
        store.get("p").unwrap().labels().clone()
    }

    #[test]
    fn appends_when_unlabelled() {
        let (mut catalog, mut store) = setup(&["A", "B"], &[]);
        let report = merge_remote(&mut catalog, &mut store, "p", &listing(&["A", "B", "C"])).unwrap();
        assert_eq!(videos(&store), ["A", "B", "C"]);
        assert_eq!(report.created, ["C"]);
        assert_eq!(report.inserted, ["C"]);
        assert!(catalog.contains("C"));
    }

    #[test]
    fn trailing_new_band_moves_past_appended_video() {
        let (mut catalog, mut store) = setup(&["A", "B"], &[(2, "New")]);
        merge_remote(&mut catalog, &mut store, "p", &listing(&["D", "A", "B"])).unwrap();
        assert_eq!(videos(&store), ["A", "B", "D"]);
        assert_eq!(bands(&store), BTreeMap::from([(3, "New".to_string())]));
    }

    #[test]
    fn new_band_collects_before_next_band() {
        let (mut catalog, mut store) = setup(
            &["A", "B", "C"],
            &[(0, "New"), (1, "Old"), (3, "End")],
        );
        merge_remote(&mut catalog, &mut store, "p", &listing(&["X", "Y"])).unwrap();
        // X lands where "Old" started; Y follows X through the backward scan.
        assert_eq!(videos(&store), ["A", "X", "Y", "B", "C"]);
        assert_eq!(
            bands(&store),
            BTreeMap::from([
                (0, "New".to_string()),
                (3, "Old".to_string()),
                (5, "End".to_string()),
            ])
        );
    }

    #[test]
    fn labelled_without_new_band_starts_one() {
        let (mut catalog, mut store) = setup(&["A", "B"], &[(0, "Favourites")]);
        merge_remote(&mut catalog, &mut store, "p", &listing(&["Z", "W"])).unwrap();
        assert_eq!(videos(&store), ["A", "B", "Z", "W"]);
        assert_eq!(
            bands(&store),
            BTreeMap::from([(0, "Favourites".to_string()), (2, "New".to_string())])
        );
    }

    #[test]
    fn inserts_after_most_recent_member() {
        let (mut catalog, mut store) = setup(&["A", "B", "C"], &[(0, "New")]);
        merge_remote(
            &mut catalog,
            &mut store,
            "p",
            &listing(&["C", "A", "N1", "N2", "B", "N3"]),
        )
        .unwrap();
        assert_eq!(videos(&store), ["A", "N1", "N2", "B", "N3", "C"]);
    }

    #[test]
    fn rerun_is_idempotent() {
        let (mut catalog, mut store) = setup(&["A"], &[(1, "New")]);
        let items = listing(&["B", "A", "C"]);
        merge_remote(&mut catalog, &mut store, "p", &items).unwrap();
        let catalog_after = catalog.clone();
        let videos_after = videos(&store);
        let bands_after = bands(&store);

        let second = merge_remote(&mut catalog, &mut store, "p", &items).unwrap();
        assert!(second.is_noop());
        assert_eq!(catalog, catalog_after);
        assert_eq!(videos(&store), videos_after);
        assert_eq!(bands(&store), bands_after);
    }

    #[test]
    fn existing_members_are_not_reordered() {
        let (mut catalog, mut store) = setup(&["A", "B", "C"], &[]);
        merge_remote(&mut catalog, &mut store, "p", &listing(&["C", "B", "A"])).unwrap();
        assert_eq!(videos(&store), ["A", "B", "C"]);
    }

    #[test]
    fn unavailable_entries_are_skipped_and_reported() {
        let (mut catalog, mut store) = setup(&["A"], &[]);
        let mut items = listing(&["A", "gone", "B"]);
        items[1].unavailable = true;
        let report = merge_remote(&mut catalog, &mut store, "p", &items).unwrap();
        assert_eq!(report.unavailable, ["gone"]);
        assert!(!catalog.contains("gone"));
        assert_eq!(videos(&store), ["A", "B"]);
    }

    #[test]
    fn reuses_catalog_records_shared_with_other_playlists() {
        let (mut catalog, mut store) = setup(&["A"], &[]);
        catalog.add(Video::new("shared", "Kept label"));
        let report = merge_remote(&mut catalog, &mut store, "p", &listing(&["shared"])).unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.inserted, ["shared"]);
        assert_eq!(catalog.get("shared").unwrap().label, "Kept label");
        assert!(!store.is_orphan("shared"));
    }

    #[test]
    fn duplicate_remote_entries_insert_once() {
        let (mut catalog, mut store) = setup(&[], &[]);
        merge_remote(&mut catalog, &mut store, "p", &listing(&["A", "A", "B"])).unwrap();
        assert_eq!(videos(&store), ["A", "B"]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn unknown_playlist_is_an_error() {
        let (mut catalog, mut store) = setup(&[], &[]);
        assert!(merge_remote(&mut catalog, &mut store, "nope", &listing(&["A"])).is_err());
    }
}
