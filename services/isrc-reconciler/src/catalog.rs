//!
//! src/catalog.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Walks an artist's full discography through the catalog api:
//! artist search, album listing per release group, track listing per
//! album and batched full-track lookups, de-duplicating albums and
//! tracks on first sight
//!

use std::collections::HashSet;

use tracing::{debug, info, instrument};

use crate::api::{CatalogApi, FullTrack, SimplifiedAlbum};
use crate::config::CatalogConfig;
use crate::errors::ReconcileError;
use crate::pagination::collect_all;
use crate::types::{AlbumGroup, SpotifyAlbumId, SpotifyArtistId, SpotifyTrackId, Track};

/// Resolved artist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub id: SpotifyArtistId,
    pub name: Option<String>
}

/// An album queued for track enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumEntry {
    pub id: SpotifyAlbumId,
    pub name: Option<String>,
    pub group: AlbumGroup
}

/// Everything acquired for one artist
#[derive(Debug, Clone)]
pub struct Catalog {
    pub artist: Artist,
    pub albums: Vec<AlbumEntry>,
    pub tracks: Vec<Track>,
    pub duplicates_skipped: usize
}

fn fetch_failure(stage: &str, e: ReconcileError) -> ReconcileError {
    match e {
        ReconcileError::CatalogFetch(_) => e,
        other => ReconcileError::CatalogFetch(format!("{stage}: {other}"))
    }
}

/// One run's worth of acquisition state. The seen-track set lives here
/// so separate runs never observe each other
pub struct CatalogAcquirer<'a, A: CatalogApi + ?Sized> {
    api: &'a A,
    limits: CatalogConfig,
    seen_tracks: HashSet<SpotifyTrackId>,
    duplicates_skipped: usize
}

impl<'a, A: CatalogApi + ?Sized> CatalogAcquirer<'a, A> {
    pub fn new(api: &'a A, limits: CatalogConfig) -> Self {
        Self { api, limits, seen_tracks: HashSet::new(), duplicates_skipped: 0 }
    }

    /// Full, de-duplicated catalog for `artist_name`
    #[instrument(skip(self))]
    pub async fn acquire(mut self, artist_name: &str) -> Result<Catalog, ReconcileError> {
        let artist = self.resolve_artist(artist_name).await?;
        let albums = self.enumerate_albums(&artist.id).await?;

        let mut tracks = Vec::new();
        for album in &albums {
            let album_tracks = self.album_tracks(album).await?;
            let fetched = album_tracks.len();
            let before = tracks.len();
            self.accumulate(album_tracks, &mut tracks);
            debug!(
                album = %album.id.as_str(), name = ?album.name, group = album.group.as_str(),
                fetched, kept = tracks.len() - before, "catalog.album.tracks"
            );
        }

        info!(
            artist = %artist.id.as_str(), albums = albums.len(), tracks = tracks.len(),
            duplicates = self.duplicates_skipped, "catalog.acquired"
        );

        Ok(Catalog {
            artist,
            albums,
            tracks,
            duplicates_skipped: self.duplicates_skipped
        })
    }

    /// First search hit wins; no disambiguation between namesakes
    pub async fn resolve_artist(&self, artist_name: &str) -> Result<Artist, ReconcileError> {
        let hits = self.api.search_artists(artist_name, 1).await
            .map_err(|e| fetch_failure("artist search", e))?;

        let first = hits.into_iter().next()
            .ok_or_else(|| ReconcileError::ArtistNotFound(artist_name.to_string()))?;

        info!(query = artist_name, id = %first.id, name = ?first.name, "catalog.artist.resolved");
        Ok(Artist { id: SpotifyArtistId(first.id), name: first.name })
    }

    /// Albums of every release group, once each, in group then listing order
    pub async fn enumerate_albums(&self, artist: &SpotifyArtistId) ->
        Result<Vec<AlbumEntry>, ReconcileError> {

        let api = self.api;
        let artist_id = artist.as_str();
        let mut seen: HashSet<String> = HashSet::new();
        let mut albums = Vec::new();

        for group in AlbumGroup::ALL {
            let listed: Vec<SimplifiedAlbum> = collect_all(
                self.limits.page_size,
                move |page| api.artist_albums(artist_id, group, page)
            ).await.map_err(|e| fetch_failure("album listing", e))?;

            let listed_count = listed.len();
            for album in listed {
                let Some(id) = album.id else { continue };
                if seen.insert(id.clone()) {
                    let reported = album.album_group.as_deref().and_then(AlbumGroup::parse);
                    albums.push(AlbumEntry {
                        id: SpotifyAlbumId(id),
                        name: album.name,
                        group: reported.unwrap_or(group)
                    });
                }
            }
            debug!(group = group.as_str(), listed = listed_count, total = albums.len(),
                "catalog.albums.group");
        }
        Ok(albums)
    }

    /// Track records for one album, with ISRCs from batched lookups
    pub async fn album_tracks(&self, album: &AlbumEntry) -> Result<Vec<Track>, ReconcileError> {
        let api = self.api;
        let album_id = album.id.as_str();

        let stubs = collect_all(
            self.limits.page_size,
            move |page| api.album_tracks(album_id, page)
        ).await.map_err(|e| fetch_failure("album tracks", e))?;

        let ids: Vec<String> = stubs.into_iter().filter_map(|s| s.id).collect();

        let mut tracks = Vec::with_capacity(ids.len());
        for batch in ids.chunks(self.limits.batch_size) {
            let fulls = self.api.tracks(batch).await
                .map_err(|e| fetch_failure("track lookup", e))?;
            tracks.extend(fulls.into_iter().filter_map(|full| build_track(full, &album.id)));
        }
        Ok(tracks)
    }

    fn accumulate(&mut self, incoming: Vec<Track>, out: &mut Vec<Track>) {
        for track in incoming {
            if self.seen_tracks.insert(track.track_id.clone()) {
                out.push(track);
            } else {
                self.duplicates_skipped += 1;
            }
        }
    }
}

fn build_track(full: FullTrack, album_id: &SpotifyAlbumId) -> Option<Track> {
    let isrc = full.isrc().map(str::to_string);
    let track_id = full.id?;
    let (album_name, album_release_date) = match full.album {
        Some(a) => (a.name, a.release_date),
        None => (None, None)
    };

    Some(Track {
        track_name: full.name,
        track_id: SpotifyTrackId(track_id),
        album_id: album_id.clone(),
        album_name,
        album_release_date,
        isrc
    })
}
