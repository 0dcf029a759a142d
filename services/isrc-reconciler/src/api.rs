//!
//! src/api.rs  Andrew Belles  Oct 2nd, 2025
//!
//! The catalog collaborator seam: response shapes returned by the
//! streaming api and the trait the acquirer walks them through.
//! Production uses fetch::SpotifyClient, tests use mocks::FixtureCatalog
//!

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ReconcileError;
use crate::types::AlbumGroup;

/// Offset window for one listing call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32
}

/// One page of a listing. `has_more` is the collaborator's explicit
/// continuation signal when it offers one
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: Option<bool>
}

impl<T> Page<T> {
    /// Page without an explicit continuation signal
    #[cfg(test)]
    pub fn sized(items: Vec<T>) -> Self {
        Self { items, has_more: None }
    }
}

/// Spotify paging object
#[derive(Debug, Clone, Deserialize)]
pub struct Paging<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub total: Option<u32>
}

impl<T> From<Paging<T>> for Page<T> {
    fn from(p: Paging<T>) -> Self {
        Page { has_more: Some(p.next.is_some()), items: p.items }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtistSearchResponse {
    pub artists: Paging<ArtistObject>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtistObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimplifiedAlbum {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub album_group: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimplifiedTrack {
    #[serde(default)]
    pub id: Option<String>
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExternalIds {
    #[serde(default)]
    pub isrc: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FullTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub external_ids: Option<ExternalIds>
}

impl FullTrack {
    pub fn isrc(&self) -> Option<&str> {
        self.external_ids.as_ref().and_then(|ids| ids.isrc.as_deref())
    }
}

/// GET /v1/tracks answers `null` for ids it does not know
#[derive(Debug, Clone, Deserialize)]
pub struct TracksResponse {
    #[serde(default = "Vec::new")]
    pub tracks: Vec<Option<FullTrack>>
}

/// Operations the acquirer needs from a streaming catalog.
///
/// Errors returned here have already gone through the implementation's
/// own retry policy.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Ranked artist matches for a free-text name
    async fn search_artists(&self, name: &str, limit: u32) ->
        Result<Vec<ArtistObject>, ReconcileError>;

    async fn artist_albums(
        &self,
        artist_id: &str,
        group: AlbumGroup,
        page: PageRequest
    ) -> Result<Page<SimplifiedAlbum>, ReconcileError>;

    async fn album_tracks(&self, album_id: &str, page: PageRequest) ->
        Result<Page<SimplifiedTrack>, ReconcileError>;

    /// Full track objects for at most 50 ids
    async fn tracks(&self, ids: &[String]) -> Result<Vec<FullTrack>, ReconcileError>;
}
