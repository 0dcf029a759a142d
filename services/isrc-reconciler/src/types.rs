//!
//! src/types.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Identifier newtypes, the normalized ISRC join key and the
//! catalog track record shared across modules
//!

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical form of an ISRC: trimmed and uppercased. Absent or blank
/// input maps to the empty string, which never matches anything.
pub fn normalize(raw: Option<&str>) -> String {
    match raw {
        Some(s) => s.trim().to_uppercase(),
        None => String::new()
    }
}

/// Join key derived from a raw ISRC value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn from_raw(raw: Option<&str>) -> Self {
        Self(normalize(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty keys represent "no identifier"
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpotifyArtistId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpotifyAlbumId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpotifyTrackId(pub String);

impl SpotifyArtistId {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl SpotifyAlbumId {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl SpotifyTrackId {
    pub fn as_str(&self) -> &str { &self.0 }
}

/// Release categories enumerated for an artist, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlbumGroup {
    Album,
    Single,
    Compilation,
    AppearsOn
}

impl AlbumGroup {
    pub const ALL: [AlbumGroup; 4] = [
        AlbumGroup::Album,
        AlbumGroup::Single,
        AlbumGroup::Compilation,
        AlbumGroup::AppearsOn
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlbumGroup::Album       => "album",
            AlbumGroup::Single      => "single",
            AlbumGroup::Compilation => "compilation",
            AlbumGroup::AppearsOn   => "appears_on"
        }
    }

    pub fn parse(s: &str) -> Option<AlbumGroup> {
        match s {
            "album"       => Some(AlbumGroup::Album),
            "single"      => Some(AlbumGroup::Single),
            "compilation" => Some(AlbumGroup::Compilation),
            "appears_on"  => Some(AlbumGroup::AppearsOn),
            _ => None
        }
    }
}

/// One entry of an artist's catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub track_name: Option<String>,
    pub track_id: SpotifyTrackId,
    pub album_id: SpotifyAlbumId,
    pub album_name: Option<String>,
    pub album_release_date: Option<String>,
    pub isrc: Option<String>
}

impl Track {
    pub fn key(&self) -> NormalizedKey {
        NormalizedKey::from_raw(self.isrc.as_deref())
    }
}
