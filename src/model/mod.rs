//! Core data models for the music catalog.
//!
//! Defines the persisted entities: [`Artist`], [`Album`], [`Song`], and
//! [`AlbumArt`]. These are derived from SQLx for database mapping.
//!
//! # Database Schema
//!
//! The models map to the following tables:
//! - `artists` - Artist records, unique by case-insensitive base name
//! - `albums` - Albums owned by an artist (or the "Various" sentinel)
//! - `songs` - Individual audio files, unique by library-relative path
//! - `album_art` - Sized art renditions, cascading with their album

use sqlx::FromRow;

/// An artist in the catalog.
///
/// `name` is the base name with any leading article split off into
/// `prefix` ("The Beatles" is stored as name "Beatles", prefix "The").
#[derive(Debug, Clone, FromRow)]
pub struct Artist {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Base name, prefix stripped (case-insensitively unique)
    pub name: String,
    /// Leading article as observed in the tags, or empty
    pub prefix: String,
    /// True only for the singleton "Various" sentinel
    pub is_various: bool,
}

impl Artist {
    /// Full display name, prefix included.
    pub fn display_name(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.prefix, self.name)
        }
    }
}

/// An album in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Album {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Album name as observed in the tags
    pub name: String,
    /// Owning artist; "Various" when songs span multiple primary artists
    pub artist_id: i64,
    /// Release year, 0 when unknown
    pub year: i64,
    /// True for the synthetic per-artist "Non-Album Tracks" bucket
    pub miscellaneous: bool,
    /// Cached number of songs, refreshed by the reconciler
    pub song_count: i64,
    /// RFC 3339 timestamp of first appearance
    pub time_added: String,
}

/// A song (audio file) in the catalog.
#[derive(Debug, Clone, FromRow)]
pub struct Song {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Library-relative file path (unique identifier)
    pub filename: String,
    /// Song title (from tags)
    pub title: String,
    /// Release year, 0 when unknown
    pub year: i64,
    /// Track number, 0 when absent or unparseable
    pub tracknum: i64,
    /// Primary artist
    pub artist_id: i64,
    /// Containing album (always valid, possibly a miscellaneous bucket)
    pub album_id: i64,
    /// Resolved group/ensemble artist, if tagged
    pub group_id: Option<i64>,
    /// Resolved conductor artist, if tagged
    pub conductor_id: Option<i64>,
    /// Resolved composer artist, if tagged
    pub composer_id: Option<i64>,
    /// Group/ensemble tag exactly as observed
    pub raw_group: String,
    /// Conductor tag exactly as observed
    pub raw_conductor: String,
    /// Composer tag exactly as observed
    pub raw_composer: String,
    /// Container format ("mp3", "flac", ...)
    pub filetype: String,
    /// Average bitrate in kbps
    pub bitrate: i64,
    /// Encoding mode: "CBR", "ABR", "VBR", or empty when unknown
    pub mode: String,
    /// Duration in seconds
    pub length: i64,
    /// File size in bytes
    pub size: i64,
    /// Filesystem mtime (unix seconds) at last content change
    pub mtime: i64,
    /// SHA-256 content fingerprint, lowercase hex
    pub sha256sum: String,
    /// RFC 3339 timestamp of first appearance
    pub time_added: String,
    /// RFC 3339 timestamp of last content change
    pub time_updated: String,
}

/// A sized rendition of an album's original art.
///
/// Owned by the art collaborator; the sync core only guarantees the
/// cascade when an album is deleted.
#[derive(Debug, Clone, FromRow)]
pub struct AlbumArt {
    /// Database ID (auto-generated)
    pub id: i64,
    /// Owning album
    pub album_id: i64,
    /// Requested size label ("album", "list", ...)
    pub size: String,
    /// Encoded image bytes
    pub image: Vec<u8>,
    /// RFC 3339 timestamp of generation
    pub time_added: String,
}
