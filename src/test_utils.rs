//! Test utilities and fixtures.
//!
//! Provides a temp database helper, song record factories, and a stub
//! tag reader so reconciliation tests can drive the full pipeline with
//! plain text files instead of real audio.
//!
//! # Example
//!
//! ```ignore
//! use music_keeper::test_utils::{temp_db, write_tagged_file, StubTagSource};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     // ... test logic
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::metadata::{ExtractError, SongTags, TagSource};
use crate::model::Song;

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is cleaned up
/// when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// # Returns
///
/// A tuple of (connection pool, temp directory handle). Keep the
/// TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = format!("sqlite:{}", db_path.display());

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// Creates a song record with sensible defaults for the given location.
///
/// The fingerprint is derived from the filename so distinct fixtures
/// never collide. Customize with struct update syntax:
///
/// ```ignore
/// let song = Song { year: 1999, ..test_song("a/b.mp3", artist_id, album_id) };
/// ```
pub fn test_song(filename: &str, artist_id: i64, album_id: i64) -> Song {
    use sha2::{Digest, Sha256};
    let now = chrono::Utc::now().to_rfc3339();
    Song {
        id: 0,
        filename: filename.to_string(),
        title: "Test Song".to_string(),
        year: 0,
        tracknum: 1,
        artist_id,
        album_id,
        group_id: None,
        conductor_id: None,
        composer_id: None,
        raw_group: String::new(),
        raw_conductor: String::new(),
        raw_composer: String::new(),
        filetype: "mp3".to_string(),
        bitrate: 128,
        mode: "CBR".to_string(),
        length: 180,
        size: 1000,
        mtime: 0,
        sha256sum: format!("{:x}", Sha256::digest(filename.as_bytes())),
        time_added: now.clone(),
        time_updated: now,
    }
}

/// Write a stub "audio" file under `root` as key=value lines.
///
/// The file carries an audio extension so the scanner picks it up, and
/// [`StubTagSource`] reads the pairs back as tags. Because the tags are
/// the file contents, retagging a fixture also changes its fingerprint,
/// exactly like rewriting a real file's tag block would.
pub fn write_tagged_file(root: &Path, relative: &str, tags: &[(&str, &str)]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    let body: String = tags
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect();
    std::fs::write(&path, body).expect("Failed to write fixture file");
}

/// Tag reader for tests: parses the key=value files written by
/// [`write_tagged_file`].
///
/// Recognized keys: artist, album, title, tracknum, year, group,
/// conductor, composer, bitrate, length, mode. Missing artist or title
/// classifies as corrupt, mirroring the production reader.
#[derive(Debug, Default)]
pub struct StubTagSource;

impl TagSource for StubTagSource {
    fn extract(&self, path: &Path) -> Result<SongTags, ExtractError> {
        let body = std::fs::read_to_string(path)?;
        let pairs: HashMap<&str, &str> = body
            .lines()
            .filter_map(|line| line.split_once('='))
            .collect();

        let get = |key: &str| pairs.get(key).unwrap_or(&"").trim().to_string();

        let artist = get("artist");
        if artist.is_empty() {
            return Err(ExtractError::CorruptTags("no artist tag".to_string()));
        }
        let title = get("title");
        if title.is_empty() {
            return Err(ExtractError::CorruptTags("no title tag".to_string()));
        }

        let filetype = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp3")
            .to_lowercase();

        Ok(SongTags {
            artist,
            album: get("album"),
            title,
            tracknum: get("tracknum").parse().unwrap_or(0),
            maxtracks: None,
            year: get("year").parse().unwrap_or(0),
            raw_group: get("group"),
            raw_conductor: get("conductor"),
            raw_composer: get("composer"),
            filetype,
            bitrate: get("bitrate").parse().unwrap_or(128),
            length: get("length").parse().unwrap_or(180),
            mode: {
                let mode = get("mode");
                if mode.is_empty() { "CBR".to_string() } else { mode }
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;

        let songs = crate::db::get_all_songs(&pool).await.unwrap();
        assert!(songs.is_empty());
    }

    #[test]
    fn test_stub_source_reads_written_tags() {
        let dir = tempfile::tempdir().unwrap();
        write_tagged_file(
            dir.path(),
            "Artist/Album/01.mp3",
            &[
                ("artist", "The Artist"),
                ("album", "Album"),
                ("title", "Opener"),
                ("tracknum", "1"),
                ("year", "1999"),
            ],
        );

        let tags = StubTagSource
            .extract(&dir.path().join("Artist/Album/01.mp3"))
            .unwrap();
        assert_eq!(tags.artist, "The Artist");
        assert_eq!(tags.album, "Album");
        assert_eq!(tags.title, "Opener");
        assert_eq!(tags.tracknum, 1);
        assert_eq!(tags.year, 1999);
        assert_eq!(tags.filetype, "mp3");
    }

    #[test]
    fn test_stub_source_rejects_missing_artist() {
        let dir = tempfile::tempdir().unwrap();
        write_tagged_file(dir.path(), "x.mp3", &[("title", "Untitled")]);

        let result = StubTagSource.extract(&dir.path().join("x.mp3"));
        assert!(matches!(result, Err(ExtractError::CorruptTags(_))));
    }

    #[test]
    fn test_song_fixture_fingerprints_are_distinct() {
        let a = test_song("a.mp3", 1, 1);
        let b = test_song("b.mp3", 1, 1);
        assert_ne!(a.sha256sum, b.sha256sum);
        assert_eq!(a.sha256sum.len(), 64);
    }
}
