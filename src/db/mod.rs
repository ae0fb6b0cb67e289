//! Database module for the music catalog.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. Provides
//! async operations for:
//! - Artist lookup, creation, and orphan collection
//! - Album CRUD plus derived-stat refresh
//! - Song CRUD keyed by library-relative filename
//!
//! All writes here are single-row primitives; the reconciler sequences
//! them into a convergent run. Artist names compare case-insensitively
//! throughout, matching the unique index on `artists.name`.
//!
//! # Example
//!
//! ```ignore
//! use music_keeper::db::{init_db, db_url, get_all_songs};
//!
//! let pool = init_db(&db_url(None)).await?;
//! let songs = get_all_songs(&pool).await?;
//! ```

use std::str::FromStr;

use crate::model::{Album, Artist, Song};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "music_keeper.db";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&std::path::Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, establishes a
/// connection pool with up to 5 connections, and runs all pending
/// migrations. Foreign keys are enabled so album art cascades with its
/// album.
///
/// # Errors
///
/// Returns [`Error::Database`] if the database cannot be created or
/// opened, and [`Error::Migrate`] if a migration fails.
///
/// [`Error::Database`]: crate::error::Error::Database
/// [`Error::Migrate`]: crate::error::Error::Migrate
pub async fn init_db(db_url: &str) -> crate::error::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// ============================================================================
// Artists
// ============================================================================

const ARTIST_COLUMNS: &str = "id, name, prefix, is_various";

/// Find an artist by base name, case-insensitively.
pub async fn find_artist(pool: &SqlitePool, name: &str) -> sqlx::Result<Option<Artist>> {
    sqlx::query_as::<_, Artist>(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artists WHERE name = ? COLLATE NOCASE"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// Get an artist by its database ID.
pub async fn get_artist(pool: &SqlitePool, artist_id: i64) -> sqlx::Result<Option<Artist>> {
    sqlx::query_as::<_, Artist>(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artists WHERE id = ?"
    ))
    .bind(artist_id)
    .fetch_optional(pool)
    .await
}

/// Get or create an artist by base name.
///
/// Lookup is case-insensitive; the first observed casing of the name is
/// the one that sticks. A stored prefix is never overwritten, but an
/// artist created without one picks it up from the first file that
/// carries it.
///
/// # Arguments
///
/// * `pool` - Database connection pool
/// * `name` - Base name with any leading article already split off
/// * `prefix` - Leading article as observed, or empty
///
/// # Returns
///
/// The database ID of the (existing or new) artist.
pub async fn get_or_create_artist(
    pool: &SqlitePool,
    name: &str,
    prefix: &str,
) -> sqlx::Result<i64> {
    if let Some(artist) = find_artist(pool, name).await? {
        if artist.prefix.is_empty() && !prefix.is_empty() {
            sqlx::query("UPDATE artists SET prefix = ? WHERE id = ?")
                .bind(prefix)
                .bind(artist.id)
                .execute(pool)
                .await?;
        }
        return Ok(artist.id);
    }

    let result = sqlx::query("INSERT INTO artists (name, prefix) VALUES (?, ?)")
        .bind(name)
        .bind(prefix)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Get the "Various" sentinel artist.
///
/// The row is seeded by the initial migration, so this always exists in
/// a migrated database.
pub async fn get_various_artist(pool: &SqlitePool) -> sqlx::Result<Artist> {
    sqlx::query_as::<_, Artist>(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artists WHERE is_various = 1"
    ))
    .fetch_one(pool)
    .await
}

/// Delete an artist if nothing references it anymore.
///
/// An artist is live while any song names it in any role (primary,
/// group, conductor, composer) or any album belongs to it. The
/// "Various" sentinel is never deleted.
///
/// # Returns
///
/// `true` if the artist was deleted.
pub async fn delete_artist_if_orphaned(pool: &SqlitePool, artist_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM artists
        WHERE id = ?1
          AND is_various = 0
          AND NOT EXISTS (
              SELECT 1 FROM songs
              WHERE artist_id = ?1 OR group_id = ?1
                 OR conductor_id = ?1 OR composer_id = ?1
          )
          AND NOT EXISTS (SELECT 1 FROM albums WHERE artist_id = ?1)
        "#,
    )
    .bind(artist_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// All artists, ordered by base name.
pub async fn get_all_artists(pool: &SqlitePool) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artists ORDER BY name COLLATE NOCASE"
    ))
    .fetch_all(pool)
    .await
}

/// Artists whose base name contains `needle`, case-insensitively.
pub async fn search_artists(pool: &SqlitePool, needle: &str) -> sqlx::Result<Vec<Artist>> {
    sqlx::query_as::<_, Artist>(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artists \
         WHERE name LIKE '%' || ? || '%' ORDER BY name COLLATE NOCASE"
    ))
    .bind(needle)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Albums
// ============================================================================

const ALBUM_COLUMNS: &str = "id, name, artist_id, year, miscellaneous, song_count, time_added";

/// Create a new album owned by `artist_id`.
pub async fn create_album(
    pool: &SqlitePool,
    name: &str,
    artist_id: i64,
    miscellaneous: bool,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO albums (name, artist_id, miscellaneous, time_added) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(artist_id)
    .bind(miscellaneous)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Get an album by its database ID.
pub async fn get_album(pool: &SqlitePool, album_id: i64) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums WHERE id = ?"
    ))
    .bind(album_id)
    .fetch_optional(pool)
    .await
}

/// Find a regular (non-miscellaneous) album by name, case-insensitively.
///
/// When duplicates exist the oldest record wins, so merges always fold
/// into the earliest album.
pub async fn find_album_by_name(pool: &SqlitePool, name: &str) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums \
         WHERE name = ? COLLATE NOCASE AND miscellaneous = 0 \
         ORDER BY id LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// All regular albums sharing a name, oldest first. Used by the merge
/// step after renames collapse two albums onto one name.
pub async fn find_albums_by_name(pool: &SqlitePool, name: &str) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums \
         WHERE name = ? COLLATE NOCASE AND miscellaneous = 0 \
         ORDER BY id"
    ))
    .bind(name)
    .fetch_all(pool)
    .await
}

/// Find an artist's miscellaneous (non-album tracks) bucket.
pub async fn find_misc_album(pool: &SqlitePool, artist_id: i64) -> sqlx::Result<Option<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums \
         WHERE artist_id = ? AND miscellaneous = 1"
    ))
    .bind(artist_id)
    .fetch_optional(pool)
    .await
}

/// Rename an album in place, keeping its identity.
pub async fn update_album_name(pool: &SqlitePool, album_id: i64, name: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE albums SET name = ? WHERE id = ?")
        .bind(name)
        .bind(album_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reassign an album to a different owning artist.
pub async fn update_album_artist(
    pool: &SqlitePool,
    album_id: i64,
    artist_id: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE albums SET artist_id = ? WHERE id = ?")
        .bind(artist_id)
        .bind(album_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Recompute an album's cached song count and year from its songs.
///
/// The year is the highest year any of its songs carries, 0 when no
/// song has one.
pub async fn refresh_album_stats(pool: &SqlitePool, album_id: i64) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE albums SET
            song_count = (SELECT COUNT(*) FROM songs WHERE album_id = ?1),
            year = COALESCE((SELECT MAX(year) FROM songs WHERE album_id = ?1), 0)
        WHERE id = ?1
        "#,
    )
    .bind(album_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete an album. Its art rows cascade.
pub async fn delete_album(pool: &SqlitePool, album_id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM albums WHERE id = ?")
        .bind(album_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Distinct primary artists across an album's current songs.
///
/// Drives ownership: zero artists means the album is empty, one means
/// that artist owns it, more than one means "Various" does.
pub async fn distinct_song_artists(pool: &SqlitePool, album_id: i64) -> sqlx::Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT DISTINCT artist_id FROM songs WHERE album_id = ? ORDER BY artist_id")
            .bind(album_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// All albums, ordered by name.
pub async fn get_all_albums(pool: &SqlitePool) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums ORDER BY name COLLATE NOCASE"
    ))
    .fetch_all(pool)
    .await
}

/// Albums owned by one artist, ordered by year then name.
pub async fn get_albums_by_artist(pool: &SqlitePool, artist_id: i64) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums \
         WHERE artist_id = ? ORDER BY year, name COLLATE NOCASE"
    ))
    .bind(artist_id)
    .fetch_all(pool)
    .await
}

/// Albums whose name contains `needle`, case-insensitively.
pub async fn search_albums(pool: &SqlitePool, needle: &str) -> sqlx::Result<Vec<Album>> {
    sqlx::query_as::<_, Album>(&format!(
        "SELECT {ALBUM_COLUMNS} FROM albums \
         WHERE name LIKE '%' || ? || '%' ORDER BY name COLLATE NOCASE"
    ))
    .bind(needle)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Songs
// ============================================================================

const SONG_COLUMNS: &str = "id, filename, title, year, tracknum, artist_id, album_id, \
     group_id, conductor_id, composer_id, raw_group, raw_conductor, raw_composer, \
     filetype, bitrate, mode, length, size, mtime, sha256sum, time_added, time_updated";

/// Insert a new song record. The `id` field of `song` is ignored.
///
/// # Returns
///
/// The database ID of the new song.
pub async fn insert_song(pool: &SqlitePool, song: &Song) -> sqlx::Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO songs (
            filename, title, year, tracknum, artist_id, album_id,
            group_id, conductor_id, composer_id,
            raw_group, raw_conductor, raw_composer,
            filetype, bitrate, mode, length, size, mtime, sha256sum,
            time_added, time_updated
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&song.filename)
    .bind(&song.title)
    .bind(song.year)
    .bind(song.tracknum)
    .bind(song.artist_id)
    .bind(song.album_id)
    .bind(song.group_id)
    .bind(song.conductor_id)
    .bind(song.composer_id)
    .bind(&song.raw_group)
    .bind(&song.raw_conductor)
    .bind(&song.raw_composer)
    .bind(&song.filetype)
    .bind(song.bitrate)
    .bind(&song.mode)
    .bind(song.length)
    .bind(song.size)
    .bind(song.mtime)
    .bind(&song.sha256sum)
    .bind(&song.time_added)
    .bind(&song.time_updated)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Rewrite a song record in place by ID.
///
/// `time_added` is not touched; `time_updated` is written from the
/// struct so the caller decides whether the change counts as a content
/// update.
pub async fn update_song(pool: &SqlitePool, song: &Song) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE songs SET
            filename = ?, title = ?, year = ?, tracknum = ?,
            artist_id = ?, album_id = ?,
            group_id = ?, conductor_id = ?, composer_id = ?,
            raw_group = ?, raw_conductor = ?, raw_composer = ?,
            filetype = ?, bitrate = ?, mode = ?, length = ?,
            size = ?, mtime = ?, sha256sum = ?, time_updated = ?
        WHERE id = ?
        "#,
    )
    .bind(&song.filename)
    .bind(&song.title)
    .bind(song.year)
    .bind(song.tracknum)
    .bind(song.artist_id)
    .bind(song.album_id)
    .bind(song.group_id)
    .bind(song.conductor_id)
    .bind(song.composer_id)
    .bind(&song.raw_group)
    .bind(&song.raw_conductor)
    .bind(&song.raw_composer)
    .bind(&song.filetype)
    .bind(song.bitrate)
    .bind(&song.mode)
    .bind(song.length)
    .bind(song.size)
    .bind(song.mtime)
    .bind(&song.sha256sum)
    .bind(&song.time_updated)
    .bind(song.id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Update only the filename and filesystem signature of a song.
///
/// Used for move detection, where the bytes are unchanged and the
/// record keeps its identity and timestamps.
pub async fn update_song_location(
    pool: &SqlitePool,
    song_id: i64,
    filename: &str,
    mtime: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE songs SET filename = ?, mtime = ? WHERE id = ?")
        .bind(filename)
        .bind(mtime)
        .bind(song_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Refresh only the stored filesystem signature of a song.
///
/// Used when a file was touched but its fingerprint is unchanged, so
/// the metadata and `time_updated` stay as they are.
pub async fn update_song_signature(
    pool: &SqlitePool,
    song_id: i64,
    size: i64,
    mtime: i64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE songs SET size = ?, mtime = ? WHERE id = ?")
        .bind(size)
        .bind(mtime)
        .bind(song_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move a song to a different album.
pub async fn update_song_album(pool: &SqlitePool, song_id: i64, album_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE songs SET album_id = ? WHERE id = ?")
        .bind(album_id)
        .bind(song_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a song by ID.
pub async fn delete_song(pool: &SqlitePool, song_id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM songs WHERE id = ?")
        .bind(song_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Get a song by its database ID.
pub async fn get_song(pool: &SqlitePool, song_id: i64) -> sqlx::Result<Option<Song>> {
    sqlx::query_as::<_, Song>(&format!("SELECT {SONG_COLUMNS} FROM songs WHERE id = ?"))
        .bind(song_id)
        .fetch_optional(pool)
        .await
}

/// Get a song by its library-relative filename.
pub async fn get_song_by_filename(pool: &SqlitePool, filename: &str) -> sqlx::Result<Option<Song>> {
    sqlx::query_as::<_, Song>(&format!(
        "SELECT {SONG_COLUMNS} FROM songs WHERE filename = ?"
    ))
    .bind(filename)
    .fetch_optional(pool)
    .await
}

/// All songs carrying a given content fingerprint.
///
/// Duplicate files are legal, so this can return more than one row.
pub async fn get_songs_by_sha256(pool: &SqlitePool, sha256sum: &str) -> sqlx::Result<Vec<Song>> {
    sqlx::query_as::<_, Song>(&format!(
        "SELECT {SONG_COLUMNS} FROM songs WHERE sha256sum = ? ORDER BY id"
    ))
    .bind(sha256sum)
    .fetch_all(pool)
    .await
}

/// All songs, ordered by filename.
pub async fn get_all_songs(pool: &SqlitePool) -> sqlx::Result<Vec<Song>> {
    sqlx::query_as::<_, Song>(&format!(
        "SELECT {SONG_COLUMNS} FROM songs ORDER BY filename"
    ))
    .fetch_all(pool)
    .await
}

/// Songs on one album, in track order.
pub async fn get_songs_by_album(pool: &SqlitePool, album_id: i64) -> sqlx::Result<Vec<Song>> {
    sqlx::query_as::<_, Song>(&format!(
        "SELECT {SONG_COLUMNS} FROM songs WHERE album_id = ? ORDER BY tracknum, filename"
    ))
    .bind(album_id)
    .fetch_all(pool)
    .await
}

/// Songs whose title contains `needle`, case-insensitively.
pub async fn search_songs(pool: &SqlitePool, needle: &str) -> sqlx::Result<Vec<Song>> {
    sqlx::query_as::<_, Song>(&format!(
        "SELECT {SONG_COLUMNS} FROM songs \
         WHERE title LIKE '%' || ? || '%' ORDER BY title COLLATE NOCASE"
    ))
    .bind(needle)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Stats
// ============================================================================

/// Aggregate catalog counters for the `stats` command.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogStats {
    pub artists: i64,
    pub albums: i64,
    pub songs: i64,
    /// Total playing time across all songs, in seconds
    pub total_length: i64,
    /// Total size of all files, in bytes
    pub total_size: i64,
}

/// Collect aggregate counters across the catalog.
///
/// The artist count excludes the "Various" sentinel.
pub async fn get_stats(pool: &SqlitePool) -> sqlx::Result<CatalogStats> {
    sqlx::query_as::<_, CatalogStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM artists WHERE is_various = 0) AS artists,
            (SELECT COUNT(*) FROM albums) AS albums,
            (SELECT COUNT(*) FROM songs) AS songs,
            COALESCE((SELECT SUM(length) FROM songs), 0) AS total_length,
            COALESCE((SELECT SUM(size) FROM songs), 0) AS total_size
        "#,
    )
    .fetch_one(pool)
    .await
}
