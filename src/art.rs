//! Album art collaborator surface.
//!
//! The sync core does not generate thumbnails; it only stores sized
//! renditions on behalf of outer layers and finds the original art file
//! an album directory carries. Original art follows the usual filename
//! conventions:
//! - cover.jpg, cover.png
//! - folder.jpg, folder.png
//! - album.jpg, album.png
//! - front.jpg, front.png

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::model::AlbumArt;

/// Recognized original-art file stems (lowercase for matching)
const ART_FILENAMES: &[&str] = &["cover", "folder", "album", "front"];

/// Supported image extensions
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Find the original art file in an album directory.
///
/// Checks the conventional stem/extension pairs in preference order,
/// then falls back to a directory listing so case variations on
/// case-sensitive filesystems still match. Returns None if the
/// directory carries no art.
pub fn find_original_art(dir: &Path) -> Option<PathBuf> {
    for stem in ART_FILENAMES {
        for ext in IMAGE_EXTENSIONS {
            let candidate = dir.join(format!("{}.{}", stem, ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        if let (Some(stem), Some(ext)) = (stem, ext)
            && ART_FILENAMES.contains(&stem.as_str())
            && IMAGE_EXTENSIONS.contains(&ext.as_str())
        {
            return Some(path);
        }
    }
    None
}

/// Fetch the stored rendition of an album's art at one size label.
pub async fn get_album_art(
    pool: &SqlitePool,
    album_id: i64,
    size: &str,
) -> sqlx::Result<Option<AlbumArt>> {
    sqlx::query_as::<_, AlbumArt>(
        "SELECT id, album_id, size, image, time_added FROM album_art \
         WHERE album_id = ? AND size = ?",
    )
    .bind(album_id)
    .bind(size)
    .fetch_optional(pool)
    .await
}

/// Store (or replace) a rendition of an album's art.
pub async fn put_album_art(
    pool: &SqlitePool,
    album_id: i64,
    size: &str,
    image: &[u8],
) -> sqlx::Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO album_art (album_id, size, image, time_added)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(album_id, size) DO UPDATE SET
            image = excluded.image,
            time_added = excluded.time_added
        RETURNING id
        "#,
    )
    .bind(album_id)
    .bind(size)
    .bind(image)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Drop all stored renditions for an album, e.g. after its original
/// art file changed.
pub async fn clear_album_art(pool: &SqlitePool, album_id: i64) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM album_art WHERE album_id = ?")
        .bind(album_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::test_utils::temp_db;
    use tempfile::TempDir;

    #[test]
    fn test_find_cover_jpg() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("cover.jpg"), b"fake jpeg data").unwrap();

        let found = find_original_art(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "cover.jpg");
    }

    #[test]
    fn test_cover_beats_folder() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("folder.png"), b"fake png").unwrap();
        std::fs::write(temp.path().join("cover.png"), b"fake png").unwrap();

        let found = find_original_art(temp.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "cover.png");
    }

    #[test]
    fn test_case_insensitive_match() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("FRONT.JPG"), b"fake jpeg").unwrap();

        assert!(find_original_art(temp.path()).is_some());
    }

    #[test]
    fn test_no_art_found() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"not art").unwrap();

        assert!(find_original_art(temp.path()).is_none());
    }

    #[tokio::test]
    async fn test_art_roundtrip_and_replace() {
        let (pool, _dir) = temp_db().await;
        let artist_id = db::get_or_create_artist(&pool, "Artist", "").await.unwrap();
        let album_id = db::create_album(&pool, "Album", artist_id, false).await.unwrap();

        put_album_art(&pool, album_id, "list", b"first").await.unwrap();
        let art = get_album_art(&pool, album_id, "list").await.unwrap().unwrap();
        assert_eq!(art.image, b"first");

        // Same (album, size) slot is replaced, not duplicated.
        put_album_art(&pool, album_id, "list", b"second").await.unwrap();
        let art = get_album_art(&pool, album_id, "list").await.unwrap().unwrap();
        assert_eq!(art.image, b"second");

        assert_eq!(clear_album_art(&pool, album_id).await.unwrap(), 1);
        assert!(get_album_art(&pool, album_id, "list").await.unwrap().is_none());
    }
}
