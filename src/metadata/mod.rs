//! Audio file metadata extraction.
//!
//! Uses the lofty crate for format-independent tag and property access.
//! Extraction is side-effect-free: it opens the one file, reads, and
//! returns either a populated [`SongTags`] or a classified
//! [`ExtractError`]. The reconciler consumes this through the
//! [`TagSource`] trait so tests can substitute a stub reader.
//!
//! # Normalization rules
//! - Track numbers accept both `N` and `N/M`; anything non-numeric
//!   becomes 0, never an error.
//! - Year is taken from the first non-empty slot in a fixed priority:
//!   release date, then recording date, then the legacy year field.
//! - Trailing NUL characters are stripped from all text fields.
//! - A file with no artist or no title after cleaning is rejected as
//!   `CorruptTags`; album may legitimately be empty.

use lofty::error::ErrorKind;
use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Everything the reconciler needs to know about one audio file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SongTags {
    pub artist: String,
    /// Album tag; empty means the song goes to the non-album bucket.
    pub album: String,
    pub title: String,
    /// 0 when absent or unparseable
    pub tracknum: u32,
    /// Total tracks from an `N/M` track tag, if present
    pub maxtracks: Option<u32>,
    /// 0 when absent or unparseable
    pub year: i64,
    /// Group/ensemble tag (ID3 TPE2), raw
    pub raw_group: String,
    /// Conductor tag, raw
    pub raw_conductor: String,
    /// Composer tag, raw
    pub raw_composer: String,
    /// Container format: "mp3", "flac", "ogg", "opus", "m4a"
    pub filetype: String,
    /// Average bitrate in kbps
    pub bitrate: u32,
    /// Duration in whole seconds
    pub length: u64,
    /// "CBR", "ABR", "VBR", or empty when unknown
    pub mode: String,
}

/// Classified extraction failure.
///
/// None of these abort a scan; the file is reported and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unreadable file: {0}")]
    Unreadable(#[from] std::io::Error),

    #[error("unsupported audio format")]
    UnsupportedFormat,

    #[error("corrupt or missing tags: {0}")]
    CorruptTags(String),
}

/// Seam between the reconciler and the tag reader.
pub trait TagSource: Send + Sync {
    fn extract(&self, path: &Path) -> Result<SongTags, ExtractError>;
}

/// Production tag reader backed by lofty.
#[derive(Debug, Default)]
pub struct LoftyTagSource;

impl TagSource for LoftyTagSource {
    fn extract(&self, path: &Path) -> Result<SongTags, ExtractError> {
        extract(path)
    }
}

/// Read and normalize the metadata of a single audio file.
pub fn extract(path: &Path) -> Result<SongTags, ExtractError> {
    let tagged_file = Probe::open(path)
        .map_err(classify_lofty_error)?
        .read()
        .map_err(classify_lofty_error)?;

    let filetype = match tagged_file.file_type() {
        FileType::Mpeg => "mp3",
        FileType::Flac => "flac",
        FileType::Vorbis => "ogg",
        FileType::Opus => "opus",
        FileType::Mp4 => "m4a",
        _ => return Err(ExtractError::UnsupportedFormat),
    };

    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .ok_or_else(|| ExtractError::CorruptTags("no tags present".to_string()))?;

    let artist = clean_text(tag.artist().as_deref().unwrap_or(""));
    if artist.is_empty() {
        return Err(ExtractError::CorruptTags("no artist tag".to_string()));
    }
    let title = clean_text(tag.title().as_deref().unwrap_or(""));
    if title.is_empty() {
        return Err(ExtractError::CorruptTags("no title tag".to_string()));
    }
    let album = clean_text(tag.album().as_deref().unwrap_or(""));

    let (tracknum, maxtracks) = match tag.get_string(&ItemKey::TrackNumber) {
        Some(raw) => parse_tracknum(raw),
        None => (tag.track().unwrap_or(0), tag.track_total()),
    };

    let year = extract_year(tag);

    let properties = tagged_file.properties();
    let length = properties.duration().as_secs();
    let bitrate = properties
        .audio_bitrate()
        .or_else(|| properties.overall_bitrate())
        .unwrap_or(0);

    let mode = match tagged_file.file_type() {
        FileType::Mpeg => detect_mpeg_mode(path).unwrap_or_default(),
        // Lossless and lossy-VBR containers don't carry a mode marker.
        FileType::Flac | FileType::Vorbis | FileType::Opus => "VBR".to_string(),
        _ => "CBR".to_string(),
    };

    Ok(SongTags {
        artist,
        album,
        title,
        tracknum,
        maxtracks,
        year,
        raw_group: clean_text(tag.get_string(&ItemKey::AlbumArtist).unwrap_or("")),
        raw_conductor: clean_text(tag.get_string(&ItemKey::Conductor).unwrap_or("")),
        raw_composer: clean_text(tag.get_string(&ItemKey::Composer).unwrap_or("")),
        filetype: filetype.to_string(),
        bitrate,
        length,
        mode,
    })
}

fn classify_lofty_error(err: lofty::error::LoftyError) -> ExtractError {
    if matches!(err.kind(), ErrorKind::Io(_)) {
        return ExtractError::Unreadable(std::io::Error::other(err));
    }
    match err.kind() {
        ErrorKind::UnknownFormat => ExtractError::UnsupportedFormat,
        _ => ExtractError::CorruptTags(err.to_string()),
    }
}

/// Strip trailing NULs (some taggers pad fields with them) and trim.
fn clean_text(raw: &str) -> String {
    raw.trim_end_matches('\0').trim().to_string()
}

/// Parse a track-number tag in `N` or `N/M` form.
///
/// Non-numeric or empty input yields `(0, None)`; this never fails.
pub fn parse_tracknum(raw: &str) -> (u32, Option<u32>) {
    let raw = raw.trim_end_matches('\0').trim();
    let (num, max) = match raw.split_once('/') {
        Some((n, m)) => (n, Some(m)),
        None => (raw, None),
    };
    let tracknum = num.trim().parse().unwrap_or(0);
    let maxtracks = max.and_then(|m| m.trim().parse().ok());
    (tracknum, maxtracks)
}

/// Year slots in priority order: release date, recording date, legacy.
fn extract_year(tag: &Tag) -> i64 {
    for key in [&ItemKey::ReleaseDate, &ItemKey::RecordingDate, &ItemKey::Year] {
        if let Some(raw) = tag.get_string(key) {
            let year = parse_year(raw);
            if year != 0 {
                return year;
            }
        }
    }
    0
}

/// Pull a four-digit year off the front of a date-ish string.
///
/// Handles "1970", "1970-01-01", and similar; anything shorter or
/// non-numeric normalizes to 0.
pub fn parse_year(raw: &str) -> i64 {
    let digits: String = raw
        .trim_end_matches('\0')
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    if digits.len() == 4 {
        digits.parse().unwrap_or(0)
    } else {
        0
    }
}

// ============================================================================
// MPEG encoding-mode detection
// ============================================================================

/// Detect CBR/ABR/VBR for an MPEG file.
///
/// LAME and friends write a "Xing" (VBR/ABR) or "Info" (CBR) frame at
/// the start of the audio stream, optionally followed by a LAME tag
/// whose VBR-method byte distinguishes ABR from true VBR. Files without
/// any marker are plain fixed-bitrate streams.
fn detect_mpeg_mode(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;

    // Skip a leading ID3v2 tag; it can be large when art is embedded.
    let mut header = [0u8; 10];
    if file.read_exact(&mut header).is_err() {
        return None;
    }
    if &header[0..3] == b"ID3" {
        let skip = id3v2_size(&header);
        file.seek(SeekFrom::Start(10 + skip as u64)).ok()?;
    } else {
        file.seek(SeekFrom::Start(0)).ok()?;
    }

    let mut block = vec![0u8; 8192];
    let read = file.read(&mut block).ok()?;
    block.truncate(read);
    Some(classify_mpeg_block(&block))
}

/// Decode the syncsafe size field of an ID3v2 header.
fn id3v2_size(header: &[u8; 10]) -> u32 {
    ((header[6] as u32) << 21)
        | ((header[7] as u32) << 14)
        | ((header[8] as u32) << 7)
        | (header[9] as u32)
}

/// Classify a block starting at the first MPEG frame.
fn classify_mpeg_block(block: &[u8]) -> String {
    let xing = find_marker(block, b"Xing");
    let info = find_marker(block, b"Info");
    let vbri = find_marker(block, b"VBRI");

    // The LAME tag's VBR-method nibble is authoritative when present:
    // 1/8 = CBR, 2/9 = ABR, 3-6 = VBR.
    if let Some(lame) = find_marker(block, b"LAME") {
        if let Some(&byte) = block.get(lame + 9) {
            match byte & 0x0f {
                2 | 9 => return "ABR".to_string(),
                3..=6 => return "VBR".to_string(),
                1 | 8 => return "CBR".to_string(),
                _ => {}
            }
        }
    }

    if xing.is_some() || vbri.is_some() {
        "VBR".to_string()
    } else if info.is_some() {
        "CBR".to_string()
    } else {
        // No header frame at all: a plain CBR stream.
        "CBR".to_string()
    }
}

fn find_marker(block: &[u8], marker: &[u8]) -> Option<usize> {
    block
        .windows(marker.len())
        .position(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_tracknum_plain() {
        assert_eq!(parse_tracknum("7"), (7, None));
    }

    #[test]
    fn test_parse_tracknum_with_total() {
        assert_eq!(parse_tracknum("3/12"), (3, Some(12)));
    }

    #[test]
    fn test_parse_tracknum_garbage_is_zero() {
        assert_eq!(parse_tracknum(""), (0, None));
        assert_eq!(parse_tracknum("one"), (0, None));
        assert_eq!(parse_tracknum("x/y"), (0, None));
    }

    #[test]
    fn test_parse_tracknum_strips_nul() {
        assert_eq!(parse_tracknum("4\0"), (4, None));
    }

    #[test]
    fn test_parse_year_forms() {
        assert_eq!(parse_year("1970"), 1970);
        assert_eq!(parse_year("1970-01-01"), 1970);
        assert_eq!(parse_year("2016-09-21T20:40:00"), 2016);
        assert_eq!(parse_year(""), 0);
        assert_eq!(parse_year("soon"), 0);
        assert_eq!(parse_year("99"), 0);
    }

    #[test]
    fn test_clean_text_strips_trailing_nuls() {
        assert_eq!(clean_text("Artist\0\0"), "Artist");
        assert_eq!(clean_text("  padded  "), "padded");
    }

    #[test]
    fn test_id3v2_size_syncsafe() {
        let header = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 0x02, 0x01];
        assert_eq!(id3v2_size(&header), 0x101);
    }

    #[test]
    fn test_classify_info_frame_is_cbr() {
        let mut block = vec![0u8; 64];
        block[36..40].copy_from_slice(b"Info");
        assert_eq!(classify_mpeg_block(&block), "CBR");
    }

    #[test]
    fn test_classify_xing_frame_is_vbr() {
        let mut block = vec![0u8; 64];
        block[36..40].copy_from_slice(b"Xing");
        assert_eq!(classify_mpeg_block(&block), "VBR");
    }

    #[test]
    fn test_classify_lame_abr_overrides_xing() {
        let mut block = vec![0u8; 160];
        block[36..40].copy_from_slice(b"Xing");
        block[120..124].copy_from_slice(b"LAME");
        // 9 bytes of encoder version, then revision/method byte.
        block[129] = 0x02; // ABR
        assert_eq!(classify_mpeg_block(&block), "ABR");
    }

    #[test]
    fn test_classify_bare_stream_is_cbr() {
        let block = vec![0xffu8; 64];
        assert_eq!(classify_mpeg_block(&block), "CBR");
    }

    #[test]
    fn test_extract_non_audio_file_fails() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("write failed");

        let result = extract(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_extract_missing_file_fails() {
        let result = extract(Path::new("no_such_file.mp3"));
        assert!(result.is_err());
    }

    proptest! {
        /// A plain numeric track tag round-trips exactly.
        #[test]
        fn prop_plain_number_parses(n in 0u32..10000) {
            prop_assert_eq!(parse_tracknum(&n.to_string()), (n, None));
        }

        /// Without a slash there is never a track total, whatever the
        /// input looks like.
        #[test]
        fn prop_no_slash_means_no_total(raw in "[^/]{0,20}") {
            let (_, max) = parse_tracknum(&raw);
            prop_assert!(max.is_none());
        }
    }
}
