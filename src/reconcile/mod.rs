//! Catalog reconciliation: converging the store onto the filesystem.
//!
//! The [`Reconciler`] walks the library root, extracts metadata from
//! files that are new or changed, and applies the minimal set of
//! catalog mutations: song add/update/move/delete, album creation,
//! in-place rename, merge, split, ownership reassignment, and artist
//! garbage collection. Unchanged entities keep their primary keys.
//!
//! File reads (hashing and tag extraction) run concurrently on the
//! blocking pool; all mutations are applied sequentially by the run
//! itself, in deterministic (path / name sorted) order, so two runs
//! over the same tree produce the same catalog.
//!
//! A process-wide gate rejects overlapping runs on the same library
//! root. A run observes a shared cancellation flag between mutation
//! steps; a cancelled run leaves the catalog consistent at the last
//! applied change.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::LibraryConfig;
use crate::db;
use crate::error::{Error, Result, ResultExt};
use crate::fingerprint::{FileSignature, compute_fingerprint};
use crate::metadata::{SongTags, TagSource};
use crate::model::Song;
use crate::normalize::split_prefix;
use crate::report::RunReport;
use crate::scanner;

/// Concurrent file reads during the scan phase.
const SCAN_CONCURRENCY: usize = 10;

const CANCELLED_MESSAGE: &str = "Run cancelled, stopping at last applied change";
const NOTHING_TO_DO: &str = "Nothing to do";

/// Name of the per-artist bucket for songs without an album tag.
fn misc_album_name(artist_name: &str) -> String {
    format!("Non-Album Tracks: {artist_name}")
}

/// What a run is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Only never-seen paths are added; nothing is updated or removed.
    Add,
    /// Full reconciliation: add, update, move, and remove.
    Update,
}

/// Library-root gate: at most one run per root, process-wide.
static ACTIVE_ROOTS: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

struct RunGuard {
    root: PathBuf,
}

impl RunGuard {
    fn acquire(root: &Path) -> Result<Self> {
        let active = ACTIVE_ROOTS.get_or_init(Default::default);
        let mut active = active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(root.to_path_buf()) {
            return Err(Error::RunInProgress(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let active = ACTIVE_ROOTS.get_or_init(Default::default);
        let mut active = active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.root);
    }
}

/// Outcome of reading one file during the scan phase.
enum Scanned {
    /// Never-seen path, fully extracted.
    New {
        rel: String,
        sig: FileSignature,
        sha: String,
        tags: SongTags,
    },
    /// Known path whose contents changed, re-extracted.
    Changed {
        song: Song,
        sig: FileSignature,
        sha: String,
        tags: SongTags,
    },
    /// Known path touched but byte-identical; only the signature moves.
    Refreshed {
        song_id: i64,
        rel: String,
        sig: FileSignature,
    },
    /// Could not be read or carries unusable tags; excluded from the run.
    Failed { rel: String, message: String },
}

impl Scanned {
    fn rel(&self) -> &str {
        match self {
            Scanned::New { rel, .. }
            | Scanned::Refreshed { rel, .. }
            | Scanned::Failed { rel, .. } => rel,
            Scanned::Changed { song, .. } => &song.filename,
        }
    }
}

/// Read a single file: hash it, and extract tags unless the hash shows
/// the contents unchanged. Runs on the blocking pool.
fn scan_file(
    reader: &dyn TagSource,
    abs: &Path,
    rel: String,
    sig: FileSignature,
    existing: Option<Song>,
) -> Scanned {
    let sha = match compute_fingerprint(abs) {
        Ok(sha) => sha,
        Err(e) => {
            return Scanned::Failed {
                rel,
                message: format!("cannot read: {e}"),
            };
        }
    };

    if let Some(song) = existing {
        if sha == song.sha256sum {
            return Scanned::Refreshed {
                song_id: song.id,
                rel,
                sig,
            };
        }
        match reader.extract(abs) {
            Ok(tags) => Scanned::Changed {
                song,
                sig,
                sha,
                tags,
            },
            Err(e) => Scanned::Failed {
                rel,
                message: e.to_string(),
            },
        }
    } else {
        match reader.extract(abs) {
            Ok(tags) => Scanned::New {
                rel,
                sig,
                sha,
                tags,
            },
            Err(e) => Scanned::Failed {
                rel,
                message: e.to_string(),
            },
        }
    }
}

/// A file that will be written to the catalog, with its artist roles
/// already resolved.
struct Incoming {
    rel: String,
    sig: FileSignature,
    sha: String,
    tags: SongTags,
    /// The current catalog row for a changed file, None for a new one.
    existing: Option<Song>,
    artist_id: i64,
    group_id: Option<i64>,
    conductor_id: Option<i64>,
    composer_id: Option<i64>,
}

#[derive(Default)]
struct Counters {
    added: usize,
    updated: usize,
    moved: usize,
    removed: usize,
    refreshed: usize,
}

/// Reconciles the catalog with the library filesystem.
pub struct Reconciler {
    pool: SqlitePool,
    library: LibraryConfig,
    reader: Arc<dyn TagSource>,
    cancel: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, library: LibraryConfig, reader: Arc<dyn TagSource>) -> Self {
        Self {
            pool,
            library,
            reader,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag a signal handler can set to stop the run between
    /// mutation steps.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Add never-seen files to the catalog. Known paths are untouched
    /// even if their contents changed.
    pub async fn add(&self) -> Result<RunReport> {
        self.run(RunMode::Add, RunReport::new()).await
    }

    /// Full reconciliation of the catalog against the filesystem.
    pub async fn update(&self) -> Result<RunReport> {
        self.run(RunMode::Update, RunReport::new()).await
    }

    /// Run reconciliation with a caller-provided report, so an observer
    /// channel can stream progress.
    pub async fn run(&self, mode: RunMode, mut report: RunReport) -> Result<RunReport> {
        let _guard = RunGuard::acquire(&self.library.root)?;

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        let mut counters = Counters::default();
        let mut mutated = false;
        let mut affected_albums: BTreeSet<i64> = BTreeSet::new();
        let mut orphan_candidates: BTreeSet<i64> = BTreeSet::new();

        // Phase 1: listing. Disk on one side, catalog on the other.
        let mut on_disk: BTreeMap<String, PathBuf> = BTreeMap::new();
        for abs in scanner::collect_audio_files(&self.library.root) {
            if let Some(rel) = scanner::relative_to_root(&self.library.root, &abs) {
                on_disk.insert(rel, abs);
            }
        }

        let known: HashMap<String, Song> = db::get_all_songs(&self.pool)
            .await
            .with_context("loading catalog songs")?
            .into_iter()
            .map(|song| (song.filename.clone(), song))
            .collect();

        let mut missing: Vec<Song> = if mode == RunMode::Update {
            known
                .values()
                .filter(|song| !on_disk.contains_key(&song.filename))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        missing.sort_by(|a, b| a.filename.cmp(&b.filename));

        // Phase 2: decide which files need reading. An unchanged
        // signature skips the file without touching its bytes.
        let mut jobs: Vec<(String, PathBuf, FileSignature, Option<Song>)> = Vec::new();
        for (rel, abs) in &on_disk {
            let existing = known.get(rel);
            if mode == RunMode::Add && existing.is_some() {
                continue;
            }
            let sig = match FileSignature::read(abs) {
                Ok(sig) => sig,
                Err(e) => {
                    report.error(format!("Skipping {rel}: cannot stat: {e}"));
                    continue;
                }
            };
            if let Some(song) = existing
                && sig.size as i64 == song.size
                && sig.mtime == song.mtime
            {
                continue;
            }
            jobs.push((rel.clone(), abs.clone(), sig, existing.cloned()));
        }

        // Phase 3: hash and extract concurrently, then restore path
        // order so mutations are deterministic.
        let outcomes: Vec<_> = stream::iter(jobs)
            .map(|(rel, abs, sig, existing)| {
                let reader = Arc::clone(&self.reader);
                async move {
                    tokio::task::spawn_blocking(move || {
                        scan_file(reader.as_ref(), &abs, rel, sig, existing)
                    })
                    .await
                }
            })
            .buffer_unordered(SCAN_CONCURRENCY)
            .collect()
            .await;

        let mut scanned = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            scanned.push(outcome.map_err(|e| Error::Io(std::io::Error::other(e)))?);
        }
        scanned.sort_by(|a, b| a.rel().cmp(b.rel()));

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        let mut new_files: Vec<(String, FileSignature, String, SongTags)> = Vec::new();
        let mut changed_files: Vec<(Song, FileSignature, String, SongTags)> = Vec::new();
        for item in scanned {
            match item {
                Scanned::Failed { rel, message } => {
                    report.error(format!("Skipping {rel}: {message}"));
                }
                Scanned::Refreshed { song_id, rel, sig } => {
                    db::update_song_signature(&self.pool, song_id, sig.size as i64, sig.mtime)
                        .await?;
                    debug!("Refreshed signature for {rel}");
                    counters.refreshed += 1;
                    mutated = true;
                }
                Scanned::New {
                    rel,
                    sig,
                    sha,
                    tags,
                } => new_files.push((rel, sig, sha, tags)),
                Scanned::Changed {
                    song,
                    sig,
                    sha,
                    tags,
                } => changed_files.push((song, sig, sha, tags)),
            }
        }

        // Phase 4: move detection. A new path carrying the fingerprint
        // of a vanished one is a rename; the row keeps its identity.
        let mut missing_by_sha: HashMap<String, Vec<Song>> = HashMap::new();
        for song in missing {
            missing_by_sha
                .entry(song.sha256sum.clone())
                .or_default()
                .push(song);
        }

        let mut incoming_raw: Vec<(String, FileSignature, String, SongTags, Option<Song>)> =
            Vec::new();
        for (rel, sig, sha, tags) in new_files {
            let claimed = missing_by_sha
                .get_mut(&sha)
                .filter(|candidates| !candidates.is_empty())
                .map(|candidates| candidates.remove(0));
            if let Some(old) = claimed {
                db::update_song_location(&self.pool, old.id, &rel, sig.mtime).await?;
                report.info(format!("Moved {} to {}", old.filename, rel));
                counters.moved += 1;
                mutated = true;
            } else {
                incoming_raw.push((rel, sig, sha, tags, None));
            }
        }

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        // Phase 5: deletions for paths gone from disk and not moved.
        let mut deleted: Vec<Song> = missing_by_sha.into_values().flatten().collect();
        deleted.sort_by(|a, b| a.filename.cmp(&b.filename));
        for song in deleted {
            db::delete_song(&self.pool, song.id).await?;
            report.info(format!("Removed {}", song.filename));
            counters.removed += 1;
            mutated = true;
            affected_albums.insert(song.album_id);
            orphan_candidates.insert(song.artist_id);
            for id in [song.group_id, song.conductor_id, song.composer_id]
                .into_iter()
                .flatten()
            {
                orphan_candidates.insert(id);
            }
        }

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        // Phase 6: resolve artist roles for everything being written.
        for (song, sig, sha, tags) in changed_files {
            orphan_candidates.insert(song.artist_id);
            for id in [song.group_id, song.conductor_id, song.composer_id]
                .into_iter()
                .flatten()
            {
                orphan_candidates.insert(id);
            }
            incoming_raw.push((song.filename.clone(), sig, sha, tags, Some(song)));
        }
        incoming_raw.sort_by(|a, b| a.0.cmp(&b.0));

        let mut incoming: Vec<Incoming> = Vec::with_capacity(incoming_raw.len());
        for (rel, sig, sha, tags, existing) in incoming_raw {
            let artist_id = self.resolve_artist(&tags.artist).await?;
            let group_id = self.resolve_optional_artist(&tags.raw_group).await?;
            let conductor_id = self.resolve_optional_artist(&tags.raw_conductor).await?;
            let composer_id = self.resolve_optional_artist(&tags.raw_composer).await?;
            incoming.push(Incoming {
                rel,
                sig,
                sha,
                tags,
                existing,
                artist_id,
                group_id,
                conductor_id,
                composer_id,
            });
        }

        // Phase 7: album binding. Songs group by case-insensitive album
        // tag across the whole batch; groups are settled in sorted key
        // order so runs are reproducible.
        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut no_album: Vec<usize> = Vec::new();
        for (index, item) in incoming.iter().enumerate() {
            if item.tags.album.is_empty() {
                no_album.push(index);
            } else {
                groups
                    .entry(item.tags.album.to_lowercase())
                    .or_default()
                    .push(index);
            }
        }

        for indices in groups.values() {
            if self.cancelled(&mut report) {
                return Ok(report);
            }
            let album_id = self
                .bind_album_group(&incoming, indices, &mut report, &mut mutated)
                .await?;
            for &index in indices {
                let item = &incoming[index];
                self.write_song(item, album_id, &mut report, &mut counters)
                    .await?;
                affected_albums.insert(album_id);
                if let Some(old) = &item.existing {
                    affected_albums.insert(old.album_id);
                }
            }
        }

        // Songs without an album tag go to their artist's bucket.
        let mut misc_cache: HashMap<i64, i64> = HashMap::new();
        for index in no_album {
            if self.cancelled(&mut report) {
                return Ok(report);
            }
            let item = &incoming[index];
            let album_id = match misc_cache.get(&item.artist_id) {
                Some(&id) => id,
                None => {
                    let id = self
                        .misc_album_for(item.artist_id, &mut report, &mut mutated)
                        .await?;
                    misc_cache.insert(item.artist_id, id);
                    id
                }
            };
            self.write_song(item, album_id, &mut report, &mut counters)
                .await?;
            affected_albums.insert(album_id);
            if let Some(old) = &item.existing {
                affected_albums.insert(old.album_id);
            }
        }

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        // Phase 8: album ownership, merges, and cached stats.
        self.settle_albums(
            &affected_albums,
            &mut report,
            &mut orphan_candidates,
            &mut mutated,
        )
        .await?;

        if self.cancelled(&mut report) {
            return Ok(report);
        }

        // Phase 9: artists nothing references anymore.
        for artist_id in orphan_candidates {
            if let Some(artist) = db::get_artist(&self.pool, artist_id).await?
                && db::delete_artist_if_orphaned(&self.pool, artist_id).await?
            {
                report.info(format!(
                    "Removed orphaned artist \"{}\"",
                    artist.display_name()
                ));
                mutated = true;
            }
        }

        if mutated {
            let mut summary = format!(
                "{} added, {} updated, {} moved, {} removed",
                counters.added, counters.updated, counters.moved, counters.removed
            );
            if counters.refreshed > 0 {
                summary.push_str(&format!(", {} refreshed", counters.refreshed));
            }
            report.info(summary);
        } else {
            report.info(NOTHING_TO_DO);
        }
        Ok(report)
    }

    /// Push the cancellation warning and answer whether to stop.
    fn cancelled(&self, report: &mut RunReport) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            report.warning(CANCELLED_MESSAGE);
            true
        } else {
            false
        }
    }

    async fn resolve_artist(&self, raw: &str) -> Result<i64> {
        let (prefix, base) = split_prefix(raw);
        Ok(db::get_or_create_artist(&self.pool, base, prefix).await?)
    }

    async fn resolve_optional_artist(&self, raw: &str) -> Result<Option<i64>> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.resolve_artist(raw).await?))
    }

    /// Pick the album row a group of same-named songs binds to.
    ///
    /// An existing album with the name wins. Failing that, a source
    /// album losing every one of its current songs to this group is
    /// renamed in place, keeping its identity. Only when neither holds
    /// is a new album created.
    async fn bind_album_group(
        &self,
        incoming: &[Incoming],
        indices: &[usize],
        report: &mut RunReport,
        mutated: &mut bool,
    ) -> Result<i64> {
        let display_name = incoming[indices[0]].tags.album.clone();

        if let Some(album) = db::find_album_by_name(&self.pool, &display_name).await? {
            return Ok(album.id);
        }

        let group_song_ids: HashSet<i64> = indices
            .iter()
            .filter_map(|&i| incoming[i].existing.as_ref().map(|song| song.id))
            .collect();
        let source_albums: BTreeSet<i64> = indices
            .iter()
            .filter_map(|&i| incoming[i].existing.as_ref().map(|song| song.album_id))
            .collect();

        for album_id in source_albums {
            let Some(album) = db::get_album(&self.pool, album_id).await? else {
                continue;
            };
            if album.miscellaneous {
                continue;
            }
            let current = db::get_songs_by_album(&self.pool, album_id).await?;
            if !current.is_empty() && current.iter().all(|song| group_song_ids.contains(&song.id))
            {
                db::update_album_name(&self.pool, album_id, &display_name).await?;
                report.info(format!(
                    "Renamed album \"{}\" to \"{}\"",
                    album.name, display_name
                ));
                *mutated = true;
                return Ok(album_id);
            }
        }

        let owner = incoming[indices[0]].artist_id;
        let album_id = db::create_album(&self.pool, &display_name, owner, false).await?;
        report.info(format!("Created album \"{display_name}\""));
        *mutated = true;
        Ok(album_id)
    }

    /// Find or create the non-album bucket for an artist.
    async fn misc_album_for(
        &self,
        artist_id: i64,
        report: &mut RunReport,
        mutated: &mut bool,
    ) -> Result<i64> {
        if let Some(album) = db::find_misc_album(&self.pool, artist_id).await? {
            return Ok(album.id);
        }
        let artist = db::get_artist(&self.pool, artist_id)
            .await?
            .ok_or_else(|| Error::Database(sqlx::Error::RowNotFound))?;
        let name = misc_album_name(&artist.name);
        let album_id = db::create_album(&self.pool, &name, artist_id, true).await?;
        report.info(format!("Created album \"{name}\""));
        *mutated = true;
        Ok(album_id)
    }

    /// Insert or rewrite one song row. A changed file keeps its row ID
    /// and `time_added`.
    async fn write_song(
        &self,
        item: &Incoming,
        album_id: i64,
        report: &mut RunReport,
        counters: &mut Counters,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let song = Song {
            id: item.existing.as_ref().map(|s| s.id).unwrap_or(0),
            filename: item.rel.clone(),
            title: item.tags.title.clone(),
            year: item.tags.year,
            tracknum: item.tags.tracknum as i64,
            artist_id: item.artist_id,
            album_id,
            group_id: item.group_id,
            conductor_id: item.conductor_id,
            composer_id: item.composer_id,
            raw_group: item.tags.raw_group.clone(),
            raw_conductor: item.tags.raw_conductor.clone(),
            raw_composer: item.tags.raw_composer.clone(),
            filetype: item.tags.filetype.clone(),
            bitrate: item.tags.bitrate as i64,
            mode: item.tags.mode.clone(),
            length: item.tags.length as i64,
            size: item.sig.size as i64,
            mtime: item.sig.mtime,
            sha256sum: item.sha.clone(),
            time_added: item
                .existing
                .as_ref()
                .map(|s| s.time_added.clone())
                .unwrap_or_else(|| now.clone()),
            time_updated: now,
        };

        if item.existing.is_some() {
            db::update_song(&self.pool, &song).await?;
            report.info(format!("Updated {}", item.rel));
            counters.updated += 1;
        } else {
            db::insert_song(&self.pool, &song).await?;
            report.info(format!("Added {}", item.rel));
            counters.added += 1;
        }
        Ok(())
    }

    /// Re-derive ownership, fold duplicate names together, and refresh
    /// cached stats for every album a run touched.
    async fn settle_albums(
        &self,
        affected: &BTreeSet<i64>,
        report: &mut RunReport,
        orphans: &mut BTreeSet<i64>,
        mutated: &mut bool,
    ) -> Result<()> {
        let various = db::get_various_artist(&self.pool).await?;
        let mut done: HashSet<i64> = HashSet::new();

        for &album_id in affected {
            if done.contains(&album_id) {
                continue;
            }
            let Some(mut album) = db::get_album(&self.pool, album_id).await? else {
                continue;
            };

            // Duplicate names collapse into the oldest row.
            if !album.miscellaneous {
                let duplicates = db::find_albums_by_name(&self.pool, &album.name).await?;
                if duplicates.len() > 1 {
                    let survivor = duplicates[0].clone();
                    for other in &duplicates[1..] {
                        for song in db::get_songs_by_album(&self.pool, other.id).await? {
                            db::update_song_album(&self.pool, song.id, survivor.id).await?;
                        }
                        orphans.insert(other.artist_id);
                        db::delete_album(&self.pool, other.id).await?;
                        report.info(format!(
                            "Merged album \"{}\" into \"{}\"",
                            other.name, survivor.name
                        ));
                        *mutated = true;
                        done.insert(other.id);
                    }
                    album = survivor;
                }
            }

            let artists = db::distinct_song_artists(&self.pool, album.id).await?;
            match artists.len() {
                0 => {
                    orphans.insert(album.artist_id);
                    db::delete_album(&self.pool, album.id).await?;
                    report.info(format!("Removed empty album \"{}\"", album.name));
                    *mutated = true;
                    done.insert(album.id);
                    continue;
                }
                1 => {
                    // A miscellaneous bucket stays with its artist.
                    if !album.miscellaneous && album.artist_id != artists[0] {
                        orphans.insert(album.artist_id);
                        db::update_album_artist(&self.pool, album.id, artists[0]).await?;
                        report.info(format!("Reassigned album \"{}\"", album.name));
                        *mutated = true;
                    }
                }
                _ => {
                    if !album.miscellaneous && album.artist_id != various.id {
                        orphans.insert(album.artist_id);
                        db::update_album_artist(&self.pool, album.id, various.id).await?;
                        report.info(format!(
                            "Album \"{}\" has multiple artists, now filed under {}",
                            album.name, various.name
                        ));
                        *mutated = true;
                    }
                }
            }

            db::refresh_album_stats(&self.pool, album.id).await?;
            done.insert(album.id);
        }
        Ok(())
    }
}
