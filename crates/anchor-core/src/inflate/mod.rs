//! Context Inflator
//!
//! Replaces each result's terse content with a coherent window of the
//! surrounding text, read radially around the result's byte range. Reads go
//! to the mirrored file first, then the original path, then the stored
//! compound body. All slicing is byte-accurate; character indexing is never
//! used. Partial words at the window edges are trimmed away, which also
//! keeps UTF-8 sequences intact at the boundaries.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::config::AnchorConfig;
use crate::memory::SearchHit;
use crate::storage::Storage;

/// Bytes scanned for a whitespace break when trimming a window edge.
const EDGE_TRIM_SCAN: usize = 50;

/// Merged windows never exceed this many radii.
const MAX_WINDOW_RADII: u64 = 3;

/// Compute the elastic inflation radius for a request: half the per-hit
/// share of the character budget, clamped to the configured bounds.
pub fn elastic_radius(char_budget: usize, hits: usize, config: &AnchorConfig) -> u64 {
    let raw = char_budget as u64 / hits.max(1) as u64 / 2;
    raw.clamp(config.elastic_radius_min, config.elastic_radius_max)
}

// ============================================================================
// WINDOW PLANNING
// ============================================================================

/// A byte window scheduled for one read, with the hits that collapsed into it
#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    start: u64,
    end: u64,
    /// Indices (into the request's hit list) whose ranges merged here
    hit_indices: Vec<usize>,
}

/// Merge overlapping windows, capping each merged window at
/// `MAX_WINDOW_RADII * radius` bytes. Input must be sorted by start.
fn merge_windows(mut windows: Vec<Window>, radius: u64) -> Vec<Window> {
    windows.sort_by_key(|w| (w.start, w.end));
    let max_width = MAX_WINDOW_RADII * radius.max(1);

    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(prev)
                if window.start <= prev.end
                    && window.end.max(prev.end) - prev.start <= max_width =>
            {
                prev.end = prev.end.max(window.end);
                prev.hit_indices.extend(window.hit_indices);
            }
            _ => merged.push(window),
        }
    }
    merged
}

// ============================================================================
// EDGE TRIMMING
// ============================================================================

/// Trim partial words at both window edges and decode.
///
/// When the window does not begin at byte 0, everything up to the first
/// whitespace in the leading [`EDGE_TRIM_SCAN`] bytes is dropped; the tail is
/// treated symmetrically when the window stops short of the source. Returns
/// `None` when nothing but whitespace survives.
fn trim_window(bytes: &[u8], starts_at_origin: bool, ends_at_eof: bool) -> Option<String> {
    let mut lo = 0usize;
    let mut hi = bytes.len();

    if !starts_at_origin {
        let scan = EDGE_TRIM_SCAN.min(bytes.len());
        if let Some(pos) = bytes[..scan].iter().position(|b| b.is_ascii_whitespace()) {
            lo = pos + 1;
        }
    }
    if !ends_at_eof && hi > lo {
        let scan_start = hi - EDGE_TRIM_SCAN.min(hi - lo);
        if let Some(pos) = bytes[scan_start..hi]
            .iter()
            .rposition(|b| b.is_ascii_whitespace())
        {
            hi = scan_start + pos;
        }
    }
    if lo >= hi {
        return None;
    }

    let text = String::from_utf8_lossy(&bytes[lo..hi]);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// Where a compound's bytes come from
enum Source {
    /// An open read-only file and its size
    Disk(File, u64),
    /// The stored compound body
    Stored(Vec<u8>),
    /// Nothing available; hits stay uninflated
    Missing,
}

impl Source {
    fn len(&self) -> u64 {
        match self {
            Source::Disk(_, size) => *size,
            Source::Stored(bytes) => bytes.len() as u64,
            Source::Missing => 0,
        }
    }

    /// Positional bounded read of `[start, end)`.
    fn read_window(&mut self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        match self {
            Source::Disk(file, _) => {
                let len = (end - start) as usize;
                let mut buf = vec![0u8; len];
                file.seek(SeekFrom::Start(start))?;
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
            Source::Stored(bytes) => Ok(bytes[start as usize..end as usize].to_vec()),
            Source::Missing => Ok(vec![]),
        }
    }
}

// ============================================================================
// INFLATOR
// ============================================================================

/// Byte-radial content inflator
pub struct ContextInflator<'a> {
    storage: &'a Storage,
    config: &'a AnchorConfig,
}

impl<'a> ContextInflator<'a> {
    pub fn new(storage: &'a Storage, config: &'a AnchorConfig) -> Self {
        Self { storage, config }
    }

    /// Inflate every result that carries compound coordinates. Results
    /// already inflated, or without coordinates, pass through untouched;
    /// results whose window trims to nothing are dropped. Idempotent.
    ///
    /// Returns the surviving hits and stage diagnostics.
    pub fn inflate(&self, hits: Vec<SearchHit>, radius: u64) -> (Vec<SearchHit>, Vec<String>) {
        let mut hits = hits;
        let mut errors: Vec<String> = Vec::new();
        let mut dropped: Vec<usize> = Vec::new();

        // Group inflatable hits by compound so each source opens once.
        let mut by_compound: HashMap<String, Vec<usize>> = HashMap::new();
        let mut compound_order: Vec<String> = Vec::new();
        for (index, hit) in hits.iter().enumerate() {
            if hit.is_inflated {
                continue;
            }
            let (Some(compound_id), Some(_), Some(_)) =
                (&hit.compound_id, hit.start_byte, hit.end_byte)
            else {
                continue;
            };
            if !by_compound.contains_key(compound_id) {
                compound_order.push(compound_id.clone());
            }
            by_compound.entry(compound_id.clone()).or_default().push(index);
        }

        // File reads are sequential per request to bound memory.
        for compound_id in compound_order {
            let indices = by_compound.remove(&compound_id).unwrap_or_default();
            let mut source = self.open_source(&compound_id, &mut errors);
            if matches!(source, Source::Missing) {
                // Fall back contract: results stay as-is, uninflated.
                continue;
            }
            let size = source.len();

            let windows: Vec<Window> = indices
                .iter()
                .map(|&index| {
                    let start = hits[index].start_byte.unwrap_or(0);
                    let end = hits[index].end_byte.unwrap_or(start);
                    Window {
                        start: start.saturating_sub(radius),
                        end: end.saturating_add(radius).min(size),
                        hit_indices: vec![index],
                    }
                })
                .collect();

            for window in merge_windows(windows, radius) {
                if window.start >= window.end {
                    dropped.extend(&window.hit_indices);
                    continue;
                }
                let bytes = match source.read_window(window.start, window.end) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        errors.push(format!("inflate_read({compound_id}): {err}"));
                        continue;
                    }
                };
                match trim_window(&bytes, window.start == 0, window.end >= size) {
                    Some(trimmed) => {
                        let content = format!("...{trimmed}...");
                        for &index in &window.hit_indices {
                            let hit = &mut hits[index];
                            hit.content = content.clone();
                            hit.start_byte = Some(window.start);
                            hit.end_byte = Some(window.end);
                            hit.is_inflated = true;
                        }
                    }
                    None => dropped.extend(&window.hit_indices),
                }
            }
        }

        if !dropped.is_empty() {
            let mut keep = vec![true; hits.len()];
            for index in dropped {
                keep[index] = false;
            }
            let mut flags = keep.into_iter();
            hits.retain(|_| flags.next().unwrap_or(true));
        }

        (hits, errors)
    }

    /// Resolve a compound to its byte source: mirrored file, original file,
    /// stored body, in that order.
    fn open_source(&self, compound_id: &str, errors: &mut Vec<String>) -> Source {
        let location = match self.storage.compound_location(compound_id) {
            Ok(Some(location)) => Some(location),
            Ok(None) => None,
            Err(err) => {
                errors.push(format!("inflate_lookup({compound_id}): {err}"));
                None
            }
        };

        if let Some((path, _)) = &location {
            for candidate in self.candidate_paths(path) {
                if let Ok(file) = File::open(&candidate) {
                    if let Ok(meta) = file.metadata() {
                        return Source::Disk(file, meta.len());
                    }
                }
            }
        }

        match self.storage.compound_body(compound_id) {
            Ok(Some(body)) => Source::Stored(body.into_bytes()),
            Ok(None) => {
                errors.push(format!("inflate_missing({compound_id})"));
                Source::Missing
            }
            Err(err) => {
                errors.push(format!("inflate_body({compound_id}): {err}"));
                Source::Missing
            }
        }
    }

    /// Mirror root shadows the notebook root; absolute paths are also tried
    /// verbatim.
    fn candidate_paths(&self, path: &str) -> Vec<PathBuf> {
        let raw = Path::new(path);
        let mut candidates = Vec::new();
        if let Some(mirror) = &self.config.mirror_root {
            let relative = if raw.is_absolute() {
                raw.strip_prefix("/").unwrap_or(raw)
            } else {
                raw
            };
            candidates.push(mirror.join(relative));
        }
        if raw.is_absolute() {
            candidates.push(raw.to_path_buf());
        } else {
            candidates.push(self.config.notebook_root.join(raw));
        }
        candidates
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::simhash64;
    use crate::memory::{Compound, Provenance};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage, AnchorConfig) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open_at(&dir.path().join("anchor.db")).unwrap();
        let config = AnchorConfig {
            notebook_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        (dir, storage, config)
    }

    fn seed_compound(storage: &Storage, id: &str, path: &str, body: Option<&str>) {
        storage
            .upsert_compound(&Compound {
                compound_id: id.to_string(),
                path: path.to_string(),
                provenance: Provenance::Internal,
                timestamp: 1_700_000_000_000,
                compound_body: body.map(str::to_string),
                molecular_signature: simhash64(body.unwrap_or_default()),
            })
            .unwrap();
    }

    fn coord_hit(id: &str, compound: &str, start: u64, end: u64) -> SearchHit {
        let mut hit = SearchHit::new(id, "stub", 1.0);
        hit.compound_id = Some(compound.to_string());
        hit.start_byte = Some(start);
        hit.end_byte = Some(end);
        hit
    }

    #[test]
    fn test_elastic_radius_bounds() {
        let config = AnchorConfig::default();
        assert_eq!(elastic_radius(20_000, 10, &config), 1_000);
        assert_eq!(elastic_radius(100, 10, &config), 200); // clamped up
        assert_eq!(elastic_radius(10_000_000, 1, &config), 32_000); // clamped down
        assert_eq!(elastic_radius(4_000, 0, &config), 2_000); // hits floor of 1
    }

    #[test]
    fn test_merge_windows_respects_cap() {
        let windows = vec![
            Window { start: 0, end: 100, hit_indices: vec![0] },
            Window { start: 50, end: 150, hit_indices: vec![1] },
            Window { start: 140, end: 1_000, hit_indices: vec![2] },
        ];
        let merged = merge_windows(windows, 100);
        // First two merge (width 150 <= 300); the third would widen past the
        // 3-radius cap and starts its own window.
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start, 0);
        assert_eq!(merged[0].end, 150);
        assert_eq!(merged[0].hit_indices, vec![0, 1]);
    }

    #[test]
    fn test_trim_window_edges() {
        let bytes = b"tial word in the middle of a sentence and a trailing par";
        let trimmed = trim_window(bytes, false, false).unwrap();
        assert!(trimmed.starts_with("word"));
        assert!(trimmed.ends_with("trailing"));
    }

    #[test]
    fn test_trim_window_origin_untouched() {
        let bytes = b"whole text here";
        let trimmed = trim_window(bytes, true, true).unwrap();
        assert_eq!(trimmed, "whole text here");
    }

    #[test]
    fn test_trim_window_all_whitespace_drops() {
        assert!(trim_window(b"   \n\t  ", true, true).is_none());
        assert!(trim_window(b"", true, true).is_none());
    }

    #[test]
    fn test_inflate_from_disk_is_byte_exact() {
        let (dir, storage, config) = setup();
        let body = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        std::fs::write(dir.path().join("note.md"), body).unwrap();
        seed_compound(&storage, "c1", "note.md", None);

        let inflator = ContextInflator::new(&storage, &config);
        let hits = vec![coord_hit("h1", "c1", 12, 17)]; // "gamma"
        let (out, errors) = inflator.inflate(hits, 10);

        assert!(errors.is_empty());
        assert_eq!(out.len(), 1);
        assert!(out[0].is_inflated);
        // Window [2, 27) trims the leading partial "pha" and trailing partial.
        let start = out[0].start_byte.unwrap();
        let end = out[0].end_byte.unwrap();
        assert_eq!((start, end), (2, 27));
        assert!(out[0].content.contains("beta gamma"));
        assert!(out[0].content.starts_with("..."));
        assert!(out[0].content.ends_with("..."));

        // Reproducible by re-reading the recorded range.
        let raw = std::fs::read(dir.path().join("note.md")).unwrap();
        let window = &raw[start as usize..end as usize];
        let retrimmed = trim_window(window, start == 0, end >= raw.len() as u64).unwrap();
        assert_eq!(out[0].content, format!("...{retrimmed}..."));
    }

    #[test]
    fn test_inflate_falls_back_to_stored_body() {
        let (_dir, storage, config) = setup();
        let body = "one two three four five six seven eight nine ten";
        seed_compound(&storage, "c1", "vanished/file.md", Some(body));

        let inflator = ContextInflator::new(&storage, &config);
        let (out, errors) = inflator.inflate(vec![coord_hit("h1", "c1", 8, 13)], 8);
        assert!(errors.is_empty());
        assert!(out[0].is_inflated);
        assert!(out[0].content.contains("three"));
    }

    #[test]
    fn test_inflate_missing_everything_keeps_hit() {
        let (_dir, storage, config) = setup();
        seed_compound(&storage, "c1", "gone.md", None);

        let inflator = ContextInflator::new(&storage, &config);
        let (out, errors) = inflator.inflate(vec![coord_hit("h1", "c1", 0, 4)], 8);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_inflated);
        assert_eq!(out[0].content, "stub");
        assert!(errors.iter().any(|e| e.contains("inflate_missing")));
    }

    #[test]
    fn test_inflate_zero_byte_file_drops_hit() {
        let (dir, storage, config) = setup();
        std::fs::write(dir.path().join("empty.md"), b"").unwrap();
        seed_compound(&storage, "c1", "empty.md", None);

        let inflator = ContextInflator::new(&storage, &config);
        let (out, _) = inflator.inflate(vec![coord_hit("h1", "c1", 0, 0)], 8);
        assert!(out.is_empty());
    }

    #[test]
    fn test_inflate_idempotent() {
        let (dir, storage, config) = setup();
        let body = "alpha beta gamma delta epsilon zeta";
        std::fs::write(dir.path().join("note.md"), body).unwrap();
        seed_compound(&storage, "c1", "note.md", None);

        let inflator = ContextInflator::new(&storage, &config);
        let (once, _) = inflator.inflate(vec![coord_hit("h1", "c1", 11, 16)], 6);
        let (twice, _) = inflator.inflate(once.clone(), 6);
        assert_eq!(once[0].content, twice[0].content);
        assert_eq!(once[0].start_byte, twice[0].start_byte);
    }

    #[test]
    fn test_inflate_merges_overlapping_hits() {
        let (dir, storage, config) = setup();
        let body = "the quick brown fox jumps over the lazy dog near the river bank today";
        std::fs::write(dir.path().join("note.md"), body).unwrap();
        seed_compound(&storage, "c1", "note.md", None);

        let inflator = ContextInflator::new(&storage, &config);
        let hits = vec![
            coord_hit("h1", "c1", 4, 9),   // "quick"
            coord_hit("h2", "c1", 10, 15), // "brown"
        ];
        let (out, _) = inflator.inflate(hits, 20);
        assert_eq!(out.len(), 2);
        // Both collapsed into one window: identical content and bounds.
        assert_eq!(out[0].content, out[1].content);
        assert_eq!(out[0].start_byte, out[1].start_byte);
        assert_eq!(out[0].end_byte, out[1].end_byte);
    }

    #[test]
    fn test_mirror_root_shadows_notebook() {
        let (dir, storage, _) = setup();
        let mirror = dir.path().join("mirror");
        std::fs::create_dir_all(&mirror).unwrap();
        std::fs::write(dir.path().join("note.md"), "notebook copy of the text").unwrap();
        std::fs::write(mirror.join("note.md"), "mirrored copy of the text").unwrap();
        seed_compound(&storage, "c1", "note.md", None);

        let config = AnchorConfig {
            notebook_root: dir.path().to_path_buf(),
            mirror_root: Some(mirror),
            ..Default::default()
        };
        let inflator = ContextInflator::new(&storage, &config);
        let (out, _) = inflator.inflate(vec![coord_hit("h1", "c1", 0, 8)], 200);
        assert!(out[0].content.contains("mirrored"));
    }
}
