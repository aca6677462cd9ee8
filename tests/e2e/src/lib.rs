//! End-to-end test harness
//!
//! Builds throwaway notebooks: a temp directory standing in for the user's
//! files, a fresh store, and an engine wired to both. Seed helpers play the
//! role of the external ingestion pipeline, writing compounds, molecules,
//! atoms and positions the way the atomizer would.

use std::path::Path;

use anchor_core::{
    engram_key, simhash64, AnchorConfig, AnchorEngine, Atom, AtomPosition, AtomType, Compound,
    Molecule, MoleculeType, Provenance, Storage,
};
use tempfile::TempDir;

/// A disposable notebook: temp dir + store + engine
pub struct NotebookFixture {
    pub dir: TempDir,
    pub engine: AnchorEngine,
}

impl NotebookFixture {
    /// Fixture with default configuration rooted at the temp dir.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Fixture with configuration tweaks applied on top of the default.
    pub fn with_config(tweak: impl FnOnce(&mut AnchorConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let storage = Storage::open_at(&dir.path().join("anchor.db")).expect("open store");
        let mut config = AnchorConfig {
            notebook_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        tweak(&mut config);
        let engine = AnchorEngine::with_storage(storage, config);
        Self { dir, engine }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Ingest a note the way the atomizer would: the file lands on disk
    /// (unless `on_disk` is false, simulating a body-only compound), the
    /// compound row points at it, and one molecule spans the whole body.
    /// Returns the compound id.
    pub fn ingest_note(&self, options: NoteOptions<'_>) -> String {
        let compound_id = format!("cmp-{}", engram_key(options.path));
        if options.on_disk {
            let full = self.root().join(options.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("note dir");
            }
            std::fs::write(&full, options.body).expect("write note");
        }

        let compound = Compound {
            compound_id: compound_id.clone(),
            path: options.path.to_string(),
            provenance: options.provenance,
            timestamp: options.timestamp,
            compound_body: options.store_body.then(|| options.body.to_string()),
            molecular_signature: simhash64(options.body),
        };
        let molecule = Molecule {
            molecule_id: format!("{compound_id}-m0"),
            compound_id: compound_id.clone(),
            content: options.body.to_string(),
            sequence: 0,
            start_byte: 0,
            end_byte: options.body.len() as u64,
            molecule_type: options.molecule_type,
            numeric_value: None,
            numeric_unit: None,
            molecular_signature: simhash64(options.body),
            timestamp: options.timestamp,
        };
        self.engine
            .storage()
            .ingest_batch(&compound, &[molecule], &[], &[])
            .expect("ingest note");
        compound_id
    }

    /// Register an atom, optionally positioned inside a compound.
    pub fn ingest_atom(
        &self,
        atom_id: &str,
        label: &str,
        content: &str,
        tags: &[&str],
        timestamp: i64,
        position: Option<(&str, u64)>,
    ) {
        self.engine
            .storage()
            .upsert_atom(&Atom {
                atom_id: atom_id.to_string(),
                label: label.to_string(),
                atom_type: AtomType::Concept,
                weight: 0.8,
                content: content.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                buckets: vec![],
                timestamp,
                provenance: Provenance::Internal,
                molecular_signature: simhash64(content),
            })
            .expect("ingest atom");
        if let Some((compound_id, offset)) = position {
            self.engine
                .storage()
                .upsert_position(&AtomPosition {
                    compound_id: compound_id.to_string(),
                    byte_offset: offset,
                    atom_label: label.to_string(),
                })
                .expect("ingest position");
        }
    }
}

impl Default for NotebookFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Options for [`NotebookFixture::ingest_note`]
pub struct NoteOptions<'a> {
    pub path: &'a str,
    pub body: &'a str,
    pub timestamp: i64,
    pub provenance: Provenance,
    pub molecule_type: MoleculeType,
    /// Write the file under the notebook root
    pub on_disk: bool,
    /// Keep the body in the compound row
    pub store_body: bool,
}

impl<'a> NoteOptions<'a> {
    /// A plain internal prose note, on disk with a stored body.
    pub fn new(path: &'a str, body: &'a str, timestamp: i64) -> Self {
        Self {
            path,
            body,
            timestamp,
            provenance: Provenance::Internal,
            molecule_type: MoleculeType::Prose,
            on_disk: true,
            store_body: true,
        }
    }

    pub fn body_only(mut self) -> Self {
        self.on_disk = false;
        self
    }

    pub fn disk_only(mut self) -> Self {
        self.store_body = false;
        self
    }
}

/// Millisecond timestamp for a given date in 2020-2039, noon UTC.
pub fn ts(year: i32, month: u32, day: u32) -> i64 {
    use chrono::TimeZone;
    chrono::Utc
        .with_ymd_and_hms(year, month, day, 12, 0, 0)
        .unwrap()
        .timestamp_millis()
}
