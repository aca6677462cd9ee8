//! SQLite Storage Implementation
//!
//! The embedded relational store behind the retrieval pipeline. The store is
//! a cache over the filesystem: files remain the source of truth, so the boot
//! path prefers wiping a suspect database (Tabula Rasa) over any attempt at
//! repair. Ingestion re-populates after a wipe.
//!
//! Full-text search runs over FTS5 virtual tables kept in sync by triggers;
//! tag and bucket arrays are JSON columns queried through `json_each`; the
//! fingerprint arithmetic the tag walk needs inside SQL is provided by two
//! custom scalar functions registered per connection.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::config::AnchorConfig;
use crate::fingerprint;
use crate::memory::{
    Atom, AtomPosition, AtomType, Compound, Edge, Engram, Molecule, MoleculeType, Provenance,
};

/// Database file name inside the data directory.
const DB_FILE: &str = "anchor.db";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
    /// Integrity check failed; the boot path answers this with Tabula Rasa
    #[error("Store corrupt: {0}")]
    Corrupt(String),
    /// A query exceeded its cooperative deadline and was interrupted
    #[error("Query deadline exceeded")]
    Timeout,
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// QUERY SURFACE TYPES
// ============================================================================

/// An atom-position hit joined with its compound's location facts
#[derive(Debug, Clone)]
pub struct PositionHit {
    pub position: AtomPosition,
    pub path: String,
    pub provenance: Provenance,
    /// Compound timestamp, ms epoch
    pub timestamp: i64,
}

/// A molecule full-text hit with its rank and compound facts
#[derive(Debug, Clone)]
pub struct MoleculeHit {
    pub molecule: Molecule,
    pub path: String,
    pub provenance: Provenance,
    /// `10 * rank` where rank is the negated bm25 of the match
    pub score: f64,
}

/// Parameters for a molecule full-text query
#[derive(Debug, Clone, Default)]
pub struct MoleculeQuery {
    /// FTS5 MATCH expression (already quoted/joined by the caller)
    pub expr: String,
    pub provenance: Option<Provenance>,
    /// Bucket names; a hit's compound must bear at least one through its atoms
    pub buckets: Vec<String>,
    /// Four-digit year strings; restricts hits to molecules stamped in them
    pub years: Vec<String>,
    pub molecule_type: Option<MoleculeType>,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
    pub limit: usize,
}

/// Parameters for one tag-walk query
#[derive(Debug, Clone)]
pub struct WalkQuery {
    /// Anchor atom ids; capped by the caller
    pub anchor_ids: Vec<String>,
    /// Damping factor α
    pub alpha: f64,
    /// Per-hour time-decay λ
    pub lambda: f64,
    /// Minimum gravity admitted
    pub threshold: f64,
    /// Max candidates returned
    pub limit: usize,
    /// Wall-clock budget for the query
    pub deadline_ms: u64,
}

/// One candidate produced by the tag walk
#[derive(Debug, Clone)]
pub struct WalkCandidate {
    pub atom: Atom,
    /// Distinct labels shared with the anchor tag cloud
    pub shared_tags: i64,
    /// Anchor attaining the maximum field weight
    pub best_anchor_id: String,
    /// |Δt| to the best anchor, ms
    pub dt_ms: i64,
    /// Hamming distance to the best anchor's signature
    pub bits_apart: i64,
    pub gravity: f64,
}

/// Hash a phrase into an engram key (16 lowercase hex chars).
pub fn engram_key(phrase: &str) -> String {
    let mut hasher = DefaultHasher::new();
    phrase.trim().to_lowercase().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct
///
/// Uses separate reader/writer connections for interior mutability. All
/// methods take `&self`, making Storage `Send + Sync` so callers can share
/// an `Arc<Storage>` without an outer mutex.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
}

impl Storage {
    /// Apply PRAGMAs and register SQL helper functions on a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;

        // hamming64(hex, hex) -> bit distance; malformed hex counts as 64.
        conn.create_scalar_function(
            "hamming64",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let a: String = ctx.get(0)?;
                let b: String = ctx.get(1)?;
                Ok(fingerprint::hamming(&a, &b) as i64)
            },
        )?;

        // time_decay(dt_ms, lambda_per_hour) -> exp(-lambda * dt_hours).
        // Registered rather than relying on the build carrying SQLite's
        // optional math functions.
        conn.create_scalar_function(
            "time_decay",
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let dt_ms: f64 = ctx.get(0)?;
                let lambda: f64 = ctx.get(1)?;
                Ok((-lambda * (dt_ms.abs() / 3_600_000.0)).exp())
            },
        )?;

        Ok(())
    }

    /// Open the store at the configured location, wiping and recreating it
    /// when the existing database fails to open or fails its integrity check
    /// (Tabula Rasa). The filesystem is the source of truth; the ingestion
    /// pipeline re-populates a fresh store.
    pub fn open(config: &AnchorConfig) -> Result<Self> {
        let data_dir = match &config.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let proj_dirs = ProjectDirs::from("com", "anchor", "engine").ok_or_else(|| {
                    StorageError::Init("Could not determine project directories".to_string())
                })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(DB_FILE);

        match Self::try_open(&db_path) {
            Ok(storage) => Ok(storage),
            Err(err) => {
                tracing::warn!("Store failed to open ({err}); applying Tabula Rasa wipe");
                Self::wipe(&db_path)?;
                Self::try_open(&db_path)
            }
        }
    }

    /// Open the store at an explicit database path (test fixtures, tooling).
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::try_open(db_path)
    }

    fn try_open(db_path: &Path) -> Result<Self> {
        let writer = Connection::open(db_path)?;
        Self::configure_connection(&writer)?;
        Self::integrity_check(&writer)?;

        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(db_path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            db_path: db_path.to_path_buf(),
        })
    }

    fn integrity_check(conn: &Connection) -> Result<()> {
        let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(StorageError::Corrupt(verdict))
        }
    }

    /// Remove the database and its WAL/SHM sidecars.
    fn wipe(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut victim = db_path.as_os_str().to_os_string();
            victim.push(suffix);
            let victim = PathBuf::from(victim);
            if victim.exists() {
                std::fs::remove_file(&victim)?;
            }
        }
        Ok(())
    }

    /// Path of the underlying database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("Reader lock poisoned".into()))
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("Writer lock poisoned".into()))
    }

    // ========================================================================
    // INGESTION SURFACE (written by the external pipeline, read-mostly here)
    // ========================================================================

    /// Upsert a compound row.
    pub fn upsert_compound(&self, compound: &Compound) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO compounds
                 (compound_id, path, provenance, timestamp, compound_body, molecular_signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                compound.compound_id,
                compound.path,
                compound.provenance.as_str(),
                compound.timestamp,
                compound.compound_body,
                compound.molecular_signature,
            ],
        )?;
        Ok(())
    }

    /// Upsert a molecule row. Content is truncated to 500 KB for FTS.
    pub fn upsert_molecule(&self, molecule: &Molecule) -> Result<()> {
        let mut content = molecule.content.as_str();
        if content.len() > 500_000 {
            let mut cut = 500_000;
            while cut > 0 && !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content = &content[..cut];
        }

        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO molecules
                 (molecule_id, compound_id, content, sequence, start_byte, end_byte,
                  type, numeric_value, numeric_unit, molecular_signature, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                molecule.molecule_id,
                molecule.compound_id,
                content,
                molecule.sequence,
                molecule.start_byte as i64,
                molecule.end_byte as i64,
                molecule.molecule_type.as_str(),
                molecule.numeric_value,
                molecule.numeric_unit,
                molecule.molecular_signature,
                molecule.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Upsert an atom row. Empty tag/bucket strings are dropped.
    pub fn upsert_atom(&self, atom: &Atom) -> Result<()> {
        let tags: Vec<&String> = atom.tags.iter().filter(|t| !t.is_empty()).collect();
        let buckets: Vec<&String> = atom.buckets.iter().filter(|b| !b.is_empty()).collect();

        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO atoms
                 (atom_id, label, type, weight, content, tags, buckets,
                  timestamp, provenance, molecular_signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                atom.atom_id,
                atom.label,
                atom.atom_type.as_str(),
                atom.weight,
                atom.content,
                serde_json::to_string(&tags).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&buckets).unwrap_or_else(|_| "[]".into()),
                atom.timestamp,
                atom.provenance.as_str(),
                atom.molecular_signature,
            ],
        )?;
        Ok(())
    }

    /// Upsert an atom-position row.
    pub fn upsert_position(&self, position: &AtomPosition) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO atom_positions (compound_id, byte_offset, atom_label)
             VALUES (?1, ?2, ?3)",
            params![
                position.compound_id,
                position.byte_offset as i64,
                position.atom_label,
            ],
        )?;
        Ok(())
    }

    /// Upsert an edge row.
    pub fn upsert_edge(&self, edge: &Edge) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO edges (source_id, target_id, relation, weight)
             VALUES (?1, ?2, ?3, ?4)",
            params![edge.source_id, edge.target_id, edge.relation, edge.weight],
        )?;
        Ok(())
    }

    /// Upsert a compound together with its molecules, atoms and positions in
    /// one transaction.
    pub fn ingest_batch(
        &self,
        compound: &Compound,
        molecules: &[Molecule],
        atoms: &[Atom],
        positions: &[AtomPosition],
    ) -> Result<()> {
        {
            let writer = self.lock_writer()?;
            writer.execute_batch("BEGIN")?;
        }
        let outcome = (|| -> Result<()> {
            self.upsert_compound(compound)?;
            for molecule in molecules {
                self.upsert_molecule(molecule)?;
            }
            for atom in atoms {
                self.upsert_atom(atom)?;
            }
            for position in positions {
                self.upsert_position(position)?;
            }
            Ok(())
        })();

        let writer = self.lock_writer()?;
        match outcome {
            Ok(()) => {
                writer.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(err) => {
                let _ = writer.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    // ========================================================================
    // ENGRAMS (the only table the retrieval core writes)
    // ========================================================================

    /// Bind a phrase key to a set of atom ids, last-writer-wins.
    pub fn put_engram(&self, key_hash: &str, atom_ids: &[String]) -> Result<()> {
        let writer = self.lock_writer()?;
        writer.execute(
            "INSERT OR REPLACE INTO engrams (key_hash, atom_ids, updated_at)
             VALUES (?1, ?2, ?3)",
            params![
                key_hash,
                serde_json::to_string(atom_ids).unwrap_or_else(|_| "[]".into()),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Look up the atoms a phrase key was previously bound to.
    pub fn get_engram(&self, key_hash: &str) -> Result<Option<Engram>> {
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT key_hash, atom_ids, updated_at FROM engrams WHERE key_hash = ?1",
                params![key_hash],
                |row| {
                    let atom_ids_json: String = row.get(1)?;
                    Ok(Engram {
                        key_hash: row.get(0)?,
                        atom_ids: serde_json::from_str(&atom_ids_json).unwrap_or_default(),
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // COMPOUND READS
    // ========================================================================

    /// Fetch a full compound, body included.
    pub fn get_compound(&self, compound_id: &str) -> Result<Option<Compound>> {
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT compound_id, path, provenance, timestamp, compound_body,
                        molecular_signature
                 FROM compounds WHERE compound_id = ?1",
                params![compound_id],
                Self::row_to_compound,
            )
            .optional()?;
        Ok(row)
    }

    /// Fetch just the path and provenance of a compound (path-cache fill).
    pub fn compound_location(&self, compound_id: &str) -> Result<Option<(String, Provenance)>> {
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT path, provenance FROM compounds WHERE compound_id = ?1",
                params![compound_id],
                |row| {
                    let provenance: String = row.get(1)?;
                    Ok((row.get(0)?, Provenance::parse_name(&provenance)))
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Fetch the stored body of a compound, if any.
    pub fn compound_body(&self, compound_id: &str) -> Result<Option<String>> {
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT compound_body FROM compounds WHERE compound_id = ?1",
                params![compound_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(row.flatten())
    }

    // ========================================================================
    // ATOM READS
    // ========================================================================

    /// Fetch atoms by id, preserving no particular order.
    pub fn get_atoms(&self, atom_ids: &[String]) -> Result<Vec<Atom>> {
        if atom_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids_json = serde_json::to_string(atom_ids).unwrap_or_else(|_| "[]".into());

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT atom_id, label, type, weight, content, tags, buckets,
                    timestamp, provenance, molecular_signature
             FROM atoms
             WHERE atom_id IN (SELECT value FROM json_each(?1))",
        )?;
        let rows = stmt.query_map(params![ids_json], Self::row_to_atom)?;

        let mut atoms = Vec::new();
        for atom in rows {
            atoms.push(atom?);
        }
        Ok(atoms)
    }

    /// Atoms whose label matches any of the given tokens, case-insensitive,
    /// with or without a leading `#`. Used to seed the tag walk.
    pub fn atoms_by_labels(&self, tokens: &[String], limit: usize) -> Result<Vec<Atom>> {
        if tokens.is_empty() {
            return Ok(vec![]);
        }
        let tokens_json = serde_json::to_string(tokens).unwrap_or_else(|_| "[]".into());

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "SELECT atom_id, label, type, weight, content, tags, buckets,
                    timestamp, provenance, molecular_signature
             FROM atoms a
             WHERE EXISTS (
                 SELECT 1 FROM json_each(?1) jt
                 WHERE a.label = jt.value COLLATE NOCASE
                    OR a.label = '#' || jt.value COLLATE NOCASE
             )
             ORDER BY a.weight DESC, a.atom_id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![tokens_json, limit.max(1) as i64], Self::row_to_atom)?;

        let mut atoms = Vec::new();
        for atom in rows {
            atoms.push(atom?);
        }
        Ok(atoms)
    }

    /// Distinct tags and buckets a compound bears through the atoms
    /// positioned in it. Molecule results inherit these so dedup can union
    /// metadata across files.
    pub fn compound_tag_sets(&self, compound_id: &str) -> Result<(Vec<String>, Vec<String>)> {
        let reader = self.lock_reader()?;

        let collect = |column: &str| -> Result<Vec<String>> {
            let sql = format!(
                "SELECT DISTINCT jt.value
                 FROM atom_positions p
                 JOIN atoms a ON a.label = p.atom_label COLLATE NOCASE,
                      json_each(a.{column}) jt
                 WHERE p.compound_id = ?1
                 ORDER BY jt.value
                 LIMIT 32"
            );
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(params![compound_id], |row| row.get::<_, String>(0))?;
            let mut values = Vec::new();
            for value in rows {
                values.push(value?);
            }
            Ok(values)
        };

        let tags = collect("tags")?;
        let buckets = collect("buckets")?;
        Ok((tags, buckets))
    }

    /// Earliest recorded position of a label, for anchoring a walked atom
    /// back into a compound.
    pub fn first_position_for_label(&self, label: &str) -> Result<Option<PositionHit>> {
        let bare = label.trim_start_matches('#');
        let hashed = format!("#{bare}");
        let reader = self.lock_reader()?;
        let row = reader
            .query_row(
                "SELECT p.compound_id, p.byte_offset, p.atom_label,
                        c.path, c.provenance, c.timestamp
                 FROM atom_positions p
                 JOIN compounds c ON c.compound_id = p.compound_id
                 WHERE p.atom_label = ?1 COLLATE NOCASE OR p.atom_label = ?2 COLLATE NOCASE
                 ORDER BY c.timestamp ASC, p.compound_id ASC, p.byte_offset ASC
                 LIMIT 1",
                params![bare, hashed],
                |row| {
                    let provenance: String = row.get(4)?;
                    Ok(PositionHit {
                        position: AtomPosition {
                            compound_id: row.get(0)?,
                            byte_offset: row.get::<_, i64>(1)? as u64,
                            atom_label: row.get(2)?,
                        },
                        path: row.get(3)?,
                        provenance: Provenance::parse_name(&provenance),
                        timestamp: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Ancestor ids of an atom along `parent_of` edges (episodes, then epochs).
    pub fn epochs_for_atom(&self, atom_id: &str) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(
            "WITH RECURSIVE up(id) AS (
                 SELECT source_id FROM edges
                 WHERE relation = 'parent_of' AND target_id = ?1
                 UNION
                 SELECT e.source_id FROM edges e
                 JOIN up ON e.target_id = up.id AND e.relation = 'parent_of'
             )
             SELECT id FROM up ORDER BY id",
        )?;
        let rows = stmt.query_map(params![atom_id], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id?);
        }
        Ok(ids)
    }

    /// Full-text search over atom content.
    pub fn atom_search(
        &self,
        expr: &str,
        provenance: Option<Provenance>,
        limit: usize,
    ) -> Result<Vec<(Atom, f64)>> {
        let mut sql = String::from(
            "SELECT a.atom_id, a.label, a.type, a.weight, a.content, a.tags, a.buckets,
                    a.timestamp, a.provenance, a.molecular_signature,
                    -bm25(atoms_fts) AS rank
             FROM atoms a
             JOIN atoms_fts ON atoms_fts.atom_id = a.atom_id
             WHERE atoms_fts MATCH ?",
        );
        let mut values: Vec<Value> = vec![Value::from(expr.to_string())];

        if let Some(p) = provenance {
            sql.push_str(" AND a.provenance = ?");
            values.push(Value::from(p.as_str().to_string()));
        }

        sql.push_str(" ORDER BY rank DESC, a.atom_id ASC LIMIT ?");
        values.push(Value::from(limit as i64));

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            let atom = Self::row_to_atom(row)?;
            let rank: f64 = row.get("rank")?;
            Ok((atom, rank.max(0.0)))
        })?;

        let mut hits = Vec::new();
        for hit in rows {
            hits.push(hit?);
        }
        Ok(hits)
    }

    // ========================================================================
    // ANCHOR QUERIES
    // ========================================================================

    /// Atom-position lookups for one query token, with or without a leading
    /// `#`, case-insensitive.
    pub fn position_hits(
        &self,
        token: &str,
        provenance: Option<Provenance>,
        limit: usize,
    ) -> Result<Vec<PositionHit>> {
        let hashed = format!("#{token}");
        let mut sql = String::from(
            "SELECT p.compound_id, p.byte_offset, p.atom_label,
                    c.path, c.provenance, c.timestamp
             FROM atom_positions p
             JOIN compounds c ON c.compound_id = p.compound_id
             WHERE (p.atom_label = ? COLLATE NOCASE OR p.atom_label = ? COLLATE NOCASE)",
        );
        let mut values: Vec<Value> = vec![
            Value::from(token.to_string()),
            Value::from(hashed),
        ];

        if let Some(p) = provenance {
            sql.push_str(" AND c.provenance = ?");
            values.push(Value::from(p.as_str().to_string()));
        }

        sql.push_str(
            " ORDER BY c.timestamp DESC, p.compound_id ASC, p.byte_offset ASC LIMIT ?",
        );
        values.push(Value::from(limit as i64));

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            let provenance: String = row.get(4)?;
            Ok(PositionHit {
                position: AtomPosition {
                    compound_id: row.get(0)?,
                    byte_offset: row.get::<_, i64>(1)? as u64,
                    atom_label: row.get(2)?,
                },
                path: row.get(3)?,
                provenance: Provenance::parse_name(&provenance),
                timestamp: row.get(5)?,
            })
        })?;

        let mut hits = Vec::new();
        for hit in rows {
            hits.push(hit?);
        }
        Ok(hits)
    }

    /// Full-text search over molecule content with provenance, bucket,
    /// temporal and numeric filters applied inside the query.
    pub fn molecule_search(&self, query: &MoleculeQuery) -> Result<Vec<MoleculeHit>> {
        let mut sql = String::from(
            "SELECT m.molecule_id, m.compound_id, m.content, m.sequence,
                    m.start_byte, m.end_byte, m.type, m.numeric_value,
                    m.numeric_unit, m.molecular_signature, m.timestamp,
                    c.path, c.provenance, -bm25(molecules_fts) AS rank
             FROM molecules m
             JOIN molecules_fts ON molecules_fts.molecule_id = m.molecule_id
             JOIN compounds c ON c.compound_id = m.compound_id
             WHERE molecules_fts MATCH ?",
        );
        let mut values: Vec<Value> = vec![Value::from(query.expr.clone())];

        if let Some(p) = query.provenance {
            sql.push_str(" AND c.provenance = ?");
            values.push(Value::from(p.as_str().to_string()));
        }
        if !query.buckets.is_empty() {
            // A compound bears a bucket through any atom positioned in it.
            sql.push_str(
                " AND EXISTS (
                     SELECT 1 FROM atom_positions p
                     JOIN atoms a ON a.label = p.atom_label COLLATE NOCASE
                     WHERE p.compound_id = m.compound_id
                       AND EXISTS (
                           SELECT 1 FROM json_each(a.buckets) jb
                           WHERE jb.value IN (SELECT value FROM json_each(?))
                       )
                 )",
            );
            values.push(Value::from(
                serde_json::to_string(&query.buckets).unwrap_or_else(|_| "[]".into()),
            ));
        }
        if !query.years.is_empty() {
            sql.push_str(
                " AND CAST(strftime('%Y', m.timestamp / 1000, 'unixepoch') AS TEXT)
                       IN (SELECT value FROM json_each(?))",
            );
            values.push(Value::from(
                serde_json::to_string(&query.years).unwrap_or_else(|_| "[]".into()),
            ));
        }
        if let Some(t) = query.molecule_type {
            sql.push_str(" AND m.type = ?");
            values.push(Value::from(t.as_str().to_string()));
        }
        if let Some(min) = query.min_val {
            sql.push_str(" AND m.numeric_value >= ?");
            values.push(Value::from(min));
        }
        if let Some(max) = query.max_val {
            sql.push_str(" AND m.numeric_value <= ?");
            values.push(Value::from(max));
        }

        sql.push_str(" ORDER BY rank DESC, m.molecule_id ASC LIMIT ?");
        values.push(Value::from(query.limit.max(1) as i64));

        let reader = self.lock_reader()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            let provenance: String = row.get(12)?;
            let rank: f64 = row.get(13)?;
            Ok(MoleculeHit {
                molecule: Self::row_to_molecule(row)?,
                path: row.get(11)?,
                provenance: Provenance::parse_name(&provenance),
                score: 10.0 * rank.max(0.0),
            })
        })?;

        let mut hits = Vec::new();
        for hit in rows {
            hits.push(hit?);
        }
        Ok(hits)
    }

    // ========================================================================
    // TAG WALK
    // ========================================================================

    /// Run the physics tag-walk as a single relational query.
    ///
    /// The Unified Field Equation is evaluated per anchor-candidate pair;
    /// gravity is the MAX over anchors, with the attaining anchor kept as
    /// provenance. The query runs under a cooperative deadline enforced by a
    /// progress handler; hitting it returns [`StorageError::Timeout`].
    pub fn tag_walk(&self, query: &WalkQuery) -> Result<Vec<WalkCandidate>> {
        if query.anchor_ids.is_empty() {
            return Ok(vec![]);
        }
        let anchors_json =
            serde_json::to_string(&query.anchor_ids).unwrap_or_else(|_| "[]".into());

        let reader = self.lock_reader()?;

        let deadline = Instant::now() + std::time::Duration::from_millis(query.deadline_ms);
        reader.progress_handler(1_000, Some(move || Instant::now() >= deadline));

        let outcome = Self::run_walk(&reader, &anchors_json, query);

        reader.progress_handler(0, None::<fn() -> bool>);

        match outcome {
            Err(StorageError::Database(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Err(StorageError::Timeout)
            }
            other => other,
        }
    }

    fn run_walk(
        conn: &Connection,
        anchors_json: &str,
        query: &WalkQuery,
    ) -> Result<Vec<WalkCandidate>> {
        let mut stmt = conn.prepare(
            "WITH anchor_ids(id) AS (
                 SELECT value FROM json_each(?1)
             ),
             anchor_stats AS (
                 SELECT atom_id, timestamp, molecular_signature
                 FROM atoms
                 WHERE atom_id IN (SELECT id FROM anchor_ids)
             ),
             anchor_tags(tag) AS (
                 SELECT DISTINCT jt.value
                 FROM atoms a, json_each(a.tags) jt
                 WHERE a.atom_id IN (SELECT id FROM anchor_ids)
             ),
             candidates AS (
                 SELECT a.atom_id, a.label, a.type, a.weight, a.content, a.tags,
                        a.buckets, a.timestamp, a.provenance, a.molecular_signature,
                        (SELECT COUNT(DISTINCT jt.value)
                         FROM json_each(a.tags) jt
                         WHERE jt.value IN (SELECT tag FROM anchor_tags)) AS shared_tags
                 FROM atoms a
                 WHERE a.atom_id NOT IN (SELECT id FROM anchor_ids)
                   AND EXISTS (SELECT 1 FROM json_each(a.tags) jt
                               WHERE jt.value IN (SELECT tag FROM anchor_tags))
             ),
             pairs AS (
                 SELECT c.atom_id, c.label, c.type, c.weight, c.content, c.tags,
                        c.buckets, c.timestamp, c.provenance, c.molecular_signature,
                        c.shared_tags,
                        s.atom_id AS anchor_id,
                        ABS(c.timestamp - s.timestamp) AS dt_ms,
                        hamming64(c.molecular_signature, s.molecular_signature) AS bits_apart,
                        c.shared_tags * ?2
                            * time_decay(ABS(c.timestamp - s.timestamp), ?3)
                            * (1.0 - hamming64(c.molecular_signature, s.molecular_signature) / 64.0)
                            AS w
                 FROM candidates c CROSS JOIN anchor_stats s
             )
             SELECT atom_id, label, type, weight, content, tags, buckets,
                    timestamp, provenance, molecular_signature, shared_tags,
                    anchor_id, dt_ms, bits_apart,
                    MAX(w) AS gravity_score
             FROM pairs
             GROUP BY atom_id
             HAVING gravity_score > ?4
             ORDER BY gravity_score DESC, atom_id ASC
             LIMIT ?5",
        )?;

        let rows = stmt.query_map(
            params![
                anchors_json,
                query.alpha,
                query.lambda,
                query.threshold,
                query.limit.max(1) as i64,
            ],
            |row| {
                let atom = Self::row_to_atom(row)?;
                Ok(WalkCandidate {
                    atom,
                    shared_tags: row.get("shared_tags")?,
                    best_anchor_id: row.get("anchor_id")?,
                    dt_ms: row.get("dt_ms")?,
                    bits_apart: row.get("bits_apart")?,
                    gravity: row.get("gravity_score")?,
                })
            },
        )?;

        let mut candidates = Vec::new();
        for candidate in rows {
            candidates.push(candidate?);
        }
        Ok(candidates)
    }

    // ========================================================================
    // ROW MAPPERS
    // ========================================================================

    fn row_to_compound(row: &Row<'_>) -> rusqlite::Result<Compound> {
        let provenance: String = row.get(2)?;
        Ok(Compound {
            compound_id: row.get(0)?,
            path: row.get(1)?,
            provenance: Provenance::parse_name(&provenance),
            timestamp: row.get(3)?,
            compound_body: row.get(4)?,
            molecular_signature: row.get(5)?,
        })
    }

    fn row_to_molecule(row: &Row<'_>) -> rusqlite::Result<Molecule> {
        let molecule_type: String = row.get(6)?;
        Ok(Molecule {
            molecule_id: row.get(0)?,
            compound_id: row.get(1)?,
            content: row.get(2)?,
            sequence: row.get(3)?,
            start_byte: row.get::<_, i64>(4)? as u64,
            end_byte: row.get::<_, i64>(5)? as u64,
            molecule_type: MoleculeType::parse_name(&molecule_type),
            numeric_value: row.get(7)?,
            numeric_unit: row.get(8)?,
            molecular_signature: row.get(9)?,
            timestamp: row.get(10)?,
        })
    }

    /// Map a row whose first ten columns are the atoms table layout.
    fn row_to_atom(row: &Row<'_>) -> rusqlite::Result<Atom> {
        let atom_type: String = row.get(2)?;
        let tags_json: String = row.get(5)?;
        let buckets_json: String = row.get(6)?;
        let provenance: String = row.get(8)?;
        Ok(Atom {
            atom_id: row.get(0)?,
            label: row.get(1)?,
            atom_type: AtomType::parse_name(&atom_type),
            weight: row.get(3)?,
            content: row.get(4)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            buckets: serde_json::from_str(&buckets_json).unwrap_or_default(),
            timestamp: row.get(7)?,
            provenance: Provenance::parse_name(&provenance),
            molecular_signature: row.get(9)?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
