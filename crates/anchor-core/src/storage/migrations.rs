//! Database Migrations
//!
//! Schema migration definitions for the storage layer. The store is a cache
//! over the filesystem, so migrations only ever need to move forward; a
//! failed upgrade is handled by the Tabula Rasa wipe in the boot path.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: compounds, molecules, atoms, positions, edges, engrams, FTS5",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
-- Compounds: file-level containers addressed by content+path hash.
-- compound_body is optional; when NULL the file on disk is authoritative.
CREATE TABLE IF NOT EXISTS compounds (
    compound_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    provenance TEXT NOT NULL DEFAULT 'internal',
    timestamp INTEGER NOT NULL DEFAULT 0,
    compound_body TEXT,
    molecular_signature TEXT NOT NULL DEFAULT '0'
);

CREATE INDEX IF NOT EXISTS idx_compounds_path ON compounds(path);
CREATE INDEX IF NOT EXISTS idx_compounds_timestamp ON compounds(timestamp);

-- Molecules: segment-level retrieval units addressing their compound by
-- UTF-8 byte range. content is truncated to 500 KB upstream for FTS.
CREATE TABLE IF NOT EXISTS molecules (
    molecule_id TEXT PRIMARY KEY,
    compound_id TEXT NOT NULL REFERENCES compounds(compound_id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    sequence INTEGER NOT NULL DEFAULT 0,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT 'prose',
    numeric_value REAL,
    numeric_unit TEXT,
    molecular_signature TEXT NOT NULL DEFAULT '0',
    timestamp INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_molecules_compound ON molecules(compound_id);
CREATE INDEX IF NOT EXISTS idx_molecules_timestamp ON molecules(timestamp);

-- Atoms: entities/concepts/keywords. tags and buckets are JSON string
-- arrays queried through json_each().
CREATE TABLE IF NOT EXISTS atoms (
    atom_id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'keyword',
    weight REAL NOT NULL DEFAULT 0.5,
    content TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '[]',
    buckets TEXT NOT NULL DEFAULT '[]',
    timestamp INTEGER NOT NULL DEFAULT 0,
    provenance TEXT NOT NULL DEFAULT 'internal',
    molecular_signature TEXT NOT NULL DEFAULT '0'
);

CREATE INDEX IF NOT EXISTS idx_atoms_label ON atoms(label COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_atoms_timestamp ON atoms(timestamp);

-- Atom positions: byte coordinates binding atom labels to compounds.
CREATE TABLE IF NOT EXISTS atom_positions (
    compound_id TEXT NOT NULL REFERENCES compounds(compound_id) ON DELETE CASCADE,
    byte_offset INTEGER NOT NULL,
    atom_label TEXT NOT NULL,
    PRIMARY KEY (compound_id, byte_offset, atom_label)
);

CREATE INDEX IF NOT EXISTS idx_positions_label ON atom_positions(atom_label COLLATE NOCASE);

-- Edges: parent_of forms a DAG written by the background reorganizer;
-- other relations are weighted association hints.
CREATE TABLE IF NOT EXISTS edges (
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_relation ON edges(relation);

-- Engrams: hashed phrase -> atom-id list, written by successful searches.
CREATE TABLE IF NOT EXISTS engrams (
    key_hash TEXT PRIMARY KEY,
    atom_ids TEXT NOT NULL DEFAULT '[]',
    updated_at INTEGER NOT NULL DEFAULT 0
);

-- FTS5 virtual table over molecule content
CREATE VIRTUAL TABLE IF NOT EXISTS molecules_fts USING fts5(
    molecule_id,
    content,
    content='molecules',
    content_rowid='rowid',
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS molecules_ai AFTER INSERT ON molecules BEGIN
    INSERT INTO molecules_fts(rowid, molecule_id, content)
    VALUES (NEW.rowid, NEW.molecule_id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS molecules_ad AFTER DELETE ON molecules BEGIN
    INSERT INTO molecules_fts(molecules_fts, rowid, molecule_id, content)
    VALUES ('delete', OLD.rowid, OLD.molecule_id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS molecules_au AFTER UPDATE ON molecules BEGIN
    INSERT INTO molecules_fts(molecules_fts, rowid, molecule_id, content)
    VALUES ('delete', OLD.rowid, OLD.molecule_id, OLD.content);
    INSERT INTO molecules_fts(rowid, molecule_id, content)
    VALUES (NEW.rowid, NEW.molecule_id, NEW.content);
END;

-- FTS5 virtual table over atom content
CREATE VIRTUAL TABLE IF NOT EXISTS atoms_fts USING fts5(
    atom_id,
    content,
    content='atoms',
    content_rowid='rowid',
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS atoms_ai AFTER INSERT ON atoms BEGIN
    INSERT INTO atoms_fts(rowid, atom_id, content)
    VALUES (NEW.rowid, NEW.atom_id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS atoms_ad AFTER DELETE ON atoms BEGIN
    INSERT INTO atoms_fts(atoms_fts, rowid, atom_id, content)
    VALUES ('delete', OLD.rowid, OLD.atom_id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS atoms_au AFTER UPDATE ON atoms BEGIN
    INSERT INTO atoms_fts(atoms_fts, rowid, atom_id, content)
    VALUES ('delete', OLD.rowid, OLD.atom_id, OLD.content);
    INSERT INTO atoms_fts(rowid, atom_id, content)
    VALUES (NEW.rowid, NEW.atom_id, NEW.content);
END;

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Highest migration version recorded in the store, or 0 when the
/// bookkeeping table does not exist yet (fresh database; V1 creates it).
pub fn schema_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let mut stmt = match conn.prepare("SELECT MAX(version) FROM schema_version") {
        Ok(stmt) => stmt,
        Err(_) => return Ok(0),
    };
    let recorded: Option<u32> = stmt.query_row([], |row| row.get(0))?;
    Ok(recorded.unwrap_or(0))
}

/// Bring the schema up to the latest version.
///
/// Each pending migration runs through `execute_batch`, which copes with the
/// multi-statement SQL (triggers included). Returns how many were run.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let installed = schema_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > installed);

    let mut ran = 0;
    for migration in pending {
        tracing::info!(
            version = migration.version,
            "Schema migration: {}",
            migration.description
        );
        conn.execute_batch(migration.up)?;
        ran += 1;
    }
    Ok(ran)
}
