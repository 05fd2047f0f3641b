use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, Connection, OpenFlags, ToSql};

use crate::core::archive::Archive;
use crate::core::bead::Bead;
use crate::core::box_rawfs::glob_zip_files;
use crate::core::meta::{BeadName, ContentId, InputSpec};
use crate::core::query::{self, Predicate};
use crate::error::{BeadError, Result};
use crate::tech::timestamp;

/// Name of the index file inside a box directory.
pub const INDEX_FILE_NAME: &str = ".index.sqlite";

/// Long timeout to tolerate slow networked filesystems.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

/// The schema is part of the contract: other processes consuming the index
/// rely on the column names and types. Time predicates compare
/// `freeze_time_unix` (microseconds since epoch, UTC), never the string.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS beads (
    name             TEXT NOT NULL,
    content_id       TEXT NOT NULL,
    kind             TEXT NOT NULL,
    freeze_time_str  TEXT NOT NULL,
    freeze_time_unix INTEGER NOT NULL,
    file_path        TEXT NOT NULL UNIQUE,
    inputs_blob      TEXT NOT NULL,
    PRIMARY KEY (name, content_id)
);
CREATE INDEX IF NOT EXISTS idx_beads_freeze_time_unix ON beads (freeze_time_unix);
";

/// Persistent side-index over one box directory.
///
/// The index is derived state; the archive files stay the durable truth and
/// the index can always be recreated from them with `rebuild`. Connections
/// are short-lived: read-only for queries, read-write for mutations.
#[derive(Debug, Clone)]
pub struct BoxIndex {
    directory: PathBuf,
    index_path: PathBuf,
}

/// One progress record per processed file during `rebuild` or `sync`.
#[derive(Debug, Clone)]
pub struct Progress {
    pub total: usize,
    pub processed: usize,
    pub path: PathBuf,
    pub error_count: usize,
    pub latest_error: Option<String>,
}

impl BoxIndex {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        let directory = directory.as_ref().to_path_buf();
        let index_path = directory.join(INDEX_FILE_NAME);
        BoxIndex {
            directory,
            index_path,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    fn open_rw(&self) -> Result<Connection> {
        let conn = Connection::open(&self.index_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    fn open_ro(&self) -> Result<Connection> {
        let conn =
            Connection::open_with_flags(&self.index_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Idempotently create the index file and its schema.
    pub fn ensure_exists(&self) -> Result<()> {
        self.open_rw().map(|_| ())
    }

    /// Drop all entries and index every `*.zip` in the directory.
    ///
    /// Returns a progress stream; each file's insertion commits
    /// individually, so abandoning the stream keeps completed work durable.
    pub fn rebuild(&self) -> Result<IndexUpdate> {
        let conn = self.open_rw()?;
        conn.execute("DELETE FROM beads", [])?;

        let files = glob_zip_files(&self.directory, None)?;
        info!(
            "Rebuilding index of {}: {} archives",
            self.directory.display(),
            files.len()
        );
        let ops = files.into_iter().map(IndexOp::Add).collect();
        Ok(IndexUpdate::new(conn, self.directory.clone(), ops))
    }

    /// Reconcile the index with the directory: insert-or-replace archives
    /// missing from the index, delete entries whose file is gone.
    pub fn sync(&self) -> Result<IndexUpdate> {
        let conn = self.open_rw()?;

        let mut indexed = BTreeSet::new();
        {
            let mut stmt = conn.prepare("SELECT file_path FROM beads")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                indexed.insert(row?);
            }
        }

        let mut on_disk = BTreeSet::new();
        for path in glob_zip_files(&self.directory, None)? {
            if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                on_disk.insert(file_name.to_string());
            }
        }

        let mut ops: Vec<IndexOp> = Vec::new();
        for file_name in on_disk.difference(&indexed) {
            ops.push(IndexOp::Add(self.directory.join(file_name)));
        }
        for file_name in indexed.difference(&on_disk) {
            ops.push(IndexOp::Remove(file_name.clone()));
        }

        info!(
            "Syncing index of {}: {} changes",
            self.directory.display(),
            ops.len()
        );
        Ok(IndexUpdate::new(conn, self.directory.clone(), ops))
    }

    /// Validate and index a single archive (used after `store`).
    pub fn index_one(&self, archive_path: &Path) -> Result<()> {
        let conn = self.open_rw()?;
        index_archive(&conn, &self.directory, archive_path)
    }

    /// Evaluate predicates against the indexed rows, ascending freeze time.
    pub fn get_beads(&self, predicates: &[Predicate], box_name: &str) -> Result<Vec<Bead>> {
        if query::names_contradict(predicates) {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT name, content_id, kind, freeze_time_str, inputs_blob FROM beads",
        );
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        for predicate in predicates {
            let (clause, value) = compile_predicate(predicate);
            clauses.push(clause);
            values.push(value);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY freeze_time_unix, content_id");

        let conn = self.open_ro()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut beads = Vec::new();
        for row in rows {
            let (name, content_id, kind, freeze_time_str, inputs_blob) = row?;
            let inputs: Vec<InputSpec> = serde_json::from_str(&inputs_blob).map_err(|e| {
                BeadError::BoxIndex(format!("Corrupt inputs for bead {}: {}", name, e))
            })?;
            beads.push(Bead::new(
                BeadName::new(name)?,
                kind,
                ContentId::new(content_id),
                freeze_time_str,
                inputs,
                box_name.to_string(),
            )?);
        }
        Ok(beads)
    }

    /// Resolve `(name, content_id)` to the archive's path.
    pub fn file_path_for(&self, name: &str, content_id: &str) -> Result<PathBuf> {
        let conn = self.open_ro()?;
        let mut stmt =
            conn.prepare("SELECT file_path FROM beads WHERE name = ? AND content_id = ?")?;
        let mut rows = stmt.query(params![name, content_id])?;
        match rows.next()? {
            Some(row) => Ok(self.directory.join(row.get::<_, String>(0)?)),
            None => Err(BeadError::Lookup(format!(
                "Bead not found in index: {} {}",
                name, content_id
            ))),
        }
    }
}

enum SqlValue {
    Text(String),
    Int(i64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(text) => text.to_sql(),
            SqlValue::Int(int) => int.to_sql(),
        }
    }
}

fn compile_predicate(predicate: &Predicate) -> (&'static str, SqlValue) {
    let micros = |t| SqlValue::Int(timestamp::unix_micros(t));
    match predicate {
        Predicate::BeadName(name) => ("name = ?", SqlValue::Text(name.clone())),
        Predicate::Kind(kind) => ("kind = ?", SqlValue::Text(kind.clone())),
        Predicate::ContentId(id) => ("content_id = ?", SqlValue::Text(id.clone())),
        Predicate::AtTime(t) => ("freeze_time_unix = ?", micros(t)),
        Predicate::NewerThan(t) => ("freeze_time_unix > ?", micros(t)),
        Predicate::OlderThan(t) => ("freeze_time_unix < ?", micros(t)),
        Predicate::AtOrNewer(t) => ("freeze_time_unix >= ?", micros(t)),
        Predicate::AtOrOlder(t) => ("freeze_time_unix <= ?", micros(t)),
    }
}

/// Validate an archive and insert-or-replace its row.
fn index_archive(conn: &Connection, box_directory: &Path, archive_path: &Path) -> Result<()> {
    let archive = Archive::open(archive_path, "")?;
    archive.validate()?;
    let bead = archive.bead()?;

    let relative = archive_path
        .strip_prefix(box_directory)
        .unwrap_or(archive_path);
    let file_path = relative.to_str().ok_or_else(|| {
        BeadError::Value(format!("Non-UTF8 archive path: {}", archive_path.display()))
    })?;
    let inputs_blob = serde_json::to_string(&bead.inputs)?;

    conn.execute(
        "INSERT OR REPLACE INTO beads \
         (name, content_id, kind, freeze_time_str, freeze_time_unix, file_path, inputs_blob) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            bead.name.as_str(),
            bead.content_id.as_str(),
            bead.kind,
            bead.freeze_time_str,
            bead.freeze_time_unix(),
            file_path,
            inputs_blob,
        ],
    )?;
    Ok(())
}

enum IndexOp {
    Add(PathBuf),
    Remove(String),
}

/// Progress stream of a `rebuild` or `sync`.
///
/// Per-file failures are counted and reported in the yielded record; a
/// store-level failure is yielded once as `Err` and fuses the stream.
pub struct IndexUpdate {
    conn: Option<Connection>,
    directory: PathBuf,
    ops: std::vec::IntoIter<IndexOp>,
    total: usize,
    processed: usize,
    error_count: usize,
}

impl IndexUpdate {
    fn new(conn: Connection, directory: PathBuf, ops: Vec<IndexOp>) -> Self {
        IndexUpdate {
            conn: Some(conn),
            directory,
            total: ops.len(),
            ops: ops.into_iter(),
            processed: 0,
            error_count: 0,
        }
    }

    /// Drain the stream; returns the final progress record.
    pub fn run(mut self) -> Result<Option<Progress>> {
        let mut last = None;
        for step in &mut self {
            last = Some(step?);
        }
        Ok(last)
    }
}

impl Iterator for IndexUpdate {
    type Item = Result<Progress>;

    fn next(&mut self) -> Option<Self::Item> {
        self.conn.as_ref()?;
        let op = self.ops.next()?;
        self.processed += 1;

        let step: Result<(PathBuf, Option<String>)> = {
            let conn = self.conn.as_ref().unwrap();
            match op {
                IndexOp::Add(path) => match index_archive(conn, &self.directory, &path) {
                    Ok(()) => Ok((path, None)),
                    Err(e @ BeadError::Sqlite(_)) => Err(e),
                    Err(e) => Ok((path, Some(e.to_string()))),
                },
                IndexOp::Remove(file_name) => {
                    match conn.execute("DELETE FROM beads WHERE file_path = ?", params![file_name])
                    {
                        Ok(_) => Ok((self.directory.join(&file_name), None)),
                        Err(e) => Err(e.into()),
                    }
                }
            }
        };

        match step {
            Err(e) => {
                self.conn = None;
                Some(Err(e))
            }
            Ok((path, latest_error)) => {
                if let Some(error) = &latest_error {
                    self.error_count += 1;
                    warn!("Failed to index {}: {}", path.display(), error);
                }
                Some(Ok(Progress {
                    total: self.total,
                    processed: self.processed,
                    path,
                    error_count: self.error_count,
                    latest_error,
                }))
            }
        }
    }
}
