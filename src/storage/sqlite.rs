//! SQLite fact store implementation

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, params};

use super::schema;
use crate::resolve::DbEngine;
use crate::{Error, Result};

/// Operation kind of a table fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Create,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Create => "create",
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(OperationKind::Read),
            "create" => Ok(OperationKind::Create),
            _ => Err(Error::Invalid(format!("Unknown operation kind: {}", s))),
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a program-to-program dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Include,
    MacroCall,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Include => "include",
            DependencyKind::MacroCall => "macro_call",
        }
    }
}

impl FromStr for DependencyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "include" => Ok(DependencyKind::Include),
            "macro_call" => Ok(DependencyKind::MacroCall),
            _ => Err(Error::Invalid(format!("Unknown dependency kind: {}", s))),
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a libname mapping came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Parsed out of a LIBNAME statement during a scan
    Parsed,
    /// Supplied by configuration
    Configured,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Parsed => "parsed",
            Provenance::Configured => "configured",
        }
    }
}

/// One scanned program file
#[derive(Debug, Clone)]
pub struct ProgramRecord {
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub atime: i64,
    pub uid: i64,
    pub gid: i64,
    pub mode: i64,
    pub owner: String,
    pub scan_timestamp: String,
    /// JSON list of finding strings, None when the file is clean
    pub credential_findings: Option<String>,
}

/// One resolved table operation occurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOperation {
    pub program_path: String,
    pub table_name: String,
    pub engine: DbEngine,
    pub operation: OperationKind,
    pub source_line: u32,
    /// Meaningful only for create operations
    pub in_scope: bool,
}

/// One program-to-program dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramDependency {
    pub source_program: String,
    pub target_program: String,
    pub kind: DependencyKind,
}

/// One libref-to-engine binding
#[derive(Debug, Clone)]
pub struct LibnameMapping {
    pub libref: String,
    pub engine: DbEngine,
    pub provenance: Provenance,
}

/// SQLite-backed store for extracted facts.
///
/// One connection, shared for the duration of a run; not safe for concurrent
/// scanners. The coordinator wraps each file's writes in one transaction.
pub struct FactStore {
    conn: Connection,
}

impl FactStore {
    /// Open a database file (creates if it doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    // ========== Scan State ==========

    /// path -> last-seen mtime for all previously scanned programs
    pub fn scan_state(&self) -> Result<HashMap<String, i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT program_path, file_mtime FROM programs")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut state = HashMap::new();
        for row in rows {
            let (path, mtime): (String, i64) = row?;
            state.insert(path, mtime);
        }
        Ok(state)
    }

    // ========== Program Operations ==========

    /// Insert or replace a program row
    pub fn upsert_program(&self, program: &ProgramRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO programs
                (program_path, file_size, file_mtime, file_atime, file_uid, file_gid,
                 file_mode, owner, scan_timestamp, credential_findings)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                program.path,
                program.size,
                program.mtime,
                program.atime,
                program.uid,
                program.gid,
                program.mode,
                program.owner,
                program.scan_timestamp,
                program.credential_findings,
            ],
        )?;
        Ok(())
    }

    /// Get a program row by path
    pub fn get_program(&self, path: &str) -> Result<Option<ProgramRecord>> {
        self.conn
            .query_row(
                r#"
                SELECT program_path, file_size, file_mtime, file_atime, file_uid,
                       file_gid, file_mode, owner, scan_timestamp, credential_findings
                FROM programs WHERE program_path = ?1
                "#,
                [path],
                |row| {
                    Ok(ProgramRecord {
                        path: row.get(0)?,
                        size: row.get(1)?,
                        mtime: row.get(2)?,
                        atime: row.get(3)?,
                        uid: row.get(4)?,
                        gid: row.get(5)?,
                        mode: row.get(6)?,
                        owner: row.get(7)?,
                        scan_timestamp: row.get(8)?,
                        credential_findings: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Remove a program and all its child facts (deleted files).
    /// Children first, then the parent row.
    pub fn remove_program(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM table_operations WHERE program_path = ?1", [path])?;
        self.conn.execute(
            "DELETE FROM program_dependencies WHERE source_program = ?1",
            [path],
        )?;
        self.conn
            .execute("DELETE FROM programs WHERE program_path = ?1", [path])?;
        Ok(())
    }

    /// Programs with a non-empty credential-finding list, ordered by path
    pub fn programs_with_credentials(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT program_path, credential_findings
            FROM programs
            WHERE credential_findings IS NOT NULL AND credential_findings != '[]'
            ORDER BY program_path
            "#,
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // ========== Table Operations ==========

    /// Replace all table operations for one program path.
    ///
    /// Delete-all-then-insert-all: a query never observes a mix of old and
    /// new facts for one program.
    pub fn replace_table_operations(&self, path: &str, operations: &[TableOperation]) -> Result<()> {
        self.conn
            .execute("DELETE FROM table_operations WHERE program_path = ?1", [path])?;

        let mut stmt = self.conn.prepare(
            r#"
            INSERT INTO table_operations
                (program_path, table_name, database_type, operation_type, source_line, in_scope)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for op in operations {
            stmt.execute(params![
                op.program_path,
                op.table_name,
                op.engine.as_str(),
                op.operation.as_str(),
                op.source_line,
                op.in_scope as i64,
            ])?;
        }
        Ok(())
    }

    /// All operations touching an exact table name, ordered by operation
    /// kind then program path
    pub fn operations_for_table(&self, table: &str) -> Result<Vec<TableOperation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT program_path, table_name, database_type, operation_type, source_line, in_scope
            FROM table_operations
            WHERE table_name = ?1
            ORDER BY operation_type, program_path
            "#,
        )?;
        let rows = stmt.query_map([table], row_to_operation)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// All operations recorded for one program
    pub fn operations_for_program(&self, path: &str) -> Result<Vec<TableOperation>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT program_path, table_name, database_type, operation_type, source_line, in_scope
            FROM table_operations
            WHERE program_path = ?1
            ORDER BY source_line
            "#,
        )?;
        let rows = stmt.query_map([path], row_to_operation)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Distinct tables a program creates
    pub fn tables_created_by(&self, path: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT table_name FROM table_operations
             WHERE program_path = ?1 AND operation_type = 'create'",
            path,
        )
    }

    /// Distinct tables a program reads
    pub fn tables_read_by(&self, path: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT table_name FROM table_operations
             WHERE program_path = ?1 AND operation_type = 'read'",
            path,
        )
    }

    /// Distinct programs that read a table
    pub fn readers_of_table(&self, table: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT program_path FROM table_operations
             WHERE table_name = ?1 AND operation_type = 'read'",
            table,
        )
    }

    /// Distinct programs that create a table
    pub fn creators_of_table(&self, table: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT program_path FROM table_operations
             WHERE table_name = ?1 AND operation_type = 'create'",
            table,
        )
    }

    // ========== Program Dependencies ==========

    /// Replace all dependency edges declared by one source program
    pub fn replace_dependencies(&self, path: &str, dependencies: &[ProgramDependency]) -> Result<()> {
        self.conn.execute(
            "DELETE FROM program_dependencies WHERE source_program = ?1",
            [path],
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            INSERT INTO program_dependencies (source_program, target_program, dependency_type)
            VALUES (?1, ?2, ?3)
            "#,
        )?;
        for dep in dependencies {
            stmt.execute(params![
                dep.source_program,
                dep.target_program,
                dep.kind.as_str(),
            ])?;
        }
        Ok(())
    }

    /// Distinct programs that declare a dependency on `path`
    pub fn dependants_of(&self, path: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT source_program FROM program_dependencies WHERE target_program = ?1",
            path,
        )
    }

    /// Distinct programs that `path` declares a dependency on
    pub fn dependency_targets_of(&self, path: &str) -> Result<Vec<String>> {
        self.string_column(
            "SELECT DISTINCT target_program FROM program_dependencies WHERE source_program = ?1",
            path,
        )
    }

    // ========== Libname Mappings ==========

    /// Insert or replace a libref binding. Mappings are never deleted;
    /// resolution always re-derives from current source on each scan.
    pub fn upsert_libname_mapping(&self, mapping: &LibnameMapping) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO libname_mappings (libref, engine, source) VALUES (?1, ?2, ?3)",
            params![
                mapping.libref,
                mapping.engine.as_str(),
                mapping.provenance.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Get a libref binding by (case-normalized) alias
    pub fn get_libname_mapping(&self, libref: &str) -> Result<Option<LibnameMapping>> {
        self.conn
            .query_row(
                "SELECT libref, engine, source FROM libname_mappings WHERE libref = ?1",
                [libref],
                |row| {
                    let engine_str: String = row.get(1)?;
                    let source_str: String = row.get(2)?;
                    let engine = DbEngine::from_str(&engine_str).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                    let provenance = match source_str.as_str() {
                        "configured" => Provenance::Configured,
                        _ => Provenance::Parsed,
                    };
                    Ok(LibnameMapping {
                        libref: row.get(0)?,
                        engine,
                        provenance,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // ========== Transactions ==========

    /// Begin a transaction covering one file's writes
    pub fn begin_transaction(&mut self) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", [])?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&mut self) -> Result<()> {
        self.conn.execute("COMMIT", [])?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&mut self) -> Result<()> {
        self.conn.execute("ROLLBACK", [])?;
        Ok(())
    }

    // ========== Statistics ==========

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            programs: self.count("programs")?,
            table_operations: self.count("table_operations")?,
            dependencies: self.count("program_dependencies")?,
            libname_mappings: self.count("libname_mappings")?,
            flagged_programs: self.programs_with_credentials()?.len(),
        })
    }

    fn count(&self, table: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn string_column(&self, sql: &str, param: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([param], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }
}

fn row_to_operation(row: &rusqlite::Row) -> rusqlite::Result<TableOperation> {
    let engine_str: String = row.get(2)?;
    let operation_str: String = row.get(3)?;

    let engine = DbEngine::from_str(&engine_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let operation = OperationKind::from_str(&operation_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let in_scope: i64 = row.get(5)?;
    Ok(TableOperation {
        program_path: row.get(0)?,
        table_name: row.get(1)?,
        engine,
        operation,
        source_line: row.get(4)?,
        in_scope: in_scope != 0,
    })
}

/// Database statistics
#[derive(Debug, Clone)]
pub struct DbStats {
    pub programs: usize,
    pub table_operations: usize,
    pub dependencies: usize,
    pub libname_mappings: usize,
    pub flagged_programs: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Programs: {}", self.programs)?;
        writeln!(f, "  Table operations: {}", self.table_operations)?;
        writeln!(f, "  Dependencies: {}", self.dependencies)?;
        writeln!(f, "  Libname mappings: {}", self.libname_mappings)?;
        writeln!(f, "  Programs with credential findings: {}", self.flagged_programs)
    }
}
