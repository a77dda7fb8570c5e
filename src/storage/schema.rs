//! Database schema definitions

/// SQL to create the programs table
pub const CREATE_PROGRAMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS programs (
    program_path        TEXT PRIMARY KEY,
    file_size           INTEGER,
    file_mtime          INTEGER,
    file_atime          INTEGER,
    file_uid            INTEGER,
    file_gid            INTEGER,
    file_mode           INTEGER,
    owner               TEXT,
    scan_timestamp      TEXT NOT NULL,
    credential_findings TEXT
)
"#;

/// SQL to create the table_operations table
pub const CREATE_TABLE_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS table_operations (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    program_path    TEXT NOT NULL REFERENCES programs(program_path) DEFERRABLE INITIALLY DEFERRED,
    table_name      TEXT NOT NULL,
    database_type   TEXT NOT NULL,
    operation_type  TEXT NOT NULL,
    source_line     INTEGER,
    in_scope        INTEGER DEFAULT 1
)
"#;

/// SQL to create the program_dependencies table
pub const CREATE_PROGRAM_DEPENDENCIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS program_dependencies (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_program  TEXT NOT NULL REFERENCES programs(program_path) DEFERRABLE INITIALLY DEFERRED,
    target_program  TEXT NOT NULL,
    dependency_type TEXT NOT NULL
)
"#;

/// SQL to create the libname_mappings table
pub const CREATE_LIBNAME_MAPPINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS libname_mappings (
    libref          TEXT PRIMARY KEY,
    engine          TEXT NOT NULL,
    source          TEXT NOT NULL DEFAULT 'parsed'
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_table_ops_program ON table_operations(program_path)",
    "CREATE INDEX IF NOT EXISTS idx_table_ops_table ON table_operations(table_name)",
    "CREATE INDEX IF NOT EXISTS idx_table_ops_type ON table_operations(operation_type)",
    "CREATE INDEX IF NOT EXISTS idx_deps_source ON program_dependencies(source_program)",
    "CREATE INDEX IF NOT EXISTS idx_deps_target ON program_dependencies(target_program)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_PROGRAMS_TABLE,
        CREATE_TABLE_OPERATIONS_TABLE,
        CREATE_PROGRAM_DEPENDENCIES_TABLE,
        CREATE_LIBNAME_MAPPINGS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
