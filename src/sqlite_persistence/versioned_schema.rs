use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

pub const BASE_DB_VERSION: usize = 99999;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            // Only mutated when optional field assignments are passed.
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                is_unique: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Blob,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Blob => "BLOB",
        }
    }
}

#[allow(unused)]
pub enum ForeignKeyOnChange {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::Restrict => "RESTRICT",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::SetDefault => "SET DEFAULT",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub is_unique: bool,
    pub default_value: Option<S>,
    pub foreign_key: Option<&'a ForeignKey>,
}

/// What `PRAGMA table_info` can tell about a column, normalized so that a
/// declared column and an existing one compare equal when they match.
#[derive(Debug, PartialEq, Eq)]
struct ColumnShape {
    name: String,
    sql_type: String,
    non_null: bool,
    default_value: Option<String>,
    is_primary_key: bool,
}

impl ColumnShape {
    fn of(column: &Column<'_, &str>) -> Self {
        ColumnShape {
            name: column.name.to_string(),
            sql_type: column.sql_type.as_sql().to_string(),
            non_null: column.non_null,
            default_value: column
                .default_value
                .map(strip_leading_and_trailing_parentheses),
            is_primary_key: column.is_primary_key,
        }
    }
}

/// A named unique index, optionally partial.
///
/// Unlike `unique_constraints`, these are created with `CREATE UNIQUE INDEX`
/// so they can carry a `WHERE` predicate (e.g. one flagged row per owner)
/// and can be added to an existing table by a migration.
pub struct UniqueIndex {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub predicate: Option<&'static str>,
}

impl UniqueIndex {
    pub fn create(&self, conn: &Connection, table_name: &str) -> Result<()> {
        let mut sql = format!(
            "CREATE UNIQUE INDEX {} ON {}({})",
            self.name,
            table_name,
            self.columns.join(", ")
        );
        if let Some(predicate) = self.predicate {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        conn.execute(&sql, params![])
            .with_context(|| format!("Failed to create unique index {}", self.name))?;
        Ok(())
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
    pub unique_indices: &'static [UniqueIndex],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let mut create_sql = format!("CREATE TABLE {} (", self.name);
        for (column_index, column) in self.columns.iter().enumerate() {
            if column_index > 0 {
                create_sql.push_str(", ");
            }
            create_sql.push_str(&format!("{} {}", column.name, column.sql_type.as_sql()));
            if column.is_primary_key {
                create_sql.push_str(" PRIMARY KEY");
            }
            if column.non_null {
                create_sql.push_str(" NOT NULL");
            }
            if column.is_unique {
                create_sql.push_str(" UNIQUE");
            }
            if let Some(default_value) = column.default_value {
                create_sql.push_str(&format!(" DEFAULT {}", default_value));
            }
            if let Some(foreign_key) = column.foreign_key {
                create_sql.push_str(&format!(
                    " REFERENCES {}({}) ON DELETE {}",
                    foreign_key.foreign_table,
                    foreign_key.foreign_column,
                    foreign_key.on_delete.as_sql()
                ));
            }
        }

        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;

        for (index_name, column_name) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_name
                ),
                params![],
            )?;
        }
        for unique_index in self.unique_indices {
            unique_index.create(conn, self.name)?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        self.validate_columns(conn)?;
        self.validate_indices(conn)?;
        self.validate_unique_constraints(conn)?;
        self.validate_foreign_keys(conn)
    }

    fn validate_columns(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<ColumnShape> = stmt
            .query_map(params![], |row| {
                Ok(ColumnShape {
                    name: row.get(1)?,
                    sql_type: row.get(2)?,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row
                        .get::<_, Option<String>>(4)?
                        .map(strip_leading_and_trailing_parentheses),
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Error reading columns of table {}", self.name))?;
        let expected: Vec<ColumnShape> = self.columns.iter().map(ColumnShape::of).collect();

        if actual.len() != expected.len() {
            let names = |shapes: &[ColumnShape]| {
                shapes
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            bail!(
                "Table {} has columns [{}], expected [{}]",
                self.name,
                names(&actual),
                names(&expected)
            );
        }

        for (actual, expected) in actual.iter().zip(expected.iter()) {
            if actual != expected {
                bail!(
                    "Table {} column mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected,
                    actual
                );
            }
        }
        Ok(())
    }

    fn validate_indices(&self, conn: &Connection) -> Result<()> {
        for (index_name, _column) in self.indices {
            if index_sql(conn, self.name, index_name)?.is_none() {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }

        for unique_index in self.unique_indices {
            let sql = match index_sql(conn, self.name, unique_index.name)? {
                Some(sql) => sql.to_uppercase(),
                None => bail!(
                    "Table {} is missing unique index '{}'",
                    self.name,
                    unique_index.name
                ),
            };
            if !sql.contains("UNIQUE") {
                bail!(
                    "Table {} index '{}' is not unique",
                    self.name,
                    unique_index.name
                );
            }
            if unique_index.predicate.is_some() != sql.contains(" WHERE ") {
                bail!(
                    "Table {} index '{}' predicate mismatch: expected {:?}",
                    self.name,
                    unique_index.name,
                    unique_index.predicate
                );
            }
        }
        Ok(())
    }

    fn validate_unique_constraints(&self, conn: &Connection) -> Result<()> {
        if self.unique_constraints.is_empty() {
            return Ok(());
        }

        // SQLite reports unique constraints as auto indices with unique=1.
        let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", self.name))?;
        let unique_index_names: Vec<String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i32>(2)?)))?
            .filter_map(|r| r.ok())
            .filter(|(_, is_unique)| *is_unique == 1)
            .map(|(name, _)| name)
            .collect();

        let mut unique_index_columns: Vec<Vec<String>> = Vec::new();
        for index_name in &unique_index_names {
            let mut idx_stmt = conn.prepare(&format!("PRAGMA index_info({})", index_name))?;
            let mut cols: Vec<String> = idx_stmt
                .query_map([], |row| row.get::<_, String>(2))?
                .filter_map(|r| r.ok())
                .collect();
            cols.sort();
            unique_index_columns.push(cols);
        }

        for expected_columns in self.unique_constraints {
            let mut expected_sorted: Vec<&str> = expected_columns.to_vec();
            expected_sorted.sort();

            let found = unique_index_columns
                .iter()
                .any(|actual| actual.iter().map(String::as_str).eq(expected_sorted.iter().copied()));
            if !found {
                bail!(
                    "Table {} is missing unique constraint on columns ({})",
                    self.name,
                    expected_columns.join(", ")
                );
            }
        }
        Ok(())
    }

    fn validate_foreign_keys(&self, conn: &Connection) -> Result<()> {
        struct ActualFk {
            from_column: String,
            to_table: String,
            to_column: String,
            on_delete: String,
        }

        // id, seq, table, from, to, on_update, on_delete, match
        let mut fk_stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", self.name))?;
        let actual_fks: Vec<ActualFk> = fk_stmt
            .query_map([], |row| {
                Ok(ActualFk {
                    from_column: row.get(3)?,
                    to_table: row.get(2)?,
                    to_column: row.get(4)?,
                    on_delete: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        for column in self.columns {
            let Some(expected_fk) = column.foreign_key else {
                continue;
            };
            let expected_on_delete = expected_fk.on_delete.as_sql();

            let found = actual_fks.iter().any(|actual| {
                actual.from_column == column.name
                    && actual.to_table == expected_fk.foreign_table
                    && actual.to_column == expected_fk.foreign_column
                    && actual.on_delete == expected_on_delete
            });
            if found {
                continue;
            }

            match actual_fks.iter().find(|actual| actual.from_column == column.name) {
                Some(actual) => bail!(
                    "Table {} column {} has foreign key mismatch: expected REFERENCES {}({}) ON DELETE {}, got REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    expected_fk.foreign_table,
                    expected_fk.foreign_column,
                    expected_on_delete,
                    actual.to_table,
                    actual.to_column,
                    actual.on_delete
                ),
                None => bail!(
                    "Table {} column {} is missing foreign key: expected REFERENCES {}({}) ON DELETE {}",
                    self.name,
                    column.name,
                    expected_fk.foreign_table,
                    expected_fk.foreign_column,
                    expected_on_delete
                ),
            }
        }
        Ok(())
    }
}

fn index_sql(conn: &Connection, table_name: &str, index_name: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(sql, '') FROM sqlite_master WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
    )?;
    let mut rows = stmt.query(params![index_name, table_name])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

fn strip_leading_and_trailing_parentheses<S: AsRef<str>>(s: S) -> String {
    let s = s.as_ref();
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Opens (or creates) a database and brings it to the latest of `schemas`.
///
/// A new file is created with the latest schema directly. An existing file
/// is validated against the schema matching its `user_version`, then every
/// later migration runs in order inside a single transaction.
pub fn open_versioned_db<T: AsRef<Path>>(
    db_path: T,
    schemas: &'static [VersionedSchema],
) -> Result<Connection> {
    let latest = schemas.last().context("No schema versions defined")?;
    let db_path = db_path.as_ref();

    let mut conn = if db_path.exists() {
        Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database {:?}", db_path))?
    } else {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to create database {:?}", db_path))?;
        latest.create(&conn)?;
        conn
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON;", params![])?;

    let db_version = conn
        .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
        .context("Failed to read database version")?
        - BASE_DB_VERSION as i64;

    if db_version < 0 {
        bail!(
            "Database version {} is too old, does not contain base db version {}",
            db_version,
            BASE_DB_VERSION
        );
    }
    if db_version >= schemas.len() as i64 {
        bail!("Database version {} is too new", db_version);
    }
    let version = db_version as usize;
    schemas[version].validate(&conn)?;

    migrate_if_needed(&mut conn, schemas, version)?;
    Ok(conn)
}

fn migrate_if_needed(
    conn: &mut Connection,
    schemas: &'static [VersionedSchema],
    version: usize,
) -> Result<()> {
    if version + 1 >= schemas.len() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    let mut latest_from = version;
    for schema in schemas.iter().skip(version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating db from version {} to {}",
                latest_from, schema.version
            );
            migration_fn(&tx)
                .with_context(|| format!("Migration to version {} failed", schema.version))?;
        }
        latest_from = schema.version;
    }
    tx.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
        [],
    )?;
    tx.commit()?;

    if let Some(schema) = schemas.get(latest_from) {
        schema.validate(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OWNER_FK: ForeignKey = ForeignKey {
        foreign_table: "owner",
        foreign_column: "id",
        on_delete: ForeignKeyOnChange::Cascade,
    };

    const OWNER_TABLE: Table = Table {
        name: "owner",
        columns: &[sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true
        )],
        indices: &[],
        unique_constraints: &[],
        unique_indices: &[],
    };

    const ITEM_TABLE: Table = Table {
        name: "item",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!(
                "owner_id",
                &SqlType::Integer,
                non_null = true,
                foreign_key = Some(&OWNER_FK)
            ),
            sqlite_column!("name", &SqlType::Text, non_null = true),
            sqlite_column!(
                "is_flagged",
                &SqlType::Integer,
                non_null = true,
                default_value = Some("0")
            ),
        ],
        indices: &[("idx_item_name", "name")],
        unique_constraints: &[&["owner_id", "name"]],
        unique_indices: &[UniqueIndex {
            name: "idx_item_one_flagged_per_owner",
            columns: &["owner_id"],
            predicate: Some("is_flagged = 1"),
        }],
    };

    const TEST_SCHEMA: VersionedSchema = VersionedSchema {
        version: 0,
        tables: &[OWNER_TABLE, ITEM_TABLE],
        migration: None,
    };

    fn create_reference_tables(conn: &Connection) {
        conn.execute("CREATE TABLE owner (id INTEGER PRIMARY KEY)", [])
            .unwrap();
    }

    #[test]
    fn created_schema_validates() {
        let conn = Connection::open_in_memory().unwrap();
        TEST_SCHEMA.create(&conn).unwrap();
        TEST_SCHEMA.validate(&conn).unwrap();
    }

    #[test]
    fn partial_unique_index_allows_one_flagged_row_per_owner() {
        let conn = Connection::open_in_memory().unwrap();
        TEST_SCHEMA.create(&conn).unwrap();
        conn.execute("INSERT INTO owner (id) VALUES (1), (2)", [])
            .unwrap();

        conn.execute(
            "INSERT INTO item (owner_id, name, is_flagged) VALUES (1, 'a', 1), (1, 'b', 0), (1, 'c', 0), (2, 'a', 1)",
            [],
        )
        .unwrap();

        let second_flagged = conn.execute(
            "INSERT INTO item (owner_id, name, is_flagged) VALUES (1, 'd', 1)",
            [],
        );
        assert!(second_flagged.is_err());
    }

    #[test]
    fn detects_missing_unique_index() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_tables(&conn);
        conn.execute(
            "CREATE TABLE item (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owner(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                UNIQUE (owner_id, name)
            )",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_item_name ON item(name)", [])
            .unwrap();

        let err = ITEM_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing unique index"));
        assert!(err.contains("idx_item_one_flagged_per_owner"));
    }

    #[test]
    fn detects_unique_index_without_predicate() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_tables(&conn);
        conn.execute(
            "CREATE TABLE item (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owner(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                UNIQUE (owner_id, name)
            )",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_item_name ON item(name)", [])
            .unwrap();
        conn.execute(
            "CREATE UNIQUE INDEX idx_item_one_flagged_per_owner ON item(owner_id)",
            [],
        )
        .unwrap();

        let err = ITEM_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("predicate mismatch"));
    }

    #[test]
    fn detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_tables(&conn);
        conn.execute(
            "CREATE TABLE item (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owner(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                UNIQUE (owner_id, name)
            )",
            [],
        )
        .unwrap();

        let err = ITEM_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_item_name"));
    }

    #[test]
    fn detects_wrong_on_delete_action() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_tables(&conn);
        conn.execute(
            "CREATE TABLE item (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owner(id) ON DELETE SET NULL,
                name TEXT NOT NULL,
                is_flagged INTEGER NOT NULL DEFAULT 0,
                UNIQUE (owner_id, name)
            )",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_item_name ON item(name)", [])
            .unwrap();
        conn.execute(
            "CREATE UNIQUE INDEX idx_item_one_flagged_per_owner ON item(owner_id) WHERE is_flagged = 1",
            [],
        )
        .unwrap();

        let err = ITEM_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("foreign key mismatch"));
        assert!(err.contains("CASCADE"));
        assert!(err.contains("SET NULL"));
    }

    #[test]
    fn detects_missing_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        create_reference_tables(&conn);
        conn.execute(
            "CREATE TABLE item (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owner(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                is_flagged INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_item_name ON item(name)", [])
            .unwrap();
        conn.execute(
            "CREATE UNIQUE INDEX idx_item_one_flagged_per_owner ON item(owner_id) WHERE is_flagged = 1",
            [],
        )
        .unwrap();

        let err = ITEM_TABLE.validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing unique constraint"));
    }

    const V0_ITEM_TABLE: Table = Table {
        name: "item",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("name", &SqlType::Text, non_null = true),
        ],
        indices: &[],
        unique_constraints: &[],
        unique_indices: &[],
    };

    const V1_ITEM_TABLE: Table = Table {
        name: "item",
        columns: &[
            sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
            sqlite_column!("name", &SqlType::Text, non_null = true),
            sqlite_column!("digest", &SqlType::Text),
        ],
        indices: &[],
        unique_constraints: &[],
        unique_indices: &[UniqueIndex {
            name: "idx_item_digest",
            columns: &["digest"],
            predicate: None,
        }],
    };

    const MIGRATING_SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[V0_ITEM_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[V1_ITEM_TABLE],
            migration: Some(|conn: &Connection| {
                conn.execute("ALTER TABLE item ADD COLUMN digest TEXT", [])?;
                V1_ITEM_TABLE.unique_indices[0].create(conn, V1_ITEM_TABLE.name)?;
                Ok(())
            }),
        },
    ];

    #[test]
    fn open_versioned_db_migrates_old_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("items.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            MIGRATING_SCHEMAS[0].create(&conn).unwrap();
            conn.execute("INSERT INTO item (name) VALUES ('legacy')", [])
                .unwrap();
        }

        let conn = open_versioned_db(&db_path, MIGRATING_SCHEMAS).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 1);

        let digest: Option<String> = conn
            .query_row("SELECT digest FROM item WHERE name = 'legacy'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(digest.is_none());
    }

    #[test]
    fn open_versioned_db_rejects_newer_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("items.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + 7),
                [],
            )
            .unwrap();
        }

        let err = open_versioned_db(&db_path, MIGRATING_SCHEMAS)
            .unwrap_err()
            .to_string();
        assert!(err.contains("too new"));
    }
}
