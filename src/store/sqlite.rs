use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{assign_groups, Delta, GroupByStore, NodeStore, StoreError};
use crate::codec::{GroupKeyCodec, KeyCodec, SqlValue};
use crate::tree::NodeRow;
use crate::types::{DbTreeError, Level, NodeId, Result, TOP_LEVEL};

/// Options for [`SqliteStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreOptions {
    /// Database file; `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Prefix of the node table. The table is named
    /// `<base>_<aggregator>_<codec>`.
    pub table_base_name: String,
    /// Value of `PRAGMA synchronous`.
    pub synchronous: String,
    /// Value of `PRAGMA journal_mode` for file databases.
    pub journal_mode: String,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            path: None,
            table_base_name: "dbtree".to_owned(),
            synchronous: "NORMAL".to_owned(),
            journal_mode: "WAL".to_owned(),
        }
    }
}

impl SqliteStoreOptions {
    /// Options for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the table name prefix.
    pub fn table_base_name(mut self, name: impl Into<String>) -> Self {
        self.table_base_name = name.into();
        self
    }

    /// Sets `PRAGMA synchronous`.
    pub fn synchronous(mut self, mode: impl Into<String>) -> Self {
        self.synchronous = mode.into();
        self
    }

    /// Sets `PRAGMA journal_mode`.
    pub fn journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.journal_mode = mode.into();
        self
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Integer(value) => ToSqlOutput::from(*value),
            SqlValue::Text(value) => ToSqlOutput::from(value.as_str()),
        })
    }
}

struct Session {
    conn: Connection,
    table: Option<String>,
}

/// Relational store backed by SQLite.
///
/// Besides the exact key text, each bound is stored in typed columns laid out by the
/// codec (`min_<col>` / `max_<col>`); interval predicates compare those columns as row
/// values so the database orders composite keys the same way the codec does.
pub struct SqliteStore<C: KeyCodec> {
    codec: C,
    base_name: String,
    session: Mutex<Option<Session>>,
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<C: KeyCodec> SqliteStore<C> {
    /// Opens the database described by `options`.
    pub fn open(codec: C, options: &SqliteStoreOptions) -> Result<Self> {
        if !is_identifier(&options.table_base_name) {
            return Err(DbTreeError::Config(format!(
                "table base name {:?} is not a plain identifier",
                options.table_base_name
            )));
        }
        let conn = match &options.path {
            Some(path) => {
                let conn = Connection::open(path).map_err(StoreError::from)?;
                conn.pragma_update(None, "journal_mode", &options.journal_mode)
                    .map_err(StoreError::from)?;
                conn
            }
            None => Connection::open_in_memory().map_err(StoreError::from)?,
        };
        conn.pragma_update(None, "synchronous", &options.synchronous)
            .map_err(StoreError::from)?;
        debug!(path = ?options.path, "store.sqlite.open");
        Ok(Self {
            codec,
            base_name: options.table_base_name.clone(),
            session: Mutex::new(Some(Session { conn, table: None })),
        })
    }

    /// Opens a private in-memory database with default options.
    pub fn in_memory(codec: C) -> Result<Self> {
        Self::open(codec, &SqliteStoreOptions::default())
    }

    /// Name of the node table once connected.
    pub fn table_name(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .and_then(|session| session.table.clone())
    }

    /// Runs `f` with the open connection and the node table name.
    fn with_table<T>(&self, f: impl FnOnce(&mut Connection, &str) -> Result<T>) -> Result<T> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(StoreError::Closed)?;
        let table = session.table.clone().ok_or(StoreError::NotConnected)?;
        f(&mut session.conn, &table)
    }

    fn columns(&self, prefix: &str) -> Vec<String> {
        self.codec
            .columns()
            .iter()
            .map(|column| format!("{prefix}_{}", column.name))
            .collect()
    }

    /// `(<prefix>_a, <prefix>_b, ..)` over the key columns.
    fn tuple(&self, prefix: &str) -> String {
        format!("({})", self.columns(prefix).join(", "))
    }

    /// `(?, ?, ..)` with one marker per key column.
    fn markers(&self) -> String {
        placeholders(self.codec.columns().len())
    }

    /// Rows of `table` matching `predicate`, ascending level then lower bound.
    fn select(
        &self,
        predicate: &str,
        values: Vec<SqlValue>,
        limit: Option<usize>,
    ) -> Result<Vec<NodeRow>> {
        let order = self.columns("min").join(", ");
        self.with_table(|conn, table| {
            let limit = limit.map(|n| format!(" LIMIT {n}")).unwrap_or_default();
            let sql = format!(
                "SELECT level, k_min, k_max, context FROM {table} WHERE {predicate} \
                 ORDER BY level, {order}{limit}"
            );
            let mut stmt = conn.prepare_cached(&sql).map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params_from_iter(values.iter()), read_row)
                .map_err(StoreError::from)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StoreError::from)?;
            trace!(rows = rows.len(), "store.sqlite.select");
            Ok(rows)
        })
    }

    fn key_values(&self, key: &C::Key) -> Vec<SqlValue> {
        self.codec.column_values(key)
    }

    fn bound_values(&self, row: &NodeRow) -> Result<Vec<SqlValue>> {
        let mut values = self.codec.column_values(&self.codec.parse(&row.k_min)?);
        values.extend(self.codec.column_values(&self.codec.parse(&row.k_max)?));
        Ok(values)
    }
}

fn placeholders(count: usize) -> String {
    format!("({})", vec!["?"; count].join(", "))
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        level: row.get(0)?,
        k_min: row.get(1)?,
        k_max: row.get(2)?,
        context: row.get(3)?,
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl<C: KeyCodec> NodeStore<C> for SqliteStore<C> {
    fn codec(&self) -> &C {
        &self.codec
    }

    fn connect(&self, aggregator: &str, top_level: Level, identity_context: &str) -> Result<()> {
        let table = format!("{}_{}_{}", self.base_name, aggregator, self.codec.name());
        if !is_identifier(&table) {
            return Err(DbTreeError::Config(format!(
                "table name {table:?} is not a plain identifier"
            )));
        }
        let min_cols = self.columns("min");
        let max_cols = self.columns("max");
        let typed: Vec<String> = self
            .codec
            .columns()
            .iter()
            .zip(min_cols.iter().zip(&max_cols))
            .flat_map(|(column, (min, max))| {
                [
                    format!("{min} {}", column.sql_type),
                    format!("{max} {}", column.sql_type),
                ]
            })
            .collect();

        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(StoreError::Closed)?;
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                level INTEGER NOT NULL,
                k_min TEXT NOT NULL,
                k_max TEXT NOT NULL,
                {},
                context TEXT NOT NULL,
                PRIMARY KEY (level, k_min, k_max)
            )",
            typed.join(",\n                ")
        );
        session
            .conn
            .execute_batch(&format!(
                "{create};
                CREATE INDEX IF NOT EXISTS {table}_min ON {table} (level, {});
                CREATE INDEX IF NOT EXISTS {table}_max ON {table} (level, {});",
                min_cols.join(", "),
                max_cols.join(", ")
            ))
            .map_err(StoreError::from)?;

        let min = self.codec.min_key();
        let max = self.codec.max_key();
        let mut values = vec![
            SqlValue::Integer(top_level),
            SqlValue::Text(self.codec.encode(&min)),
            SqlValue::Text(self.codec.encode(&max)),
        ];
        values.extend(self.codec.column_values(&min));
        values.extend(self.codec.column_values(&max));
        values.push(SqlValue::Text(identity_context.to_owned()));
        let insert = format!(
            "INSERT OR IGNORE INTO {table} (level, k_min, k_max, {}, {}, context) VALUES {}",
            min_cols.join(", "),
            max_cols.join(", "),
            placeholders(values.len())
        );
        let created = session
            .conn
            .execute(&insert, params_from_iter(values.iter()))
            .map_err(StoreError::from)?;
        debug!(table = %table, root_created = created == 1, "store.sqlite.connect");
        session.table = Some(table);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(session) = self.session.lock().take() {
            session
                .conn
                .close()
                .map_err(|(_, err)| StoreError::from(err))?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.session.lock().is_none()
    }

    fn root(&self) -> Result<NodeRow> {
        self.with_table(|conn, table| {
            let sql = format!(
                "SELECT level, k_min, k_max, context FROM {table} WHERE level = ?1 LIMIT 1"
            );
            let row = conn
                .query_row(&sql, params![TOP_LEVEL], read_row)
                .optional()
                .map_err(StoreError::from)?;
            row.ok_or_else(|| {
                StoreError::MissingNode(NodeId::new(
                    TOP_LEVEL,
                    self.codec.encode(&self.codec.min_key()),
                    self.codec.encode(&self.codec.max_key()),
                ))
                .into()
            })
        })
    }

    fn including_key(&self, key: &C::Key) -> Result<Vec<NodeRow>> {
        let predicate = format!(
            "{} < {m} AND {} > {m}",
            self.tuple("min"),
            self.tuple("max"),
            m = self.markers()
        );
        let mut values = self.key_values(key);
        values.extend(self.key_values(key));
        self.select(&predicate, values, None)
    }

    fn delete_set(&self, key: &C::Key) -> Result<Vec<NodeRow>> {
        let predicate = format!(
            "{} <= {m} AND {} >= {m}",
            self.tuple("min"),
            self.tuple("max"),
            m = self.markers()
        );
        let mut values = self.key_values(key);
        values.extend(self.key_values(key));
        self.select(&predicate, values, None)
    }

    fn range_nbar(&self, k1: &C::Key, k2: &C::Key) -> Result<Option<NodeRow>> {
        let predicate = format!(
            "{} < {m} AND {} > {m}",
            self.tuple("min"),
            self.tuple("max"),
            m = self.markers()
        );
        let mut values = self.key_values(k1);
        values.extend(self.key_values(k2));
        Ok(self.select(&predicate, values, Some(1))?.into_iter().next())
    }

    fn range_left(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>> {
        let predicate = format!(
            "{min} < {m} AND {max} > {m} AND {max} <= {m}",
            min = self.tuple("min"),
            max = self.tuple("max"),
            m = self.markers()
        );
        let mut values = self.key_values(k1);
        values.extend(self.key_values(k1));
        values.extend(self.key_values(k2));
        self.select(&predicate, values, None)
    }

    fn range_right(&self, k1: &C::Key, k2: &C::Key) -> Result<Vec<NodeRow>> {
        let predicate = format!(
            "{min} >= {m} AND {min} < {m} AND {max} > {m}",
            min = self.tuple("min"),
            max = self.tuple("max"),
            m = self.markers()
        );
        let mut values = self.key_values(k1);
        values.extend(self.key_values(k2));
        values.extend(self.key_values(k2));
        self.select(&predicate, values, None)
    }

    fn node_count(&self) -> Result<usize> {
        self.with_table(|conn, table| {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(StoreError::from)?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    fn apply_delta(&self, delta: &Delta) -> Result<()> {
        let bounds = delta
            .create
            .iter()
            .map(|row| self.bound_values(row))
            .collect::<Result<Vec<_>>>()?;
        let insert_columns = format!(
            "level, k_min, k_max, {}, {}, context",
            self.columns("min").join(", "),
            self.columns("max").join(", ")
        );
        let insert_markers = placeholders(4 + 2 * self.codec.columns().len());

        self.with_table(|conn, table| {
            let tx = conn.transaction().map_err(StoreError::from)?;
            {
                let mut delete = tx
                    .prepare_cached(&format!(
                        "DELETE FROM {table} WHERE level = ?1 AND k_min = ?2 AND k_max = ?3"
                    ))
                    .map_err(StoreError::from)?;
                for id in &delta.delete {
                    let changed = delete
                        .execute(params![id.level, id.k_min, id.k_max])
                        .map_err(StoreError::from)?;
                    if changed != 1 {
                        return Err(StoreError::MissingNode(id.clone()).into());
                    }
                }

                let mut insert = tx
                    .prepare_cached(&format!(
                        "INSERT INTO {table} ({insert_columns}) VALUES {insert_markers}"
                    ))
                    .map_err(StoreError::from)?;
                for (row, bound) in delta.create.iter().zip(&bounds) {
                    let mut values = vec![
                        SqlValue::Integer(row.level),
                        SqlValue::Text(row.k_min.clone()),
                        SqlValue::Text(row.k_max.clone()),
                    ];
                    values.extend(bound.iter().cloned());
                    values.push(SqlValue::Text(row.context.clone()));
                    match insert.execute(params_from_iter(values.iter())) {
                        Ok(_) => {}
                        Err(err) if is_constraint_violation(&err) => {
                            return Err(StoreError::DuplicateNode(row.id()).into());
                        }
                        Err(err) => return Err(StoreError::from(err).into()),
                    }
                }

                let mut update = tx
                    .prepare_cached(&format!(
                        "UPDATE {table} SET context = ?1 \
                         WHERE level = ?2 AND k_min = ?3 AND k_max = ?4"
                    ))
                    .map_err(StoreError::from)?;
                for row in &delta.update {
                    let changed = update
                        .execute(params![row.context, row.level, row.k_min, row.k_max])
                        .map_err(StoreError::from)?;
                    if changed != 1 {
                        return Err(StoreError::MissingNode(row.id()).into());
                    }
                }
            }
            tx.commit().map_err(StoreError::from)?;
            trace!(
                created = delta.create.len(),
                updated = delta.update.len(),
                deleted = delta.delete.len(),
                "store.sqlite.apply_delta"
            );
            Ok(())
        })
    }
}

impl<C: GroupKeyCodec> SqliteStore<C> {
    /// Column tuples for the group and the least significant part of one bound.
    fn split_tuple(&self, prefix: &str) -> (String, String) {
        let columns = self.columns(prefix);
        let (group, part) = columns.split_at(self.codec.group_columns());
        (
            format!("({})", group.join(", ")),
            format!("({})", part.join(", ")),
        )
    }

    fn part_markers(&self) -> String {
        placeholders(self.codec.columns().len() - self.codec.group_columns())
    }
}

impl<C: GroupKeyCodec> GroupByStore<C> for SqliteStore<C> {
    fn group_by_left(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>> {
        let (min_group, min_part) = self.split_tuple("min");
        let (max_group, max_part) = self.split_tuple("max");
        let predicate = format!(
            "{max_part} > {m} AND {max_part} <= {m} \
             AND ({min_part} < {m} OR {min_group} <> {max_group})",
            m = self.part_markers()
        );
        let mut values = self.codec.part_values(y1);
        values.extend(self.codec.part_values(y2));
        values.extend(self.codec.part_values(y1));
        self.select(&predicate, values, None)
    }

    fn group_by_right(&self, y1: &C::Part, y2: &C::Part) -> Result<Vec<NodeRow>> {
        let (min_group, min_part) = self.split_tuple("min");
        let (max_group, max_part) = self.split_tuple("max");
        let predicate = format!(
            "{min_part} >= {m} AND {min_part} < {m} \
             AND ({max_part} > {m} OR {min_group} <> {max_group})",
            m = self.part_markers()
        );
        let mut values = self.codec.part_values(y1);
        values.extend(self.codec.part_values(y2));
        values.extend(self.codec.part_values(y2));
        self.select(&predicate, values, None)
    }

    fn group_by_nbar(
        &self,
        y1: &C::Part,
        y2: &C::Part,
    ) -> Result<BTreeMap<C::Group, Option<NodeRow>>> {
        let (min_group, min_part) = self.split_tuple("min");
        let (max_group, max_part) = self.split_tuple("max");
        let predicate = format!(
            "({min_part} < {m} AND {max_part} > {m}) OR {min_group} <> {max_group}",
            m = self.part_markers()
        );
        let mut values = self.codec.part_values(y1);
        values.extend(self.codec.part_values(y2));
        let candidates = self.select(&predicate, values, None)?;
        assign_groups(&self.codec, candidates, y1, y2)
    }
}
