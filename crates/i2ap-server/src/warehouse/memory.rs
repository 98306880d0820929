//! In-process warehouse
//!
//! Tables are text frames keyed by `dataset.table` (case-insensitive); views
//! are stored queries under the same keys. Typed operations work as on a real
//! mart. Raw SQL is understood only for the
//! handful of statement shapes the flows generate; anything else is recorded
//! and otherwise ignored by `exec`, and rejected by `query` unless a canned
//! result was registered for it.

use async_trait::async_trait;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    column_mapping, typed_cell, DataFrame, Disposition, MartKind, TableRef, TableSchema,
    Warehouse, WarehouseError, WarehouseResult,
};

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    datasets: RwLock<HashSet<String>>,
    tables: RwLock<HashMap<String, DataFrame>>,
    views: RwLock<HashMap<String, String>>,
    canned: RwLock<HashMap<String, DataFrame>>,
    executed: RwLock<Vec<String>>,
}

fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .to_string()
}

fn table_key(table: &TableRef) -> String {
    format!("{}.{}", table.dataset, table.table).to_lowercase()
}

fn in_dataset(key: &str, dataset: &str) -> bool {
    key.strip_prefix(dataset)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn captures<'a>(pattern: &str, sql: &'a str) -> Option<Captures<'a>> {
    Regex::new(pattern).ok()?.captures(sql)
}

/// Parse `a = 'x' AND b = 'y'`; `true` matches everything
fn parse_conditions(clause: &str) -> Option<Vec<(String, String)>> {
    if clause.trim().eq_ignore_ascii_case("true") {
        return Some(Vec::new());
    }
    let splitter = Regex::new(r"(?i)\s+AND\s+").ok()?;
    splitter
        .split(clause)
        .map(|part| {
            let caps = captures(r"^\s*(\w+)\s*=\s*'([^']*)'\s*$", part)?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
        .collect()
}

/// Rows of `src` rearranged into `dest_columns` by name
fn project_rows(src: &DataFrame, dest_columns: &[String]) -> Vec<Vec<Option<String>>> {
    let mapping: Vec<Option<usize>> = dest_columns.iter().map(|c| src.column_index(c)).collect();
    src.rows
        .iter()
        .map(|row| mapping.iter().map(|idx| idx.and_then(|i| row[i].clone())).collect())
        .collect()
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sql` with `frame` from now on
    pub fn with_query_result(mut self, sql: &str, frame: DataFrame) -> Self {
        self.canned.get_mut().insert(normalize(sql), frame);
        self
    }

    /// Seed a table directly
    pub async fn insert_table(&self, table: &TableRef, frame: DataFrame) {
        self.tables.write().await.insert(table_key(table), frame);
        self.note_dataset(&table.dataset).await;
    }

    pub async fn table(&self, table: &TableRef) -> Option<DataFrame> {
        self.tables.read().await.get(&table_key(table)).cloned()
    }

    /// Every statement passed to `exec`, normalized
    pub async fn executed(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }

    /// Stored query behind `view`
    pub async fn view(&self, view: &TableRef) -> Option<String> {
        self.views.read().await.get(&table_key(view)).cloned()
    }

    fn key_of(name: &str) -> String {
        name.to_lowercase()
    }

    async fn note_dataset(&self, dataset: &str) {
        self.datasets.write().await.insert(dataset.to_lowercase());
    }

    async fn apply(&self, sql: &str) -> WarehouseResult<()> {
        let mut tables = self.tables.write().await;

        if let Some(caps) = captures(r"(?i)^DELETE FROM ([\w.]+)(?: WHERE (.+))?$", sql) {
            let key = Self::key_of(&caps[1]);
            let conditions = match caps.get(2) {
                Some(clause) => parse_conditions(clause.as_str())
                    .ok_or_else(|| WarehouseError::UnsupportedQuery(sql.to_string()))?,
                None => Vec::new(),
            };
            let frame = tables
                .get_mut(&key)
                .ok_or_else(|| WarehouseError::TableNotFound(caps[1].to_string()))?;

            let resolved: Vec<(usize, String)> = conditions
                .into_iter()
                .map(|(column, value)| {
                    frame
                        .column_index(&column)
                        .map(|idx| (idx, value))
                        .ok_or_else(|| WarehouseError::UnsupportedQuery(sql.to_string()))
                })
                .collect::<Result<_, _>>()?;
            frame.rows.retain(|row| {
                !resolved
                    .iter()
                    .all(|(idx, value)| row[*idx].as_deref() == Some(value.as_str()))
            });
            return Ok(());
        }

        if let Some(caps) = captures(r"(?i)^INSERT INTO ([\w.]+) SELECT \* FROM ([\w.]+)$", sql) {
            let src = tables
                .get(&Self::key_of(&caps[2]))
                .cloned()
                .ok_or_else(|| WarehouseError::TableNotFound(caps[2].to_string()))?;
            let dest = tables
                .get_mut(&Self::key_of(&caps[1]))
                .ok_or_else(|| WarehouseError::TableNotFound(caps[1].to_string()))?;
            let rows = project_rows(&src, &dest.columns);
            dest.rows.extend(rows);
            return Ok(());
        }

        if let Some(caps) = captures(r"(?i)^CREATE TABLE ([\w.]+) AS SELECT \* FROM ([\w.]+)$", sql) {
            let dest = Self::key_of(&caps[1]);
            if tables.contains_key(&dest) {
                return Err(WarehouseError::TableExists(caps[1].to_string()));
            }
            let src = tables
                .get(&Self::key_of(&caps[2]))
                .cloned()
                .ok_or_else(|| WarehouseError::TableNotFound(caps[2].to_string()))?;
            tables.insert(dest, src);
            return Ok(());
        }

        if let Some(caps) = captures(r"(?i)^TRUNCATE TABLE ([\w.]+)$", sql) {
            let frame = tables
                .get_mut(&Self::key_of(&caps[1]))
                .ok_or_else(|| WarehouseError::TableNotFound(caps[1].to_string()))?;
            frame.rows.clear();
            return Ok(());
        }

        if let Some(caps) = captures(r"(?i)^DROP TABLE (?:IF EXISTS )?([\w.]+)$", sql) {
            tables.remove(&Self::key_of(&caps[1]));
            return Ok(());
        }

        debug!("Statement recorded without effect: {}", sql);
        Ok(())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn kind(&self) -> MartKind {
        MartKind::Memory
    }

    async fn exec(&self, sql: &str) -> WarehouseResult<()> {
        let sql = normalize(sql);
        self.executed.write().await.push(sql.clone());
        self.apply(&sql).await
    }

    async fn query(&self, sql: &str) -> WarehouseResult<DataFrame> {
        let sql = normalize(sql);
        if let Some(frame) = self.canned.read().await.get(&sql) {
            return Ok(frame.clone());
        }

        if let Some(name) = captures(r"(?i)^SELECT \* FROM ([\w.]+)$", &sql).map(|c| c[1].to_string()) {
            let key = Self::key_of(&name);
            if let Some(frame) = self.tables.read().await.get(&key) {
                return Ok(frame.clone());
            }
            let view = self.views.read().await.get(&key).cloned();
            return match view {
                Some(view_query) => self.query(&view_query).await,
                None => Err(WarehouseError::TableNotFound(name)),
            };
        }

        let tables = self.tables.read().await;
        if let Some(caps) = captures(r"(?i)^SELECT COUNT\(\*\) AS row_count FROM ([\w.]+)$", &sql) {
            let frame = tables
                .get(&Self::key_of(&caps[1]))
                .ok_or_else(|| WarehouseError::TableNotFound(caps[1].to_string()))?;
            let mut result = DataFrame::new(vec!["row_count".to_string()]);
            result.push_row(vec![Some(frame.len().to_string())])?;
            return Ok(result);
        }

        Err(WarehouseError::UnsupportedQuery(sql))
    }

    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool> {
        let dataset = dataset.to_lowercase();
        if self.datasets.read().await.contains(&dataset) {
            return Ok(true);
        }
        let in_tables = self.tables.read().await.keys().any(|k| in_dataset(k, &dataset));
        Ok(in_tables || self.views.read().await.keys().any(|k| in_dataset(k, &dataset)))
    }

    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<()> {
        self.note_dataset(dataset).await;
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &str, cascade: bool) -> WarehouseResult<()> {
        let name = dataset.to_lowercase();
        {
            let mut tables = self.tables.write().await;
            let mut views = self.views.write().await;
            let held = tables.keys().chain(views.keys()).any(|k| in_dataset(k, &name));
            if held && !cascade {
                return Err(WarehouseError::DatasetNotEmpty(dataset.to_string()));
            }
            tables.retain(|k, _| !in_dataset(k, &name));
            views.retain(|k, _| !in_dataset(k, &name));
        }
        self.datasets.write().await.remove(&name);
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> WarehouseResult<bool> {
        Ok(self.tables.read().await.contains_key(&table_key(table)))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        recreate: bool,
    ) -> WarehouseResult<()> {
        {
            let mut tables = self.tables.write().await;
            let key = table_key(table);
            if tables.contains_key(&key) && !recreate {
                return Err(WarehouseError::TableExists(table.to_string()));
            }
            tables.insert(key, DataFrame::new(schema.column_names()));
        }
        self.note_dataset(&table.dataset).await;
        Ok(())
    }

    async fn create_table_as(&self, table: &TableRef, query: &str) -> WarehouseResult<()> {
        let frame = self.query(query).await?;
        {
            let mut tables = self.tables.write().await;
            let key = table_key(table);
            if tables.contains_key(&key) || self.views.read().await.contains_key(&key) {
                return Err(WarehouseError::TableExists(table.to_string()));
            }
            tables.insert(key, frame);
        }
        self.note_dataset(&table.dataset).await;
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> WarehouseResult<()> {
        self.tables.write().await.remove(&table_key(table));
        Ok(())
    }

    async fn create_view(&self, view: &TableRef, query: &str, replace: bool) -> WarehouseResult<()> {
        {
            let tables = self.tables.read().await;
            let mut views = self.views.write().await;
            let key = table_key(view);
            if tables.contains_key(&key) || (views.contains_key(&key) && !replace) {
                return Err(WarehouseError::TableExists(view.to_string()));
            }
            views.insert(key, normalize(query));
        }
        self.note_dataset(&view.dataset).await;
        Ok(())
    }

    async fn drop_view(&self, view: &TableRef) -> WarehouseResult<()> {
        self.views.write().await.remove(&table_key(view));
        Ok(())
    }

    async fn truncate(&self, table: &TableRef) -> WarehouseResult<()> {
        self.tables
            .write()
            .await
            .get_mut(&table_key(table))
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))?
            .rows
            .clear();
        Ok(())
    }

    async fn load(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        frame: &DataFrame,
        disposition: Disposition,
    ) -> WarehouseResult<u64> {
        let (mapping, extra) = column_mapping(schema, frame);
        if !extra.is_empty() {
            warn!("Columns not in the layout of {} are ignored: {}", table, extra.join(", "));
        }

        let mut tables = self.tables.write().await;
        let target = tables
            .get_mut(&table_key(table))
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))?;

        match disposition {
            Disposition::WriteTruncate => target.rows.clear(),
            Disposition::WriteEmpty if !target.is_empty() => {
                return Err(WarehouseError::TableNotEmpty(table.to_string()));
            },
            _ => {},
        }

        // Order values by the target's columns, which may differ from the layout's
        let target_columns = target.columns.clone();
        for row in &frame.rows {
            let values: Vec<Option<String>> = target_columns
                .iter()
                .map(|column| {
                    let field_idx = schema.fields.iter().position(|f| f.name.eq_ignore_ascii_case(column))?;
                    let value = mapping[field_idx].and_then(|i| row[i].as_deref());
                    typed_cell(schema.fields[field_idx].column_type, value)
                })
                .collect();
            target.push_row(values)?;
        }

        Ok(frame.len() as u64)
    }

    async fn row_count(&self, table: &TableRef) -> WarehouseResult<u64> {
        self.tables
            .read()
            .await
            .get(&table_key(table))
            .map(|f| f.len() as u64)
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))
    }

    async fn merge(
        &self,
        table: &TableRef,
        staging: &TableRef,
        _schema: &TableSchema,
        keys: &[String],
    ) -> WarehouseResult<()> {
        let mut tables = self.tables.write().await;
        let incoming = tables
            .get(&table_key(staging))
            .cloned()
            .ok_or_else(|| WarehouseError::TableNotFound(staging.to_string()))?;
        let target = tables
            .get_mut(&table_key(table))
            .ok_or_else(|| WarehouseError::TableNotFound(table.to_string()))?;

        let target_keys: Vec<usize> = keys
            .iter()
            .map(|k| target.column_index(k))
            .collect::<Option<_>>()
            .ok_or_else(|| WarehouseError::UnsupportedQuery(format!("merge keys {:?}", keys)))?;

        for row in project_rows(&incoming, &target.columns) {
            let existing = target
                .rows
                .iter_mut()
                .find(|current| target_keys.iter().all(|&i| current[i] == row[i]));
            match existing {
                Some(current) => *current = row,
                None => target.rows.push(row),
            }
        }
        Ok(())
    }

    async fn copy_table(
        &self,
        src: &TableRef,
        dest: &TableRef,
        disposition: Disposition,
    ) -> WarehouseResult<()> {
        let mut tables = self.tables.write().await;
        let source = tables
            .get(&table_key(src))
            .cloned()
            .ok_or_else(|| WarehouseError::TableNotFound(src.to_string()))?;
        let target = tables
            .get_mut(&table_key(dest))
            .ok_or_else(|| WarehouseError::TableNotFound(dest.to_string()))?;

        match disposition {
            Disposition::WriteTruncate => target.rows.clear(),
            Disposition::WriteEmpty if !target.is_empty() => {
                return Err(WarehouseError::TableNotEmpty(dest.to_string()));
            },
            _ => {},
        }
        let rows = project_rows(&source, &target.columns);
        target.rows.extend(rows);
        Ok(())
    }
}
