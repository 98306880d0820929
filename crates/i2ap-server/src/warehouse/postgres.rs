//! Postgres mart connector on a sqlx pool

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, QueryBuilder, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::{MartKind, MartSettings};
use super::frame::DataFrame;
use super::retry::{with_retry, RetryPolicy};
use super::schema::TableSchema;
use super::{column_mapping, typed_cell, Disposition, TableRef, Warehouse, WarehouseError, WarehouseResult};

/// Seconds to wait for a pooled connection
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Upper bound on rows per INSERT statement
const MAX_BATCH_ROWS: usize = 1000;

/// Postgres caps bind parameters per statement at u16::MAX
const MAX_BIND_PARAMS: usize = 65535;

pub struct PostgresWarehouse {
    pool: PgPool,
    database: String,
    retry: RetryPolicy,
}

impl PostgresWarehouse {
    pub async fn connect(settings: &MartSettings) -> WarehouseResult<Self> {
        let mut options = PgConnectOptions::new()
            .host(&settings.server)
            .port(settings.port)
            .database(&settings.name);
        if !settings.user.is_empty() {
            options = options.username(&settings.user);
        }
        if !settings.password.is_empty() {
            options = options.password(&settings.password);
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .connect_with(options)
            .await?;

        info!(
            server = %settings.server,
            database = %settings.name,
            max_connections = settings.max_connections,
            "Postgres mart connection pool created"
        );

        Ok(Self::from_pool(pool, settings.name.clone()))
    }

    pub fn from_pool(pool: PgPool, database: impl Into<String>) -> Self {
        Self {
            pool,
            database: database.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// A Postgres connection only sees its own database.
    fn check_project(&self, table: &TableRef) -> WarehouseResult<()> {
        match &table.project {
            Some(project) if project != &self.database => Err(WarehouseError::CrossProject {
                project: project.clone(),
                connected: self.database.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn qualify(&self, table: &TableRef) -> WarehouseResult<String> {
        self.check_project(table)?;
        Ok(self.dialect().qualify(table))
    }

    async fn ensure_schema(&self, dataset: &str) -> WarehouseResult<()> {
        self.exec(&self.dialect().create_schema_sql(dataset)).await
    }

    /// Rows per INSERT so that one statement stays under the bind limit
    fn batch_rows(field_count: usize) -> usize {
        (MAX_BIND_PARAMS / field_count.max(1)).clamp(1, MAX_BATCH_ROWS)
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    fn kind(&self) -> MartKind {
        MartKind::Postgres
    }

    async fn exec(&self, sql: &str) -> WarehouseResult<()> {
        debug!(sql, "Executing statement");
        with_retry("exec", &self.retry, || async {
            sqlx::query(sql).persistent(false).execute(&self.pool).await?;
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str) -> WarehouseResult<DataFrame> {
        debug!(sql, "Running query");
        with_retry("query", &self.retry, || async {
            let rows = sqlx::query(sql).persistent(false).fetch_all(&self.pool).await?;
            rows_to_frame(&rows)
        })
        .await
    }

    async fn dataset_exists(&self, dataset: &str) -> WarehouseResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(dataset.to_lowercase())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_dataset(&self, dataset: &str) -> WarehouseResult<()> {
        self.ensure_schema(dataset).await?;
        info!(dataset, "Created dataset");
        Ok(())
    }

    async fn delete_dataset(&self, dataset: &str, cascade: bool) -> WarehouseResult<()> {
        if !cascade {
            // information_schema.tables lists views too
            let objects: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = $1",
            )
            .bind(dataset.to_lowercase())
            .fetch_one(&self.pool)
            .await?;
            if objects > 0 {
                return Err(WarehouseError::DatasetNotEmpty(dataset.to_string()));
            }
        }
        self.exec(&self.dialect().drop_schema_sql(dataset, cascade)).await?;
        info!(dataset, cascade, "Deleted dataset");
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> WarehouseResult<bool> {
        self.check_project(table)?;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2)",
        )
        .bind(table.dataset.to_lowercase())
        .bind(table.table.to_lowercase())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        recreate: bool,
    ) -> WarehouseResult<()> {
        self.check_project(table)?;
        if recreate {
            self.drop_table(table).await?;
        } else if self.table_exists(table).await? {
            return Err(WarehouseError::TableExists(table.to_string()));
        }
        self.ensure_schema(&table.dataset).await?;
        self.exec(&self.dialect().create_table_sql(table, schema)).await?;
        info!(table = %table, "Created table");
        Ok(())
    }

    async fn create_table_as(&self, table: &TableRef, query: &str) -> WarehouseResult<()> {
        self.check_project(table)?;
        if self.table_exists(table).await? {
            return Err(WarehouseError::TableExists(table.to_string()));
        }
        self.ensure_schema(&table.dataset).await?;
        self.exec(&self.dialect().create_table_as_sql(table, query)).await?;
        info!(table = %table, "Created table from query");
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> WarehouseResult<()> {
        self.check_project(table)?;
        self.exec(&self.dialect().drop_table_sql(table)).await
    }

    async fn create_view(&self, view: &TableRef, query: &str, replace: bool) -> WarehouseResult<()> {
        self.check_project(view)?;
        if !replace && self.table_exists(view).await? {
            return Err(WarehouseError::TableExists(view.to_string()));
        }
        self.ensure_schema(&view.dataset).await?;
        self.exec(&self.dialect().create_view_sql(view, query, replace)).await?;
        info!(view = %view, "Created view");
        Ok(())
    }

    async fn drop_view(&self, view: &TableRef) -> WarehouseResult<()> {
        self.check_project(view)?;
        self.exec(&self.dialect().drop_view_sql(view)).await
    }

    async fn truncate(&self, table: &TableRef) -> WarehouseResult<()> {
        self.check_project(table)?;
        self.exec(&self.dialect().truncate_sql(table)).await
    }

    async fn load(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        frame: &DataFrame,
        disposition: Disposition,
    ) -> WarehouseResult<u64> {
        let target = self.qualify(table)?;
        if !self.table_exists(table).await? {
            return Err(WarehouseError::TableNotFound(table.to_string()));
        }

        if disposition == Disposition::WriteEmpty && self.row_count(table).await? > 0 {
            return Err(WarehouseError::TableNotEmpty(table.to_string()));
        }

        let dialect = self.dialect();
        // The truncate rolls back with the inserts if any batch fails
        let mut tx = self.pool.begin().await?;
        if disposition == Disposition::WriteTruncate {
            sqlx::query(&dialect.truncate_sql(table))
                .persistent(false)
                .execute(&mut *tx)
                .await?;
        }

        if frame.is_empty() || schema.fields.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let (mapping, extra) = column_mapping(schema, frame);
        if !extra.is_empty() {
            warn!(table = %table, columns = ?extra, "Ignoring columns missing from the schema");
        }

        let column_list = schema.column_names().join(", ");
        let mut loaded = 0u64;

        for chunk in frame.rows.chunks(Self::batch_rows(schema.fields.len())) {
            let mut builder =
                QueryBuilder::<sqlx::Postgres>::new(format!("INSERT INTO {} ({}) ", target, column_list));
            builder.push_values(chunk, |mut b, row| {
                for (field, idx) in schema.fields.iter().zip(&mapping) {
                    let value = idx.and_then(|i| row[i].as_deref());
                    b.push_bind(typed_cell(field.column_type, value))
                        .push_unseparated(format!("::{}", dialect.convert_type(field.column_type)));
                }
            });
            let result = builder.build().persistent(false).execute(&mut *tx).await?;
            loaded += result.rows_affected();
        }

        tx.commit().await?;
        info!(table = %table, rows = loaded, disposition = %disposition, "Loaded rows");
        Ok(loaded)
    }

    async fn row_count(&self, table: &TableRef) -> WarehouseResult<u64> {
        self.check_project(table)?;
        let count: i64 = sqlx::query_scalar(&self.dialect().row_count_sql(table))
            .persistent(false)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn merge(
        &self,
        table: &TableRef,
        staging: &TableRef,
        schema: &TableSchema,
        keys: &[String],
    ) -> WarehouseResult<()> {
        self.check_project(table)?;
        self.check_project(staging)?;

        let mut tx = self.pool.begin().await?;
        for statement in self.dialect().merge_sql(table, staging, schema, keys) {
            debug!(sql = %statement, "Merging");
            sqlx::query(&statement).persistent(false).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(table = %table, staging = %staging, "Merged staging table");
        Ok(())
    }

    async fn copy_table(
        &self,
        src: &TableRef,
        dest: &TableRef,
        disposition: Disposition,
    ) -> WarehouseResult<()> {
        self.check_project(src)?;
        self.check_project(dest)?;
        if !self.table_exists(dest).await? {
            return Err(WarehouseError::TableNotFound(dest.to_string()));
        }

        if disposition == Disposition::WriteEmpty && self.row_count(dest).await? > 0 {
            return Err(WarehouseError::TableNotEmpty(dest.to_string()));
        }

        let dialect = self.dialect();
        let mut tx = self.pool.begin().await?;
        if disposition == Disposition::WriteTruncate {
            sqlx::query(&dialect.truncate_sql(dest))
                .persistent(false)
                .execute(&mut *tx)
                .await?;
        }
        let copy = dialect.copy_rows_sql(src, dest);
        debug!(sql = %copy, "Copying rows");
        sqlx::query(&copy).persistent(false).execute(&mut *tx).await?;
        tx.commit().await?;
        info!(src = %src, dest = %dest, disposition = %disposition, "Copied table");
        Ok(())
    }
}

fn rows_to_frame(rows: &[PgRow]) -> WarehouseResult<DataFrame> {
    let Some(first) = rows.first() else {
        return Ok(DataFrame::default());
    };

    let columns = first.columns().iter().map(|c| c.name().to_string()).collect();
    let mut frame = DataFrame::new(columns);
    for row in rows {
        let values = (0..row.len())
            .map(|idx| cell_text(row, idx))
            .collect::<WarehouseResult<Vec<_>>>()?;
        frame.push_row(values)?;
    }
    Ok(frame)
}

fn decode<'r, T>(row: &'r PgRow, idx: usize) -> WarehouseResult<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    Ok(row.try_get::<Option<T>, _>(idx)?)
}

/// Render one cell as text, NULL as `None`
fn cell_text(row: &PgRow, idx: usize) -> WarehouseResult<Option<String>> {
    let column = &row.columns()[idx];
    let type_name = column.type_info().name().to_uppercase();

    let text = match type_name.as_str() {
        "TEXT" | "VARCHAR" | "BPCHAR" | "CHAR" | "NAME" => decode::<String>(row, idx)?,
        "INT2" => decode::<i16>(row, idx)?.map(|v| v.to_string()),
        "INT4" => decode::<i32>(row, idx)?.map(|v| v.to_string()),
        "INT8" => decode::<i64>(row, idx)?.map(|v| v.to_string()),
        "FLOAT4" => decode::<f32>(row, idx)?.map(|v| v.to_string()),
        "FLOAT8" => decode::<f64>(row, idx)?.map(|v| v.to_string()),
        "NUMERIC" => decode::<sqlx::types::BigDecimal>(row, idx)?.map(|v| v.to_string()),
        "BOOL" => decode::<bool>(row, idx)?.map(|v| v.to_string()),
        "DATE" => decode::<chrono::NaiveDate>(row, idx)?.map(|v| v.format("%Y-%m-%d").to_string()),
        "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map(|v| v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        "UUID" => decode::<sqlx::types::Uuid>(row, idx)?.map(|v| v.to_string()),
        "JSON" | "JSONB" => decode::<serde_json::Value>(row, idx)?.map(|v| v.to_string()),
        other => {
            return Err(WarehouseError::UnsupportedColumnType {
                column: column.name().to_string(),
                type_name: other.to_string(),
            })
        },
    };
    Ok(text)
}
