//! SQL generation for each supported warehouse flavour

use super::schema::{ColumnType, TableSchema};
use super::TableRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    BigQuery,
    Postgres,
    Oracle,
    MySql,
    SqlServer,
}

impl Dialect {
    pub fn convert_type(&self, column_type: ColumnType) -> &'static str {
        use ColumnType::*;
        match (self, column_type) {
            (Dialect::Postgres, String) => "TEXT",
            (Dialect::Postgres, Integer) => "BIGINT",
            (Dialect::Postgres, Float) => "DOUBLE PRECISION",
            (Dialect::Postgres, Boolean) => "BOOLEAN",
            (Dialect::Postgres, Date) => "DATE",
            (Dialect::Postgres, DateTime) => "TIMESTAMP",
            (Dialect::Postgres, Timestamp) => "TIMESTAMPTZ",

            (Dialect::Oracle, String) => "NVARCHAR2(4000)",
            (Dialect::Oracle, Integer) => "INTEGER",
            (Dialect::Oracle, Float) => "FLOAT",
            (Dialect::Oracle, Boolean) => "NUMBER(1)",
            (Dialect::Oracle, Date) => "DATE",
            (Dialect::Oracle, DateTime | Timestamp) => "TIMESTAMP",

            (Dialect::MySql, String) => "TEXT",
            (Dialect::MySql, Integer) => "BIGINT",
            (Dialect::MySql, Float) => "DOUBLE",
            (Dialect::MySql, Boolean) => "BOOLEAN",
            (Dialect::MySql, Date) => "DATE",
            (Dialect::MySql, DateTime) => "DATETIME",
            (Dialect::MySql, Timestamp) => "TIMESTAMP",

            (Dialect::SqlServer, String) => "NVARCHAR(4000)",
            (Dialect::SqlServer, Integer) => "BIGINT",
            (Dialect::SqlServer, Float) => "FLOAT",
            (Dialect::SqlServer, Boolean) => "BIT",
            (Dialect::SqlServer, Date) => "DATE",
            (Dialect::SqlServer, DateTime) => "DATETIME2",
            (Dialect::SqlServer, Timestamp) => "DATETIMEOFFSET",

            (Dialect::BigQuery, String) => "STRING",
            (Dialect::BigQuery, Integer) => "INT64",
            (Dialect::BigQuery, Float) => "FLOAT64",
            (Dialect::BigQuery, Boolean) => "BOOL",
            (Dialect::BigQuery, Date) => "DATE",
            (Dialect::BigQuery, DateTime) => "DATETIME",
            (Dialect::BigQuery, Timestamp) => "TIMESTAMP",
        }
    }

    /// Fully qualified table name.
    ///
    /// Only BigQuery and SQL Server can address another project (database)
    /// in the same statement; the rest use `dataset.table`.
    pub fn qualify(&self, table: &TableRef) -> String {
        match (self, &table.project) {
            (Dialect::BigQuery, Some(project)) => {
                format!("`{}.{}.{}`", project, table.dataset, table.table)
            },
            (Dialect::SqlServer, Some(project)) => {
                format!("{}.{}.{}", project, table.dataset, table.table)
            },
            _ => format!("{}.{}", table.dataset, table.table),
        }
    }

    pub fn create_schema_sql(&self, dataset: &str) -> String {
        match self {
            Dialect::Oracle | Dialect::SqlServer => format!("CREATE SCHEMA {}", dataset),
            _ => format!("CREATE SCHEMA IF NOT EXISTS {}", dataset),
        }
    }

    pub fn drop_schema_sql(&self, dataset: &str, cascade: bool) -> String {
        match self {
            // Dropping a MySQL database always takes its tables with it
            Dialect::MySql => format!("DROP SCHEMA IF EXISTS {}", dataset),
            Dialect::SqlServer | Dialect::Oracle => format!("DROP SCHEMA {}", dataset),
            _ => format!(
                "DROP SCHEMA IF EXISTS {} {}",
                dataset,
                if cascade { "CASCADE" } else { "RESTRICT" }
            ),
        }
    }

    pub fn create_table_sql(&self, table: &TableRef, schema: &TableSchema) -> String {
        let columns = schema
            .fields
            .iter()
            .map(|f| format!("{} {}", f.name, self.convert_type(f.column_type)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", self.qualify(table), columns)
    }

    pub fn drop_table_sql(&self, table: &TableRef) -> String {
        match self {
            // No IF EXISTS before 23c
            Dialect::Oracle => format!("DROP TABLE {}", self.qualify(table)),
            _ => format!("DROP TABLE IF EXISTS {}", self.qualify(table)),
        }
    }

    pub fn truncate_sql(&self, table: &TableRef) -> String {
        match self {
            Dialect::BigQuery => format!("DELETE FROM {} WHERE true", self.qualify(table)),
            _ => format!("TRUNCATE TABLE {}", self.qualify(table)),
        }
    }

    pub fn create_table_as_sql(&self, table: &TableRef, query: &str) -> String {
        format!("CREATE TABLE {} AS {}", self.qualify(table), query.trim().trim_end_matches(';'))
    }

    pub fn create_view_sql(&self, view: &TableRef, query: &str, replace: bool) -> String {
        let verb = match (self, replace) {
            (_, false) => "CREATE VIEW",
            (Dialect::SqlServer, true) => "CREATE OR ALTER VIEW",
            (_, true) => "CREATE OR REPLACE VIEW",
        };
        format!("{} {} AS {}", verb, self.qualify(view), query.trim().trim_end_matches(';'))
    }

    pub fn drop_view_sql(&self, view: &TableRef) -> String {
        match self {
            Dialect::Oracle => format!("DROP VIEW {}", self.qualify(view)),
            _ => format!("DROP VIEW IF EXISTS {}", self.qualify(view)),
        }
    }

    pub fn select_all_sql(&self, table: &TableRef) -> String {
        format!("SELECT * FROM {}", self.qualify(table))
    }

    pub fn copy_rows_sql(&self, src: &TableRef, dest: &TableRef) -> String {
        format!("INSERT INTO {} SELECT * FROM {}", self.qualify(dest), self.qualify(src))
    }

    pub fn row_count_sql(&self, table: &TableRef) -> String {
        format!("SELECT COUNT(*) AS row_count FROM {}", self.qualify(table))
    }

    /// Statements that fold `staging` into `table` by `keys`.
    ///
    /// The first updates matching rows in place, the second inserts staging
    /// rows with no match. The update is skipped when every column is a key.
    pub fn merge_sql(
        &self,
        table: &TableRef,
        staging: &TableRef,
        schema: &TableSchema,
        keys: &[String],
    ) -> Vec<String> {
        let is_key = |name: &str| keys.iter().any(|k| k.eq_ignore_ascii_case(name));
        let target = self.qualify(table);
        let source = self.qualify(staging);

        let join = keys
            .iter()
            .map(|k| format!("curr.{k} = incoming.{k}"))
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut statements = Vec::with_capacity(2);

        let assignments = schema
            .fields
            .iter()
            .filter(|f| !is_key(&f.name))
            .map(|f| format!("{0} = incoming.{0}", f.name))
            .collect::<Vec<_>>();
        if !assignments.is_empty() {
            statements.push(format!(
                "UPDATE {} curr SET {} FROM {} incoming WHERE {}",
                target,
                assignments.join(", "),
                source,
                join
            ));
        }

        let plain = schema
            .fields
            .iter()
            .map(|f| f.name.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let prefixed = schema
            .fields
            .iter()
            .map(|f| format!("incoming.{}", f.name))
            .collect::<Vec<_>>()
            .join(", ");
        let unmatched = keys
            .iter()
            .map(|k| format!("curr.{} IS NULL", k))
            .collect::<Vec<_>>()
            .join(" AND ");

        statements.push(format!(
            "INSERT INTO {target} ({plain}) SELECT {prefixed} FROM {target} curr \
             RIGHT OUTER JOIN {source} incoming ON {join} WHERE {unmatched}"
        ));

        statements
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::warehouse::schema::ColumnDef;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnDef::new("id", ColumnType::String),
            ColumnDef::new("name", ColumnType::String),
            ColumnDef::new("amount", ColumnType::Float),
        ])
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(Dialect::Postgres.convert_type(ColumnType::Timestamp), "TIMESTAMPTZ");
        assert_eq!(Dialect::Oracle.convert_type(ColumnType::Boolean), "NUMBER(1)");
        assert_eq!(Dialect::SqlServer.convert_type(ColumnType::DateTime), "DATETIME2");
        assert_eq!(Dialect::BigQuery.convert_type(ColumnType::Integer), "INT64");
        assert_eq!(Dialect::MySql.convert_type(ColumnType::Float), "DOUBLE");
    }

    #[test]
    fn test_create_table() {
        let sql = Dialect::Postgres.create_table_sql(&TableRef::new("mart", "account"), &schema());
        assert_eq!(
            sql,
            "CREATE TABLE mart.account (id TEXT, name TEXT, amount DOUBLE PRECISION)"
        );
    }

    #[test]
    fn test_truncate_differs_for_bigquery() {
        let table = TableRef::new("mart", "account");
        assert_eq!(Dialect::BigQuery.truncate_sql(&table), "DELETE FROM mart.account WHERE true");
        assert_eq!(Dialect::Postgres.truncate_sql(&table), "TRUNCATE TABLE mart.account");
    }

    #[test]
    fn test_project_qualification() {
        let table = TableRef::new("mart", "account").with_project("analytics");
        assert_eq!(Dialect::BigQuery.qualify(&table), "`analytics.mart.account`");
        assert_eq!(Dialect::Postgres.qualify(&table), "mart.account");
    }

    #[test]
    fn test_create_table_as_strips_semicolon() {
        let sql = Dialect::Postgres.create_table_as_sql(
            &TableRef::new("mart", "copy"),
            "SELECT * FROM mart.account;",
        );
        assert_eq!(sql, "CREATE TABLE mart.copy AS SELECT * FROM mart.account");
    }

    #[test]
    fn test_schema_statements() {
        assert_eq!(Dialect::Postgres.create_schema_sql("mart"), "CREATE SCHEMA IF NOT EXISTS mart");
        assert_eq!(Dialect::Postgres.drop_schema_sql("mart", false), "DROP SCHEMA IF EXISTS mart RESTRICT");
        assert_eq!(Dialect::BigQuery.drop_schema_sql("mart", true), "DROP SCHEMA IF EXISTS mart CASCADE");
        assert_eq!(Dialect::MySql.drop_schema_sql("mart", false), "DROP SCHEMA IF EXISTS mart");
    }

    #[test]
    fn test_view_statements() {
        let view = TableRef::new("mart", "open_orders");
        assert_eq!(
            Dialect::Postgres.create_view_sql(&view, "SELECT * FROM mart.orders;", true),
            "CREATE OR REPLACE VIEW mart.open_orders AS SELECT * FROM mart.orders"
        );
        assert_eq!(
            Dialect::SqlServer.create_view_sql(&view, "SELECT 1", true),
            "CREATE OR ALTER VIEW mart.open_orders AS SELECT 1"
        );
        assert_eq!(
            Dialect::Postgres.create_view_sql(&view, "SELECT 1", false),
            "CREATE VIEW mart.open_orders AS SELECT 1"
        );
        assert_eq!(Dialect::Oracle.drop_view_sql(&view), "DROP VIEW mart.open_orders");
    }

    #[test]
    fn test_merge_statements() {
        let statements = Dialect::Postgres.merge_sql(
            &TableRef::new("mart", "account"),
            &TableRef::new("mart", "account_tmp"),
            &schema(),
            &["id".to_string()],
        );

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "UPDATE mart.account curr SET name = incoming.name, amount = incoming.amount \
             FROM mart.account_tmp incoming WHERE curr.id = incoming.id"
        );
        assert_eq!(
            statements[1],
            "INSERT INTO mart.account (id, name, amount) SELECT incoming.id, incoming.name, \
             incoming.amount FROM mart.account curr RIGHT OUTER JOIN mart.account_tmp incoming \
             ON curr.id = incoming.id WHERE curr.id IS NULL"
        );
    }

    #[test]
    fn test_merge_with_only_keys_skips_update() {
        let schema = TableSchema::new(vec![ColumnDef::new("id", ColumnType::String)]);
        let statements = Dialect::Postgres.merge_sql(
            &TableRef::new("mart", "a"),
            &TableRef::new("mart", "b"),
            &schema,
            &["ID".to_string()],
        );
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("INSERT INTO"));
    }
}
