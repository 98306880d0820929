use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::dialect::Dialect;
use super::WarehouseError;

/// Default connection pool size for the mart.
pub const DEFAULT_MART_MAX_CONNECTIONS: u32 = 5;

/// Default Postgres port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MartKind {
    BigQuery,
    Postgres,
    Oracle,
    MySql,
    SqlServer,
    Memory,
}

impl MartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MartKind::BigQuery => "bigquery",
            MartKind::Postgres => "postgres",
            MartKind::Oracle => "oracle",
            MartKind::MySql => "mysql",
            MartKind::SqlServer => "mssql",
            MartKind::Memory => "memory",
        }
    }

    /// SQL flavour used for generated statements
    pub fn dialect(&self) -> Dialect {
        match self {
            MartKind::BigQuery => Dialect::BigQuery,
            MartKind::Postgres | MartKind::Memory => Dialect::Postgres,
            MartKind::Oracle => Dialect::Oracle,
            MartKind::MySql => Dialect::MySql,
            MartKind::SqlServer => Dialect::SqlServer,
        }
    }
}

impl FromStr for MartKind {
    type Err = WarehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bigquery" | "bq" => Ok(MartKind::BigQuery),
            "postgres" | "postgresql" => Ok(MartKind::Postgres),
            "oracle" => Ok(MartKind::Oracle),
            "mysql" => Ok(MartKind::MySql),
            "mssql" | "sqlserver" => Ok(MartKind::SqlServer),
            "memory" => Ok(MartKind::Memory),
            other => Err(WarehouseError::InvalidType(other.to_string())),
        }
    }
}

/// Connection settings for the data mart
#[derive(Clone, Serialize, Deserialize)]
pub struct MartSettings {
    pub kind: MartKind,
    pub server: String,
    pub port: u16,
    /// Database name; also the only project Postgres can address
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for MartSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MartSettings")
            .field("kind", &self.kind)
            .field("server", &self.server)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl MartSettings {
    pub(crate) fn from_lookup(var: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let kind: MartKind = var("I2AP_MART_TYPE")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()?;

        let port = match var("I2AP_MART_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid mart port: {}", p))?,
            None => DEFAULT_POSTGRES_PORT,
        };

        Ok(Self {
            kind,
            server: var("I2AP_MART_SERVER").unwrap_or_else(|| "localhost".to_string()),
            port,
            name: var("I2AP_MART_NAME").unwrap_or_default(),
            user: var("I2AP_MART_USER").unwrap_or_default(),
            password: var("I2AP_MART_PASSWORD").unwrap_or_default(),
            max_connections: var("I2AP_MART_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_MART_MAX_CONNECTIONS),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            kind: MartKind::Memory,
            server: String::new(),
            port: 0,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: 1,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.kind == MartKind::Postgres {
            if self.name.is_empty() {
                anyhow::bail!("I2AP_MART_NAME must be set for a postgres mart");
            }
            if self.max_connections == 0 {
                anyhow::bail!("I2AP_MART_MAX_CONNECTIONS must be greater than 0");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<MartSettings> {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        MartSettings::from_lookup(&|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_kind_names() {
        assert_eq!("PostgreSQL".parse::<MartKind>().unwrap(), MartKind::Postgres);
        assert_eq!("mssql".parse::<MartKind>().unwrap(), MartKind::SqlServer);
        let err = "db2".parse::<MartKind>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid database type: db2");
    }

    #[test]
    fn test_postgres_defaults() {
        let s = settings(&[("I2AP_MART_NAME", "mart")]).unwrap();
        assert_eq!(s.kind, MartKind::Postgres);
        assert_eq!(s.port, DEFAULT_POSTGRES_PORT);
        assert_eq!(s.max_connections, DEFAULT_MART_MAX_CONNECTIONS);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_postgres_requires_database_name() {
        let s = settings(&[]).unwrap();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_invalid_port() {
        assert!(settings(&[("I2AP_MART_PORT", "five")]).is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let mut s = settings(&[("I2AP_MART_NAME", "mart")]).unwrap();
        s.password = "hunter2".into();
        assert!(!format!("{:?}", s).contains("hunter2"));
    }
}
