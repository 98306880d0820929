//! Table extracts written to object storage

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use tracing::{info, instrument};

use super::{EtlError, EtlResult};
use crate::storage::{ObjectStore, StoredObject};
use crate::warehouse::{TableRef, Warehouse};

/// Write every row of `table` as CSV to `bucket/key`.
///
/// A key ending in `.gz` is gzip-compressed. The table must exist.
#[instrument(skip(warehouse, store), fields(table = %table))]
pub async fn export_table(
    warehouse: &dyn Warehouse,
    store: &dyn ObjectStore,
    table: &TableRef,
    bucket: &str,
    key: &str,
) -> EtlResult<StoredObject> {
    let frame = warehouse.query(&warehouse.dialect().select_all_sql(table)).await?;
    let mut data = frame.to_csv()?;

    if key.ends_with(".gz") {
        let compress_err = |source: std::io::Error| EtlError::Compress {
            file: key.to_string(),
            source,
        };
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).map_err(compress_err)?;
        data = encoder.finish().map_err(compress_err)?;
    }

    let stored = store.put(bucket, key, data).await?;
    info!(bucket, key, rows = frame.len(), bytes = stored.size, "Exported table");
    Ok(stored)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::warehouse::memory::MemoryWarehouse;
    use crate::warehouse::{DataFrame, WarehouseError};
    use flate2::read::GzDecoder;
    use std::io::Read;

    async fn seeded() -> (MemoryWarehouse, TableRef) {
        let warehouse = MemoryWarehouse::new();
        let table = TableRef::new("mart", "account");
        let mut frame = DataFrame::new(vec!["id".into(), "name".into()]);
        frame.push_row(vec![Some("1".into()), Some("Ann".into())]).unwrap();
        frame.push_row(vec![Some("2".into()), None]).unwrap();
        warehouse.insert_table(&table, frame).await;
        (warehouse, table)
    }

    #[tokio::test]
    async fn test_export_plain_csv() {
        let (warehouse, table) = seeded().await;
        let store = MemoryStore::new();

        let stored = export_table(&warehouse, &store, &table, "exports", "account.csv")
            .await
            .unwrap();
        let body = store.get("exports", "account.csv").await.unwrap();
        assert_eq!(body, b"id,name\n1,Ann\n2,\n".to_vec());
        assert_eq!(stored.size, body.len() as u64);
    }

    #[tokio::test]
    async fn test_export_gz_key_is_compressed() {
        let (warehouse, table) = seeded().await;
        let store = MemoryStore::new();

        export_table(&warehouse, &store, &table, "exports", "daily/account.csv.gz")
            .await
            .unwrap();
        let body = store.get("exports", "daily/account.csv.gz").await.unwrap();
        let mut text = String::new();
        GzDecoder::new(body.as_slice()).read_to_string(&mut text).unwrap();
        assert_eq!(text, "id,name\n1,Ann\n2,\n");
    }

    #[tokio::test]
    async fn test_export_missing_table_writes_nothing() {
        let (warehouse, _) = seeded().await;
        let store = MemoryStore::new();

        let err = export_table(&warehouse, &store, &TableRef::new("mart", "nope"), "exports", "nope.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Warehouse(WarehouseError::TableNotFound(_))));
        assert_eq!(store.object_count().await, 0);
    }
}
