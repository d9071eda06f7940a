mod common;

use common::{feed_body, feed_fields, write_file, MemoryStore};
use gdelt_ingest::loader::ChunkedLoader;
use gdelt_ingest::schema::{Row, TableSchema, EVENTS_SCHEMA, GKG_SCHEMA, MENTIONS_SCHEMA};
use gdelt_ingest::store::RecordStore;
use gdelt_ingest::watermark::{resolve_watermark, SENTINEL_WATERMARK};
use gdelt_ingest::RecordType;
use tokio_util::sync::CancellationToken;

fn rows(schema: &TableSchema, keys: &[i64], ts: &str) -> Vec<Row> {
    keys.iter()
        .map(|&key| {
            let values = feed_fields(schema, key, ts)
                .into_iter()
                .map(Some)
                .collect();
            Row::new(schema, values).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_empty_store_yields_sentinel() {
    let store = MemoryStore::shared();
    assert_eq!(resolve_watermark(store.as_ref()).await, SENTINEL_WATERMARK);
    assert_eq!(SENTINEL_WATERMARK, "19700101000000");
}

#[tokio::test]
async fn test_greatest_value_across_tables_wins() {
    let store = MemoryStore::shared();
    store
        .insert_batch(&EVENTS_SCHEMA, &rows(&EVENTS_SCHEMA, &[1], "20240101000000"))
        .await
        .unwrap();
    store
        .insert_batch(&MENTIONS_SCHEMA, &rows(&MENTIONS_SCHEMA, &[1], "20240301120000"))
        .await
        .unwrap();
    store
        .insert_batch(&GKG_SCHEMA, &rows(&GKG_SCHEMA, &[1], "20240201000000"))
        .await
        .unwrap();

    assert_eq!(resolve_watermark(store.as_ref()).await, "20240301120000");
}

#[tokio::test]
async fn test_failing_table_is_ignored() {
    let store = MemoryStore::shared();
    store
        .insert_batch(&EVENTS_SCHEMA, &rows(&EVENTS_SCHEMA, &[1], "20240101000000"))
        .await
        .unwrap();
    store
        .insert_batch(&GKG_SCHEMA, &rows(&GKG_SCHEMA, &[1], "20250101000000"))
        .await
        .unwrap();
    store.fail_watermark_for("gkg");

    assert_eq!(resolve_watermark(store.as_ref()).await, "20240101000000");
}

#[tokio::test]
async fn test_all_tables_failing_yields_sentinel() {
    let store = MemoryStore::shared();
    for record_type in RecordType::ALL {
        store.fail_watermark_for(record_type.table_name());
    }
    assert_eq!(resolve_watermark(store.as_ref()).await, SENTINEL_WATERMARK);
}

#[tokio::test]
async fn test_watermark_never_decreases_after_loads() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::shared();
    let loader = ChunkedLoader::new(store.clone(), 10);

    let mut previous = resolve_watermark(store.as_ref()).await;
    for (i, ts) in ["20240101000000", "20240101001500", "20231231000000"]
        .into_iter()
        .enumerate()
    {
        let path = dir.path().join(format!("{}.export.CSV", ts));
        let keys = (i as i64 * 10)..(i as i64 * 10 + 3);
        write_file(&path, feed_body(&EVENTS_SCHEMA, keys, ts).as_bytes());
        let report = loader
            .load(&path, RecordType::Event, &CancellationToken::new())
            .await;
        assert!(report.is_loaded());

        let current = resolve_watermark(store.as_ref()).await;
        assert!(current >= previous, "{} < {}", current, previous);
        previous = current;
    }

    assert_eq!(previous, "20240101001500");
}
