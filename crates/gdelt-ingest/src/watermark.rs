//! Watermark resolution
//!
//! The watermark is never stored. Each run recomputes it as the greatest
//! timestamp present in any destination table.

use crate::record_type::RecordType;
use crate::store::RecordStore;
use tracing::{debug, info, warn};

/// Watermark used when no table holds any data yet
pub const SENTINEL_WATERMARK: &str = "19700101000000";

/// Lexicographically greatest table maximum, or the sentinel
///
/// A failing per-table query is logged and counts as "no data"; it never
/// aborts the run.
pub async fn resolve_watermark<S>(store: &S) -> String
where
    S: RecordStore + ?Sized,
{
    let mut watermark: Option<String> = None;

    for record_type in RecordType::ALL {
        let schema = record_type.schema();
        match store.max_timestamp(schema).await {
            Ok(Some(value)) => {
                debug!(table = schema.name, column = schema.timestamp_column, max = %value, "Table maximum");
                if watermark.as_deref().map_or(true, |current| value.as_str() > current) {
                    watermark = Some(value);
                }
            },
            Ok(None) => debug!(table = schema.name, "Table is empty"),
            Err(e) => warn!(table = schema.name, error = %e, "Watermark query failed, ignoring table"),
        }
    }

    let watermark = watermark.unwrap_or_else(|| SENTINEL_WATERMARK.to_string());
    info!(watermark = %watermark, "Resolved watermark");
    watermark
}
