//! Replication window from the oplog
//!
//! Reads the newest and oldest operation timestamps and reports their
//! difference in seconds. Checks `oplog.rs` (replica set members)
//! first, then falls back to `oplog.$main` (master/slave); a collection
//! with no documents leaves the window open at zero.

use std::time::Duration;

use bson::{doc, Bson, Document};
use serde::Serialize;
use serde_json::Value;

use crate::handlers::{to_json, SORT_NATURAL};
use crate::metrics::Params;
use crate::target::{FindSpec, TargetSession};
use crate::types::Result;

const OPLOG_COLLECTIONS: &[&str] = &["oplog.rs", "oplog.$main"];

#[derive(Serialize)]
struct ReplicationWindow {
    /// Seconds between the newest and the oldest oplog entry.
    timediff: i64,
}

pub async fn oplog_stats(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let local = session.database("local");
    let max_time = Duration::from_millis(session.max_time_ms().max(0) as u64);

    let mut newest = 0;
    let mut oldest = 0;

    for name in OPLOG_COLLECTIONS {
        let collection = local.collection(name);
        let filter = doc! { "ts": { "$exists": true } };

        let spec = FindSpec::new(filter.clone())
            .sort(doc! { SORT_NATURAL: -1 })
            .max_time(max_time);
        let Some(first) = collection.find_one(spec).await? else {
            continue;
        };

        let spec = FindSpec::new(filter)
            .sort(doc! { SORT_NATURAL: 1 })
            .max_time(max_time);
        let Some(last) = collection.find_one(spec).await? else {
            continue;
        };

        newest = ts_seconds(&first);
        oldest = ts_seconds(&last);
        break;
    }

    to_json(&ReplicationWindow {
        timediff: newest - oldest,
    })
}

fn ts_seconds(doc: &Document) -> i64 {
    match doc.get("ts") {
        Some(Bson::Timestamp(ts)) => ts.time as i64,
        _ => 0,
    }
}
