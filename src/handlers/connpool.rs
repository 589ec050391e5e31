//! `connPoolStats` command

use bson::doc;
use serde_json::Value;

use crate::handlers::to_json;
use crate::metrics::Params;
use crate::target::TargetSession;
use crate::types::Result;

pub async fn connpool_stats(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! {
            "connPoolStats": 1,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}
