//! `serverStatus` command, record stats suppressed

use bson::doc;
use serde_json::Value;

use crate::handlers::to_json;
use crate::metrics::Params;
use crate::target::TargetSession;
use crate::types::Result;

pub async fn server_status(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! {
            "serverStatus": 1,
            "recordStats": 0,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}
