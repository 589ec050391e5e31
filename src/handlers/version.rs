//! Server version from `buildInfo`

use bson::doc;
use serde_json::Value;

use crate::metrics::Params;
use crate::target::TargetSession;
use crate::types::{ProbeError, Result};

pub async fn version(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let reply = session
        .database("admin")
        .run_command(doc! { "buildInfo": 1 })
        .await?;

    let version = reply
        .get_str("version")
        .map_err(|_| ProbeError::CannotParseResult("version not found in buildInfo".into()))?;

    Ok(Value::String(version.to_string()))
}
