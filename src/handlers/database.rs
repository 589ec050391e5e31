//! `dbStats` and database discovery

use bson::doc;
use serde::Serialize;
use serde_json::Value;

use crate::handlers::to_json;
use crate::metrics::{Params, PARAM_DATABASE};
use crate::target::TargetSession;
use crate::types::Result;

#[derive(Serialize)]
struct DatabaseRow<'a> {
    #[serde(rename = "{#DBNAME}")]
    name: &'a str,
}

pub async fn database_stats(session: &dyn TargetSession, params: &Params) -> Result<Value> {
    let database = params.get(PARAM_DATABASE).map(String::as_str).unwrap_or("admin");

    let reply = session
        .database(database)
        .run_command(doc! {
            "dbStats": 1,
            "maxTimeMS": session.max_time_ms(),
        })
        .await?;

    to_json(&reply)
}

pub async fn databases_discovery(session: &dyn TargetSession, _params: &Params) -> Result<Value> {
    let mut names = session.database_names().await?;
    names.sort();

    let rows: Vec<DatabaseRow> = names.iter().map(|name| DatabaseRow { name }).collect();

    to_json(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::mock::MockSession;
    use crate::types::ProbeError;

    fn params(database: &str) -> Params {
        let mut params = Params::new();
        params.insert(PARAM_DATABASE.into(), database.into());
        params
    }

    #[tokio::test]
    async fn stats_run_against_requested_database() {
        let session = MockSession::new().with_command(
            "testdb",
            "dbStats",
            doc! { "db": "testdb", "collections": 3, "ok": 1 },
        );

        let result = database_stats(&session, &params("testdb")).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(result.as_str().unwrap()).unwrap();
        assert_eq!(parsed["db"], "testdb");
        assert_eq!(parsed["collections"], 3);
    }

    #[tokio::test]
    async fn unknown_database_still_answers() {
        // A healthy server answers dbStats for any database name.
        let session = MockSession::new();
        let result = database_stats(&session, &params("not_exists")).await.unwrap();
        assert_eq!(result.as_str().unwrap(), r#"{"ok":1}"#);
    }

    #[tokio::test]
    async fn stats_failure_propagates() {
        let session = MockSession::new().fail_commands("baddb");
        let result = database_stats(&session, &params("baddb")).await;
        assert!(matches!(result, Err(ProbeError::CannotFetchData(_))));
    }

    #[tokio::test]
    async fn discovery_lists_sorted_rows() {
        let session = MockSession::new()
            .with_database("local")
            .with_database("admin")
            .with_database("config");

        let result = databases_discovery(&session, &Params::new()).await.unwrap();
        assert_eq!(
            result.as_str().unwrap(),
            r#"[{"{#DBNAME}":"admin"},{"{#DBNAME}":"config"},{"{#DBNAME}":"local"}]"#
        );
    }

    #[tokio::test]
    async fn discovery_of_no_databases_is_empty_list() {
        let session = MockSession::new();
        let result = databases_discovery(&session, &Params::new()).await.unwrap();
        assert_eq!(result.as_str().unwrap(), "[]");
    }

    #[tokio::test]
    async fn discovery_failure_propagates() {
        let session = MockSession::new().fail_database_names();
        let result = databases_discovery(&session, &Params::new()).await;
        assert!(matches!(result, Err(ProbeError::CannotFetchData(_))));
    }
}
