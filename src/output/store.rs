use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{KgError, Result};

/// Executes Cypher statements against a graph database.
pub trait GraphStore {
    /// Runs one statement and returns its result rows, each a JSON array of
    /// column values.
    fn execute(&mut self, statement: &str, parameters: Value) -> Result<Vec<Value>>;
}

const REQUEST_TIMEOUT_SECS: u64 = 600;

/// Neo4j over the HTTP transactional endpoint. Every statement is sent in
/// its own auto-committed transaction.
pub struct Neo4jHttpStore {
    endpoint: String,
    authorization: Option<String>,
    agent: ureq::Agent,
}

impl Neo4jHttpStore {
    pub fn new(url: &str, database: &str, user: Option<&str>, password: Option<&str>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .build()
            .into();
        Self {
            endpoint: commit_endpoint(url, database),
            authorization: user.map(|u| basic_auth(u, password.unwrap_or_default())),
            agent,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `{url}/db/{database}/tx/commit`
pub fn commit_endpoint(url: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", url.trim_end_matches('/'), database)
}

/// `Basic base64(user:password)`
pub fn basic_auth(user: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {token}")
}

/// Extracts result rows from a transactional endpoint response, turning
/// reported errors into `KgError::Store`.
pub fn parse_commit_response(body: &Value, statement: &str) -> Result<Vec<Value>> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if let Some(first) = errors.first() {
            let code = first.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let message = first.get("message").and_then(Value::as_str).unwrap_or_default();
            return Err(KgError::Store {
                message: format!("{code}: {message}"),
                statement: statement.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    if let Some(data) = body.pointer("/results/0/data").and_then(Value::as_array) {
        for entry in data {
            if let Some(row) = entry.get("row") {
                rows.push(row.clone());
            }
        }
    }
    Ok(rows)
}

impl GraphStore for Neo4jHttpStore {
    fn execute(&mut self, statement: &str, parameters: Value) -> Result<Vec<Value>> {
        debug!(endpoint = %self.endpoint, statement, "executing statement");
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });

        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Accept", "application/json");
        if let Some(auth) = &self.authorization {
            request = request.header("Authorization", auth.as_str());
        }

        let mut response = request.send_json(&body).map_err(|e| KgError::Store {
            message: format!("request to {} failed: {e}", self.endpoint),
            statement: statement.to_string(),
        })?;
        let value: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| KgError::Store {
                message: format!("invalid response body: {e}"),
                statement: statement.to_string(),
            })?;
        parse_commit_response(&value, statement)
    }
}
