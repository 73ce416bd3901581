use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use super::resolver::{IdResolver, ResolveCache};
use crate::errors::{KgError, Result};
use crate::reference::EXACT;
use crate::types::{IdMatch, IdRequest, MatchMap};

/// Context tag for a remote match whose canonical id differs from the input.
pub const NORMALIZED: &str = "normalized";

const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Client for a node-normalization service.
///
/// Ids are sent in chunks of `batch_size`. A failed request fails the whole
/// resolve call; nothing is retried.
pub struct RemoteResolver {
    name: String,
    base_url: String,
    batch_size: usize,
    conflate: bool,
    agent: ureq::Agent,
    cache: ResolveCache,
}

impl RemoteResolver {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, batch_size: usize) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .build()
            .into();
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            batch_size: batch_size.max(1),
            conflate: false,
            agent,
            cache: ResolveCache::new(),
        }
    }

    pub fn with_conflate(mut self, conflate: bool) -> Self {
        self.conflate = conflate;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/get_normalized_nodes", self.base_url)
    }

    fn failure(&self, message: String) -> KgError {
        KgError::ResolutionFailure {
            resolver: self.name.clone(),
            message,
        }
    }

    fn fetch(&self, ids: &[String]) -> Result<Value> {
        let body = request_body(ids, self.conflate);
        let url = self.endpoint();
        let mut response = self
            .agent
            .post(url.as_str())
            .send_json(&body)
            .map_err(|e| self.failure(format!("request to {url} failed: {e}")))?;
        response
            .body_mut()
            .read_json::<Value>()
            .map_err(|e| self.failure(format!("invalid response body: {e}")))
    }
}

/// Builds the JSON body for one normalization request.
pub fn request_body(ids: &[String], conflate: bool) -> Value {
    json!({
        "curies": ids,
        "conflate": conflate,
        "description": false,
        "drug_chemical_conflate": false,
    })
}

/// Maps a normalization response back onto the requested ids.
///
/// A `null` or absent entry means no match.
pub fn parse_response(ids: &[String], body: &Value) -> std::result::Result<MatchMap, String> {
    let entries = body
        .as_object()
        .ok_or_else(|| "response is not a JSON object".to_string())?;

    let mut result = MatchMap::new();
    for id in ids {
        let matches = match entries.get(id) {
            None | Some(Value::Null) => Vec::new(),
            Some(entry) => {
                let canonical = entry
                    .pointer("/id/identifier")
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("entry for '{id}' has no canonical identifier"))?;
                let equivalents: Vec<String> = entry
                    .get("equivalent_identifiers")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|item| item.get("identifier").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                let context = if canonical == id { EXACT } else { NORMALIZED };
                vec![IdMatch::new(id.clone(), canonical, context).with_equivalents(equivalents)]
            }
        };
        result.insert(id.clone(), matches);
    }
    Ok(result)
}

impl IdResolver for RemoteResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_uncached(&mut self, requests: &[IdRequest]) -> Result<MatchMap> {
        let ids: Vec<String> = requests.iter().map(|r| r.id.clone()).collect();
        let mut result = MatchMap::new();
        for chunk in ids.chunks(self.batch_size) {
            debug!(resolver = %self.name, ids = chunk.len(), "normalization request");
            let body = self.fetch(chunk)?;
            let parsed = parse_response(chunk, &body).map_err(|e| self.failure(e))?;
            result.extend(parsed);
        }
        Ok(result)
    }

    fn cache(&self) -> &ResolveCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut ResolveCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let resolver = RemoteResolver::new("nn", "http://localhost:8080/", 10);
        assert_eq!(resolver.endpoint(), "http://localhost:8080/get_normalized_nodes");
    }

    #[test]
    fn test_request_body_shape() {
        let body = request_body(&["MESH:D1".to_string()], true);
        assert_eq!(body["curies"][0], "MESH:D1");
        assert_eq!(body["conflate"], true);
        assert_eq!(body["description"], false);
        assert_eq!(body["drug_chemical_conflate"], false);
    }
}
