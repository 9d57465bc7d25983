//! Path routing
//!
//! Every route except `/health` is scoped by its path to one API key and one
//! version.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use serde_json::{Value, json};

use crate::version::ApiVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Sse { api_key: Cow<'a, str>, version: ApiVersion },
    Messages { api_key: Cow<'a, str>, version: ApiVersion },
    Mcp { api_key: Cow<'a, str>, version: ApiVersion },
    NotFound,
}

impl<'a> Route<'a> {
    /// Match a request path. The API key segment is percent-decoded, so
    /// `/a%2Bb/sse` and `/a+b/sse` name the same key.
    pub fn parse(path: &'a str) -> Self {
        let Some(path) = path.strip_prefix('/') else {
            return Route::NotFound;
        };
        let segments: Vec<&str> = path.split('/').collect();

        let (api_key, version, endpoint) = match segments.as_slice() {
            &["health"] => return Route::Health,
            &[api_key, "sse"] => (api_key, ApiVersion::V1, "sse"),
            &[api_key, "v2", "sse"] => (api_key, ApiVersion::V2, "sse"),
            &[api_key, "messages"] => (api_key, ApiVersion::V1, "messages"),
            &[api_key, "v2", "messages"] => (api_key, ApiVersion::V2, "messages"),
            &[api_key, version, "mcp"] => match version.parse() {
                Ok(version) => (api_key, version, "mcp"),
                Err(_) => return Route::NotFound,
            },
            _ => return Route::NotFound,
        };

        // keys that are empty or not UTF-8 once decoded match nothing
        let api_key = match percent_decode_str(api_key).decode_utf8() {
            Ok(api_key) if !api_key.is_empty() => api_key,
            _ => return Route::NotFound,
        };

        match endpoint {
            "sse" => Route::Sse { api_key, version },
            "messages" => Route::Messages { api_key, version },
            _ => Route::Mcp { api_key, version },
        }
    }
}

fn endpoints(version: ApiVersion) -> Value {
    json!({
        "sse": version.sse_path_template(),
        "messages": version.messages_path_template(),
        "mcp": version.mcp_path_template(),
    })
}

/// `GET /health` document
pub fn health_document() -> Value {
    let versions: serde_json::Map<String, Value> = ApiVersion::ALL
        .iter()
        .map(|version| {
            (
                version.as_str().to_string(),
                json!({ "endpoints": endpoints(*version) }),
            )
        })
        .collect();

    json!({
        "status": "ok",
        "versions": versions,
        "endpoints": {
            "health": "/health",
        },
    })
}

/// Body of the 404 response
pub fn not_found_document() -> Value {
    let mut available = vec!["GET /health".to_string()];
    for version in ApiVersion::ALL {
        available.push(format!("GET {}", version.sse_path_template()));
        available.push(format!("POST {}", version.messages_path_template()));
        available.push(format!("ALL {}", version.mcp_path_template()));
    }
    json!({
        "error": "Not found",
        "availableEndpoints": available,
    })
}
