use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{JsonRpcVersion, RequestId};

/// Key of the metadata object carried inside an object parameter block
pub const META_KEY: &str = "_meta";

/// Parameters for a JSON-RPC request or notification
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl RequestParams {
    /// Get a named parameter (object params only)
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            RequestParams::Object(map) => map.get(key),
            RequestParams::Array(_) => None,
        }
    }

    /// Read a field of the `_meta` object
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.get(META_KEY)?.get(key)
    }

    /// Set `_meta.<key>` on object params, creating `_meta` when absent.
    ///
    /// Array params carry no named slot; they are left untouched and `false`
    /// is returned.
    pub fn insert_meta(&mut self, key: &str, value: Value) -> bool {
        let RequestParams::Object(map) = self else {
            return false;
        };
        let meta = map
            .entry(META_KEY.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Value::Object(meta) = meta {
            meta.insert(key.to_string(), value);
        }
        true
    }

    /// Convert to a plain JSON value
    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Array(arr) => Value::Array(arr.clone()),
        }
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

impl From<Vec<Value>> for RequestParams {
    fn from(vec: Vec<Value>) -> Self {
        RequestParams::Array(vec)
    }
}

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }

    /// Attach `_meta.<key>` to the parameter block. A request without params
    /// gets an object block holding only `_meta`.
    pub fn inject_meta(&mut self, key: &str, value: Value) {
        self.params
            .get_or_insert_with(|| RequestParams::Object(Map::new()))
            .insert_meta(key, value);
    }
}
