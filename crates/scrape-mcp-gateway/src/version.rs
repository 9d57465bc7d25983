//! Tool/protocol generations served side by side
//!
//! Every inbound path is lexically scoped to exactly one [`ApiVersion`] by its
//! route prefix. The version never changes for the lifetime of a session.

use std::fmt;
use std::str::FromStr;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};

/// Bytes escaped when an API key is written back into a path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One of the two incompatible tool generations served by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// Legacy generation; the only one eligible for SSE fallback resolution
    V1,
    V2,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 2] = [ApiVersion::V1, ApiVersion::V2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1",
            ApiVersion::V2 => "v2",
        }
    }

    /// Path segment inserted before `sse`/`messages`. v1 uses the bare form.
    pub fn sse_prefix(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "",
            ApiVersion::V2 => "/v2",
        }
    }

    /// Reply path advertised to SSE clients in the `endpoint` event. Takes
    /// the decoded key.
    pub fn messages_path(&self, api_key: &str) -> String {
        format!(
            "/{}{}/messages",
            utf8_percent_encode(api_key, PATH_SEGMENT),
            self.sse_prefix()
        )
    }

    pub fn sse_path_template(&self) -> String {
        format!("/{{apiKey}}{}/sse", self.sse_prefix())
    }

    pub fn messages_path_template(&self) -> String {
        format!("/{{apiKey}}{}/messages", self.sse_prefix())
    }

    pub fn mcp_path_template(&self) -> String {
        format!("/{{apiKey}}/{}/mcp", self.as_str())
    }

    /// Whether a missing session id on the SSE message path may be recovered
    /// by scanning the registry
    pub fn allows_sse_fallback(&self) -> bool {
        matches!(self, ApiVersion::V1)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported version segment: {0}")]
pub struct UnknownVersion(pub String);

impl FromStr for ApiVersion {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(ApiVersion::V1),
            "v2" => Ok(ApiVersion::V2),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}
