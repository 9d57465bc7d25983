//! Scraping tools exposed by each version's MCP server
//!
//! Tool arguments are forwarded to the scraping service as the request body.
//! Service failures become tool results with `isError: true`; only malformed
//! calls (unknown tool, missing required argument) are JSON-RPC errors.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use scrape_mcp_gateway::ApiVersion;

use crate::mcp::McpError;
use crate::scrape_api::{ApiAuth, ScrapeApi, ScrapeError};

/// Content item of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolResult {
    Text { text: String },
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            text: content.into(),
        }
    }
}

/// Result for tools/call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ToolResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    pub fn success(content: Vec<ToolResult>) -> Self {
        Self {
            content,
            is_error: Some(false),
        }
    }

    pub fn error(content: Vec<ToolResult>) -> Self {
        Self {
            content,
            is_error: Some(true),
        }
    }
}

/// Entry of the tools/list result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeTool {
    Scrape,
    Map,
    Search,
    Crawl,
    CheckCrawlStatus,
    Extract,
}

impl ScrapeTool {
    pub const ALL: [ScrapeTool; 6] = [
        ScrapeTool::Scrape,
        ScrapeTool::Map,
        ScrapeTool::Search,
        ScrapeTool::Crawl,
        ScrapeTool::CheckCrawlStatus,
        ScrapeTool::Extract,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScrapeTool::Scrape => "firecrawl_scrape",
            ScrapeTool::Map => "firecrawl_map",
            ScrapeTool::Search => "firecrawl_search",
            ScrapeTool::Crawl => "firecrawl_crawl",
            ScrapeTool::CheckCrawlStatus => "firecrawl_check_crawl_status",
            ScrapeTool::Extract => "firecrawl_extract",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// The argument a call cannot do without
    fn required_argument(&self) -> &'static str {
        match self {
            ScrapeTool::Scrape | ScrapeTool::Map | ScrapeTool::Crawl => "url",
            ScrapeTool::Search => "query",
            ScrapeTool::CheckCrawlStatus => "id",
            ScrapeTool::Extract => "urls",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ScrapeTool::Scrape => {
                "Scrape content from a single URL. Returns markdown by default; \
                 other formats can be requested."
            }
            ScrapeTool::Map => "Discover the URLs of a website starting from one URL.",
            ScrapeTool::Search => "Search the web and optionally scrape the results.",
            ScrapeTool::Crawl => {
                "Start an asynchronous crawl of a website. Returns a job id to poll \
                 with firecrawl_check_crawl_status."
            }
            ScrapeTool::CheckCrawlStatus => "Check the progress and results of a crawl job.",
            ScrapeTool::Extract => {
                "Extract structured data from one or more URLs using a prompt and \
                 an optional JSON schema."
            }
        }
    }

    fn input_schema(&self, version: ApiVersion) -> Value {
        match self {
            ScrapeTool::Scrape => json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to scrape" },
                    "formats": scrape_formats(version),
                    "onlyMainContent": { "type": "boolean" },
                    "includeTags": { "type": "array", "items": { "type": "string" } },
                    "excludeTags": { "type": "array", "items": { "type": "string" } },
                    "waitFor": { "type": "number", "description": "Milliseconds to wait for the page" },
                    "mobile": { "type": "boolean" },
                    "maxAge": { "type": "number", "description": "Accept a cached copy up to this age (ms)" }
                },
                "required": ["url"]
            }),
            ScrapeTool::Map => json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Starting URL" },
                    "search": { "type": "string", "description": "Only return URLs matching this term" },
                    "includeSubdomains": { "type": "boolean" },
                    "limit": { "type": "number" }
                },
                "required": ["url"]
            }),
            ScrapeTool::Search => {
                let mut schema = json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Search query" },
                        "limit": { "type": "number", "default": 5 },
                        "lang": { "type": "string" },
                        "country": { "type": "string" },
                        "scrapeOptions": {
                            "type": "object",
                            "properties": { "formats": scrape_formats(version) }
                        }
                    },
                    "required": ["query"]
                });
                if version == ApiVersion::V2 {
                    schema["properties"]["sources"] = json!({
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string", "enum": ["web", "images", "news"] }
                            },
                            "required": ["type"]
                        }
                    });
                }
                schema
            }
            ScrapeTool::Crawl => json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Starting URL" },
                    "limit": { "type": "number" },
                    "maxDepth": { "type": "number" },
                    "includePaths": { "type": "array", "items": { "type": "string" } },
                    "excludePaths": { "type": "array", "items": { "type": "string" } },
                    "allowExternalLinks": { "type": "boolean" },
                    "scrapeOptions": { "type": "object" }
                },
                "required": ["url"]
            }),
            ScrapeTool::CheckCrawlStatus => json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Crawl job id" }
                },
                "required": ["id"]
            }),
            ScrapeTool::Extract => json!({
                "type": "object",
                "properties": {
                    "urls": { "type": "array", "items": { "type": "string" } },
                    "prompt": { "type": "string" },
                    "schema": { "type": "object" },
                    "allowExternalLinks": { "type": "boolean" },
                    "enableWebSearch": { "type": "boolean" }
                },
                "required": ["urls"]
            }),
        }
    }

    pub fn definition(&self, version: ApiVersion) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(version),
        }
    }
}

fn scrape_formats(version: ApiVersion) -> Value {
    let names = json!([
        "markdown", "html", "rawHtml", "screenshot", "links", "summary"
    ]);
    match version {
        ApiVersion::V1 => json!({
            "type": "array",
            "items": { "type": "string", "enum": names },
            "default": ["markdown"]
        }),
        // v2 formats may also be objects such as {"type": "json", "prompt": ...}
        ApiVersion::V2 => json!({
            "type": "array",
            "items": {
                "oneOf": [
                    { "type": "string", "enum": names },
                    {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string" },
                            "prompt": { "type": "string" },
                            "schema": { "type": "object" }
                        },
                        "required": ["type"]
                    }
                ]
            },
            "default": ["markdown"]
        }),
    }
}

/// tools/list result for `version`
pub fn list_tools(version: ApiVersion) -> Vec<Tool> {
    ScrapeTool::ALL
        .iter()
        .map(|tool| tool.definition(version))
        .collect()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn render(tool: ScrapeTool, arguments: &Map<String, Value>, response: &Value) -> String {
    let data = response.get("data").unwrap_or(response);
    match tool {
        ScrapeTool::Scrape => match data.get("markdown").and_then(Value::as_str) {
            Some(markdown) if data.as_object().is_some_and(|d| d.len() == 1) => {
                markdown.to_string()
            }
            _ => pretty(data),
        },
        ScrapeTool::Crawl => {
            let id = response.get("id").and_then(Value::as_str).unwrap_or("unknown");
            let url = arguments.get("url").and_then(Value::as_str).unwrap_or("");
            format!(
                "Started crawl for {} with job ID: {}. Use firecrawl_check_crawl_status to check progress.",
                url, id
            )
        }
        _ => pretty(data),
    }
}

/// Execute one tools/call
pub async fn call_tool(
    api: &dyn ScrapeApi,
    auth: &ApiAuth,
    name: &str,
    arguments: Map<String, Value>,
) -> Result<CallToolResult, McpError> {
    let tool = ScrapeTool::from_name(name).ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

    let required = tool.required_argument();
    let Some(required_value) = arguments.get(required) else {
        return Err(McpError::MissingParameter(required.to_string()));
    };
    let crawl_id = match tool {
        ScrapeTool::CheckCrawlStatus => match required_value.as_str() {
            Some(id) => Some(id.to_string()),
            None => {
                return Err(McpError::InvalidParameters(
                    "'id' must be a string".to_string(),
                ));
            }
        },
        _ => None,
    };

    debug!("Calling {} against the {} scraping API", name, auth.version);
    let body = Value::Object(arguments.clone());
    let outcome: Result<Value, ScrapeError> = match (tool, crawl_id) {
        (ScrapeTool::Scrape, _) => api.scrape(auth, body).await,
        (ScrapeTool::Map, _) => api.map(auth, body).await,
        (ScrapeTool::Search, _) => api.search(auth, body).await,
        (ScrapeTool::Crawl, _) => api.crawl(auth, body).await,
        (ScrapeTool::CheckCrawlStatus, Some(id)) => api.crawl_status(auth, &id).await,
        (ScrapeTool::CheckCrawlStatus, None) => {
            return Err(McpError::MissingParameter(required.to_string()));
        }
        (ScrapeTool::Extract, _) => api.extract(auth, body).await,
    };

    Ok(match outcome {
        Ok(response) => CallToolResult::success(vec![ToolResult::text(render(
            tool, &arguments, &response,
        ))]),
        Err(err) => {
            warn!("{} failed: {}", name, err);
            CallToolResult::error(vec![ToolResult::text(format!("Error: {}", err))])
        }
    })
}
