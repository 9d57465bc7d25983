//! Command-line and environment configuration for the `scrape-mcp` binary

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use clap::{ArgAction, Parser};
use scrape_mcp_gateway::ServerConfig;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid bind address {host}:{port}: {reason}")]
    InvalidBindAddress {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid scraping API URL '{url}': {source}")]
    InvalidApiUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "scrape-mcp", author, version, about = "Multi-version MCP gateway for web scraping tools", long_about = None)]
pub struct GatewayConfig {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Idle keep-alive connections are closed after this many milliseconds; 0 closes them after each response
    #[arg(long, env = "KEEP_ALIVE_TIMEOUT", default_value_t = 65_000)]
    pub keep_alive_timeout_ms: u64,

    /// Time allowed to receive request headers, in milliseconds
    #[arg(long, env = "HEADERS_TIMEOUT", default_value_t = 66_000)]
    pub headers_timeout_ms: u64,

    /// Bound on producing a response head, in milliseconds; 0 disables it
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 0)]
    pub request_timeout_ms: u64,

    /// Idle Streamable-HTTP sessions are closed after this many seconds; 0 disables expiry
    #[arg(long, env = "SESSION_IDLE_TIMEOUT", default_value_t = 1800)]
    pub session_idle_timeout_secs: u64,

    /// Base URL of the scraping service
    #[arg(long, env = "SCRAPE_API_URL", default_value = "https://api.firecrawl.dev")]
    pub api_url: String,

    /// Attach permissive CORS headers
    #[arg(long, env = "ENABLE_CORS", default_value_t = true, action = ArgAction::Set)]
    pub cors: bool,

    /// Maximum request body size in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl GatewayConfig {
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBindAddress {
            host: self.host.clone(),
            port: self.port,
            reason,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("no addresses resolved".to_string()))
    }

    /// Scraping service base URL without a trailing slash
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        Url::parse(self.api_url.trim_end_matches('/')).map_err(|source| {
            ConfigError::InvalidApiUrl {
                url: self.api_url.clone(),
                source,
            }
        })
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        Ok(ServerConfig {
            bind_address: self.bind_address()?,
            enable_cors: self.cors,
            max_body_size: self.max_body_bytes,
            keep_alive_timeout: non_zero_millis(self.keep_alive_timeout_ms),
            headers_timeout: Duration::from_millis(self.headers_timeout_ms),
            request_timeout: non_zero_millis(self.request_timeout_ms),
            session_idle_timeout: (self.session_idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.session_idle_timeout_secs)),
            ..ServerConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GatewayConfig {
        let mut argv = vec!["scrape-mcp"];
        argv.extend_from_slice(args);
        GatewayConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_explicit_flags() {
        let config = parse(&[
            "--host",
            "127.0.0.1",
            "--port",
            "8080",
            "--keep-alive-timeout-ms",
            "0",
            "--request-timeout-ms",
            "2500",
            "--session-idle-timeout-secs",
            "0",
            "--cors",
            "false",
            "--max-body-bytes",
            "1024",
        ]);

        let server = config.server_config().unwrap();
        assert_eq!(server.bind_address, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(server.keep_alive_timeout, None);
        assert_eq!(server.request_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(server.session_idle_timeout, None);
        assert!(!server.enable_cors);
        assert_eq!(server.max_body_size, 1024);
    }

    #[test]
    fn test_timeouts_map_to_durations() {
        let config = parse(&[
            "--keep-alive-timeout-ms",
            "65000",
            "--headers-timeout-ms",
            "66000",
            "--session-idle-timeout-secs",
            "1800",
        ]);
        let server = config.server_config().unwrap();
        assert_eq!(server.keep_alive_timeout, Some(Duration::from_millis(65_000)));
        assert_eq!(server.headers_timeout, Duration::from_millis(66_000));
        assert_eq!(server.session_idle_timeout, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_api_url_trailing_slash() {
        let config = parse(&["--api-url", "http://localhost:3002/"]);
        assert_eq!(config.api_url().unwrap().as_str(), "http://localhost:3002/");

        let config = parse(&["--api-url", "not a url"]);
        assert!(matches!(config.api_url(), Err(ConfigError::InvalidApiUrl { .. })));
    }

    #[test]
    fn test_bad_host() {
        let config = parse(&["--host", "no such host!"]);
        assert!(matches!(
            config.bind_address(),
            Err(ConfigError::InvalidBindAddress { .. })
        ));
    }
}
