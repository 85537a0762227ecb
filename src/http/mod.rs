//! HTTP module for the Birii client
//!
//! Request descriptions, response decoding and the pipeline that attaches
//! credentials and runs the refresh-and-retry protocol.

mod pipeline;
mod request;

pub use pipeline::RequestPipeline;
pub use request::{ApiRequest, ApiResponse, FileUpload, FormData, FormPart, RequestBody};

use crate::config::ApiConfig;
use crate::error::ClientError;
use reqwest::{Client, Url};
use tracing::debug;

/// HTTP client shared by the pipeline and the refresher.
pub fn build_client(config: &ApiConfig) -> Result<Client, ClientError> {
    Ok(Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .build()?)
}

/// Parse and validate the configured base URL.
pub fn parse_base_url(base_url: &str) -> Result<Url, ClientError> {
    let url = Url::parse(base_url)?;
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ClientError::Config(format!(
                "unsupported base URL scheme {}",
                scheme
            )))
        }
    }
    if url.host().is_none() {
        return Err(ClientError::Config("base URL has no host".to_string()));
    }
    Ok(url)
}

/// Append `path` to the base URL, keeping any path prefix of the base.
pub fn endpoint_url(base: &Url, path: &str) -> Result<Url, ClientError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let url = Url::parse(&joined)?;
    debug!("endpoint URL: {}", url);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let base = parse_base_url("https://birii.onrender.com").unwrap();
        let url = endpoint_url(&base, "/api/auth/login/").unwrap();
        assert_eq!(url.as_str(), "https://birii.onrender.com/api/auth/login/");

        // A path prefix on the base URL is kept
        let base = parse_base_url("http://localhost:8000/v2/").unwrap();
        let url = endpoint_url(&base, "api/items/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/v2/api/items/");
    }

    #[test]
    fn test_parse_base_url_rejects_bad_input() {
        assert!(matches!(parse_base_url("not a url"), Err(ClientError::Config(_))));
        assert!(matches!(
            parse_base_url("ftp://example.com"),
            Err(ClientError::Config(_))
        ));
    }
}
