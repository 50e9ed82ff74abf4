//! Single configured HTTP client for the n8n public API.

use std::sync::Arc;

use log::debug;
use reqwest::{
    Client, Method, StatusCode,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::config::{ClientConfig, mask_secret};
use crate::error::{Error, Result};

/// Header n8n reads the API key from.
pub const API_KEY_HEADER: &str = "x-n8n-api-key";

const USER_AGENT: &str = concat!("n8n-mcp/", env!("CARGO_PKG_VERSION"));

/// Longest raw body excerpt kept in an error message.
const MAX_ERROR_TEXT: usize = 500;

/// Status, headers and body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    path: String,
}

impl Response {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Maps 404 to [`Error::NotFound`] and any other non-2xx status to
    /// [`Error::Api`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        if self.status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                resource: self.path,
            });
        }

        let body = serde_json::from_slice::<serde_json::Value>(&self.body).ok();
        let message = body
            .as_ref()
            .and_then(|value| value.get("message"))
            .and_then(|message| message.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.text_excerpt());

        Err(Error::Api {
            status: self.status.as_u16(),
            message,
            body,
        })
    }

    /// Deserializes the body, reporting failures as [`Error::InvalidResponse`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::InvalidResponse(format!("failed to parse response from {}: {}", self.path, e))
        })
    }

    fn text_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.is_empty() {
            return self
                .status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string();
        }
        text.chars().take(MAX_ERROR_TEXT).collect()
    }
}

/// HTTP client bound to one n8n instance.
///
/// Every request carries the API key header and is subject to the
/// per-attempt timeout. No retries happen here.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    api_base: String,
    limiter: Arc<Semaphore>,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let mut key_value = HeaderValue::from_str(&config.api_key)
            .map_err(|_| Error::validation("api_key contains characters not allowed in a header"))?;
        key_value.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(
            "Using n8n API key for authentication: {}",
            mask_secret(&config.api_key)
        );

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::validation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests)),
        })
    }

    /// Base URL every request path is appended to.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Performs exactly one request.
    ///
    /// Any status the server answers with is returned as a [`Response`];
    /// only connection failures and timeouts become [`Error::Network`].
    /// Waits for a free request slot first; dropping the future gives the
    /// slot, or the place in line, back.
    #[tracing::instrument(skip(self, query, body))]
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.api_base, path);

        let _permit = self.limiter.acquire().await.map_err(|_| Error::Network {
            message: "request limiter closed".to_string(),
            timed_out: false,
        })?;

        debug!("{} {} {:?}", method, url, query);

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| Error::network(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::network(&e))?
            .to_vec();

        debug!("{} -> {}", url, status);

        Ok(Response {
            status,
            headers,
            body,
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Duration;

    const API_KEY: &str = "test-api-key-123456";

    fn client_for(url: &str) -> HttpClient {
        HttpClient::new(&ClientConfig::new(url, API_KEY)).unwrap()
    }

    #[tokio::test]
    async fn test_send_attaches_api_key_and_prefix() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("GET", "/api/v1/workflows")
            .match_header(API_KEY_HEADER, API_KEY)
            .match_header("accept", "application/json")
            .match_query(Matcher::UrlEncoded("limit".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data": []}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let response = client
            .send(Method::GET, "/workflows", &[("limit", "1".to_string())], None)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::OK);
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_send_posts_json_body() {
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/api/v1/workflows")
            .match_body(Matcher::Json(serde_json::json!({"name": "Daily Report"})))
            .with_status(201)
            .with_body(r#"{"id": "abc123", "name": "Daily Report"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let body = serde_json::json!({"name": "Daily Report"});
        let response = client
            .send(Method::POST, "/workflows", &[], Some(&body))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_error_statuses_are_returned_not_raised() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/api/v1/workflows/missing")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let response = client
            .send(Method::GET, "/workflows/missing", &[], None)
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        let err = response.error_for_status().unwrap_err();
        assert!(matches!(err, Error::NotFound { ref resource } if resource == "/workflows/missing"));
    }

    #[tokio::test]
    async fn test_error_for_status_uses_message_field() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("PATCH", "/api/v1/workflows/1")
            .with_status(400)
            .with_body(r#"{"message": "request/body must have required property 'name'"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .send(Method::PATCH, "/workflows/1", &[], None)
            .await
            .unwrap()
            .error_for_status()
            .unwrap_err();

        match err {
            Error::Api {
                status,
                message,
                body,
            } => {
                assert_eq!(status, 400);
                assert!(message.contains("required property"));
                assert!(body.is_some());
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_for_status_falls_back_to_text() {
        let mut server = mockito::Server::new_async().await;

        let _mock = server
            .mock("GET", "/api/v1/workflows")
            .with_status(502)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .send(Method::GET, "/workflows", &[], None)
            .await
            .unwrap()
            .error_for_status()
            .unwrap_err();

        assert!(matches!(err, Error::Api { status: 502, ref message, body: None } if message == "upstream unavailable"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(&format!("http://{}", addr));
        let err = client
            .send(Method::GET, "/workflows", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { timed_out: false, .. }));
    }

    #[tokio::test]
    async fn test_timeout_applies_per_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = ClientConfig::new(format!("http://{}", addr), API_KEY);
        config.timeout = Duration::from_millis(100);
        let client = HttpClient::new(&config).unwrap();

        let err = client
            .send(Method::GET, "/workflows", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Network { timed_out: true, .. }));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = HttpClient::new(&ClientConfig::new("ftp://example.com", API_KEY));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_json_is_invalid_response() {
        let response = Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: b"not json".to_vec(),
            path: "/workflows".to_string(),
        };
        let result: Result<serde_json::Value> = response.json();
        assert!(matches!(result, Err(Error::InvalidResponse(_))));
    }
}
