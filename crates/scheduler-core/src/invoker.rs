//! Issues one HTTP call with a deadline over a shared pooled transport. Never
//! retries — the retry loop lives one layer up, in the execution driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::{Method, Url};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::HttpConfig;
use crate::error::InvokerError;
use crate::models::HttpMethod;

/// One HTTP call to make.
#[derive(Debug, Clone)]
pub struct InvokerRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// Any response actually received, regardless of status code: non-2xx/3xx
/// responses are not errors at this layer, only at the caller's discretion.
#[derive(Debug, Clone)]
pub struct InvokerResponse {
    pub status_code: u16,
    pub body: Option<String>,
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Single process-wide instance. Reuses one `reqwest::Client` for connection
/// pooling/keep-alive and bounds concurrent in-flight requests per target
/// host with a semaphore, since `reqwest` itself only caps idle connections,
/// not total open sockets.
pub struct HttpInvoker {
    client: reqwest::Client,
    host_gates: DashMap<String, Arc<Semaphore>>,
    max_sockets_per_host: usize,
}

impl HttpInvoker {
    pub fn new(config: &HttpConfig) -> Result<Self, InvokerError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .map_err(|e| InvokerError::RequestInvalid(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            host_gates: DashMap::new(),
            max_sockets_per_host: config.max_sockets_per_host,
        })
    }

    fn gate_for(&self, host: &str) -> Arc<Semaphore> {
        self.host_gates
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_sockets_per_host)))
            .clone()
    }

    /// Issue one HTTP call with `request.timeout` as the deadline. Never
    /// retries; the retry loop lives in the Execution Driver.
    pub async fn invoke(&self, request: &InvokerRequest) -> Result<InvokerResponse, InvokerError> {
        let parsed = Url::parse(&request.url)
            .map_err(|e| InvokerError::RequestInvalid(format!("invalid target URL: {}", e)))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let gate = self.gate_for(&host);
        let _permit = gate
            .acquire_owned()
            .await
            .map_err(|e| InvokerError::RequestInvalid(format!("host gate closed: {}", e)))?;

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        let has_content_type = request.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !has_content_type {
            builder = builder.header("Content-Type", "application/json");
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InvokerError::Timeout
            } else if e.is_builder() || e.is_request() {
                InvokerError::RequestInvalid(e.to_string())
            } else {
                InvokerError::NoResponse
            }
        })?;

        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) if text.is_empty() => None,
            Ok(text) => Some(text),
            Err(e) => {
                debug!(error = %e, "failed to read response body, treating as empty");
                None
            }
        };

        Ok(InvokerResponse { status_code, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn invoker() -> HttpInvoker {
        HttpInvoker::new(&HttpConfig::default()).unwrap()
    }

    fn request_to(url: String) -> InvokerRequest {
        InvokerRequest {
            method: HttpMethod::Post,
            url,
            headers: HashMap::new(),
            query: HashMap::new(),
            body: Some("{}".to_string()),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_response_for_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let response = invoker().invoke(&request_to(format!("{}/hook", server.uri()))).await.unwrap();
        assert_eq!(response.status_code, 404);
        assert_eq!(response.body.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn times_out_past_the_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let mut request = request_to(format!("{}/slow", server.uri()));
        request.timeout = Duration::from_millis(50);

        let err = invoker().invoke(&request).await.unwrap_err();
        assert!(matches!(err, InvokerError::Timeout));
    }

    #[tokio::test]
    async fn rejects_malformed_url() {
        let err = invoker().invoke(&request_to("not-a-url".to_string())).await.unwrap_err();
        assert!(matches!(err, InvokerError::RequestInvalid(_)));
    }
}
