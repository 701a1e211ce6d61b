use crate::errors::{AppError, AppResult};
use crate::redaction::Redactor;
use crate::session::SessionManager;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: Url,
    session: SessionManager,
    redactor: Redactor,
}

impl ApiGateway {
    pub fn new(base_url: Url, session: SessionManager) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, session)
    }

    pub fn with_client(http: reqwest::Client, base_url: Url, session: SessionManager) -> Self {
        Self {
            http,
            base_url,
            session,
            redactor: Redactor::new(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.request(Method::GET, path, None, HeaderMap::new()).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> AppResult<T> {
        self.request(Method::POST, path, body, HeaderMap::new()).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> AppResult<T> {
        self.request(Method::PATCH, path, body, HeaderMap::new()).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> AppResult<T> {
        self.request(Method::DELETE, path, None, HeaderMap::new()).await
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: HeaderMap,
    ) -> AppResult<T> {
        let url = self.resolve(path)?;
        let token = self.session.token().await.map_err(|error| {
            AppError::Api(format!("Credential unavailable: {}", error.message()))
        })?;
        let headers = merge_headers(&method, headers, token.as_deref())?;

        tracing::debug!(method = %method, url = %url, authenticated = token.is_some(), "api request");

        let mut request = self.http.request(method.clone(), url.clone()).headers(headers);
        if let Some(body) = body {
            let encoded = serde_json::to_vec(&body)
                .map_err(|error| AppError::Api(format!("Failed to encode request body: {}", error)))?;
            request = request.body(encoded);
        }

        let response = request.send().await.map_err(|error| {
            tracing::warn!(method = %method, url = %url, error = %error, "api request failed to send");
            AppError::Api(format!("Network error: {}", error))
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|error| {
            AppError::Api(format!("Failed to read response body: {}", error))
        })?;

        if !status.is_success() {
            let message = error_message(status, &bytes);
            tracing::warn!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                body = %self.redactor.redact(&String::from_utf8_lossy(&bytes)).content,
                "api request rejected"
            );
            return Err(AppError::Api(message));
        }

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn resolve(&self, path: &str) -> AppResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|error| AppError::Api(format!("Invalid request path '{}': {}", path, error)))
    }
}

fn merge_headers(method: &Method, extra: HeaderMap, token: Option<&str>) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if *method != Method::GET {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    for (name, value) in extra.iter() {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| AppError::Api("Token contains invalid header characters".to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "API request failed: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown Status")
            )
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{error_message, merge_headers, ApiGateway};
    use crate::errors::{AppError, AppResult};
    use crate::session::{SessionManager, StaticTokenSource, TokenSource};
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    use reqwest::{Method, StatusCode};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use url::Url;

    /// Serves exactly one canned HTTP response and hands back the raw request.
    pub(crate) async fn serve_once(status_line: &str, body: &str) -> (Url, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let (sender, receiver) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let read = socket.read(&mut chunk).await.expect("read");
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..read]);
                if request_complete(&raw) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.expect("write");
            socket.shutdown().await.ok();
            let _ = sender.send(String::from_utf8_lossy(&raw).to_string());
        });

        let url = Url::parse(&format!("http://{}", addr)).expect("url");
        (url, receiver)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        raw.len() >= head_end + 4 + content_length
    }

    async fn signed_in(token: &str) -> SessionManager {
        let sessions = SessionManager::new();
        sessions
            .sign_in("u1", Arc::new(StaticTokenSource::new(token)))
            .await;
        sessions
    }

    #[test]
    fn get_requests_skip_content_type_but_keep_caller_headers() {
        let mut extra = HeaderMap::new();
        extra.insert("x-request-id", HeaderValue::from_static("abc"));
        let headers = merge_headers(&Method::GET, extra, Some("tok")).expect("headers");
        assert!(headers.get(CONTENT_TYPE).is_none());
        assert_eq!(headers.get("x-request-id").expect("custom"), "abc");
        assert_eq!(headers.get(AUTHORIZATION).expect("auth"), "Bearer tok");

        let anonymous = merge_headers(&Method::POST, HeaderMap::new(), None).expect("headers");
        assert_eq!(anonymous.get(CONTENT_TYPE).expect("json"), "application/json");
        assert!(anonymous.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn error_message_prefers_structured_body() {
        let message = error_message(
            StatusCode::FORBIDDEN,
            br#"{"success":false,"message":"Only owners can delete a workspace"}"#,
        );
        assert_eq!(message, "Only owners can delete a workspace");

        let message = error_message(StatusCode::BAD_GATEWAY, b"<html>upstream down</html>");
        assert_eq!(message, "API request failed: 502 Bad Gateway");
    }

    #[tokio::test]
    async fn post_sends_bearer_and_json_body() {
        let (url, request) =
            serve_once("201 Created", r#"{"success":true,"data":{"ok":true}}"#).await;
        let gateway = ApiGateway::new(url, signed_in("secret-token").await);

        let body: serde_json::Value = gateway
            .post("/api/v1/workspaces", Some(serde_json::json!({ "name": "Research" })))
            .await
            .expect("post");
        assert_eq!(body["data"]["ok"], true);

        let raw = request.await.expect("captured request");
        assert!(raw.starts_with("POST /api/v1/workspaces HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret-token"));
        assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"name":"Research"}"#));
    }

    #[tokio::test]
    async fn rejected_request_surfaces_server_message() {
        let (url, _request) = serve_once(
            "404 Not Found",
            r#"{"success":false,"message":"Workspace not found"}"#,
        )
        .await;
        let gateway = ApiGateway::new(url, SessionManager::new());

        let result: Result<serde_json::Value, _> = gateway.get("/api/v1/workspaces/w9").await;
        match result {
            Err(AppError::Api(message)) => assert_eq!(message, "Workspace not found"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    struct LockedKeyring;

    #[async_trait::async_trait]
    impl TokenSource for LockedKeyring {
        async fn fresh_token(&self) -> AppResult<String> {
            Err(AppError::Credential("No stored credential for u1".to_string()))
        }
    }

    #[tokio::test]
    async fn missing_credential_is_an_api_failure_before_any_request() {
        let sessions = SessionManager::new();
        sessions.sign_in("u1", Arc::new(LockedKeyring)).await;
        let gateway = ApiGateway::new(Url::parse("http://127.0.0.1:9/").expect("url"), sessions);

        let result: Result<serde_json::Value, _> = gateway.get("/api/v1/users/me/workspaces").await;
        match result {
            Err(AppError::Api(message)) => {
                assert_eq!(message, "Credential unavailable: No stored credential for u1")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_an_api_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let gateway = ApiGateway::new(
            Url::parse(&format!("http://{}", addr)).expect("url"),
            SessionManager::new(),
        );
        let result: Result<serde_json::Value, _> = gateway.get("/api/v1/users/me/workspaces").await;
        assert!(matches!(result, Err(AppError::Api(_))));
    }
}
