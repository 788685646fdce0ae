//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! Requests and responses are plain data. `SiteClient` and `DeviceCodeFlow`
//! build `HttpRequest` values and parse `HttpResponse` values without
//! touching the network. The only place I/O happens is a `Transport`
//! implementation handed in by the host (the CLI uses `ureq`, tests use a
//! scripted fake).

use std::fmt;

use crate::error::ApiError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Methods that change server state and therefore need the request digest.
    pub fn is_mutating(self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes one `HttpRequest`.
///
/// Implementations must return non-2xx responses as `Ok`; only failures
/// to complete the exchange (DNS, refused connection, broken body) become
/// `ApiError::Transport`.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_get_is_non_mutating() {
        assert!(!HttpMethod::Get.is_mutating());
        assert!(HttpMethod::Post.is_mutating());
        assert!(HttpMethod::Patch.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost".to_string(),
            headers: vec![("Authorization".to_string(), "Bearer t".to_string())],
            body: None,
        };
        assert_eq!(req.header("authorization"), Some("Bearer t"));
        assert_eq!(req.header("x-requestdigest"), None);
    }
}
