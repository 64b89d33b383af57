//! HTTP transport types shared by the pipeline, the mock router and the
//! transport implementations.
//!
//! # Design
//! Requests and responses are plain data. `ApiClient::prepare` produces an
//! `HttpRequest`, a `Transport` (or the mock router) turns it into an
//! `HttpResponse`, and `ApiClient::finalize` interprets the result. Keeping
//! the values owned (`String`, `Vec`) lets them move freely across await
//! points and threads.

use std::fmt;

/// HTTP method for a request. The console only ever issues reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the caller wants the response body treated.
///
/// `Binary` responses skip envelope parsing entirely and are handed back to
/// the caller as the raw `HttpResponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Json,
    Binary,
}

/// Per-call overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Whether this call participates in the global loading indicator.
    pub loading: bool,
    pub response_type: ResponseType,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            loading: true,
            response_type: ResponseType::Json,
        }
    }
}

impl CallOptions {
    /// Options for a call that must not show the global indicator.
    pub fn silent() -> Self {
        Self {
            loading: false,
            ..Self::default()
        }
    }

    pub fn binary() -> Self {
        Self {
            response_type: ResponseType::Binary,
            ..Self::default()
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Base address chosen by the pipeline (real or mock backend).
    pub base_url: String,
    /// Application path as the caller wrote it, e.g. `/auth/login`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Serialized JSON body for `POST`.
    pub body: Option<String>,
    pub response_type: ResponseType,
}

impl HttpRequest {
    /// Absolute URL without the query string.
    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, self.path)
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A `200 OK` JSON response, used when the mock router answers a call.
    pub fn json(body: String) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into_bytes(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
