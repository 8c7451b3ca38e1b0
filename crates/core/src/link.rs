//! Server-issued links
//!
//! A link authorizes one specific follow-up request. The core only validates
//! the declared method and consumes the URL; links are produced by the
//! metadata API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, ProtocolViolation, Result};

/// HTTP method a link may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    // Servers are not consistent about case
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "PUT" => Ok(HttpMethod::Put),
            "POST" => Ok(HttpMethod::Post),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(format!("unsupported link method: {s}")),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `{URL, method}` pair returned by the metadata API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLink {
    /// Target URL
    pub href: String,

    /// Method the follow-up request must use
    pub method: HttpMethod,

    /// Whether `href` is a URI template
    #[serde(default)]
    pub templated: bool,
}

impl TransferLink {
    /// Check the declared method before any network I/O happens
    pub fn expect_method(&self, expected: HttpMethod) -> Result<()> {
        if self.method == expected {
            Ok(())
        } else {
            Err(Error::Protocol(ProtocolViolation::WrongMethod {
                expected,
                actual: self.method,
            }))
        }
    }

    /// Parsed target URL
    pub fn url(&self) -> Result<Url> {
        Ok(Url::parse(&self.href)?)
    }

    /// Last non-empty path segment of the URL, e.g. the operation id
    pub fn last_segment(&self) -> Option<String> {
        let url = self.url().ok()?;
        url.path_segments()?
            .filter(|s| !s.is_empty())
            .next_back()
            .map(str::to_string)
    }
}
