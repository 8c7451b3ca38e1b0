//! OAuth credentials and the headers they put on every request

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use disk_core::{Error, Result, Transport, TransportRequest, TransportResponse};
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

/// User name and OAuth token for the disk API
///
/// Acquiring the token is up to the caller. Credentials live in memory only
/// and are never written to the configuration file.
#[derive(Clone)]
pub struct Credentials {
    user: String,
    token: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `Authorization` and `User-Agent` headers for every request
    pub fn headers(&self, user_agent: &str) -> Result<HeaderMap> {
        let mut auth = HeaderValue::from_str(&format!("OAuth {}", self.token))
            .map_err(|_| Error::Config("token contains characters not allowed in a header".into()))?;
        auth.set_sensitive(true);

        let agent = HeaderValue::from_str(user_agent)
            .map_err(|_| Error::Config(format!("invalid user agent: {user_agent:?}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(USER_AGENT, agent);
        Ok(headers)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Transport decorator that adds the credential headers to each request
pub struct Authenticated {
    inner: Arc<dyn Transport>,
    headers: HeaderMap,
}

impl Authenticated {
    pub fn new(inner: Arc<dyn Transport>, credentials: &Credentials, user_agent: &str) -> Result<Self> {
        Ok(Self {
            inner,
            headers: credentials.headers(user_agent)?,
        })
    }
}

#[async_trait]
impl Transport for Authenticated {
    async fn execute(&self, mut request: TransportRequest) -> Result<TransportResponse> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        self.inner.execute(request).await
    }
}
