use std::time::Duration;

use url::Url;

use super::adapter::{RestError, RestResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings shared by every request a [`Client`](crate::Client) sends.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Relative request URLs are joined onto this.
    pub base_url: Option<Url>,
    /// Applied to requests that carry no timeout of their own.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub default_headers: Vec<(String, String)>,
    /// Send `X-Requested-With: XMLHttpRequest` on JSON posts.
    pub requested_with: bool,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: Some(DEFAULT_TIMEOUT),
            user_agent: None,
            default_headers: Vec::new(),
            requested_with: true,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> RestResult<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|err| RestError::invalid_url(format!("base url {base_url:?}: {err}")))?;
        self.base_url = Some(parsed);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Let requests without their own timeout wait indefinitely.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((key.into(), value.into()));
        self
    }

    pub fn without_requested_with(mut self) -> Self {
        self.requested_with = false;
        self
    }

    /// Turn `url` into an absolute URL string.
    pub fn resolve_url(&self, url: &str) -> RestResult<String> {
        match Url::parse(url) {
            Ok(parsed) => Ok(parsed.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => base
                    .join(url)
                    .map(String::from)
                    .map_err(|err| RestError::invalid_url(format!("{url:?}: {err}"))),
                None => Err(RestError::invalid_url(format!(
                    "{url:?}: relative url without a configured base url"
                ))),
            },
            Err(err) => Err(RestError::invalid_url(format!("{url:?}: {err}"))),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
