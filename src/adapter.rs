use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use reqwest::header::HeaderValue;
use reqwest::{Client as ReqwestClient, Method};
use serde::de::DeserializeOwned;
use sonic_rs::from_slice;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::ClientConfig;
use super::payload::PostData;

pub type RestBytes = Bytes;
pub type RestFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
pub type RestResult<T> = Result<T, RestError>;

pub const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
pub const REQUESTED_WITH: &str = "XMLHttpRequest";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestErrorKind {
    InvalidUrl,
    Connect,
    Send,
    Receive,
    Timeout,
    Rejected,
    Parse,
    Internal,
}

#[derive(Clone, Debug, Error)]
#[error("rest error {kind:?} status={status:?} {message}")]
pub struct RestError {
    pub kind: RestErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl RestError {
    pub fn new(kind: RestErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::InvalidUrl, None, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Connect, None, message)
    }

    pub fn send(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Send, None, message)
    }

    pub fn receive(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Receive, None, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Timeout, None, message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Rejected, Some(status), message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Parse, None, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::Internal, None, message)
    }

    /// Classify a reqwest failure; `fallback` is used when it was neither a
    /// timeout nor a connect failure.
    fn from_reqwest(fallback: RestErrorKind, err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            RestErrorKind::Timeout
        } else if err.is_connect() {
            RestErrorKind::Connect
        } else {
            fallback
        };
        Self::new(kind, err.status().map(|s| s.as_u16()), err.to_string())
    }

    pub fn kind(&self) -> RestErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

impl From<sonic_rs::Error> for RestError {
    fn from(err: sonic_rs::Error) -> Self {
        Self::parse(err.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct RestRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, RestBytes)>,
    pub body: Option<RestBytes>,
    pub timeout: Option<Duration>,
}

impl RestRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RestBytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<RestBytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the body from `data`, along with its content type. A content type
    /// already set on the request is kept.
    pub fn with_data(mut self, data: impl Into<PostData>) -> Self {
        let data = data.into();
        if let Some(content_type) = data.content_type() {
            if !self.has_header("content-type") {
                self = self.with_header("content-type", content_type);
            }
        }
        self.body = data.encode();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.header(key).is_some()
    }

    pub fn header(&self, key: &str) -> Option<&[u8]> {
        find_header(&self.headers, key)
    }
}

fn find_header<'a>(headers: &'a [(String, RestBytes)], key: &str) -> Option<&'a [u8]> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value.as_ref())
}

/// Which kind of success a response represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuccessStatus {
    Success,
    NoContent,
    NotModified,
}

impl SuccessStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoContent => "nocontent",
            Self::NotModified => "notmodified",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RestResponse {
    pub status: u16,
    pub headers: Vec<(String, RestBytes)>,
    pub body: RestBytes,
    pub elapsed: Duration,
}

impl RestResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.success_status().is_some()
    }

    /// 2xx and 304 succeed; 204 and 304 carry no data.
    pub fn success_status(&self) -> Option<SuccessStatus> {
        match self.status {
            204 => Some(SuccessStatus::NoContent),
            304 => Some(SuccessStatus::NotModified),
            200..=299 => Some(SuccessStatus::Success),
            _ => None,
        }
    }

    pub fn header(&self, key: &str) -> Option<&[u8]> {
        find_header(&self.headers, key)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> RestResult<T> {
        from_slice(&self.body).map_err(RestError::from)
    }
}

/// Parsed result of a successful JSON post.
#[derive(Clone, Debug)]
pub struct JsonReply<T> {
    pub data: T,
    pub status: SuccessStatus,
    pub response: RestResponse,
}

pub trait RestTransport: Send + Sync {
    fn execute(&self, request: RestRequest) -> RestFuture<RestResult<RestResponse>>;
}

pub type SharedRestTransport = dyn RestTransport + Send + Sync;

#[derive(Clone)]
pub struct Client {
    transport: Arc<SharedRestTransport>,
    config: Arc<ClientConfig>,
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_transport_and_config(ReqwestTransport::new(), config)
    }

    pub fn with_transport<T>(transport: T) -> Self
    where
        T: RestTransport + 'static,
    {
        Self::with_transport_and_config(transport, ClientConfig::default())
    }

    pub fn with_transport_and_config<T>(transport: T, config: ClientConfig) -> Self
    where
        T: RestTransport + 'static,
    {
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn prepare(&self, mut request: RestRequest) -> RestResult<RestRequest> {
        request.url = self.config.resolve_url(&request.url)?;

        if let Some(user_agent) = &self.config.user_agent {
            if !request.has_header("user-agent") {
                request = request.with_header("user-agent", user_agent.clone());
            }
        }
        for (key, value) in &self.config.default_headers {
            if !request.has_header(key) {
                request = request.with_header(key.clone(), value.clone());
            }
        }
        if request.timeout.is_none() {
            request.timeout = self.config.timeout;
        }
        Ok(request)
    }

    pub async fn execute(&self, request: RestRequest) -> RestResult<RestResponse> {
        let request = self.prepare(request)?;
        let method = request.method.clone();
        let url = request.url.clone();
        debug!(%method, %url, "dispatching request");

        let response = self.transport.execute(request).await?;
        debug!(
            %method,
            %url,
            status = response.status,
            elapsed_ms = response.elapsed.as_millis() as u64,
            "received response"
        );
        Ok(response)
    }

    /// POST `data` to `url` and return the raw response, whatever its status.
    pub async fn post(
        &self,
        url: impl Into<String>,
        data: impl Into<PostData>,
    ) -> RestResult<RestResponse> {
        self.execute(RestRequest::post(url).with_data(data)).await
    }

    /// POST `data` to `url`, expecting JSON back.
    ///
    /// Non-success statuses surface as [`RestErrorKind::Rejected`] and bodies
    /// that do not parse as `T` as [`RestErrorKind::Parse`]. For 204 and 304
    /// the body is ignored and `T` is read from JSON `null`.
    pub async fn post_json_reply<T>(
        &self,
        url: impl Into<String>,
        data: impl Into<PostData>,
    ) -> RestResult<JsonReply<T>>
    where
        T: DeserializeOwned,
    {
        let mut request = RestRequest::post(url)
            .with_data(data)
            .with_header("accept", ACCEPT_JSON);
        if self.config.requested_with {
            request = request.with_header("x-requested-with", REQUESTED_WITH);
        }

        let response = self.execute(request).await?;
        let Some(status) = response.success_status() else {
            warn!(status = response.status, "json post rejected");
            return Err(RestError::rejected(response.status, response.text()));
        };

        let parsed = match status {
            SuccessStatus::Success => response.json::<T>(),
            SuccessStatus::NoContent | SuccessStatus::NotModified => {
                from_slice(b"null").map_err(RestError::from)
            }
        };
        let data = match parsed {
            Ok(data) => data,
            Err(err) => {
                warn!(status = response.status, error = %err, "json post returned unparsable body");
                return Err(err);
            }
        };

        Ok(JsonReply {
            data,
            status,
            response,
        })
    }

    /// POST `data` to `url` and pass the parsed JSON response to `callback`.
    ///
    /// The callback runs only on success. The completed response is returned
    /// afterwards.
    pub async fn post_json<T, F>(
        &self,
        url: impl Into<String>,
        data: impl Into<PostData>,
        callback: F,
    ) -> RestResult<RestResponse>
    where
        T: DeserializeOwned,
        F: FnOnce(T),
    {
        let reply = self.post_json_reply::<T>(url, data).await?;
        callback(reply.data);
        Ok(reply.response)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: ReqwestClient::new(),
        }
    }

    pub fn with_client(client: ReqwestClient) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RestTransport for ReqwestTransport {
    fn execute(&self, request: RestRequest) -> RestFuture<RestResult<RestResponse>> {
        let client = self.client.clone();
        Box::pin(async move {
            let start = Instant::now();
            let mut req = client.request(request.method.clone(), &request.url);

            for (key, value) in request.headers {
                let value = HeaderValue::from_bytes(value.as_ref())
                    .map_err(|err| RestError::internal(format!("header {key}: {err}")))?;
                req = req.header(key, value);
            }

            if let Some(body) = request.body {
                req = req.body(body);
            }

            if let Some(timeout) = request.timeout {
                req = req.timeout(timeout);
            }

            let resp = req
                .send()
                .await
                .map_err(|err| RestError::from_reqwest(RestErrorKind::Send, err))?;

            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(name, value)| (name.to_string(), Bytes::copy_from_slice(value.as_ref())))
                .collect();
            let body = resp
                .bytes()
                .await
                .map_err(|err| RestError::from_reqwest(RestErrorKind::Receive, err))?;
            let elapsed = start.elapsed();

            Ok(RestResponse {
                status,
                headers,
                body,
                elapsed,
            })
        })
    }
}
