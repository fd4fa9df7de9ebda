//! POST a payload, expect JSON back, and hand the parsed value to a callback.
//!
//! A thin layer over reqwest with an in-memory mock transport for fully
//! deterministic tests.

pub mod adapter;
pub mod config;
pub mod mock;
pub mod payload;

use std::sync::LazyLock;

use serde::de::DeserializeOwned;

pub use reqwest::Method;

pub use adapter::{
    ACCEPT_JSON, Client, JsonReply, REQUESTED_WITH, ReqwestTransport, RestBytes, RestError,
    RestErrorKind, RestFuture, RestRequest, RestResponse, RestResult, RestTransport,
    SuccessStatus,
};
pub use config::{ClientConfig, DEFAULT_TIMEOUT};
pub use mock::{
    MockBehavior, MockBehaviorPlan, MockResponse, MockRestAdapter, MockRestStateSnapshot,
    MockTransportState,
};
pub use payload::{
    FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, OCTET_STREAM, Part, PostData, guess_content_type,
};

static DEFAULT_CLIENT: LazyLock<Client> = LazyLock::new(Client::new);

/// The process-wide client behind [`post_json`], sharing one connection pool.
pub fn default_client() -> &'static Client {
    &DEFAULT_CLIENT
}

/// POST `data` to `url` with the shared default [`Client`] and pass the parsed JSON
/// response to `callback` on success.
pub async fn post_json<T, F>(
    url: impl Into<String>,
    data: impl Into<PostData>,
    callback: F,
) -> RestResult<RestResponse>
where
    T: DeserializeOwned,
    F: FnOnce(T),
{
    default_client().post_json(url, data, callback).await
}
