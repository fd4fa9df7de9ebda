use std::collections::HashMap;
use std::time::Duration;

use axum::Form;
use axum::Json;
use axum::Router;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use postjson::{Client, ClientConfig, PostData, RestErrorKind, RestRequest, SuccessStatus};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::sleep;

#[derive(Debug, Deserialize, Serialize)]
struct Echo {
    fields: HashMap<String, String>,
    accept: String,
    accept_encoding: String,
    requested_with: String,
}

#[tokio::test]
async fn e2e_form_post_roundtrip() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut echo = None;
    let response = client
        .post_json(
            server.url("/echo"),
            PostData::form().field("status", "hello world").field("lang", "中文"),
            |body: Echo| echo = Some(body),
        )
        .await
        .expect("echo response should parse");

    assert_eq!(response.status(), 200);
    let echo = echo.expect("callback should run on success");
    assert_eq!(echo.fields.get("status").map(String::as_str), Some("hello world"));
    assert_eq!(echo.fields.get("lang").map(String::as_str), Some("中文"));
    assert_eq!(echo.accept, postjson::ACCEPT_JSON);
    assert_eq!(echo.requested_with, postjson::REQUESTED_WITH);
    assert!(echo.accept_encoding.contains("gzip"));
}

#[tokio::test]
async fn e2e_gzip_response_is_decoded() {
    let server = TestServer::start().await;
    let client = Client::new();

    let mut result = None;
    let response = client
        .post_json(server.url("/gzip"), (), |body: HashMap<String, String>| {
            result = body.get("result").cloned()
        })
        .await
        .expect("gzip body should be decoded and parsed");

    assert_eq!(response.status(), 200);
    assert_eq!(result.as_deref(), Some("success"));
}

#[tokio::test]
async fn e2e_relative_url_with_base() {
    let server = TestServer::start().await;
    let config = ClientConfig::new()
        .with_base_url(&server.base_url)
        .expect("server url should parse");
    let client = Client::with_config(config);

    let reply = client
        .post_json_reply::<Option<Echo>>("/empty", ())
        .await
        .expect("204 should be a success");

    assert_eq!(reply.status, SuccessStatus::NoContent);
    assert!(reply.data.is_none());
}

#[tokio::test]
async fn e2e_error_status_is_rejected() {
    let server = TestServer::start().await;
    let client = Client::new();
    let mut called = false;

    let err = client
        .post_json(server.url("/signin-required"), (), |_: Echo| called = true)
        .await
        .expect_err("403 should be rejected");

    assert_eq!(err.kind(), RestErrorKind::Rejected);
    assert_eq!(err.status(), Some(403));
    assert!(!called);
}

#[tokio::test]
async fn e2e_request_timeout_triggers() {
    let server = TestServer::start().await;
    let client = Client::new();

    let err = client
        .execute(RestRequest::post(server.url("/slow")).with_timeout(Duration::from_millis(200)))
        .await
        .expect_err("explicit timeout should trigger");

    assert_eq!(err.kind(), RestErrorKind::Timeout);
}

#[tokio::test]
async fn e2e_connection_refused_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = postjson::post_json(format!("http://{addr}/echo"), (), |_: Echo| {})
        .await
        .expect_err("nothing is listening");

    assert_eq!(err.kind(), RestErrorKind::Connect);
}

struct TestServer {
    base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let app = Router::new()
            .route("/echo", post(echo_handler))
            .route("/gzip", post(gzip_handler))
            .route("/empty", post(empty_handler))
            .route("/signin-required", post(forbidden_handler))
            .route("/slow", post(slow_handler));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{}", addr);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base_url, task }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header_text(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn echo_handler(
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Json<Echo> {
    Json(Echo {
        fields,
        accept: header_text(&headers, "accept"),
        accept_encoding: header_text(&headers, "accept-encoding"),
        requested_with: header_text(&headers, "x-requested-with"),
    })
}

async fn empty_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn forbidden_handler() -> (StatusCode, &'static str) {
    (StatusCode::FORBIDDEN, r#"{"error":"failed","redirect":"/signin"}"#)
}

async fn slow_handler() -> (StatusCode, &'static str) {
    sleep(Duration::from_millis(2500)).await;
    (StatusCode::OK, "{}")
}

async fn gzip_handler() -> ([(axum::http::HeaderName, &'static str); 2], Vec<u8>) {
    (
        [(CONTENT_ENCODING, "gzip"), (CONTENT_TYPE, "application/json")],
        gzip_stored(br#"{"result":"success"}"#),
    )
}

/// Gzip member holding `data` in one uncompressed deflate block.
fn gzip_stored(data: &[u8]) -> Vec<u8> {
    let len = u16::try_from(data.len()).expect("payload fits one stored block");
    let mut out = vec![0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];
    out.push(0x01);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&(!len).to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&crc32(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xffff_ffffu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 == 1 {
                (crc >> 1) ^ 0xedb8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}
