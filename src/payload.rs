use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use url::form_urlencoded::Serializer;

use super::adapter::{RestBytes, RestResult};

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Body of a POST request.
///
/// Form pairs are url-encoded, text is sent untouched with the form content
/// type, JSON bodies carry their own content type and multipart bodies are
/// framed with their boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PostData {
    #[default]
    Empty,
    Form(Vec<(String, String)>),
    Text(String),
    Json(RestBytes),
    Multipart {
        boundary: String,
        parts: Vec<Part>,
    },
}

/// One section of a `multipart/form-data` body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: RestBytes,
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into(),
        }
    }

    /// A file section; the content type is guessed from `filename`.
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<RestBytes>,
    ) -> Self {
        let filename = filename.into();
        let content_type = guess_content_type(&filename);
        Self {
            name: name.into(),
            filename: Some(filename),
            content_type: Some(content_type.to_string()),
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

impl PostData {
    pub fn form() -> Self {
        Self::Form(Vec::new())
    }

    /// An empty multipart body with a boundary derived from the clock.
    pub fn multipart() -> Self {
        Self::multipart_with_boundary(clock_boundary())
    }

    pub fn multipart_with_boundary(boundary: impl Into<String>) -> Self {
        Self::Multipart {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Serialize a value as a JSON request body.
    pub fn json<T: Serialize>(value: &T) -> RestResult<Self> {
        let body = sonic_rs::to_vec(value)?;
        Ok(Self::Json(body.into()))
    }

    /// Append a name/value pair. Multipart bodies gain a text part; any other
    /// payload is replaced by a form.
    pub fn field(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match self {
            Self::Multipart { .. } => self.part(Part::text(name, value)),
            Self::Form(mut pairs) => {
                pairs.push((name.into(), value.into()));
                Self::Form(pairs)
            }
            Self::Empty | Self::Text(_) | Self::Json(_) => {
                Self::Form(vec![(name.into(), value.into())])
            }
        }
    }

    /// Append a part, turning any non-multipart payload into a fresh
    /// multipart body. Existing form pairs become text parts.
    pub fn part(self, part: Part) -> Self {
        match self {
            Self::Multipart {
                boundary,
                mut parts,
            } => {
                parts.push(part);
                Self::Multipart { boundary, parts }
            }
            Self::Form(pairs) => {
                let parts = pairs
                    .into_iter()
                    .map(|(name, value)| Part::text(name, value))
                    .chain(std::iter::once(part))
                    .collect();
                Self::Multipart {
                    boundary: clock_boundary(),
                    parts,
                }
            }
            Self::Empty | Self::Text(_) | Self::Json(_) => Self::multipart().part(part),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn content_type(&self) -> Option<String> {
        match self {
            Self::Empty => None,
            Self::Form(_) | Self::Text(_) => Some(FORM_CONTENT_TYPE.to_string()),
            Self::Json(_) => Some(JSON_CONTENT_TYPE.to_string()),
            Self::Multipart { boundary, .. } => {
                Some(format!("multipart/form-data; boundary={boundary}"))
            }
        }
    }

    pub fn encode(self) -> Option<RestBytes> {
        match self {
            Self::Empty => None,
            Self::Form(pairs) => {
                let mut ser = Serializer::new(String::new());
                for (name, value) in &pairs {
                    ser.append_pair(name, value);
                }
                Some(ser.finish().into())
            }
            Self::Text(text) => Some(text.into()),
            Self::Json(body) => Some(body),
            Self::Multipart { boundary, parts } => Some(encode_multipart(&boundary, parts)),
        }
    }
}

fn clock_boundary() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("----------{millis:x}")
}

fn encode_multipart(boundary: &str, parts: Vec<Part>) -> RestBytes {
    let mut buf = BytesMut::new();
    for part in parts {
        buf.put_slice(format!("--{boundary}\r\n").as_bytes());
        match &part.filename {
            Some(filename) => buf.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => buf.put_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = &part.content_type {
            buf.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&part.data);
        buf.put_slice(b"\r\n");
    }
    buf.put_slice(format!("--{boundary}--\r\n").as_bytes());
    buf.freeze()
}

/// Content type for a file name, by extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let Some((_, ext)) = filename.rsplit_once('.') else {
        return OCTET_STREAM;
    };
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        _ => OCTET_STREAM,
    }
}

impl From<()> for PostData {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

impl From<&str> for PostData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for PostData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl<K, V> From<Vec<(K, V)>> for PostData
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for PostData
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for PostData
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Form(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}
