use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::request::ResponseType;
use crate::util::truncate_body;

/// A fully buffered response exactly as the transport returned it; the first
/// response interceptor receives this value.
#[derive(Clone, Debug)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: String,
    response_type: ResponseType,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            url: String::new(),
            response_type: ResponseType::default(),
        }
    }

    pub(crate) fn with_request_details(mut self, url: String, response_type: ResponseType) -> Self {
        self.url = url;
        self.response_type = response_type;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Final request URL, query included.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
            .map_err(|source| Error::deserialize(source, truncate_body(&self.body)))
    }

    /// Interprets the body according to the request's [`ResponseType`] hint.
    pub fn decode(self) -> Result<DecodedBody> {
        match self.response_type {
            ResponseType::Json => {
                if self.body.is_empty() {
                    return Ok(DecodedBody::Json(serde_json::Value::Null));
                }
                self.json().map(DecodedBody::Json)
            }
            ResponseType::Text => Ok(DecodedBody::Text(self.text_lossy())),
            ResponseType::Bytes => Ok(DecodedBody::Bytes(self.body)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedBody {
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
}

impl DecodedBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8], response_type: ResponseType) -> RawResponse {
        RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(body))
            .with_request_details("http://api.example.com/x".to_owned(), response_type)
    }

    #[test]
    fn decode_follows_response_type_hint() {
        let json = response(br#"{"id":1}"#, ResponseType::Json)
            .decode()
            .expect("json body should decode");
        assert_eq!(json.as_json(), Some(&serde_json::json!({ "id": 1 })));

        let text = response(b"plain", ResponseType::Text)
            .decode()
            .expect("text body should decode");
        assert_eq!(text.as_text(), Some("plain"));

        let bytes = response(b"\x00\x01", ResponseType::Bytes)
            .decode()
            .expect("bytes body should decode");
        assert_eq!(bytes, DecodedBody::Bytes(Bytes::from_static(b"\x00\x01")));
    }

    #[test]
    fn invalid_json_reports_body() {
        let error = response(b"not json", ResponseType::Json)
            .decode()
            .expect_err("invalid json should fail");
        match error {
            Error::Deserialize { body, .. } => assert_eq!(body, "not json"),
            other => panic!("unexpected error variant: {other}"),
        }
    }
}
