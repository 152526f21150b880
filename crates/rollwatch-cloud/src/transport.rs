//! JSON 1.1 request/response transport.
//!
//! Both the orchestrator and the event bus speak the same protocol: a
//! `POST /` whose operation is named by the `x-amz-target` header and whose
//! body is a JSON document. Request signing is left to whatever sits at the
//! endpoint (an emulator or a signing proxy), so only plain `http://`
//! endpoints are accepted.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::TransportError;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const USER_AGENT: &str = concat!("rollwatch/", env!("CARGO_PKG_VERSION"));

/// Pooled HTTP/1 client bound to one endpoint.
#[derive(Clone)]
pub struct JsonTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: http::Uri,
}

impl JsonTransport {
    pub fn new(endpoint: &str) -> Result<Self, TransportError> {
        let endpoint: http::Uri = endpoint
            .parse()
            .map_err(|e: http::uri::InvalidUri| TransportError::InvalidEndpoint(e.to_string()))?;
        if endpoint.scheme_str() != Some("http") || endpoint.host().is_none() {
            return Err(TransportError::InvalidEndpoint(format!(
                "{endpoint}: expected http://host[:port]"
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &http::Uri {
        &self.endpoint
    }

    /// Invoke `target` with `request` and decode the JSON response.
    pub async fn call<Req, Resp>(&self, target: &str, request: &Req) -> Result<Resp, TransportError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| TransportError::Encode(e.to_string()))?;

        let req = http::Request::builder()
            .method(http::Method::POST)
            .uri(self.endpoint.clone())
            .header(http::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(http::header::USER_AGENT, USER_AGENT)
            .header("x-amz-target", target)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?
            .to_bytes();

        if !status.is_success() {
            debug!(%status, %target, "endpoint returned non-2xx");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_https_endpoints() {
        let err = JsonTransport::new("https://ecs.eu-west-1.amazonaws.com").err().unwrap();
        assert!(matches!(err, TransportError::InvalidEndpoint(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(JsonTransport::new("not a uri").is_err());
        assert!(JsonTransport::new("/relative").is_err());
    }

    #[tokio::test]
    async fn accepts_plain_http() {
        let transport = JsonTransport::new("http://127.0.0.1:4566").unwrap();
        assert_eq!(transport.endpoint().port_u16(), Some(4566));
    }
}
