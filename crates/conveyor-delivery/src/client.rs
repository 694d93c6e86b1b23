//! HTTP client for callback delivery with fixed identity headers.
//!
//! Every outbound request carries the dispatcher's identity headers and a
//! `Content-Type: application/json`; bodies are passed through bytes-exact.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::error::{DeliveryError, Result};

/// Identity header naming the calling service.
pub const CLIENT_HEADER: &str = "vinehoo-client";
/// Identity header carrying the service version.
pub const CLIENT_VERSION_HEADER: &str = "vinehoo-client-version";

/// Fixed value sent in [`CLIENT_HEADER`].
pub const CLIENT_NAME: &str = "conveyor";
/// Fixed value sent in [`CLIENT_VERSION_HEADER`].
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect/read/write timeout applied to every callback exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Response from a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct CallbackResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// HTTP client for one-shot callback POSTs and probes.
///
/// Connection pooling comes from the underlying `reqwest::Client`; the wrapper
/// is cheap to clone and shared across workers and retry tasks.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
}

impl CallbackClient {
    /// Creates the client with the fixed timeouts and identity headers.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the underlying client cannot
    /// be built.
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_HEADER, HeaderValue::from_static(CLIENT_NAME));
        headers.insert(CLIENT_VERSION_HEADER, HeaderValue::from_static(CLIENT_VERSION));

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| DeliveryError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// POSTs a payload bytes-exact to the given URL.
    ///
    /// Any HTTP response, regardless of status, is a successful exchange; the
    /// caller classifies it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Timeout` or `DeliveryError::Network` for
    /// transport failures.
    pub async fn post(&self, url: &str, body: Bytes) -> Result<CallbackResponse> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_transport_error)?;

        Ok(CallbackResponse { status, body })
    }

    /// POSTs a JSON value; used by the alert webhook.
    ///
    /// # Errors
    ///
    /// Returns a transport error as in [`CallbackClient::post`].
    pub async fn post_json(&self, url: &str, value: &serde_json::Value) -> Result<CallbackResponse> {
        let response =
            self.client.post(url).json(value).send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_transport_error)?;

        Ok(CallbackResponse { status, body })
    }

    /// Issues a one-shot GET, for outbound integrations that probe rather
    /// than deliver.
    ///
    /// # Errors
    ///
    /// Returns a transport error as in [`CallbackClient::post`].
    pub async fn get(&self, url: &str) -> Result<CallbackResponse> {
        let response = self.client.get(url).send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_transport_error)?;

        Ok(CallbackResponse { status, body })
    }
}

fn map_transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::timeout(REQUEST_TIMEOUT.as_secs())
    } else if err.is_connect() {
        DeliveryError::network(format!("connection failed: {err}"))
    } else {
        DeliveryError::network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn post_carries_identity_headers_and_exact_body() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header(CLIENT_HEADER, CLIENT_NAME))
            .and(matchers::header_exists(CLIENT_VERSION_HEADER))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::body_string("{\"n\":1}"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let client = CallbackClient::new().unwrap();
        let response =
            client.post(&format!("{}/hook", server.uri()), Bytes::from("{\"n\":1}")).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, "ok");
    }

    #[tokio::test]
    async fn non_200_response_is_not_an_error() {
        let server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = CallbackClient::new().unwrap();
        let response = client.post(&server.uri(), Bytes::from("{}")).await.unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(response.body, "boom");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_network_error() {
        let client = CallbackClient::new().unwrap();
        // Reserved port with nothing listening.
        let err = client.post("http://127.0.0.1:1/hook", Bytes::from("{}")).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Network { .. } | DeliveryError::Timeout { .. }));
    }
}
