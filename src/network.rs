//! Network abstraction for testability.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::http::{Request, Response};

/// Abstraction over the platform `fetch`.
///
/// `Err` means the fetch itself failed (offline, DNS, reset). An HTTP error
/// status is a successful fetch and comes back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request and snapshots the full response.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Creates a network with a default client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let reply = builder
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = reply.status();
        let headers = reply
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = reply
            .bytes()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// A network that is always unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        Err(Error::Network(format!("offline: {}", request.url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    #[tokio::test]
    async fn offline_network_always_fails() {
        let request = Request::get(Url::parse("https://a.test/x").unwrap());
        let err = OfflineNetwork.fetch(&request).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn http_network_uses_the_given_client() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_lowercase();
            assert!(head.contains("user-agent: lawnsync-test"), "{head}");
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\nx-cache-test: yes\r\nconnection: close\r\n\r\nhello")
                .await
                .unwrap();
        });

        let client = reqwest::Client::builder()
            .user_agent("lawnsync-test")
            .build()
            .unwrap();
        let network = HttpNetwork::with_client(client);
        let url = Url::parse(&format!("http://{addr}/manifest.json")).unwrap();
        let response = network.fetch(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.header("x-cache-test"), Some("yes"));
        assert_eq!(response.text_body(), "hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let network = HttpNetwork::with_client(reqwest::Client::new());
        let url = Url::parse(&format!("http://{addr}/")).unwrap();
        let err = network.fetch(&Request::get(url)).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn http_network_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpNetwork>();
        assert_send_sync::<OfflineNetwork>();
    }
}
