use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};

use crate::account::Credentials;

const PLEX_TOKEN_HEADER: &str = "X-Plex-Token";
const PLEX_CLIENT_HEADER: &str = "X-Plex-Client-Identifier";
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(900);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Transport-level failures. Each pipeline stage maps these into its own
/// error kind.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code returned.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// Connection, TLS or protocol error.
    #[error("transport error: {0}")]
    Transport(String),
    /// The body ended before the declared length was received.
    #[error("transfer truncated: received {received} of {expected} bytes")]
    Truncated {
        /// Declared content length.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },
    /// The sink cannot hold the body.
    #[error("insufficient space: {0}")]
    InsufficientSpace(String),
    /// Writing the body locally failed.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// Destination for a streamed download.
#[async_trait]
pub trait DownloadSink: Send {
    /// Called once before the first chunk with the declared body length.
    fn begin(&mut self, content_length: Option<u64>) -> Result<(), FetchError>;

    /// Append a chunk of the body.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError>;
}

/// Abstraction over the HTTP operations the updater needs.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Fetch a small document into memory, optionally authenticated with a Plex token.
    async fn fetch_bytes(&self, url: &Url, token: Option<&str>) -> Result<Vec<u8>, FetchError>;

    /// Sign in to plex.tv with basic auth and return the account document.
    async fn sign_in(&self, url: &Url, credentials: &Credentials) -> Result<Vec<u8>, FetchError>;

    /// Stream a large body into `sink`, returning the number of bytes transferred.
    async fn download(&self, url: &Url, sink: &mut dyn DownloadSink) -> Result<u64, FetchError>;
}

/// Builder for [`ReqwestTransport`].
#[derive(Default)]
pub struct ReqwestTransportBuilder {
    client: Option<Client>,
    metadata_timeout: Option<Duration>,
    download_timeout: Option<Duration>,
}

impl ReqwestTransportBuilder {
    /// Timeout applied to release feed requests.
    pub fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    /// Timeout applied to a whole artifact download.
    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<ReqwestTransport, FetchError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .user_agent(concat!("plex-updater/", env!("CARGO_PKG_VERSION")))
                .build()?,
        };

        Ok(ReqwestTransport {
            client,
            metadata_timeout: self.metadata_timeout.unwrap_or(DEFAULT_METADATA_TIMEOUT),
            download_timeout: self.download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
        })
    }
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a new builder.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch_bytes(&self, url: &Url, token: Option<&str>) -> Result<Vec<u8>, FetchError> {
        let mut request = self.client.get(url.clone()).timeout(self.metadata_timeout);
        if let Some(token) = token {
            request = request.header(PLEX_TOKEN_HEADER, token);
        }

        let response = check_status(request.send().await?)?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn sign_in(&self, url: &Url, credentials: &Credentials) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .post(url.clone())
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header(PLEX_CLIENT_HEADER, &credentials.client_identifier)
            .header(reqwest::header::ACCEPT, "application/xml")
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .timeout(self.metadata_timeout)
            .send()
            .await?;
        let response = check_status(response)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn download(&self, url: &Url, sink: &mut dyn DownloadSink) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await?;
        let mut response = check_status(response)?;

        let expected = response.content_length();
        sink.begin(expected)?;

        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_chunk(&chunk).await?;
            received += chunk.len() as u64;
        }

        if let Some(expected) = expected {
            if received != expected {
                return Err(FetchError::Truncated { expected, received });
            }
        }
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct VecSink {
        declared: Option<u64>,
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl DownloadSink for VecSink {
        fn begin(&mut self, content_length: Option<u64>) -> Result<(), FetchError> {
            self.declared = content_length;
            Ok(())
        }

        async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
            self.bytes.extend_from_slice(chunk);
            Ok(())
        }
    }

    fn transport(timeout: Duration) -> ReqwestTransport {
        ReqwestTransport::builder()
            .metadata_timeout(timeout)
            .download_timeout(timeout)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fetch_bytes_sends_plex_token() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/downloads/5.json")
            .match_header("x-plex-token", "secret")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/api/downloads/5.json", server.url())).unwrap();
        let body = transport(Duration::from_secs(5))
            .fetch_bytes(&url, Some("secret"))
            .await
            .unwrap();
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn sign_in_posts_basic_auth_and_client_identifier() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/users/sign_in.xml")
            .match_header("authorization", "Basic ZXJpbjpzZWNyZXQ=")
            .match_header("x-plex-client-identifier", "plex-updater-test")
            .with_status(201)
            .with_body(r#"<user authenticationToken="tok"/>"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/users/sign_in.xml", server.url())).unwrap();
        let credentials = Credentials {
            username: "erin".into(),
            password: "secret".into(),
            client_identifier: "plex-updater-test".into(),
        };
        let body = transport(Duration::from_secs(5))
            .sign_in(&url, &credentials)
            .await
            .unwrap();
        assert_eq!(body, br#"<user authenticationToken="tok"/>"#);
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/feed.json")
            .with_status(503)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/feed.json", server.url())).unwrap();
        let err = transport(Duration::from_secs(5))
            .fetch_bytes(&url, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn download_streams_into_sink() {
        let mut server = mockito::Server::new_async().await;
        let body = vec![7u8; 64 * 1024];
        let _mock = server
            .mock("GET", "/pms.deb")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/pms.deb", server.url())).unwrap();
        let mut sink = VecSink::default();
        let transferred = transport(Duration::from_secs(5))
            .download(&url, &mut sink)
            .await
            .unwrap();

        assert_eq!(transferred, body.len() as u64);
        assert_eq!(sink.declared, Some(body.len() as u64));
        assert_eq!(sink.bytes, body);
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let url = Url::parse("http://127.0.0.1:9/feed.json").unwrap();
        let err = transport(Duration::from_secs(5))
            .fetch_bytes(&url, None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_) | FetchError::Timeout));
    }
}
