use std::time::Duration;

use anyhow::{Context, Error};
use reqwest::blocking::Client;
use reqwest::{Proxy, StatusCode};

/// Classified result of a single GET request.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// The server answered 200; the body is the image.
    Downloaded(Vec<u8>),
    /// Any other status. The image is treated as absent upstream.
    Missing(StatusCode),
    /// The request never completed (timeout, refused connection, DNS).
    Failed(reqwest::Error),
}

/// Issues the blocking GET requests for image downloads.
pub(crate) struct RequestSender {
    client: Client,
    base_url: String,
}

impl RequestSender {
    /// Builds the shared HTTP client. The proxy is optional and off by
    /// default; every request carries the configured User-Agent and
    /// timeout.
    pub(crate) fn new(
        base_url: &str,
        user_agent: &str,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self, Error> {
        let mut builder = Client::builder().user_agent(user_agent).timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder
                .proxy(Proxy::all(proxy).with_context(|| format!("invalid proxy URL: {proxy}"))?);
        }
        let client = builder.build().context("failed to build the HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_owned(),
        })
    }

    /// Fetches one image by name and classifies the result.
    ///
    /// A body read error on a 200 counts as a transport failure, since
    /// the image was not fully received.
    pub(crate) fn fetch(&self, name: &str) -> FetchOutcome {
        let url = format!("{}{}", self.base_url, name);
        trace!("GET {url}");

        match self.client.get(&url).send() {
            Ok(response) if response.status() == StatusCode::OK => match response.bytes() {
                Ok(body) => FetchOutcome::Downloaded(body.to_vec()),
                Err(err) => FetchOutcome::Failed(err),
            },
            Ok(response) => FetchOutcome::Missing(response.status()),
            Err(err) => FetchOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    use tokio::runtime::Runtime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender_for(server: &MockServer) -> RequestSender {
        RequestSender::new(
            &format!("{}/", server.uri()),
            "test-agent",
            Duration::from_secs(2),
            None,
        )
        .unwrap()
    }

    #[test]
    fn ok_response_yields_the_body() {
        let rt = Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/a.jpeg"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"imagedata".to_vec()))
                .mount(&server)
                .await;
            server
        });
        let sender = sender_for(&server);

        match sender.fetch("a.jpeg") {
            FetchOutcome::Downloaded(body) => assert_eq!(body, b"imagedata"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        drop(server);
    }

    #[test]
    fn not_found_is_classified_as_missing() {
        let rt = Runtime::new().unwrap();
        // No mocks mounted, so the server answers 404 to everything.
        let server = rt.block_on(MockServer::start());
        let sender = sender_for(&server);

        match sender.fetch("a.jpeg") {
            FetchOutcome::Missing(status) => assert_eq!(status, StatusCode::NOT_FOUND),
            other => panic!("unexpected outcome: {other:?}"),
        }
        drop(server);
    }

    #[test]
    fn refused_connection_is_a_transport_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let sender = RequestSender::new(
            &format!("http://127.0.0.1:{port}/"),
            "test-agent",
            Duration::from_secs(2),
            None,
        )
        .unwrap();

        assert!(matches!(sender.fetch("a.jpeg"), FetchOutcome::Failed(_)));
    }

    #[test]
    fn bad_proxy_url_is_rejected() {
        let result = RequestSender::new(
            "http://example.com/",
            "test-agent",
            Duration::from_secs(2),
            Some("not a proxy"),
        );

        assert!(result.is_err());
    }
}
