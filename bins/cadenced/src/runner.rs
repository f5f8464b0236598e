use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cadence_core::invoker::{RecipientTransport, Reply, TransportError};
use cadence_core::recipient::Recipient;

/// Transport for HTTP recipients.
#[cfg(feature = "runner-http")]
pub fn http_transport(timeout: Duration) -> Result<Arc<dyn RecipientTransport>> {
    Ok(Arc::new(http::HttpTransport::new(timeout)?))
}

/// Without `runner-http` every HTTP recipient fails as unsupported.
#[cfg(not(feature = "runner-http"))]
pub fn http_transport(_timeout: Duration) -> Result<Arc<dyn RecipientTransport>> {
    Ok(Arc::new(Disabled))
}

#[cfg_attr(feature = "runner-http", allow(dead_code))]
struct Disabled;

#[async_trait]
impl RecipientTransport for Disabled {
    async fn deliver(&self, recipient: &Recipient) -> Result<Reply, TransportError> {
        let mut err = TransportError::unsupported(recipient.kind());
        err.message.push_str(" (built without runner-http)");
        Err(err)
    }
}

#[cfg(feature = "runner-http")]
mod http {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use cadence_core::invoker::{RecipientTransport, Reply, TransportError};
    use cadence_core::recipient::{HttpMethod, HttpRecipient, Recipient};
    use cadence_core::retry::FailureKind;
    use reqwest::header::CONTENT_TYPE;
    use reqwest::{Method, Url};
    use tracing::debug;

    /// Response bodies are cut to this many bytes before they are recorded.
    const MAX_MESSAGE: usize = 2048;

    pub struct HttpTransport {
        client: reqwest::Client,
    }

    impl HttpTransport {
        pub fn new(timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("build http client")?;
            Ok(Self { client })
        }
    }

    /// `url` with `query_params` appended to any query it already has.
    pub fn request_url(http: &HttpRecipient) -> Result<Url, String> {
        Url::parse_with_params(&http.url, &http.query_params).map_err(|e| e.to_string())
    }

    fn method(m: HttpMethod) -> Method {
        match m {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
        }
    }

    fn truncate(mut body: String) -> String {
        if body.len() > MAX_MESSAGE {
            let mut end = MAX_MESSAGE;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
            body.push_str("...");
        }
        body
    }

    fn classify(e: reqwest::Error) -> TransportError {
        let kind = if e.is_builder() {
            FailureKind::InvalidRequest
        } else if e.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Transport
        };
        TransportError { kind, message: e.to_string() }
    }

    #[async_trait]
    impl RecipientTransport for HttpTransport {
        async fn deliver(&self, recipient: &Recipient) -> Result<Reply, TransportError> {
            let Recipient::Http(http) = recipient else {
                return Err(TransportError::unsupported(recipient.kind()));
            };
            let url = request_url(http).map_err(|e| TransportError::invalid_request(format!("bad url: {e}")))?;
            debug!("http {} {}", http.method.as_str(), url);

            let mut req = self.client.request(method(http.method), url);
            for h in &http.headers {
                req = req.header(h.name.as_str(), h.value.as_str());
            }
            if let Some(payload) = &http.payload {
                if !http.has_header("content-type") {
                    req = req.header(CONTENT_TYPE, payload.content_type());
                }
                req = req.body(payload.to_bytes());
            }

            let resp = req.send().await.map_err(classify)?;
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Ok(Reply { status, body: truncate(body) })
        }
    }

}
