//! Blocking `Transport` over ureq.

use std::time::Duration;

use splist_core::{ApiError, HttpMethod, HttpRequest, HttpResponse, Transport};
use ureq::{Agent, RequestBuilder};

const TIMEOUT: Duration = Duration::from_secs(60);

pub struct UreqTransport {
    agent: Agent,
}

impl UreqTransport {
    /// Non-2xx statuses come back as data; the core interprets them.
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(TIMEOUT))
            .build()
            .new_agent();
        Self { agent }
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let url = request.url.as_str();
        let body = request.body.as_deref();
        let result = match request.method {
            HttpMethod::Get => with_headers(self.agent.get(url), request).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url), request).call(),
            HttpMethod::Post => {
                let builder = with_headers(self.agent.post(url), request);
                match body {
                    Some(body) => builder.send(body),
                    None => builder.send_empty(),
                }
            }
            HttpMethod::Patch => {
                let builder = with_headers(self.agent.patch(url), request);
                match body {
                    Some(body) => builder.send(body),
                    None => builder.send_empty(),
                }
            }
        };
        let mut response = result.map_err(|e| ApiError::Transport(format!("{} {url}: {e}", request.method)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(format!("reading body of {url}: {e}")))?;
        Ok(HttpResponse { status, headers, body })
    }
}
