//! Blocking HTTP plumbing shared by the network backends.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::AdapterError;

pub(crate) fn agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

/// POST a JSON body and return the decoded reply.
///
/// A 2xx reply that is not JSON decodes as `Value::Null` so that
/// normalization, not the transport, decides what to make of it.
pub(crate) fn send_json<T: Serialize>(
    label: &'static str,
    request: ureq::Request,
    body: &T,
) -> Result<Value, AdapterError> {
    tracing::debug!(backend = label, url = %request.url(), "Sending request");
    read_reply(label, request.send_json(body))
}

/// GET and return the decoded reply.
pub(crate) fn get_json(label: &'static str, request: ureq::Request) -> Result<Value, AdapterError> {
    read_reply(label, request.call())
}

fn read_reply(
    label: &'static str,
    outcome: Result<ureq::Response, ureq::Error>,
) -> Result<Value, AdapterError> {
    match outcome {
        Ok(response) => {
            let text = response.into_string().map_err(|e| AdapterError::Transport {
                adapter: label,
                message: format!("failed to read response: {}", e),
            })?;
            Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
                tracing::warn!(backend = label, "Backend returned a non-JSON body");
                Value::Null
            }))
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            let message = backend_message(&body)
                .unwrap_or_else(|| format!("{} API error: {}", label, status));
            tracing::warn!(backend = label, status, %message, "Backend rejected request");
            Err(AdapterError::Backend {
                adapter: label,
                status,
                message,
            })
        }
        Err(ureq::Error::Transport(transport)) => Err(AdapterError::Transport {
            adapter: label,
            message: transport_message(&transport),
        }),
    }
}

/// Describe a transport failure without the request URL, which may carry
/// credentials in its query string.
fn transport_message(transport: &ureq::Transport) -> String {
    let mut message = transport.kind().to_string();
    if let Some(detail) = transport.message() {
        message.push_str(": ");
        message.push_str(detail);
    }
    if let Some(source) = std::error::Error::source(transport) {
        message.push_str(": ");
        message.push_str(&source.to_string());
    }
    message
}

/// Pull the backend's own error text out of an error body. Handles both
/// `{"error": {"message": ..}}` and `{"error": ".."}`.
fn backend_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// Single-request HTTP stub for exercising backends without a network.
#[cfg(test)]
pub(crate) mod stub {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    pub struct StubServer {
        pub url: String,
        handle: JoinHandle<String>,
    }

    impl StubServer {
        /// Wait for the request and return it (request line, headers and body).
        pub fn request(self) -> String {
            self.handle.join().unwrap()
        }
    }

    /// Accept one connection, answer it with `status` and `body`, then stop.
    pub fn serve_once(status: u16, body: &str) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let body = body.to_string();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());

            let mut request = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                request.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }

            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).unwrap();
            request.push_str(&String::from_utf8_lossy(&payload));

            let reason = if status < 400 { "OK" } else { "Error" };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request
        });

        StubServer { url, handle }
    }

    /// An address nothing listens on.
    pub fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        url
    }
}
