use crate::error::{MonitorError, Result};
use std::time::Duration;
use tracing::{debug, info};

const TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Where the billing page comes from.
pub trait PageSource {
    fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches the page with one blocking GET. No retries: the next scheduled run is the retry.
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_proxy(ureq::Proxy::try_from_env())
    }

    fn with_proxy(proxy: Option<ureq::Proxy>) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(TIMEOUT))
            .http_status_as_error(false)
            .proxy(proxy)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSource for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String> {
        info!(url, "fetching billing page");
        let network = |e: ureq::Error| MonitorError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut response = self
            .agent
            .get(url)
            .header("User-Agent", USER_AGENT)
            .call()
            .map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(MonitorError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.body_mut().read_to_string().map_err(network)?;
        debug!(bytes = body.len(), "billing page received");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one canned HTTP response on a local port and return its base URL.
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request: Vec<u8> = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}")
    }

    fn direct() -> HttpFetcher {
        HttpFetcher::with_proxy(None)
    }

    #[test]
    fn success_returns_the_body() {
        let base = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\
             Content-Length: 5\r\nConnection: close\r\n\r\nhello",
        );
        let body = direct().fetch(&format!("{base}/pay.aspx?mid=1")).unwrap();
        assert_eq!(body, "hello");
    }

    #[test]
    fn error_status_is_an_http_error() {
        let base = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let url = format!("{base}/pay.aspx");
        match direct().fetch(&url).unwrap_err() {
            MonitorError::Http { status, url: failed } => {
                assert_eq!(status, 503);
                assert_eq!(failed, url);
            }
            other => panic!("expected HTTP error, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_host_is_a_network_error() {
        // Nothing listens on the local discard port.
        let err = direct().fetch("http://127.0.0.1:9/pay.aspx").unwrap_err();
        assert!(matches!(err, MonitorError::Network { .. }), "got {err:?}");
    }

    #[test]
    fn malformed_url_is_a_network_error() {
        let err = direct().fetch("not a url").unwrap_err();
        assert!(matches!(err, MonitorError::Network { .. }), "got {err:?}");
    }
}
