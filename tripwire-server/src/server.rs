//! Catch-all HTTP listener

use crate::notifier::RequestDetail;
use crate::AppState;
use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_LENGTH, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};
use tripwire_common::Observation;

/// Largest request body kept for detail notifications
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Characters of body text forwarded to the detail notifier
const MAX_BODY_CHARS: usize = 1024;

/// Wait after an accept error that is not tied to a single connection
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const FORWARDED_FOR: &str = "x-forwarded-for";
const COUNTRY: &str = "cf-ipcountry";
const UNKNOWN_COUNTRY: &str = "??";
const UNKNOWN_AGENT: &str = "unknown";

/// Run the HTTP server
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let config = state.config.read().await;
    let addr: SocketAddr =
        format!("{}:{}", config.server.bind_address, config.server.port).parse()?;
    drop(config);

    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on http://{}", addr);

    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // scans can exhaust descriptors; keep listening once they free up
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(accept_backoff(&e)).await;
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { handle_request(state, req, remote_addr).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection error: {:?}", err);
            }
        });
    }
}

/// Pause before the next accept after a failed one
///
/// Per-connection failures retry at once; anything else (descriptor or
/// memory exhaustion) would fail again immediately, so it waits a little.
fn accept_backoff(err: &std::io::Error) -> Duration {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted => {
            Duration::ZERO
        }
        _ => ACCEPT_BACKOFF,
    }
}

/// Record any request and answer it with an empty 200
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Response<Empty<Bytes>>, Infallible> {
    let started = Instant::now();
    let status = StatusCode::OK;

    let (parts, body) = req.into_parts();
    let obs = observe(&parts.method, &parts.uri, &parts.headers, remote_addr, status);

    let span = info_span!("request", method = %obs.method, path = %obs.path, client = %obs.client_ip);
    async {
        let body = read_body(body).await;

        state.stats.record(&obs).await;

        let config = state.config.read().await;
        if config.server.access_log {
            info!(
                "{} {} {} - {}",
                obs.client_ip,
                obs.method,
                obs.path,
                parts.uri.query().unwrap_or("")
            );
        }
        let webhook = config.notify.webhook_url.clone();
        let timeout = Duration::from_secs(config.notify.timeout_secs);
        drop(config);

        let detail = RequestDetail {
            method: obs.method.clone(),
            url: parts.uri.to_string(),
            client: obs.client_ip.clone(),
            status: status.as_u16(),
            user_agent: obs.user_agent.clone(),
            content_length: header_str(&parts.headers, CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok()),
            headers: parts
                .headers
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect(),
            body,
            process_time: started.elapsed(),
        };
        state.notifier.dispatch(detail, webhook.as_deref(), timeout);
    }
    .instrument(span)
    .await;

    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    Ok(response)
}

/// Extract the aggregated facts of one request
pub fn observe(
    method: &hyper::Method,
    uri: &hyper::Uri,
    headers: &HeaderMap,
    remote_addr: SocketAddr,
    status: StatusCode,
) -> Observation {
    let path = match uri.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };

    let client_ip = header_str(headers, FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| remote_addr.ip().to_string());

    let country = header_str(headers, COUNTRY)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());

    let user_agent = header_str(headers, USER_AGENT.as_str())
        .filter(|ua| !ua.is_empty())
        .unwrap_or(UNKNOWN_AGENT)
        .to_string();

    Observation {
        method: method.as_str().to_string(),
        path,
        client_ip,
        country,
        user_agent,
        status: status.as_u16(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Collect the body up to [`MAX_BODY_BYTES`] as lossy text
async fn read_body(body: Incoming) -> String {
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            String::from_utf8_lossy(&bytes)
                .chars()
                .take(MAX_BODY_CHARS)
                .collect()
        }
        Err(e) => {
            debug!("Request body not captured: {}", e);
            format!("<body not captured: {}>", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use hyper::{Method, Uri};

    fn peer() -> SocketAddr {
        "192.0.2.1:51234".parse().unwrap()
    }

    #[test]
    fn test_accept_errors_do_not_stop_the_listener() {
        use std::io::{Error, ErrorKind};

        let aborted = Error::new(ErrorKind::ConnectionAborted, "peer went away");
        assert_eq!(accept_backoff(&aborted), Duration::ZERO);

        let exhausted = Error::new(ErrorKind::Other, "too many open files");
        assert_eq!(accept_backoff(&exhausted), ACCEPT_BACKOFF);
    }

    #[test]
    fn test_observe_defaults() {
        let uri: Uri = "/admin/config.php?debug=1".parse().unwrap();
        let obs = observe(&Method::GET, &uri, &HeaderMap::new(), peer(), StatusCode::OK);

        assert_eq!(obs.method, "GET");
        assert_eq!(obs.path, "/admin/config.php");
        assert_eq!(obs.client_ip, "192.0.2.1");
        assert_eq!(obs.country, "??");
        assert_eq!(obs.user_agent, "unknown");
        assert_eq!(obs.status, 200);
    }

    #[test]
    fn test_observe_prefers_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"),
        );
        headers.insert(COUNTRY, HeaderValue::from_static("br"));
        headers.insert(USER_AGENT, HeaderValue::from_static("masscan/1.3"));

        let uri: Uri = "http://sensor.example".parse().unwrap();
        let obs = observe(&Method::OPTIONS, &uri, &headers, peer(), StatusCode::OK);

        assert_eq!(obs.path, "/");
        assert_eq!(obs.client_ip, "203.0.113.9");
        assert_eq!(obs.country, "BR");
        assert_eq!(obs.user_agent, "masscan/1.3");
    }

    #[test]
    fn test_observe_ignores_empty_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(""));

        let uri: Uri = "/".parse().unwrap();
        let obs = observe(&Method::POST, &uri, &headers, peer(), StatusCode::OK);
        assert_eq!(obs.client_ip, "192.0.2.1");
    }
}
