//! HTTP side-channel discovery.
//!
//! Some peer builds require authorization to go through a local HTTP server
//! instead of the pipe. That server listens on one of a small range of ports;
//! it answers `404` on `/`, which is how it is recognised.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// First port of the side-channel range.
pub const DEFAULT_BASE_PORT: u16 = 6463;

/// Number of ports in the side-channel range.
pub const DEFAULT_PORT_SPAN: u16 = 10;

const NOT_FOUND: u16 = 404;

/// Probe target range and per-attempt budget.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub host: IpAddr,
    pub base_port: u16,
    pub span: u16,
    pub attempt_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: DEFAULT_BASE_PORT,
            span: DEFAULT_PORT_SPAN,
            attempt_timeout: Duration::from_millis(500),
        }
    }
}

impl ProbeConfig {
    /// Address probed on attempt `n` (round-robin over the port range).
    pub fn target(&self, attempt: u32) -> SocketAddr {
        let offset = (attempt % u32::from(self.span.max(1))) as u16;
        SocketAddr::new(self.host, self.base_port.saturating_add(offset))
    }
}

/// Minimal HTTP primitive needed by the probe: GET `/`, report the status code.
pub trait HttpProbe: Send + Sync {
    fn status(&self, addr: SocketAddr) -> impl Future<Output = Result<u16>> + Send;
}

/// [`HttpProbe`] over a hyper HTTP/1.1 client connection.
#[derive(Debug, Clone)]
pub struct HyperProbe {
    timeout: Duration,
}

impl HyperProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn get_root(addr: SocketAddr) -> Result<u16> {
        let stream = TcpStream::connect(addr).await?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Http(format!("handshake with {addr}: {e}")))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!(%addr, %err, "probe connection closed with error");
            }
        });

        let request = Request::builder()
            .uri("/")
            .header(hyper::header::HOST, addr.to_string())
            .body(Empty::<Bytes>::new())
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| TransportError::Http(format!("request to {addr}: {e}")))?;

        Ok(response.status().as_u16())
    }
}

impl Default for HyperProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default().attempt_timeout)
    }
}

impl HttpProbe for HyperProbe {
    async fn status(&self, addr: SocketAddr) -> Result<u16> {
        tokio::time::timeout(self.timeout, Self::get_root(addr))
            .await
            .map_err(|_| TransportError::Http(format!("{addr} timed out after {:?}", self.timeout)))?
    }
}

/// Probe the side-channel port range round-robin until a port answers `404`.
///
/// Any other status, refused connection, or timeout moves on to the next port.
/// Fails with [`TransportError::EndpointNotFound`] once `max_attempts` probes
/// have missed.
pub async fn probe_for_alternate_endpoint<P: HttpProbe>(
    probe: &P,
    config: &ProbeConfig,
    max_attempts: u32,
) -> Result<SocketAddr> {
    for attempt in 0..max_attempts {
        let addr = config.target(attempt);
        match probe.status(addr).await {
            Ok(NOT_FOUND) => {
                info!(%addr, attempt, "found alternate endpoint");
                return Ok(addr);
            }
            Ok(status) => debug!(%addr, attempt, status, "probe miss"),
            Err(err) => debug!(%addr, attempt, %err, "probe miss"),
        }
    }

    Err(TransportError::EndpointNotFound {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};

    use super::*;

    /// Scripted responses per port; unknown ports behave as refused.
    struct ScriptedProbe {
        statuses: HashMap<u16, u16>,
        seen: Mutex<Vec<u16>>,
    }

    impl ScriptedProbe {
        fn new(statuses: &[(u16, u16)]) -> Self {
            Self {
                statuses: statuses.iter().copied().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpProbe for ScriptedProbe {
        async fn status(&self, addr: SocketAddr) -> Result<u16> {
            self.seen.lock().unwrap().push(addr.port());
            self.statuses.get(&addr.port()).copied().ok_or_else(|| {
                TransportError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
            })
        }
    }

    #[test]
    fn targets_cycle_over_the_port_range() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.target(0).port(), 6463);
        assert_eq!(cfg.target(9).port(), 6472);
        assert_eq!(cfg.target(10).port(), 6463);
        assert_eq!(cfg.target(23).port(), 6466);
    }

    #[tokio::test]
    async fn first_404_wins() {
        let probe = ScriptedProbe::new(&[(6463, 200), (6465, 404), (6466, 404)]);
        let addr = probe_for_alternate_endpoint(&probe, &ProbeConfig::default(), 30)
            .await
            .unwrap();

        assert_eq!(addr.port(), 6465);
        assert_eq!(*probe.seen.lock().unwrap(), vec![6463, 6464, 6465]);
    }

    #[tokio::test]
    async fn wraps_around_and_then_gives_up() {
        let probe = ScriptedProbe::new(&[(6463, 500)]);
        let err = probe_for_alternate_endpoint(&probe, &ProbeConfig::default(), 12)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::EndpointNotFound { attempts: 12 }));
        let seen = probe.seen.lock().unwrap();
        assert_eq!(seen.len(), 12);
        assert_eq!(&seen[10..], &[6463, 6464]);
    }

    #[tokio::test]
    async fn zero_attempts_is_not_found() {
        let probe = ScriptedProbe::new(&[(6463, 404)]);
        let err = probe_for_alternate_endpoint(&probe, &ProbeConfig::default(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::EndpointNotFound { attempts: 0 }));
    }

    #[tokio::test]
    async fn hyper_probe_reads_status_from_real_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let service = service_fn(|_req| async {
                let mut resp = Response::new(Full::new(Bytes::from_static(b"{}")));
                *resp.status_mut() = StatusCode::NOT_FOUND;
                Ok::<_, std::convert::Infallible>(resp)
            });
            let _ = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await;
        });

        let cfg = ProbeConfig {
            base_port: port,
            ..ProbeConfig::default()
        };
        let addr = probe_for_alternate_endpoint(&HyperProbe::default(), &cfg, 1)
            .await
            .unwrap();
        assert_eq!(addr.port(), port);
    }
}
