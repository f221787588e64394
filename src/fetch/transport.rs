//! One-shot TCP/TLS connections
//!
//! Every fetch dials a fresh connection to an already-resolved IP. Nothing is
//! pooled between tasks. Connect and handshake failures are retried with a
//! growing deadline multiplier up to the configured attempt count.

use crate::config::ScanConfig;
use crate::{FetchError, FetchResult};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

/// A byte stream hyper can drive, plain or TLS
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Dials connections for single requests
pub struct Transport {
    tls: TlsConnector,
    base_timeout: Duration,
    attempts: u32,
    handshake_permits: Option<Arc<Semaphore>>,
}

impl Transport {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            tls: TlsConnector::from(Arc::new(tls_config())),
            base_timeout: config.timeout(),
            attempts: config.retries.max(1),
            handshake_permits: config
                .tls_handshake_limit
                .map(|limit| Arc::new(Semaphore::new(limit))),
        }
    }

    /// Opens a connection to `ip:port`, wrapping it in TLS for `https`
    ///
    /// Each failed attempt raises the deadline multiplier by one. The error of
    /// the last attempt is returned once all attempts are used.
    pub async fn connect(
        &self,
        scheme: &str,
        hostname: &str,
        ip: IpAddr,
        port: u16,
    ) -> FetchResult<BoxedIo> {
        let mut last_error = FetchError::Tcp("no connection attempt made".to_string());
        for multiplier in 1..=self.attempts {
            match self.connect_once(scheme, hostname, ip, port, multiplier).await {
                Ok(io) => return Ok(io),
                Err(e) => {
                    tracing::debug!(
                        "Connect attempt {}/{} to {} ({}) failed: {}",
                        multiplier,
                        self.attempts,
                        hostname,
                        ip,
                        e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Deadline of the `multiplier`-th attempt
    fn deadline(&self, multiplier: u32) -> Duration {
        self.base_timeout * multiplier
    }

    async fn connect_once(
        &self,
        scheme: &str,
        hostname: &str,
        ip: IpAddr,
        port: u16,
        multiplier: u32,
    ) -> FetchResult<BoxedIo> {
        let deadline = self.deadline(multiplier);
        let addr = SocketAddr::new(ip, port);

        let tcp = timeout(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| FetchError::Tcp(format!("connect to {} timed out after {:?}", addr, deadline)))?
            .map_err(|e| FetchError::Tcp(e.to_string()))?;

        if scheme != "https" {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(hostname)
            .map_err(|e| FetchError::Tls(format!("invalid server name {}: {}", hostname, e)))?;

        let _permit = match &self.handshake_permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|e| FetchError::Tls(e.to_string()))?,
            ),
            None => None,
        };

        let tls = timeout(deadline, self.tls.connect(server_name, tcp))
            .await
            .map_err(|_| FetchError::Tls(format!("handshake with {} timed out after {:?}", hostname, deadline)))?
            .map_err(|e| FetchError::Tls(e.to_string()))?;

        Ok(Box::new(tls))
    }
}

fn tls_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth()
}
