//! QUIC relay link using quinn.
//!
//! The relay presents a freshly generated self-signed certificate and
//! participants only check handshake signatures against it. A
//! [`QuicRelayLink`] carries relay frames over a single connection through a
//! [`ChannelManager`].

use crate::channel::{ChannelManager, Frame, FrameSink, RelayLink};
use anyhow::{Context, Result};
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{ClientConfig, Endpoint, ServerConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// ALPN identifier for the relay protocol.
pub const ALPN: &[u8] = b"relaysync";

/// Name the relay certificate is issued for.
const RELAY_SERVER_NAME: &str = "relaysync.local";

/// QUIC keep-alive interval.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Idle time after which a silent connection is dropped.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

fn crypto_provider() -> Arc<CryptoProvider> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    // Fails when another endpoint already installed it.
    let _ = CryptoProvider::install_default((*provider).clone());
    provider
}

fn transport_config() -> Result<Arc<quinn::TransportConfig>> {
    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    transport.max_idle_timeout(Some(
        IDLE_TIMEOUT
            .try_into()
            .context("Idle timeout out of range")?,
    ));
    Ok(Arc::new(transport))
}

fn relay_server_config() -> Result<ServerConfig> {
    let provider = crypto_provider();
    let issued = rcgen::generate_simple_self_signed(vec![RELAY_SERVER_NAME.to_string()])
        .context("Failed to generate relay certificate")?;
    let key = PrivateKeyDer::Pkcs8(issued.key_pair.serialize_der().into());
    let cert = CertificateDer::from(issued.cert);

    let mut tls = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("Relay TLS versions unsupported")?
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .context("Invalid relay certificate")?;
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic = QuicServerConfig::try_from(tls).context("Relay TLS config is not QUIC-capable")?;
    let mut config = ServerConfig::with_crypto(Arc::new(quic));
    config.transport_config(transport_config()?);
    Ok(config)
}

fn participant_client_config() -> Result<ClientConfig> {
    let provider = crypto_provider();
    let mut tls = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .context("Participant TLS versions unsupported")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SelfSignedRelay { provider }))
        .with_no_client_auth();
    tls.alpn_protocols = vec![ALPN.to_vec()];

    let quic =
        QuicClientConfig::try_from(tls).context("Participant TLS config is not QUIC-capable")?;
    let mut config = ClientConfig::new(Arc::new(quic));
    config.transport_config(transport_config()?);
    Ok(config)
}

/// Accepts whatever certificate the relay presents but still verifies the
/// handshake signatures against it.
#[derive(Debug)]
struct SelfSignedRelay {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SelfSignedRelay {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Relay-side endpoint accepting participant connections.
pub struct ServerEndpoint {
    endpoint: Endpoint,
    addr: SocketAddr,
}

impl ServerEndpoint {
    /// Bind a relay endpoint to `addr` with a fresh self-signed certificate.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let endpoint = Endpoint::server(relay_server_config()?, addr)
            .with_context(|| format!("Failed to bind relay endpoint on {}", addr))?;
        let addr = endpoint.local_addr()?;
        info!("Relay endpoint bound to {}", addr);
        Ok(Self { endpoint, addr })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next incoming connection, or `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"relay shutting down");
    }
}

/// Participant-side endpoint on an ephemeral local port.
pub struct ClientEndpoint {
    endpoint: Endpoint,
}

impl ClientEndpoint {
    /// Bind an ephemeral endpoint that trusts self-signed relays.
    pub fn new() -> Result<Self> {
        let mut endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))
            .context("Failed to bind participant endpoint")?;
        endpoint.set_default_client_config(participant_client_config()?);
        debug!("Participant endpoint on {}", endpoint.local_addr()?);
        Ok(Self { endpoint })
    }

    /// Open a connection to the relay at `relay_addr`.
    pub async fn connect(&self, relay_addr: SocketAddr) -> Result<quinn::Connection> {
        info!("Connecting to relay at {}", relay_addr);
        let connection = self
            .endpoint
            .connect(relay_addr, RELAY_SERVER_NAME)
            .context("Failed to start relay handshake")?
            .await
            .with_context(|| format!("Relay at {} refused the handshake", relay_addr))?;
        info!("Connected to relay at {}", relay_addr);
        Ok(connection)
    }

    /// Close the endpoint and its connections.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"participant leaving");
    }
}

/// [`RelayLink`] over a QUIC connection to a relay server.
pub struct QuicRelayLink {
    endpoint: ClientEndpoint,
    channels: ChannelManager,
}

impl QuicRelayLink {
    /// Connect to `relay_addr` and start delivering inbound frames to `sink`.
    pub async fn connect(relay_addr: SocketAddr, sink: Arc<dyn FrameSink>) -> Result<Self> {
        let endpoint = ClientEndpoint::new()?;
        let connection = endpoint.connect(relay_addr).await?;
        let channels = ChannelManager::new(connection);
        channels.spawn_receivers(sink);
        Ok(Self { endpoint, channels })
    }

    /// Relay address this link talks to.
    pub fn relay_addr(&self) -> SocketAddr {
        self.channels.remote_address()
    }
}

impl RelayLink for QuicRelayLink {
    fn send(&self, frame: Frame) -> Result<()> {
        self.channels.send(&frame)
    }

    fn close(&self) {
        self.channels.close("participant closing");
        self.endpoint.close();
    }

    fn is_open(&self) -> bool {
        self.channels.is_open()
    }
}
