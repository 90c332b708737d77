//! Lobby registration and joining over a [`TransportAdapter`].
//!
//! Both calls send one control string and then poll the adapter's state,
//! sleeping in short steps, until the relay answers or the timeout expires.

use crate::adapter::{ConnectionState, TransportAdapter, HOST_DISCONNECTED_REASON};
use crate::relay::ControlMessage;
use relaysync_core::PeerId;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Interval between state polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failure to establish a lobby session.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The relay did not answer in time.
    #[error("timed out after {0:?} waiting for the relay")]
    Timeout(Duration),
    /// The relay refused the request.
    #[error("relay error: {0}")]
    Relay(String),
    /// The lobby host went away.
    #[error("host disconnected")]
    HostDisconnected,
    /// The link closed.
    #[error("connection closed: {0}")]
    Closed(String),
    /// Sending the request failed.
    #[error(transparent)]
    Link(#[from] anyhow::Error),
}

/// Register as a lobby host; returns the lobby code.
pub fn register_host(adapter: &TransportAdapter, timeout: Duration) -> Result<String, ConnectError> {
    adapter.send_control(ControlMessage::HostRegister)?;
    let code = wait_for(adapter, timeout, |state| match state {
        ConnectionState::Registered { lobby } => Some(lobby.clone()),
        _ => None,
    })?;
    info!("Hosting lobby {}", code);
    Ok(code)
}

/// Join the lobby with `code`; returns the relay-assigned peer id.
pub fn join_lobby(
    adapter: &TransportAdapter,
    code: &str,
    timeout: Duration,
) -> Result<PeerId, ConnectError> {
    adapter.send_control(ControlMessage::ClientJoin(code.to_string()))?;
    let peer = wait_for(adapter, timeout, |state| match state {
        ConnectionState::Joined { peer } => Some(*peer),
        _ => None,
    })?;
    info!("Joined lobby {} as {}", code, peer);
    Ok(peer)
}

fn wait_for<T>(
    adapter: &TransportAdapter,
    timeout: Duration,
    ready: impl Fn(&ConnectionState) -> Option<T>,
) -> Result<T, ConnectError> {
    let deadline = Instant::now() + timeout;
    loop {
        let state = adapter.state();
        if let Some(value) = ready(&state) {
            return Ok(value);
        }
        match state {
            ConnectionState::Failed { reason } => return Err(ConnectError::Relay(reason)),
            ConnectionState::Disconnected { reason } if reason == HOST_DISCONNECTED_REASON => {
                return Err(ConnectError::HostDisconnected)
            }
            ConnectionState::Disconnected { reason } => return Err(ConnectError::Closed(reason)),
            _ => {}
        }
        if Instant::now() >= deadline {
            return Err(ConnectError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterSink;
    use crate::channel::{Frame, RelayLink};
    use crate::codec::MessageRegistry;
    use crate::memory::MemoryRelay;
    use crate::pipeline::{PacketPipeline, PipelineConfig};
    use std::sync::Arc;

    fn pipeline() -> PacketPipeline {
        PacketPipeline::new(PipelineConfig::default(), Arc::new(MessageRegistry::catalog()))
    }

    fn adapter(relay: &MemoryRelay, pipeline: &PacketPipeline) -> TransportAdapter {
        let sink = AdapterSink::new(pipeline.ingress());
        let link = relay.connect(sink.clone());
        TransportAdapter::new(sink, Box::new(link))
    }

    /// A link to nowhere: sends succeed, nothing ever answers.
    struct SilentLink;

    impl RelayLink for SilentLink {
        fn send(&self, _frame: Frame) -> anyhow::Result<()> {
            Ok(())
        }

        fn close(&self) {}

        fn is_open(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_register_then_join() {
        let relay = MemoryRelay::new();
        let (host_pipeline, client_pipeline) = (pipeline(), pipeline());
        let host = adapter(&relay, &host_pipeline);
        let client = adapter(&relay, &client_pipeline);

        let code = register_host(&host, Duration::from_secs(1)).unwrap();
        let peer = join_lobby(&client, &code, Duration::from_secs(1)).unwrap();
        assert_eq!(peer, PeerId(1));
    }

    #[test]
    fn test_unknown_lobby_is_relay_error() {
        let relay = MemoryRelay::new();
        let client_pipeline = pipeline();
        let client = adapter(&relay, &client_pipeline);
        let err = join_lobby(&client, "NOPE99", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ConnectError::Relay(_)));
    }

    #[test]
    fn test_silence_times_out() {
        let pipeline = pipeline();
        let sink = AdapterSink::new(pipeline.ingress());
        let adapter = TransportAdapter::new(sink, Box::new(SilentLink));
        let err = register_host(&adapter, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, ConnectError::Timeout(_)));
    }
}
