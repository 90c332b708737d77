//! End-to-end relay test over real QUIC connections on localhost.

use relaysync_core::PeerId;
use relaysync_net::{
    classify, ChannelType, ControlMessage, Frame, FrameSink, QuicRelayLink, QuicRelayServer,
    RelayLink,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inbox {
    frames: Mutex<Vec<Frame>>,
}

impl FrameSink for Inbox {
    fn on_frame(&self, frame: Frame) {
        self.frames.lock().unwrap().push(frame);
    }

    fn on_closed(&self, _reason: &str) {}
}

impl Inbox {
    async fn wait_for<T>(&self, mut pick: impl FnMut(&Frame) -> Option<T>) -> T {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(found) = self.frames.lock().unwrap().iter().find_map(&mut pick) {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for frame"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[tokio::test]
async fn test_lobby_traffic_over_quic() {
    let relay = Arc::new(QuicRelayServer::bind("127.0.0.1:0".parse().unwrap(), 3).unwrap());
    let relay_addr = relay.local_addr();
    let server = relay.clone();
    tokio::spawn(async move { server.run().await });

    let host_inbox = Arc::new(Inbox::default());
    let host = QuicRelayLink::connect(relay_addr, host_inbox.clone())
        .await
        .unwrap();
    host.send(ControlMessage::HostRegister.to_frame(PeerId::HOST))
        .unwrap();
    let code = host_inbox
        .wait_for(|f| match classify(&f.payload) {
            Some(ControlMessage::LobbyCreated(code)) => Some(code),
            _ => None,
        })
        .await;

    let client_inbox = Arc::new(Inbox::default());
    let client = QuicRelayLink::connect(relay_addr, client_inbox.clone())
        .await
        .unwrap();
    client
        .send(ControlMessage::ClientJoin(code).to_frame(PeerId::HOST))
        .unwrap();
    let peer = client_inbox
        .wait_for(|f| match classify(&f.payload) {
            Some(ControlMessage::ClientJoined(peer)) => Some(peer),
            _ => None,
        })
        .await;
    assert_eq!(peer, PeerId(1));
    host_inbox
        .wait_for(|f| match classify(&f.payload) {
            Some(ControlMessage::ClientJoined(p)) if p == peer => Some(()),
            _ => None,
        })
        .await;

    // Reliable host -> client, stamped with the host's id.
    host.send(Frame::new(PeerId::BROADCAST, ChannelType::Items, vec![12u8, 1, 2]))
        .unwrap();
    let from = client_inbox
        .wait_for(|f| (f.payload[..] == [12u8, 1, 2]).then_some(f.peer))
        .await;
    assert_eq!(from, PeerId::HOST);

    // Reliable client -> host, stamped with the client's id.
    client
        .send(Frame::new(PeerId::HOST, ChannelType::Items, vec![9u8, 4]))
        .unwrap();
    let from = host_inbox
        .wait_for(|f| (f.payload[..] == [9u8, 4]).then_some(f.peer))
        .await;
    assert_eq!(from, peer);

    client.close();
    host_inbox
        .wait_for(|f| match classify(&f.payload) {
            Some(ControlMessage::ClientLeft(p)) if p == peer => Some(()),
            _ => None,
        })
        .await;

    host.close();
    relay.close();
}
