//! In-process socket double. Stands in for the externally supplied stream in
//! tests and the headless demo: each `connect` yields a [`LoopbackPeer`] the
//! harness drives like a server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::transport::{OutboundFrame, SocketConnector, SocketEvent, SocketSession};

/// The far side of one loopback connection: push socket events in, read the
/// client's outbound frames back out.
pub struct LoopbackPeer {
    pub events: mpsc::UnboundedSender<SocketEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

struct LoopbackInner {
    connect_count: AtomicUsize,
    last_url: std::sync::Mutex<Option<String>>,
    peers_tx: mpsc::UnboundedSender<LoopbackPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<LoopbackPeer>>,
}

#[derive(Clone)]
pub struct LoopbackConnector {
    inner: Arc<LoopbackInner>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LoopbackInner {
                connect_count: AtomicUsize::new(0),
                last_url: std::sync::Mutex::new(None),
                peers_tx,
                peers_rx: Mutex::new(peers_rx),
            }),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connect_count.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.inner.last_url.lock().unwrap().clone()
    }

    /// Wait for the transport's next dial and return its peer handle.
    pub async fn wait_for_peer(&self) -> LoopbackPeer {
        let mut peers = self.inner.peers_rx.lock().await;
        peers.recv().await.expect("loopback connector dropped")
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketConnector for LoopbackConnector {
    fn connect(&self, url: &str) -> SocketSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        *self.inner.last_url.lock().unwrap() = Some(url.to_string());
        let _ = self.inner.peers_tx.send(LoopbackPeer {
            events: events_tx,
            outbound: outbound_rx,
        });
        SocketSession {
            sink: outbound_tx,
            events: events_rx,
        }
    }
}
