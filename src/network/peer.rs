// Peer state and one-shot message transport

use crate::network::Message;
use crate::error::{ChainError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Peers written to a fresh peer list file
pub const DEFAULT_PEERS: [&str; 2] = ["localhost:3000", "localhost:3001"];

/// Upper bound on a single inbound message
const MAX_MESSAGE_SIZE: u64 = 64 * 1024 * 1024;

/// Connect plus write budget for one outbound message
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake progress with one remote address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// `version` sent, no `verack` yet
    Unacknowledged,
    /// `verack` sent successfully
    Acknowledged,
}

/// Handshake states and advertised heights, always locked together
#[derive(Debug, Default)]
pub struct PeerTable {
    handshakes: HashMap<String, HandshakeState>,
    heights: HashMap<String, u32>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, addr: &str) -> Option<HandshakeState> {
        self.handshakes.get(addr).copied()
    }

    pub fn set_state(&mut self, addr: &str, state: HandshakeState) {
        self.handshakes.insert(addr.to_string(), state);
    }

    pub fn is_acknowledged(&self, addr: &str) -> bool {
        self.state(addr) == Some(HandshakeState::Acknowledged)
    }

    pub fn height(&self, addr: &str) -> Option<u32> {
        self.heights.get(addr).copied()
    }

    pub fn record_height(&mut self, addr: &str, height: u32) {
        self.heights.insert(addr.to_string(), height);
    }

    /// Forget everything about `addr`
    pub fn evict(&mut self, addr: &str) {
        self.handshakes.remove(addr);
        self.heights.remove(addr);
    }
}

/// Load the peer list, seeding the file with [`DEFAULT_PEERS`] when absent
pub fn load_known_peers<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        let defaults: Vec<String> = DEFAULT_PEERS.iter().map(|p| p.to_string()).collect();
        std::fs::write(path, serde_json::to_vec(&defaults)?)?;
        log::info!("Seeded peer list at {}", path.display());
    }

    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Deliver `message` to `addr` over a fresh connection, closing it afterwards
pub async fn send(addr: &str, message: &Message) -> Result<()> {
    let data = message.encode()?;

    let delivery = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&data).await?;
        stream.shutdown().await
    };

    match tokio::time::timeout(SEND_TIMEOUT, delivery).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ChainError::Network(format!("{} is not online: {}", addr, e))),
        Err(_) => Err(ChainError::Network(format!("send to {} timed out", addr))),
    }
}

/// Read one whole message; the sender closes its side when done
pub async fn receive(stream: &mut TcpStream) -> Result<Message> {
    let mut data = Vec::new();
    stream.take(MAX_MESSAGE_SIZE).read_to_end(&mut data).await?;
    Message::decode(&data)
}
