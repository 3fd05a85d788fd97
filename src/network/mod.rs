// P2P networking

mod message;
mod peer;
mod node;

pub use message::{
    Message, InvType, VersionMessage, VerackMessage, AddrMessage, InvMessage, GetDataMessage,
    GetBlocksMessage, TxMessage, BlockMessage, PROTOCOL_VERSION,
};
pub use peer::{PeerTable, HandshakeState, load_known_peers, DEFAULT_PEERS};
pub use node::{Node, NodeConfig, divergence_index};
