// Network node - peer protocol handlers, relay and mining

use crate::consensus::Miner;
use crate::core::{Block, Hash256, Transaction, GENESIS_BITS};
use crate::error::{ChainError, Result};
use crate::network::message::{
    BlockMessage, GetBlocksMessage, GetDataMessage, InvMessage, InvType, Message, TxMessage,
    VerackMessage, VersionMessage, PROTOCOL_VERSION,
};
use crate::network::peer::{self, HandshakeState, PeerTable};
use crate::storage::{Blockchain, Storage, UtxoEntry};
use crate::wallet::{self, Address, Keystore, TransactionBuilder};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};

/// Everything needed to start a node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub wallet_path: PathBuf,
    pub peers_path: PathBuf,
    pub mining: bool,
}

impl NodeConfig {
    /// Store directory of this node, one per port
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("node_{}", self.port))
    }

    pub fn node_addr(&self) -> String {
        format!("localhost:{}", self.port)
    }
}

/// Index into `ours` where the reply inventory starts.
///
/// 0 when the first hashes differ, the index before the first mismatch
/// otherwise. Without a mismatch this is the last common position.
pub fn divergence_index(theirs: &[Hash256], ours: &[Hash256]) -> usize {
    let common = theirs.len().min(ours.len());
    match (0..common).find(|&i| theirs[i] != ours[i]) {
        Some(0) => 0,
        Some(i) => i - 1,
        None => common.saturating_sub(1),
    }
}

/// Network node
pub struct Node {
    /// Address peers reach this node at
    addr: String,
    pub chain: Arc<RwLock<Blockchain>>,
    peers: Mutex<PeerTable>,
    known_peers: Vec<String>,
    keystore: Keystore,
    /// Pubkey hash paid by blocks this node mines
    miner: Vec<u8>,
    wallet_utxos: Mutex<Vec<UtxoEntry>>,
    mining: bool,
    /// Cancel flags of the mining searches in flight
    mining_jobs: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Node {
    pub fn new(
        addr: String,
        chain: Blockchain,
        keystore: Keystore,
        known_peers: Vec<String>,
        mining: bool,
    ) -> Result<Self> {
        let default = keystore
            .default_address()
            .ok_or_else(|| ChainError::Wallet("wallet has no addresses".to_string()))?;
        let miner = default.to_pubkey_hash()?.to_vec();
        let utxos = wallet::owned_utxos(chain.utxos(), &keystore.pubkey_hashes());

        log::info!(
            "Node {} at height {}, miner {}, mining {}",
            addr,
            chain.height(),
            default,
            if mining { "on" } else { "off" }
        );

        Ok(Self {
            addr,
            chain: Arc::new(RwLock::new(chain)),
            peers: Mutex::new(PeerTable::new()),
            known_peers,
            keystore,
            miner,
            wallet_utxos: Mutex::new(utxos),
            mining,
            mining_jobs: Mutex::new(Vec::new()),
        })
    }

    /// Open store, wallet and peer list described by `config`
    pub fn open(config: &NodeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let chain = Blockchain::open(Storage::new(config.store_path())?)?;
        let keystore = Keystore::load(&config.wallet_path)?;
        let known_peers = peer::load_known_peers(&config.peers_path)?;

        Self::new(config.node_addr(), chain, keystore, known_peers, config.mining)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_mining(&self) -> bool {
        self.mining
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keystore.addresses()
    }

    /// Bind the peer listener, announce ourselves and serve forever
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        log::info!("Node listening on {}", self.addr);

        self.broadcast_version().await;
        self.serve(listener).await
    }

    /// Accept loop, one task per inbound connection
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote) = listener.accept().await?;
            log::debug!("New connection from {}", remote);

            let node = Arc::clone(&self);
            tokio::spawn(async move {
                node.handle_connection(stream).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        match peer::receive(&mut stream).await {
            Ok(message) => self.handle_message(message).await,
            Err(e) => log::warn!("Dropping unreadable message: {}", e),
        }
    }

    /// Dispatch one inbound message
    pub async fn handle_message(self: &Arc<Self>, message: Message) {
        log::info!("Handling {} message", message.kind());

        let kind = message.kind();
        let result = match message {
            Message::Version(msg) => self.handle_version(msg).await,
            Message::Verack(msg) => self.handle_verack(msg).await,
            Message::Addr(msg) => {
                log::debug!("Ignoring addr message: {}", msg.addr_list);
                Ok(())
            }
            Message::Inv(msg) => self.handle_inv(msg).await,
            Message::GetData(msg) => self.handle_getdata(msg).await,
            Message::GetBlocks(msg) => self.handle_getblocks(msg).await,
            Message::Tx(msg) => self.handle_tx(msg).await,
            Message::Block(msg) => self.handle_block(msg).await,
        };

        if let Err(e) = result {
            log::warn!("Failed to handle {} message: {}", kind, e);
        }
    }

    async fn handle_version(&self, msg: VersionMessage) -> Result<()> {
        if msg.version != PROTOCOL_VERSION {
            log::warn!("Ignoring version {} from {}", msg.version, msg.addr_from);
            return Ok(());
        }

        let state = {
            let mut peers = self.peers.lock().await;
            peers.record_height(&msg.addr_from, msg.start_height);
            peers.state(&msg.addr_from)
        };

        match state {
            Some(HandshakeState::Unacknowledged) => self.send_verack(&msg.addr_from).await,
            Some(HandshakeState::Acknowledged) | None => self.send_version(&msg.addr_from).await,
        }
        Ok(())
    }

    async fn handle_verack(&self, msg: VerackMessage) -> Result<()> {
        let from = &msg.addr_from;
        let (state, peer_height) = {
            let peers = self.peers.lock().await;
            (peers.state(from), peers.height(from).unwrap_or(0))
        };

        match state {
            None => log::info!("verack from unknown peer {}", from),
            Some(HandshakeState::Unacknowledged) => self.send_verack(from).await,
            Some(HandshakeState::Acknowledged) => {
                let height = self.chain.read().await.height();
                if peer_height > height {
                    self.send_getblocks(from).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_getblocks(&self, msg: GetBlocksMessage) -> Result<()> {
        let ours = self.chain.read().await.block_hashes(false)?;
        let start = divergence_index(&msg.block_hashes, &ours);

        let inv = InvMessage::new(self.addr.clone(), InvType::Block, ours[start.min(ours.len())..].to_vec());
        self.send_to(&msg.addr_from, Message::Inv(inv)).await;
        Ok(())
    }

    /// A multi-hash block inventory moves our tip to its first hash before the rest is requested
    async fn handle_inv(&self, msg: InvMessage) -> Result<()> {
        let wanted = match msg.inv_type {
            InvType::Block if msg.hashes.len() > 1 => {
                self.chain.write().await.reorg(&msg.hashes[0])?;
                self.scan_wallet_utxos().await;
                msg.hashes[1..].to_vec()
            }
            _ => msg.hashes,
        };

        if wanted.is_empty() {
            return Ok(());
        }
        let getdata = GetDataMessage::new(self.addr.clone(), msg.inv_type, wanted);
        self.send_to(&msg.addr_from, Message::GetData(getdata)).await;
        Ok(())
    }

    async fn handle_getdata(&self, msg: GetDataMessage) -> Result<()> {
        match msg.inv_type {
            InvType::Block => {
                let blocks = {
                    let chain = self.chain.read().await;
                    msg.hashes
                        .iter()
                        .map(|hash| chain.get_block_by_hash(hash))
                        .collect::<Result<Vec<_>>>()?
                };
                self.send_block(&msg.addr_from, &blocks).await;
            }
            InvType::Tx => {
                for hash in &msg.hashes {
                    let found = self.chain.read().await.find_transaction(hash)?;
                    match found {
                        Some(tx) => self.send_tx(&msg.addr_from, &tx).await,
                        None => log::warn!("getdata for unknown transaction {}", hash),
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a batch of blocks in order, stopping at the first rejection
    async fn handle_block(&self, msg: BlockMessage) -> Result<()> {
        let acknowledged = self.peers.lock().await.is_acknowledged(&msg.addr_from);
        if !acknowledged {
            log::info!("Block from unacknowledged peer {}, restarting handshake", msg.addr_from);
            self.send_version(&msg.addr_from).await;
            return Ok(());
        }

        let mut added = 0;
        {
            let mut chain = self.chain.write().await;
            for block in msg.blocks()? {
                let Some(block) = block else {
                    log::warn!("Peer {} sent an empty block entry", msg.addr_from);
                    continue;
                };
                if let Err(e) = chain.add_block(&block) {
                    log::warn!("Rejected block {} from {}: {}", block.hash(), msg.addr_from, e);
                    break;
                }
                added += 1;
            }
        }

        if added > 0 {
            self.cancel_mining().await;
            self.scan_wallet_utxos().await;
        }
        Ok(())
    }

    /// Verify a relayed transaction and mine it in the background
    async fn handle_tx(self: &Arc<Self>, msg: TxMessage) -> Result<()> {
        let tx = msg.transaction()?;
        self.chain.read().await.verify_transaction(&tx)?;

        let node = Arc::clone(self);
        tokio::spawn(async move {
            match node.mine_and_add(vec![tx]).await {
                Ok(block) => {
                    let inv = InvMessage::new(node.addr.clone(), InvType::Block, vec![block.hash()]);
                    node.broadcast(Message::Inv(inv)).await;
                }
                Err(e) => log::warn!("Mining relayed transaction failed: {}", e),
            }
        });
        Ok(())
    }

    async fn start_mining_job(&self) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.mining_jobs.lock().await.push(Arc::clone(&cancel));
        cancel
    }

    async fn finish_mining_job(&self, cancel: &Arc<AtomicBool>) {
        self.mining_jobs.lock().await.retain(|job| !Arc::ptr_eq(job, cancel));
    }

    /// Stop every search in flight
    pub async fn cancel_mining(&self) {
        let jobs = std::mem::take(&mut *self.mining_jobs.lock().await);
        if !jobs.is_empty() {
            log::info!("Cancelling {} mining jobs", jobs.len());
        }
        for cancel in jobs {
            cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Mine `transactions` on top of the tip off the async runtime, then append the block.
    ///
    /// The template is checked against the UTXO snapshot at the tip it extends.
    /// If the tip moves while mining, `add_block` rejects the result.
    async fn mine_and_add(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let mut block = self.chain.read().await.block_template(&self.miner, transactions)?;
        let cancel = self.start_mining_job().await;

        let job = Arc::clone(&cancel);
        let mined = tokio::task::spawn_blocking(move || {
            Miner::new(GENESIS_BITS)
                .mine(&mut block.header, &job)
                .map(|result| {
                    log::info!("Found nonce {} after {} attempts", result.nonce, result.attempts);
                    block
                })
        })
        .await;
        self.finish_mining_job(&cancel).await;
        let block = mined?.ok_or(ChainError::MiningCancelled)?;

        self.chain.write().await.add_block(&block)?;
        self.scan_wallet_utxos().await;
        Ok(block)
    }

    /// Refresh the wallet's view of its unspent outputs
    pub async fn scan_wallet_utxos(&self) {
        let owned = {
            let chain = self.chain.read().await;
            wallet::owned_utxos(chain.utxos(), &self.keystore.pubkey_hashes())
        };
        log::debug!("Wallet owns {} unspent outputs", owned.len());
        *self.wallet_utxos.lock().await = owned;
    }

    pub async fn wallet_utxos(&self) -> Vec<UtxoEntry> {
        self.wallet_utxos.lock().await.clone()
    }

    pub async fn wallet_balance(&self) -> u64 {
        wallet::balance(&self.wallet_utxos.lock().await)
    }

    /// Pay `amount` to `to` with change back to the miner address.
    ///
    /// A mining node mines the transaction itself and relays the block;
    /// otherwise the transaction is relayed for others to mine.
    pub async fn send_transaction(&self, amount: u64, to: &Address) -> Result<Transaction> {
        self.scan_wallet_utxos().await;
        let utxos = self.wallet_utxos().await;
        let change = self
            .keystore
            .default_address()
            .ok_or_else(|| ChainError::Wallet("wallet has no addresses".to_string()))?;

        let tx = TransactionBuilder::new(&self.keystore, &utxos).build(amount, 0, to, change)?;
        self.chain.read().await.verify_transaction(&tx)?;
        log::info!("Sending {} to {} in {}", amount, to, tx.txid());

        if self.mining {
            let block = self.mine_and_add(vec![tx.clone()]).await?;
            self.broadcast_block(&block).await;
        } else {
            self.broadcast_tx(&tx).await;
        }
        Ok(tx)
    }

    pub async fn mine_empty_block_and_broadcast(&self) -> Result<Block> {
        if !self.mining {
            return Err(ChainError::MiningDisabled);
        }
        let block = self.mine_and_add(Vec::new()).await?;
        self.broadcast_block(&block).await;
        Ok(block)
    }

    /// Send `message`, evicting `addr` from the peer table if it cannot be reached
    async fn send_to(&self, addr: &str, message: Message) -> bool {
        log::info!("Sending {} to {}", message.kind(), addr);
        match peer::send(addr, &message).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}", e);
                self.peers.lock().await.evict(addr);
                false
            }
        }
    }

    /// Announce our height. The peer is marked unacknowledged before the send
    /// so a fast reply always finds it in the table.
    async fn send_version(&self, addr: &str) {
        let height = self.chain.read().await.height();
        self.peers.lock().await.set_state(addr, HandshakeState::Unacknowledged);
        let version = VersionMessage::new(self.addr.clone(), height);
        self.send_to(addr, Message::Version(version)).await;
    }

    async fn send_verack(&self, addr: &str) {
        self.peers.lock().await.set_state(addr, HandshakeState::Acknowledged);
        let verack = VerackMessage {
            addr_from: self.addr.clone(),
        };
        self.send_to(addr, Message::Verack(verack)).await;
    }

    async fn send_getblocks(&self, addr: &str) -> Result<()> {
        let block_hashes = self.chain.read().await.block_hashes(false)?;
        let getblocks = GetBlocksMessage {
            addr_from: self.addr.clone(),
            block_hashes,
        };
        self.send_to(addr, Message::GetBlocks(getblocks)).await;
        Ok(())
    }

    async fn send_block(&self, addr: &str, blocks: &[Option<Block>]) {
        let msg = BlockMessage::new(self.addr.clone(), blocks);
        self.send_to(addr, Message::Block(msg)).await;
    }

    async fn send_tx(&self, addr: &str, tx: &Transaction) {
        let msg = TxMessage::new(self.addr.clone(), tx);
        self.send_to(addr, Message::Tx(msg)).await;
    }

    /// Send to every known peer except ourselves
    async fn broadcast(&self, message: Message) {
        for addr in self.known_peers.iter().filter(|addr| **addr != self.addr) {
            self.send_to(addr, message.clone()).await;
        }
    }

    pub async fn broadcast_version(&self) {
        for addr in self.known_peers.iter().filter(|addr| **addr != self.addr) {
            self.send_version(addr).await;
        }
    }

    pub async fn broadcast_block(&self, block: &Block) {
        let msg = BlockMessage::new(self.addr.clone(), &[Some(block.clone())]);
        self.broadcast(Message::Block(msg)).await;
    }

    pub async fn broadcast_tx(&self, tx: &Transaction) {
        self.broadcast(Message::Tx(TxMessage::new(self.addr.clone(), tx))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;
    use std::time::Duration;

    fn hashes(bytes: &[u8]) -> Vec<Hash256> {
        bytes.iter().map(|b| Hash256::new([*b; 32])).collect()
    }

    fn node_with(addr: &str, chain: Blockchain, keystore: Keystore, peers: Vec<String>, mining: bool) -> Arc<Node> {
        Arc::new(Node::new(addr.to_string(), chain, keystore, peers, mining).unwrap())
    }

    /// Fresh chain plus a wallet whose default key owns one mined coinbase
    fn funded() -> (Blockchain, Keystore) {
        let mut keystore = Keystore::new();
        let addr = keystore.new_address();
        let owner = keystore.get_keypair(&addr).unwrap().pubkey_hash();

        let mut chain = Blockchain::open(Storage::memory().unwrap()).unwrap();
        chain.mine_empty_block(&owner).unwrap();
        (chain, keystore)
    }

    async fn wait_for_height(node: &Node, height: u32) -> bool {
        for _ in 0..200 {
            if node.chain.read().await.height() >= height {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[test]
    fn test_divergence_index() {
        let ours = hashes(&[1, 2, 3, 4]);

        assert_eq!(divergence_index(&hashes(&[9, 2]), &ours), 0);
        assert_eq!(divergence_index(&hashes(&[1, 2, 9]), &ours), 1);
        assert_eq!(divergence_index(&hashes(&[1, 9, 9]), &ours), 0);
        assert_eq!(divergence_index(&hashes(&[1, 2]), &ours), 1);
        assert_eq!(divergence_index(&hashes(&[1, 2, 3, 4, 5, 6]), &ours), 3);
        assert_eq!(divergence_index(&[], &ours), 0);
    }

    #[tokio::test]
    async fn test_new_requires_an_address() {
        let chain = Blockchain::open(Storage::memory().unwrap()).unwrap();
        let result = Node::new("localhost:1".to_string(), chain, Keystore::new(), vec![], false);
        assert!(matches!(result, Err(ChainError::Wallet(_))));
    }

    #[tokio::test]
    async fn test_mining_disabled() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], false);

        assert!(matches!(
            node.mine_empty_block_and_broadcast().await,
            Err(ChainError::MiningDisabled)
        ));
    }

    #[tokio::test]
    async fn test_wallet_balance_after_scan() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], true);
        assert_eq!(node.wallet_balance().await, SUBSIDY);

        node.mine_empty_block_and_broadcast().await.unwrap();
        assert_eq!(node.wallet_balance().await, 2 * SUBSIDY);
        assert_eq!(node.wallet_utxos().await.len(), 2);
    }

    #[tokio::test]
    async fn test_send_transaction_mines_when_enabled() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], true);
        let to = Address::from_pubkey_hash(&[9; 20]);

        let tx = node.send_transaction(1_000, &to).await.unwrap();

        let chain = node.chain.read().await;
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.utxos()[&tx.txid()][0].output.value, 1_000);
        drop(chain);
        // new coinbase plus change
        assert_eq!(node.wallet_balance().await, 2 * SUBSIDY - 1_000);
    }

    #[tokio::test]
    async fn test_send_transaction_without_mining_leaves_chain() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], false);
        let to = Address::from_pubkey_hash(&[9; 20]);

        node.send_transaction(1_000, &to).await.unwrap();
        assert_eq!(node.chain.read().await.height(), 2);

        assert!(matches!(
            node.send_transaction(10 * SUBSIDY, &to).await,
            Err(ChainError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn test_relayed_transaction_is_mined() {
        let (chain, keystore) = funded();
        let utxos = wallet::owned_utxos(chain.utxos(), &keystore.pubkey_hashes());
        let change = keystore.default_address().unwrap().clone();
        let tx = TransactionBuilder::new(&keystore, &utxos)
            .build(500, 0, &Address::from_pubkey_hash(&[9; 20]), &change)
            .unwrap();

        let node = node_with("localhost:1", chain, keystore, vec![], true);
        node.handle_message(Message::Tx(TxMessage::new("localhost:2".to_string(), &tx)))
            .await;

        assert!(wait_for_height(&node, 3).await);
        assert!(node.chain.read().await.utxos().contains_key(&tx.txid()));
    }

    #[tokio::test]
    async fn test_conflicting_relayed_transactions_mine_once() {
        let (chain, keystore) = funded();
        let utxos = wallet::owned_utxos(chain.utxos(), &keystore.pubkey_hashes());
        let change = keystore.default_address().unwrap().clone();
        let to = Address::from_pubkey_hash(&[9; 20]);
        let builder = TransactionBuilder::new(&keystore, &utxos);
        let a = builder.build(500, 0, &to, &change).unwrap();
        let b = builder.build(700, 0, &to, &change).unwrap();

        let node = node_with("localhost:1", chain, keystore, vec![], true);
        node.handle_message(Message::Tx(TxMessage::new("localhost:2".to_string(), &a)))
            .await;
        node.handle_message(Message::Tx(TxMessage::new("localhost:2".to_string(), &b)))
            .await;

        assert!(wait_for_height(&node, 3).await);
        for _ in 0..200 {
            if node.mining_jobs.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let chain = node.chain.read().await;
        assert_eq!(chain.height(), 3);
        let mined_a = chain.utxos().contains_key(&a.txid());
        let mined_b = chain.utxos().contains_key(&b.txid());
        assert!(mined_a != mined_b);
    }

    #[tokio::test]
    async fn test_tx_inventory_never_reorganizes() {
        let (chain, keystore) = funded();
        let tip = chain.tip();
        let node = node_with("localhost:1", chain, keystore, vec![], false);

        // a block inventory with the same hashes would move the tip to genesis
        let hashes = vec![Block::genesis().hash(), Hash256::new([5; 32])];
        let inv = InvMessage::new("localhost:2".to_string(), InvType::Tx, hashes);
        node.handle_message(Message::Inv(inv)).await;

        let chain = node.chain.read().await;
        assert_eq!(chain.height(), 2);
        assert_eq!(chain.tip(), tip);
    }

    #[tokio::test]
    async fn test_cancel_mining_stops_every_job() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], true);

        let first = node.start_mining_job().await;
        let second = node.start_mining_job().await;
        node.cancel_mining().await;

        assert!(first.load(Ordering::Relaxed));
        assert!(second.load(Ordering::Relaxed));
        assert!(node.mining_jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_finished_mining_job_is_released() {
        let (chain, keystore) = funded();
        let node = node_with("localhost:1", chain, keystore, vec![], true);

        node.mine_empty_block_and_broadcast().await.unwrap();
        assert!(node.mining_jobs.lock().await.is_empty());

        // a job cancelled mid-search is released too
        let cancel = node.start_mining_job().await;
        node.finish_mining_job(&cancel).await;
        assert!(node.mining_jobs.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_block_from_unacknowledged_peer_is_ignored() {
        let (chain, keystore) = funded();
        let mut other = Blockchain::open(Storage::memory().unwrap()).unwrap();
        other.mine_empty_block(&[1; 20]).unwrap();
        let block = other.mine_empty_block(&[1; 20]).unwrap();

        let node = node_with("localhost:1", chain, keystore, vec![], false);
        let msg = BlockMessage::new("localhost:2".to_string(), &[Some(block)]);
        node.handle_message(Message::Block(msg)).await;

        assert_eq!(node.chain.read().await.height(), 2);
        // the version reply failed, so the peer was evicted again
        assert_eq!(node.peers.lock().await.state("localhost:2"), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_nodes_sync() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap().to_string();
        let addr_b = listener_b.local_addr().unwrap().to_string();

        let (mut chain_a, keystore_a) = funded();
        chain_a.mine_empty_block(&[3; 20]).unwrap();
        let tip_a = chain_a.tip();
        let node_a = node_with(&addr_a, chain_a, keystore_a, vec![addr_b.clone()], false);

        let (_, keystore_b) = funded();
        let chain_b = Blockchain::open(Storage::memory().unwrap()).unwrap();
        let node_b = node_with(&addr_b, chain_b, keystore_b, vec![addr_a.clone()], false);

        tokio::spawn(Arc::clone(&node_a).serve(listener_a));
        tokio::spawn(Arc::clone(&node_b).serve(listener_b));

        node_b.broadcast_version().await;

        assert!(wait_for_height(&node_b, 3).await);
        assert_eq!(node_b.chain.read().await.tip(), tip_a);
        assert!(node_a.peers.lock().await.is_acknowledged(&addr_b));
        assert!(node_b.peers.lock().await.is_acknowledged(&addr_a));
    }
}
