// CLI commands

use clap::{Args, Parser, Subcommand};
use crate::core::Block;
use crate::error::{ChainError, Result};
use crate::network::{Node, NodeConfig};
use crate::storage::{Blockchain, Storage};
use crate::wallet::{Address, Keystore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "simple-chain")]
#[command(about = "Minimal proof-of-work blockchain node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the node's peer listener
    Start(NodeArgs),

    /// Pay an address from the node's wallet (node must be stopped)
    Send {
        #[command(flatten)]
        node: NodeArgs,
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Amount in the smallest unit
        #[arg(long)]
        amount: u64,
    },

    /// Mine an empty block and relay it (node must be stopped)
    Mine(NodeArgs),

    /// Wallet commands
    Wallet {
        /// Wallet key file
        #[arg(long, default_value = "wallet.json")]
        wallet: PathBuf,
        #[command(subcommand)]
        command: WalletCommands,
    },

    /// Read-only queries against a stopped node's store
    Chain {
        #[command(flatten)]
        store: StoreArgs,
        #[command(subcommand)]
        command: ChainCommands,
    },
}

#[derive(Args, Clone)]
pub struct StoreArgs {
    /// Peer port; selects the store directory
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Directory holding per-node stores and peer lists
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,
}

#[derive(Args, Clone)]
pub struct NodeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Wallet key file
    #[arg(long, default_value = "wallet.json")]
    pub wallet: PathBuf,

    /// Peer list file [default: <data-dir>/peers_<port>.json]
    #[arg(long)]
    pub peers: Option<PathBuf>,

    /// Mine relayed transactions and allow mining commands
    #[arg(long)]
    pub mining: bool,
}

impl From<NodeArgs> for NodeConfig {
    fn from(args: NodeArgs) -> Self {
        let StoreArgs { port, data_dir } = args.store;
        let peers_path = args
            .peers
            .unwrap_or_else(|| data_dir.join(format!("peers_{}.json", port)));

        NodeConfig {
            port,
            data_dir,
            wallet_path: args.wallet,
            peers_path,
            mining: args.mining,
        }
    }
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new wallet file with one key
    Create,

    /// List the wallet's addresses
    Addresses,
}

#[derive(Subcommand)]
pub enum ChainCommands {
    /// Current height
    Height,

    /// Block hashes, genesis first
    Hashes,

    /// Blocks, genesis first
    Blocks,

    /// Every unspent output
    Utxos,
}

/// Run a parsed command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start(args) => {
            let node = Arc::new(Node::open(&args.into())?);
            node.run().await
        }
        Commands::Send { node, to, amount } => {
            let node = Node::open(&node.into())?;
            let tx = node.send_transaction(amount, &Address(to)).await?;
            println!("Sent transaction {}", tx.txid());
            println!("  Balance: {}", node.wallet_balance().await);
            Ok(())
        }
        Commands::Mine(args) => {
            let node = Node::open(&args.into())?;
            let block = node.mine_empty_block_and_broadcast().await?;
            print_block(&block);
            Ok(())
        }
        Commands::Wallet { wallet, command } => handle_wallet(&wallet, command),
        Commands::Chain { store, command } => handle_chain(&store, command),
    }
}

fn handle_wallet(path: &Path, cmd: WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create => {
            if path.exists() {
                return Err(ChainError::Wallet(format!("{} already exists", path.display())));
            }
            let mut keystore = Keystore::new();
            let address = keystore.new_address();
            keystore.save(path)?;

            println!("Created wallet {}", path.display());
            println!("  Address: {}", address);
            Ok(())
        }
        WalletCommands::Addresses => {
            let keystore = Keystore::load(path)?;
            let addresses = keystore.addresses();
            println!("Addresses ({}):", addresses.len());
            for address in addresses {
                println!("  {}", address);
            }
            Ok(())
        }
    }
}

fn handle_chain(store: &StoreArgs, cmd: ChainCommands) -> Result<()> {
    let path = store.data_dir.join(format!("node_{}", store.port));
    let chain = Blockchain::open(Storage::new(path)?)?;

    match cmd {
        ChainCommands::Height => println!("{}", chain.height()),
        ChainCommands::Hashes => {
            for hash in chain.block_hashes(false)? {
                println!("{}", hash);
            }
        }
        ChainCommands::Blocks => {
            for block in chain.blocks(false)? {
                print_block(&block);
            }
        }
        ChainCommands::Utxos => {
            let mut entries: Vec<_> = chain.utxos().values().flatten().collect();
            entries.sort_by_key(|entry| (entry.txid, entry.index));
            for entry in entries {
                println!(
                    "{}:{} {} {}",
                    entry.txid,
                    entry.index,
                    entry.output.value,
                    hex::encode(&entry.output.script_pubkey)
                );
            }
        }
    }
    Ok(())
}

fn print_block(block: &Block) {
    println!("Block {}:", block.height());
    println!("  Hash: {}", block.hash());
    println!("  Previous: {}", block.header.prev_block_hash);
    println!("  Merkle root: {}", block.header.merkle_root);
    println!("  Timestamp: {}", block.header.timestamp);
    println!("  Nonce: {}", block.header.nonce);
    println!("  Transactions: {}", block.transactions.len());

    for (i, tx) in block.transactions.iter().enumerate() {
        println!("    [{}] {}", i, tx.txid());
    }
}
