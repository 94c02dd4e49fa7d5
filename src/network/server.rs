use crate::config::Config;
use crate::core::{Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{
    BlockData, GetBlocks, GetData, Inv, Message, Version, ITEM_BLOCK, NODE_VERSION,
};
use crate::network::PeerRegistry;
use crate::storage::UTXOSet;
use data_encoding::HEXLOWER;
use log::{error, info, warn};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(5_000);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(30_000);

/// A ledger node: listener loop, inbound handlers and outbound sends.
///
/// Cloning is cheap; clones share the chain, the UTXO index and the registry.
#[derive(Clone)]
pub struct Server {
    node_addr: String,
    seed_node: String,
    blockchain: Blockchain,
    utxo_set: UTXOSet,
    registry: Arc<PeerRegistry>,
    dial_timeout: Duration,
    read_timeout: Duration,
}

impl Server {
    pub fn new(node_addr: &str, seed_node: &str, blockchain: Blockchain) -> Server {
        let registry = PeerRegistry::new();
        if node_addr != seed_node {
            registry.add_node(seed_node);
        }
        Server {
            node_addr: node_addr.to_string(),
            seed_node: seed_node.to_string(),
            utxo_set: UTXOSet::new(blockchain.clone()),
            blockchain,
            registry: Arc::new(registry),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn from_config(config: &Config, blockchain: Blockchain) -> Server {
        Server::new(&config.node_addr, &config.seed_node, blockchain)
            .with_timeouts(config.dial_timeout(), config.read_timeout())
    }

    pub fn with_timeouts(mut self, dial_timeout: Duration, read_timeout: Duration) -> Server {
        self.dial_timeout = dial_timeout;
        self.read_timeout = read_timeout;
        self
    }

    pub fn get_node_addr(&self) -> &str {
        &self.node_addr
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_utxo_set(&self) -> &UTXOSet {
        &self.utxo_set
    }

    pub fn get_registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Binds the node address, announces itself to the seed and serves forever
    pub fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.node_addr).map_err(|e| {
            BlockchainError::Io(format!("Failed to bind to {}: {e}", self.node_addr))
        })?;
        info!("Server listening on {}", self.node_addr);

        if self.node_addr != self.seed_node {
            if let Err(e) = self.send_version(&self.seed_node) {
                warn!("Could not reach seed node: {e}");
            }
        }
        self.serve(listener)
    }

    /// Accept loop. Each connection is handled on its own thread.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        let peer_addr = stream
                            .peer_addr()
                            .map(|addr| addr.to_string())
                            .unwrap_or_else(|_| "unknown".to_string());
                        if let Err(e) = server.handle_connection(stream) {
                            error!("Error handling connection from {peer_addr}: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }
        Ok(())
    }

    /// Mines a reward block to `address` every `interval` and announces it
    pub fn start_miner(&self, address: String, interval: Duration) -> thread::JoinHandle<()> {
        let server = self.clone();
        thread::spawn(move || loop {
            thread::sleep(interval);
            if let Err(e) = server.mine_reward_block(&address) {
                error!("Mining failed: {e}");
            }
        })
    }

    fn mine_reward_block(&self, address: &str) -> Result<Block> {
        let coinbase_tx = Transaction::new_coinbase_tx(address)?;
        let block = self.blockchain.mine_block(&[coinbase_tx])?;
        self.utxo_set.update(&block)?;
        info!("New block {} is mined!", block.get_hash_hex());
        self.broadcast_block(&block);
        Ok(block)
    }

    /// Announces `block` to every known peer; failures only evict that peer
    pub fn broadcast_block(&self, block: &Block) {
        for node in self.registry.known_nodes() {
            if node == self.node_addr {
                continue;
            }
            if let Err(e) = self.send_inv(&node, &[block.get_hash().to_vec()]) {
                warn!("Broadcast to {node} failed: {e}");
            }
        }
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream.set_read_timeout(Some(self.read_timeout))?;
        let mut request = vec![];
        stream.read_to_end(&mut request)?;
        let _ = stream.shutdown(Shutdown::Both);

        let message = Message::decode(&request)?;
        info!(
            "Received {} command from {}",
            message.command(),
            message.addr_from()
        );
        self.handle_message(message)
    }

    /// Dispatches one decoded message
    pub fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::Version(version) => self.handle_version(version),
            Message::GetBlocks(get_blocks) => self.handle_get_blocks(get_blocks),
            Message::Inv(inv) => self.handle_inv(inv),
            Message::GetData(get_data) => self.handle_get_data(get_data),
            Message::Block(block_data) => self.handle_block(block_data),
        }
    }

    fn handle_version(&self, version: Version) -> Result<()> {
        let local_best_height = self.blockchain.get_best_height()?;
        info!(
            "Version {} from {}: best_height={} (local {local_best_height})",
            version.version, version.addr_from, version.best_height
        );

        // a failed reply below evicts the sender again
        self.registry.add_node(&version.addr_from);

        if local_best_height < version.best_height {
            self.send_get_blocks(&version.addr_from)
        } else if local_best_height > version.best_height {
            self.send_version(&version.addr_from)
        } else {
            Ok(())
        }
    }

    fn handle_get_blocks(&self, get_blocks: GetBlocks) -> Result<()> {
        let hashes = self.blockchain.get_block_hashes()?;
        self.send_inv(&get_blocks.addr_from, &hashes)
    }

    fn handle_inv(&self, inv: Inv) -> Result<()> {
        // I only sync blocks; anything else in an inventory is a protocol error
        if inv.kind != ITEM_BLOCK {
            return Err(BlockchainError::Protocol(format!(
                "Unsupported inventory kind {:?}",
                inv.kind
            )));
        }
        info!(
            "Received inventory with {} blocks from {}",
            inv.items.len(),
            inv.addr_from
        );
        match self.registry.start_fetch(&inv.items) {
            Some(block_hash) => self.send_get_data(&inv.addr_from, &block_hash),
            None => Ok(()),
        }
    }

    fn handle_get_data(&self, get_data: GetData) -> Result<()> {
        if get_data.kind != ITEM_BLOCK {
            return Err(BlockchainError::Protocol(format!(
                "Unsupported data kind {:?}",
                get_data.kind
            )));
        }
        match self.blockchain.get_block(&get_data.id)? {
            Some(block) => self.send_block(&get_data.addr_from, &block),
            None => Err(BlockchainError::NotFound(format!(
                "Block {}",
                HEXLOWER.encode(&get_data.id)
            ))),
        }
    }

    fn handle_block(&self, block_data: BlockData) -> Result<()> {
        let block = Block::deserialize(&block_data.block)?;
        info!(
            "Received block {} at height {} from {}",
            block.get_hash_hex(),
            block.get_height(),
            block_data.addr_from
        );
        if self.blockchain.add_block(&block)? {
            self.registry.record_received(block);
        }

        // While the peer's inventory still has hashes I keep pulling them one at
        // a time. The index is only touched once the burst is over.
        if let Some(block_hash) = self.registry.next_to_fetch() {
            return self.send_get_data(&block_data.addr_from, &block_hash);
        }
        self.refresh_utxo_set(self.registry.finish_burst())
    }

    // A burst that stored exactly one block is applied incrementally; larger
    // bursts may arrive tip first, so the index is rebuilt instead.
    fn refresh_utxo_set(&self, received: Vec<Block>) -> Result<()> {
        match received.as_slice() {
            [] => Ok(()),
            [block] => match self.utxo_set.update(block) {
                Ok(()) => Ok(()),
                Err(BlockchainError::Validation(reason)) => {
                    warn!("Incremental UTXO update rejected ({reason}), reindexing");
                    self.utxo_set.reindex()
                }
                Err(e) => Err(e),
            },
            _ => self.utxo_set.reindex(),
        }
    }

    /// Sends our version and best height to `addr`
    pub fn send_version(&self, addr: &str) -> Result<()> {
        let best_height = self.blockchain.get_best_height()?;
        self.send_data(
            addr,
            &Message::Version(Version {
                version: NODE_VERSION,
                best_height,
                addr_from: self.node_addr.clone(),
            }),
        )
    }

    fn send_get_blocks(&self, addr: &str) -> Result<()> {
        self.send_data(
            addr,
            &Message::GetBlocks(GetBlocks {
                addr_from: self.node_addr.clone(),
            }),
        )
    }

    fn send_inv(&self, addr: &str, items: &[Vec<u8>]) -> Result<()> {
        self.send_data(
            addr,
            &Message::Inv(Inv {
                addr_from: self.node_addr.clone(),
                kind: ITEM_BLOCK.to_string(),
                items: items.to_vec(),
            }),
        )
    }

    fn send_get_data(&self, addr: &str, id: &[u8]) -> Result<()> {
        self.send_data(
            addr,
            &Message::GetData(GetData {
                addr_from: self.node_addr.clone(),
                kind: ITEM_BLOCK.to_string(),
                id: id.to_vec(),
            }),
        )
    }

    fn send_block(&self, addr: &str, block: &Block) -> Result<()> {
        self.send_data(
            addr,
            &Message::Block(BlockData {
                addr_from: self.node_addr.clone(),
                block: block.serialize()?,
            }),
        )
    }

    /// One message per connection. A peer that cannot be reached is evicted.
    fn send_data(&self, addr: &str, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        info!("Sending {} command to {addr}", message.command());
        if let Err(e) = self.write_message(addr, &bytes) {
            warn!("Failed to send {} to {addr}: {e}", message.command());
            self.registry.evict_node(addr);
            return Err(BlockchainError::PeerUnreachable(format!("{addr}: {e}")));
        }
        Ok(())
    }

    fn write_message(&self, addr: &str, bytes: &[u8]) -> std::io::Result<()> {
        let socket_addr: SocketAddr = addr.parse().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}"))
        })?;
        let mut stream = TcpStream::connect_timeout(&socket_addr, self.dial_timeout)?;
        stream.set_write_timeout(Some(self.dial_timeout))?;
        stream.write_all(bytes)?;
        stream.flush()?;
        // closing our half ends the peer's read-to-end
        stream.shutdown(Shutdown::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::test_chain;

    // Nothing listens on port 1 of the loopback interface.
    const DEAD_PEER: &str = "127.0.0.1:1";

    #[test]
    fn test_seed_is_registered() {
        let (chain, _) = test_chain();
        let server = Server::new("127.0.0.1:3001", "127.0.0.1:3000", chain.clone());
        assert!(server.get_registry().node_is_known("127.0.0.1:3000"));

        let seed = Server::new("127.0.0.1:3000", "127.0.0.1:3000", chain);
        assert!(seed.get_registry().is_empty());
    }

    #[test]
    fn test_failed_send_evicts_peer() {
        let (chain, _) = test_chain();
        let server = Server::new("127.0.0.1:3001", DEAD_PEER, chain)
            .with_timeouts(Duration::from_millis(500), Duration::from_millis(500));
        assert!(server.get_registry().node_is_known(DEAD_PEER));

        let err = server.send_version(DEAD_PEER).unwrap_err();
        assert!(matches!(err, BlockchainError::PeerUnreachable(_)));
        assert!(!server.get_registry().node_is_known(DEAD_PEER));
    }

    #[test]
    fn test_version_registers_sender() {
        let (chain, _) = test_chain();
        let server = Server::new("127.0.0.1:3000", "127.0.0.1:3000", chain);

        // equal heights: no reply is sent
        server
            .handle_message(Message::Version(Version {
                version: NODE_VERSION,
                best_height: 0,
                addr_from: "127.0.0.1:3005".to_string(),
            }))
            .unwrap();
        assert!(server.get_registry().node_is_known("127.0.0.1:3005"));
    }

    #[test]
    fn test_unsupported_inventory_kind() {
        let (chain, _) = test_chain();
        let server = Server::new("127.0.0.1:3000", "127.0.0.1:3000", chain);
        let err = server
            .handle_message(Message::Inv(Inv {
                addr_from: "127.0.0.1:3005".to_string(),
                kind: "tx".to_string(),
                items: vec![],
            }))
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Protocol(_)));
    }

    #[test]
    fn test_get_data_for_unknown_block() {
        let (chain, _) = test_chain();
        let server = Server::new("127.0.0.1:3000", "127.0.0.1:3000", chain);
        let err = server
            .handle_message(Message::GetData(GetData {
                addr_from: "127.0.0.1:3005".to_string(),
                kind: ITEM_BLOCK.to_string(),
                id: vec![0; 32],
            }))
            .unwrap_err();
        assert!(matches!(err, BlockchainError::NotFound(_)));
    }

    #[test]
    fn test_unsolicited_block_updates_index() {
        let (chain, wallet) = test_chain();
        let server = Server::new("127.0.0.1:3000", "127.0.0.1:3000", chain.clone());
        server.get_utxo_set().reindex().unwrap();

        let coinbase = Transaction::new_coinbase_tx(&wallet.get_address()).unwrap();
        let block = Block::new_block(
            chain.get_tip_hash().unwrap(),
            &[coinbase],
            1,
            chain.get_target_bits(),
        )
        .unwrap();
        server
            .handle_message(Message::Block(BlockData {
                addr_from: "127.0.0.1:3005".to_string(),
                block: block.serialize().unwrap(),
            }))
            .unwrap();

        assert_eq!(chain.get_tip_hash().unwrap(), block.get_hash());
        assert_eq!(server.get_utxo_set().count_transactions().unwrap(), 2);
    }
}
