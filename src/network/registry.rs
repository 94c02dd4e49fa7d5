use crate::core::Block;
use log::info;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct RegistryState {
    known_nodes: Vec<String>,
    blocks_in_transit: VecDeque<Vec<u8>>,
    // blocks newly stored since the current fetch queue was recorded
    received: Vec<Block>,
}

/// Known peers plus the pending block-fetch queue, shared by all connection
/// handlers of one node.
#[derive(Default)]
pub struct PeerRegistry {
    inner: Mutex<RegistryState>,
}

impl PeerRegistry {
    pub fn new() -> PeerRegistry {
        PeerRegistry::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // A panicked handler cannot leave the lists half-edited, so the data is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `addr`; false if it was already known
    pub fn add_node(&self, addr: &str) -> bool {
        let mut state = self.state();
        if state.known_nodes.iter().any(|known| known == addr) {
            return false;
        }
        state.known_nodes.push(addr.to_string());
        info!("Registered peer {addr}");
        true
    }

    pub fn evict_node(&self, addr: &str) {
        let mut state = self.state();
        if let Some(idx) = state.known_nodes.iter().position(|known| known == addr) {
            state.known_nodes.remove(idx);
            info!("Evicted unreachable peer {addr}");
        }
    }

    pub fn node_is_known(&self, addr: &str) -> bool {
        self.state().known_nodes.iter().any(|known| known == addr)
    }

    pub fn known_nodes(&self) -> Vec<String> {
        self.state().known_nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.state().known_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().known_nodes.is_empty()
    }

    /// Replaces the fetch queue with `items` and takes its first hash
    pub fn start_fetch(&self, items: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut state = self.state();
        state.blocks_in_transit = items.iter().cloned().collect();
        state.blocks_in_transit.pop_front()
    }

    /// Takes the next hash still to be requested
    pub fn next_to_fetch(&self) -> Option<Vec<u8>> {
        self.state().blocks_in_transit.pop_front()
    }

    pub fn pending_fetches(&self) -> Vec<Vec<u8>> {
        self.state().blocks_in_transit.iter().cloned().collect()
    }

    /// Notes a block newly stored during the current fetch burst
    pub fn record_received(&self, block: Block) {
        self.state().received.push(block);
    }

    /// Ends the burst and hands back the blocks it stored
    pub fn finish_burst(&self) -> Vec<Block> {
        std::mem::take(&mut self.state().received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_membership_only() {
        let registry = PeerRegistry::new();
        assert!(registry.add_node("127.0.0.1:3000"));
        assert!(!registry.add_node("127.0.0.1:3000"));
        assert!(registry.add_node("127.0.0.1:3001"));
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.known_nodes(),
            vec!["127.0.0.1:3000".to_string(), "127.0.0.1:3001".to_string()]
        );
    }

    #[test]
    fn test_evict() {
        let registry = PeerRegistry::new();
        registry.add_node("127.0.0.1:3000");
        registry.evict_node("127.0.0.1:3000");
        registry.evict_node("127.0.0.1:9999");
        assert!(registry.is_empty());
        assert!(!registry.node_is_known("127.0.0.1:3000"));
    }

    #[test]
    fn test_fetch_queue_order() {
        let registry = PeerRegistry::new();
        let items = vec![vec![1u8], vec![2u8], vec![3u8]];

        assert_eq!(registry.start_fetch(&items), Some(vec![1u8]));
        assert_eq!(registry.pending_fetches(), vec![vec![2u8], vec![3u8]]);
        assert_eq!(registry.next_to_fetch(), Some(vec![2u8]));
        assert_eq!(registry.next_to_fetch(), Some(vec![3u8]));
        assert_eq!(registry.next_to_fetch(), None);
    }

    #[test]
    fn test_new_inventory_replaces_queue() {
        let registry = PeerRegistry::new();
        registry.start_fetch(&[vec![1u8], vec![2u8]]);
        assert_eq!(registry.start_fetch(&[vec![9u8]]), Some(vec![9u8]));
        assert!(registry.pending_fetches().is_empty());
        assert_eq!(registry.start_fetch(&[]), None);
    }

    #[test]
    fn test_burst_collects_received_blocks() {
        let registry = PeerRegistry::new();
        registry.record_received(Block::default());
        registry.record_received(Block::default());
        assert_eq!(registry.finish_burst().len(), 2);
        assert!(registry.finish_burst().is_empty());
    }
}
