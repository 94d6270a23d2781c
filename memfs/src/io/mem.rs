use std::collections::HashMap;

use super::block::{BlockNumber, BlockStore};

/// Keeps every block in a map keyed by block number. Buffers materialize on
/// first write and disappear on eviction; nothing is ever persisted.
pub struct MemoryStore {
    blocks: HashMap<BlockNumber, Box<[u8]>>,
    block_size: usize,
}

impl MemoryStore {
    pub fn new(block_size: usize) -> Self {
        Self {
            blocks: HashMap::new(),
            block_size,
        }
    }

    /// Number of blocks currently holding a buffer.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, blocknr: BlockNumber) -> Option<&[u8]> {
        self.blocks.get(&blocknr).map(|buf| &buf[..])
    }

    fn write_block(&mut self, blocknr: BlockNumber, data: &[u8]) {
        let mut buf = vec![0; self.block_size];
        let len = self.block_size.min(data.len());
        buf[..len].copy_from_slice(&data[..len]);
        self.blocks.insert(blocknr, buf.into_boxed_slice());
    }

    fn evict_block(&mut self, blocknr: BlockNumber) -> bool {
        self.blocks.remove(&blocknr).is_some()
    }
}
