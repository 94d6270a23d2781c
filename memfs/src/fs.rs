use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use thiserror::Error;

use crate::alloc::Bitmap;
use crate::clock::{Clock, SystemClock};
use crate::dir::{DirEntry, Directory, NAME_MAX};
use crate::io::{BlockStore, MemoryStore};
use crate::node::{FileType, Inode, DIRECT_BLOCKS};
use crate::sb::{FsState, SuperBlock};

/// Root directory is always inode 2; inodes 0 and 1 are system reserved.
pub const ROOT_INO: u32 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no such file or directory")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("not a regular file")]
    NotAFile,
    #[error("no free inodes")]
    OutOfInodes,
    #[error("no free blocks")]
    OutOfBlocks,
    #[error("file exceeds the direct block capacity")]
    FileTooLarge,
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Point-in-time accounting snapshot. Formatting for humans is left to
/// whoever consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: usize,
    pub free_blocks: u64,
    pub free_inodes: u64,
    pub live_inodes: usize,
    pub state: FsState,
}

/// An in-memory Unix-style filesystem: a superblock ledger and two bitmaps
/// govern allocation, an inode table and a lazily filled directory cache hold
/// the namespace, and file contents live in a block store keyed by block
/// number.
///
/// Every multi-step allocation sequence is transactional against capacity
/// failures: the bitmap half and the ledger half of each allocation move
/// together, and a failure mid-sequence releases everything the failing call
/// had claimed.
pub struct MemFs<S: BlockStore> {
    store: S,
    sb: SuperBlock,
    inode_map: Bitmap,
    block_map: Bitmap,
    inodes: BTreeMap<u32, Inode>,
    dirs: HashMap<u32, Directory>,
    clock: Box<dyn Clock>,
}

impl MemFs<MemoryStore> {
    /// Builds a filesystem over a fresh in-memory store using the wall clock
    /// for timestamps.
    pub fn new(block_size: usize, total_blocks: u64, total_inodes: u64) -> Result<Self> {
        Self::with_store(
            MemoryStore::new(block_size),
            total_blocks,
            total_inodes,
            Box::new(SystemClock),
        )
    }
}

impl<S: BlockStore> MemFs<S> {
    /// Builds a filesystem over caller-supplied storage and clock. The root
    /// directory exists as soon as this returns.
    pub fn with_store(
        store: S,
        total_blocks: u64,
        total_inodes: u64,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        if store.block_size() == 0 {
            return Err(FsError::InvalidArgument(
                "block size must be non-zero".to_string(),
            ));
        }
        if total_blocks < 2 || total_inodes <= u64::from(ROOT_INO) {
            return Err(FsError::InvalidArgument(
                "geometry leaves no room for the root directory".to_string(),
            ));
        }

        let sb = SuperBlock::new(store.block_size(), total_blocks, total_inodes);
        let mut inode_map = Bitmap::new(total_inodes as usize);
        let mut block_map = Bitmap::new(total_blocks as usize);

        inode_map.reserve(0);
        inode_map.reserve(1);
        for block in 0..sb.first_data_block() {
            block_map.reserve(block as usize);
        }

        let mut fs = MemFs {
            store,
            sb,
            inode_map,
            block_map,
            inodes: BTreeMap::new(),
            dirs: HashMap::new(),
            clock,
        };
        fs.create_root()?;
        info!(
            "initialized filesystem: {} blocks of {} bytes, {} inodes",
            total_blocks,
            fs.sb.block_size(),
            total_inodes
        );
        Ok(fs)
    }

    fn create_root(&mut self) -> Result<()> {
        let now = self.clock.now_millis();
        let root = Inode::new(ROOT_INO, FileType::Directory, 0, 0, now);
        let dir = Directory::new(&root, ROOT_INO)?;

        self.inode_map.reserve(ROOT_INO as usize);
        self.sb.allocate_inode();
        self.inodes.insert(ROOT_INO, root);
        self.dirs.insert(ROOT_INO, dir);
        Ok(())
    }

    /// Creates an empty regular file at `path`. The parent must already exist
    /// and the leaf name must be free.
    pub fn create_file(&mut self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.mutate(|fs| fs.create_node(path, FileType::RegularFile, uid, gid))
    }

    /// Creates a directory at `path`, seeded with `.` and a `..` pointing at
    /// its true parent.
    pub fn create_directory(&mut self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.mutate(|fs| fs.create_node(path, FileType::Directory, uid, gid))
    }

    /// Replaces the contents of the regular file at `path` with `data`.
    ///
    /// Writes are truncate-and-rewrite: fresh blocks are claimed for the new
    /// contents before the old ones are released, so a write that fails on
    /// capacity leaves the previous contents fully intact.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        self.mutate(|fs| fs.write_file_inner(path, data))
    }

    /// Reads the whole file at `path`. Holes in the block map read as zeroes.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let ino = self.resolve_path(path)?;
        let node = self.node(ino)?;
        if node.file_type() != FileType::RegularFile {
            return Err(FsError::NotAFile);
        }

        let block_size = self.sb.block_size();
        let size = node.size() as usize;
        let mut data = vec![0; size];
        let block_count = (size + block_size - 1) / block_size;
        for logical in 0..block_count {
            let block = match node.block_number(logical) {
                Some(block) => block,
                // Unmapped block: keep the zero fill.
                None => continue,
            };
            if let Some(buf) = self.store.read_block(block) {
                let offset = logical * block_size;
                let len = block_size.min(size - offset);
                data[offset..offset + len].copy_from_slice(&buf[..len]);
            }
        }

        let now = self.clock.now_millis();
        self.node_mut(ino)?.touch_accessed(now);
        Ok(data)
    }

    /// Names inside the directory at `path`, without `.` and `..`. A path
    /// that does not resolve to a directory yields an empty listing, not an
    /// error.
    pub fn list_directory(&mut self, path: &str) -> Vec<String> {
        let ino = match self.resolve_path(path) {
            Ok(ino) => ino,
            Err(_) => return Vec::new(),
        };
        match self.node(ino) {
            Ok(node) if node.file_type() == FileType::Directory => (),
            _ => return Vec::new(),
        }
        let dir = match self.get_directory(ino) {
            Ok(dir) => dir,
            Err(_) => return Vec::new(),
        };

        dir.entries()
            .iter()
            .filter(|e| e.name() != "." && e.name() != "..")
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Removes the regular file at `path`, returning its blocks and inode to
    /// the free pools. Link count is recorded but not honored: deletion is
    /// immediate.
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        self.mutate(|fs| fs.delete_file_inner(path))
    }

    /// Metadata for the object at `path`. Does not count as an access.
    pub fn stat(&mut self, path: &str) -> Result<&Inode> {
        let ino = self.resolve_path(path)?;
        self.node(ino)
    }

    pub fn stats(&self) -> FsStats {
        FsStats {
            block_size: self.sb.block_size(),
            free_blocks: self.sb.free_blocks(),
            free_inodes: self.sb.free_inodes(),
            live_inodes: self.inodes.len(),
            state: self.sb.state(),
        }
    }

    /// Brackets a mutating operation: the superblock reads `Dirty` while the
    /// operation is in flight and `Clean` again once it has either applied
    /// fully or rolled back fully.
    fn mutate<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.sb.set_state(FsState::Dirty);
        let result = op(self);
        self.sb.set_state(FsState::Clean);
        result
    }

    fn create_node(&mut self, path: &str, ftype: FileType, uid: u32, gid: u32) -> Result<()> {
        let (parent_ino, name) = self.resolve_parent(path)?;
        if self.get_directory(parent_ino)?.find_entry(&name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let ino = self.alloc_inode()?;
        let now = self.clock.now_millis();
        let node = Inode::new(ino, ftype, uid, gid, now);
        if ftype == FileType::Directory {
            let dir = Directory::new(&node, parent_ino)?;
            self.dirs.insert(ino, dir);
        }
        self.inodes.insert(ino, node);

        self.get_directory(parent_ino)?
            .add_entry(DirEntry::new(ino, &name, ftype));
        self.touch_modified(parent_ino);
        debug!("created {:?} {} as inode {}", ftype, path, ino);
        Ok(())
    }

    fn write_file_inner(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let ino = self.resolve_path(path)?;
        if self.node(ino)?.file_type() != FileType::RegularFile {
            return Err(FsError::NotAFile);
        }

        let block_size = self.sb.block_size();
        let blocks_needed = (data.len() + block_size - 1) / block_size;
        if blocks_needed > DIRECT_BLOCKS {
            return Err(FsError::FileTooLarge);
        }

        let mut new_blocks = Vec::with_capacity(blocks_needed);
        for _ in 0..blocks_needed {
            match self.alloc_block() {
                Ok(block) => new_blocks.push(block),
                Err(err) => {
                    warn!(
                        "write to {} failed mid-allocation, rolling back {} blocks",
                        path,
                        new_blocks.len()
                    );
                    for block in new_blocks {
                        self.release_block(block);
                    }
                    return Err(err);
                }
            }
        }

        // The old contents go away only once the new allocation is fully in
        // hand.
        let old_blocks = self.node_mut(ino)?.clear_blocks();
        for block in old_blocks {
            self.release_block(block);
        }

        let now = self.clock.now_millis();
        let node = self.node_mut(ino)?;
        for &block in &new_blocks {
            node.add_block(block);
        }
        node.set_size(data.len() as u64);
        node.touch_modified(now);

        for (chunk, &block) in data.chunks(block_size).zip(&new_blocks) {
            self.store.write_block(block, chunk);
        }
        Ok(())
    }

    fn delete_file_inner(&mut self, path: &str) -> Result<()> {
        let (parent_ino, name) = self.resolve_parent(path)?;
        let ino = self.resolve_path(path)?;
        if self.node(ino)?.file_type() != FileType::RegularFile {
            return Err(FsError::NotAFile);
        }

        let node = self.inodes.remove(&ino).ok_or(FsError::NotFound)?;
        for logical in 0..DIRECT_BLOCKS {
            if let Some(block) = node.block_number(logical) {
                self.release_block(block);
            }
        }
        self.release_inode(ino);

        self.get_directory(parent_ino)?.remove_entry(&name);
        self.touch_modified(parent_ino);
        debug!("deleted {} (inode {})", path, ino);
        Ok(())
    }

    /// Walks `path` from the root to an inode number. `/` is the root itself.
    fn resolve_path(&mut self, path: &str) -> Result<u32> {
        let parts = parse_path(path);
        self.resolve_components(&parts)
    }

    fn resolve_components(&mut self, parts: &[&str]) -> Result<u32> {
        let mut current = ROOT_INO;
        for part in parts {
            if self.node(current)?.file_type() != FileType::Directory {
                return Err(FsError::NotADirectory);
            }
            let entry_ino = self
                .get_directory(current)?
                .find_entry(part)
                .map(|e| e.ino())
                .ok_or(FsError::NotFound)?;
            if !self.inodes.contains_key(&entry_ino) {
                return Err(FsError::NotFound);
            }
            current = entry_ino;
        }
        Ok(current)
    }

    /// Splits `path` into its parent directory's inode and the leaf name.
    /// The parent must resolve to a directory.
    fn resolve_parent(&mut self, path: &str) -> Result<(u32, String)> {
        let parts = parse_path(path);
        let name = match parts.last() {
            Some(name) => name.to_string(),
            None => {
                return Err(FsError::InvalidArgument(
                    "path has no final component".to_string(),
                ))
            }
        };
        if name.len() > NAME_MAX {
            return Err(FsError::InvalidArgument("name too long".to_string()));
        }

        let parent_ino = self.resolve_components(&parts[..parts.len() - 1])?;
        if self.node(parent_ino)?.file_type() != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok((parent_ino, name))
    }

    /// Returns the cached directory for an inode, realizing it from the inode
    /// table on first touch. Cache entries live for the filesystem's
    /// lifetime; only deletion of the inode itself retires them.
    fn get_directory(&mut self, ino: u32) -> Result<&mut Directory> {
        if !self.dirs.contains_key(&ino) {
            let node = self.inodes.get(&ino).ok_or(FsError::NotFound)?;
            // A directory realized outside create_directory has lost its
            // parent link; `..` falls back to the directory itself.
            let dir = Directory::new(node, ino)?;
            self.dirs.insert(ino, dir);
        }
        self.dirs.get_mut(&ino).ok_or(FsError::NotFound)
    }

    fn node(&self, ino: u32) -> Result<&Inode> {
        self.inodes.get(&ino).ok_or(FsError::NotFound)
    }

    fn node_mut(&mut self, ino: u32) -> Result<&mut Inode> {
        self.inodes.get_mut(&ino).ok_or(FsError::NotFound)
    }

    fn touch_modified(&mut self, ino: u32) {
        let now = self.clock.now_millis();
        if let Some(node) = self.inodes.get_mut(&ino) {
            node.touch_modified(now);
        }
    }

    /// Claims an inode number, keeping bitmap and ledger in step. If the
    /// ledger refuses after the bitmap committed, the bit is released again.
    fn alloc_inode(&mut self) -> Result<u32> {
        let ino = self.inode_map.allocate().ok_or(FsError::OutOfInodes)?;
        if !self.sb.allocate_inode() {
            self.inode_map.free(ino);
            return Err(FsError::OutOfInodes);
        }
        Ok(ino as u32)
    }

    fn alloc_block(&mut self) -> Result<u32> {
        let block = self.block_map.allocate().ok_or(FsError::OutOfBlocks)?;
        if !self.sb.allocate_block() {
            self.block_map.free(block);
            return Err(FsError::OutOfBlocks);
        }
        Ok(block as u32)
    }

    fn release_inode(&mut self, ino: u32) {
        self.inode_map.free(ino as usize);
        self.sb.free_inode();
    }

    fn release_block(&mut self, block: u32) {
        self.block_map.free(block as usize);
        self.store.evict_block(block);
        self.sb.free_block();
    }
}

/// Strips leading and trailing slashes and splits on `/`. An all-slash or
/// empty path yields no components, which resolution reads as the root.
fn parse_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect()
}
