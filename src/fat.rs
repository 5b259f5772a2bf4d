//! The file allocation table and the on-disk volume layout.
//!
//! Every file is a singly linked chain of data-region blocks. The chain
//! links live in the FAT: one slot per disk block, holding either a free
//! marker, an end-of-chain marker, or the index of the successor block.
//! The whole table is held in memory while the volume is mounted and
//! written back at unmount.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use static_assertions::{const_assert, const_assert_eq};

use crate::blockdevice::{Block, BlockCount, BlockIdx};
use crate::filesystem::DIR_ENTRY_LEN;
use crate::structure::define_field;
use crate::{DISK_BLOCKS, FAT_ENTRIES, MAX_FILES};

/// Raw FAT value marking an unallocated block.
const FAT_FREE: i32 = -1;
/// Raw FAT value terminating a chain.
const FAT_END: i32 = -2;

/// Bytes of one FAT slot on disk.
const FAT_SLOT_LEN: usize = 4;

// The default layout written by `format`. Block 0 holds the superblock,
// the directory and FAT follow, and everything from `data_idx` up is file
// data. Existing volumes depend on these exact values.
const DEFAULT_DIR_IDX: u32 = 1;
const DEFAULT_DIR_LEN: u32 = 1;
const DEFAULT_FAT_IDX: u32 = 2;
const DEFAULT_FAT_LEN: u32 = 8;
const DEFAULT_DATA_IDX: u32 = 10;

// The fixed tables must fit their default regions.
const_assert_eq!(
    FAT_ENTRIES * FAT_SLOT_LEN,
    DEFAULT_FAT_LEN as usize * Block::LEN
);
const_assert!(MAX_FILES * DIR_ENTRY_LEN <= DEFAULT_DIR_LEN as usize * Block::LEN);

/// One slot of the file allocation table.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum FatEntry {
    /// The block is unallocated.
    Free,
    /// The block is the last block of its chain.
    EndOfChain,
    /// The block is followed by the given block.
    Next(BlockIdx),
}

impl FatEntry {
    fn from_raw(raw: i32, data_start: BlockIdx) -> Result<FatEntry, &'static str> {
        match raw {
            FAT_FREE => Ok(FatEntry::Free),
            FAT_END => Ok(FatEntry::EndOfChain),
            n if n >= data_start.0 as i32 && n < DISK_BLOCKS as i32 => {
                Ok(FatEntry::Next(BlockIdx(n as u32)))
            }
            _ => Err("FAT link outside the data region"),
        }
    }

    fn to_raw(self) -> i32 {
        match self {
            FatEntry::Free => FAT_FREE,
            FatEntry::EndOfChain => FAT_END,
            FatEntry::Next(block) => block.0 as i32,
        }
    }
}

/// The in-memory file allocation table.
///
/// Only blocks in the data region are ever handed out; the metadata
/// blocks below `data_start` keep permanently-free slots.
pub(crate) struct Fat {
    entries: Vec<FatEntry>,
    data_start: BlockIdx,
    /// No data-region slot below this index is free.
    next_free: BlockIdx,
}

impl Fat {
    /// A table with every slot free, as written by `format`.
    pub(crate) fn new_empty(data_start: BlockIdx) -> Fat {
        Fat {
            entries: vec![FatEntry::Free; FAT_ENTRIES],
            data_start,
            next_free: data_start,
        }
    }

    /// Decode the table from its on-disk blocks.
    pub(crate) fn from_blocks(blocks: &[Block], data_start: BlockIdx) -> Result<Fat, &'static str> {
        let mut entries = Vec::with_capacity(FAT_ENTRIES);
        for slot in 0..FAT_ENTRIES {
            let byte = slot * FAT_SLOT_LEN;
            let raw = LittleEndian::read_i32(
                &blocks[byte / Block::LEN][byte % Block::LEN..byte % Block::LEN + FAT_SLOT_LEN],
            );
            entries.push(FatEntry::from_raw(raw, data_start)?);
        }
        Ok(Fat {
            entries,
            data_start,
            next_free: data_start,
        })
    }

    /// Encode the table into the blocks of the FAT region.
    pub(crate) fn to_blocks(&self) -> Vec<Block> {
        let mut blocks = vec![Block::new(); (FAT_ENTRIES * FAT_SLOT_LEN) / Block::LEN];
        for (slot, entry) in self.entries.iter().enumerate() {
            let byte = slot * FAT_SLOT_LEN;
            LittleEndian::write_i32(
                &mut blocks[byte / Block::LEN]
                    [byte % Block::LEN..byte % Block::LEN + FAT_SLOT_LEN],
                entry.to_raw(),
            );
        }
        blocks
    }

    fn get(&self, block: BlockIdx) -> FatEntry {
        self.entries[block.0 as usize]
    }

    fn set(&mut self, block: BlockIdx, entry: FatEntry) {
        if entry == FatEntry::Free && block < self.next_free {
            self.next_free = block;
        }
        self.entries[block.0 as usize] = entry;
    }

    /// Allocate the lowest-numbered free data block, marking it as the
    /// end of a chain. `None` when the data region is exhausted.
    pub(crate) fn allocate(&mut self) -> Option<BlockIdx> {
        // nothing below next_free is free, so this scan still finds the
        // lowest free slot overall
        for block in self.next_free.0..DISK_BLOCKS as u32 {
            if self.entries[block as usize] == FatEntry::Free {
                self.entries[block as usize] = FatEntry::EndOfChain;
                self.next_free = BlockIdx(block + 1);
                debug!("allocated block {}", block);
                return Some(BlockIdx(block));
            }
        }
        warn!("no free blocks left");
        None
    }

    /// Allocate a fresh end-of-chain block and hang it off `prev`, the
    /// current tail of its chain. With `None` the new block starts a
    /// chain of its own, for the caller to install as head.
    pub(crate) fn append(&mut self, prev: Option<BlockIdx>) -> Option<BlockIdx> {
        let new_block = self.allocate()?;
        if let Some(prev) = prev {
            self.set(prev, FatEntry::Next(new_block));
        }
        Some(new_block)
    }

    /// Free every block of the chain rooted at `head`. `None` is a no-op.
    pub(crate) fn free_chain(&mut self, head: Option<BlockIdx>) {
        let mut current = head;
        while let Some(block) = current {
            let next = match self.get(block) {
                FatEntry::Next(n) => Some(n),
                _ => None,
            };
            self.set(block, FatEntry::Free);
            current = next;
        }
    }

    /// Cut the chain rooted at `head` down to its first `keep` blocks,
    /// freeing the rest, and return the new head.
    pub(crate) fn shrink(&mut self, head: Option<BlockIdx>, keep: usize) -> Option<BlockIdx> {
        if keep == 0 {
            self.free_chain(head);
            return None;
        }
        let head_block = head?;
        let mut tail = head_block;
        for _ in 1..keep {
            match self.get(tail) {
                FatEntry::Next(n) => tail = n,
                // chain is already short enough
                _ => return head,
            }
        }
        if let FatEntry::Next(rest) = self.get(tail) {
            self.set(tail, FatEntry::EndOfChain);
            self.free_chain(Some(rest));
        }
        head
    }

    /// The `n`-th block (0-based) of the chain rooted at `head`, or
    /// `None` if the chain is shorter than that.
    pub(crate) fn walk(&self, head: Option<BlockIdx>, n: usize) -> Option<BlockIdx> {
        self.chain(head).nth(n)
    }

    /// Iterate the block indices of the chain rooted at `head`, in file
    /// order.
    pub(crate) fn chain(&self, head: Option<BlockIdx>) -> Chain<'_> {
        Chain {
            fat: self,
            next: head,
        }
    }

    /// Free slots remaining in the data region.
    pub(crate) fn free_count(&self) -> usize {
        self.entries[self.data_start.0 as usize..]
            .iter()
            .filter(|entry| **entry == FatEntry::Free)
            .count()
    }
}

/// Iterator over the blocks of one chain.
pub(crate) struct Chain<'a> {
    fat: &'a Fat,
    next: Option<BlockIdx>,
}

impl Iterator for Chain<'_> {
    type Item = BlockIdx;

    fn next(&mut self) -> Option<BlockIdx> {
        let current = self.next?;
        self.next = match self.fat.get(current) {
            FatEntry::Next(n) => Some(n),
            FatEntry::EndOfChain => None,
            FatEntry::Free => {
                warn!("chain ran onto a free slot at block {}", current.0);
                None
            }
        };
        Some(current)
    }
}

/// The volume layout record stored in block 0: where the FAT, the
/// directory and the data region live. Five little-endian 32-bit words.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct Superblock {
    pub(crate) fat_start: BlockIdx,
    pub(crate) fat_blocks: BlockCount,
    pub(crate) dir_start: BlockIdx,
    pub(crate) dir_blocks: BlockCount,
    pub(crate) data_start: BlockIdx,
}

/// Read-side view of block 0.
struct SuperblockRecord<'a> {
    data: &'a [u8; Block::LEN],
}

impl<'a> SuperblockRecord<'a> {
    define_field!(fat_idx, u32, 0);
    define_field!(fat_len, u32, 4);
    define_field!(dir_idx, u32, 8);
    define_field!(dir_len, u32, 12);
    define_field!(data_idx, u32, 16);
}

impl Superblock {
    /// The layout `format` writes.
    pub(crate) fn default_layout() -> Superblock {
        Superblock {
            fat_start: BlockIdx(DEFAULT_FAT_IDX),
            fat_blocks: BlockCount(DEFAULT_FAT_LEN),
            dir_start: BlockIdx(DEFAULT_DIR_IDX),
            dir_blocks: BlockCount(DEFAULT_DIR_LEN),
            data_start: BlockIdx(DEFAULT_DATA_IDX),
        }
    }

    /// Parse and validate block 0.
    pub(crate) fn create_from_block(block: &Block) -> Result<Superblock, &'static str> {
        let record = SuperblockRecord {
            data: &block.contents,
        };
        let fat = record.fat_idx()..record.fat_idx().saturating_add(record.fat_len());
        let dir = record.dir_idx()..record.dir_idx().saturating_add(record.dir_len());
        let data_idx = record.data_idx();

        // block 0 belongs to the superblock; the metadata regions sit
        // between it and the data region, without touching each other
        if fat.start < 1 || dir.start < 1 {
            return Err("metadata region overlaps the superblock");
        }
        if fat.is_empty() || dir.is_empty() {
            return Err("empty metadata region");
        }
        if fat.end > data_idx || dir.end > data_idx {
            return Err("metadata region overlaps the data region");
        }
        if fat.start < dir.end && dir.start < fat.end {
            return Err("FAT and directory regions overlap");
        }
        if data_idx as usize > DISK_BLOCKS {
            return Err("data region beyond the end of the disk");
        }
        if (record.fat_len() as usize) * Block::LEN < FAT_ENTRIES * FAT_SLOT_LEN {
            return Err("FAT region too small for the volume");
        }
        if (record.dir_len() as usize) * Block::LEN < MAX_FILES * DIR_ENTRY_LEN {
            return Err("directory region too small for the volume");
        }

        Ok(Superblock {
            fat_start: BlockIdx(fat.start),
            fat_blocks: BlockCount(record.fat_len()),
            dir_start: BlockIdx(dir.start),
            dir_blocks: BlockCount(record.dir_len()),
            data_start: BlockIdx(data_idx),
        })
    }

    /// Serialise into block 0's bytes.
    pub(crate) fn to_block(&self) -> Block {
        let mut block = Block::new();
        LittleEndian::write_u32(&mut block[0..4], self.fat_start.0);
        LittleEndian::write_u32(&mut block[4..8], self.fat_blocks.0);
        LittleEndian::write_u32(&mut block[8..12], self.dir_start.0);
        LittleEndian::write_u32(&mut block[12..16], self.dir_blocks.0);
        LittleEndian::write_u32(&mut block[16..20], self.data_start.0);
        block
    }
}
