//! A block device backed by a regular file on the host.
//!
//! This is the driver used to keep a whole volume inside one ordinary
//! file: block `n` lives at byte offset `n * Block::LEN`. The image is
//! created zero-filled at its final size and never grows or shrinks
//! afterwards; transfers outside the image are refused.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;

use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx};
use crate::DISK_BLOCKS;

/// A virtual disk stored in a regular file.
pub struct FileDisk {
    file: RefCell<File>,
    num_blocks: BlockCount,
}

impl FileDisk {
    /// Create a zero-initialised disk image of [`DISK_BLOCKS`] blocks at
    /// `path`, replacing whatever was there before.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<FileDisk> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((DISK_BLOCKS * Block::LEN) as u64)?;
        Ok(FileDisk {
            file: RefCell::new(file),
            num_blocks: BlockCount(DISK_BLOCKS as u32),
        })
    }

    /// Open an existing disk image.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<FileDisk> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % Block::LEN as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "disk image is not a whole number of blocks",
            ));
        }
        Ok(FileDisk {
            file: RefCell::new(file),
            num_blocks: BlockCount((len / Block::LEN as u64) as u32),
        })
    }

    fn check_range(&self, start: BlockIdx, count: usize) -> io::Result<()> {
        if u64::from(start.0) + count as u64 > u64::from(self.num_blocks.0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "block index beyond the end of the disk",
            ));
        }
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    type Error = io::Error;

    fn read(
        &self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        trace!(
            "read {} block(s) at {:?} ({})",
            blocks.len(),
            start_block_idx,
            reason
        );
        self.check_range(start_block_idx, blocks.len())?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(
            u64::from(start_block_idx.0) * Block::LEN as u64,
        ))?;
        for block in blocks.iter_mut() {
            file.read_exact(&mut block.contents)?;
        }
        Ok(())
    }

    fn write(&self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        trace!("write {} block(s) at {:?}", blocks.len(), start_block_idx);
        self.check_range(start_block_idx, blocks.len())?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(
            u64::from(start_block_idx.0) * Block::LEN as u64,
        ))?;
        for block in blocks.iter() {
            file.write_all(&block.contents)?;
        }
        Ok(())
    }

    fn num_blocks(&self) -> Result<BlockCount, Self::Error> {
        Ok(self.num_blocks)
    }
}
