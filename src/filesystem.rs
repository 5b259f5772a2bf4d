//! File names, directory entries, and open-file bookkeeping.

use byteorder::{ByteOrder, LittleEndian};

use crate::blockdevice::{Block, BlockCount, BlockIdx};
use crate::structure::define_field;
use crate::{DISK_BLOCKS, MAX_FILES, MAX_NAME};

/// Raw directory value for "no head block".
const NO_HEAD: i32 = -1;

/// Bytes per directory record on disk.
pub(crate) const DIR_ENTRY_LEN: usize = 32;

/// Various things that can go wrong with a file name.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FilenameError {
    /// The name is empty.
    Empty,
    /// The name is longer than [`crate::MAX_NAME`] bytes.
    NameTooLong,
    /// The name contains a NUL byte.
    InvalidCharacter,
}

/// The name of a file: up to [`crate::MAX_NAME`] bytes, stored NUL-padded.
///
/// Names compare byte-for-byte; there is no case folding.
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Filename {
    pub(crate) contents: [u8; MAX_NAME + 1],
}

impl Filename {
    /// Validate a string and convert it into a `Filename`.
    pub fn create_from_str(name: &str) -> Result<Filename, FilenameError> {
        Self::from_bytes(name.as_bytes())
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Filename, FilenameError> {
        if bytes.is_empty() {
            return Err(FilenameError::Empty);
        }
        if bytes.len() > MAX_NAME {
            return Err(FilenameError::NameTooLong);
        }
        if bytes.contains(&0) {
            return Err(FilenameError::InvalidCharacter);
        }
        let mut contents = [0u8; MAX_NAME + 1];
        contents[..bytes.len()].copy_from_slice(bytes);
        Ok(Filename { contents })
    }

    /// The name without its NUL padding.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .contents
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.contents.len());
        &self.contents[..len]
    }
}

impl core::fmt::Debug for Filename {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(fmt, "{:?}", s),
            Err(_e) => write!(fmt, "{:?}", self.as_bytes()),
        }
    }
}

impl core::fmt::Display for Filename {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        match core::str::from_utf8(self.as_bytes()) {
            Ok(s) => write!(fmt, "{}", s),
            Err(_e) => write!(fmt, "{:?}", self.as_bytes()),
        }
    }
}

/// The directory's record of one file.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct DirEntry {
    /// The file's name.
    pub name: Filename,
    /// The file's length in bytes.
    pub size: u32,
    /// First block of the file's chain; `None` until data is written.
    pub(crate) head: Option<BlockIdx>,
    /// How many open descriptors refer to this entry. A file cannot be
    /// deleted while this is non-zero.
    pub(crate) ref_cnt: u32,
}

/// Read-side view of one 32-byte directory record as stored on disk.
///
/// Layout: `used` word, 16 name bytes (NUL-terminated), `size` word,
/// `head` word, one reserved word. The reserved word held the descriptor
/// count in older volumes; descriptors never survive a mount cycle, so it
/// is written as zero and ignored on read.
pub(crate) struct OnDiskDirEntry<'a> {
    data: &'a [u8],
}

impl<'a> OnDiskDirEntry<'a> {
    /// Bytes per directory record.
    pub(crate) const LEN: usize = DIR_ENTRY_LEN;

    define_field!(used, u32, 0);
    define_field!(size, u32, 20);
    define_field!(head, i32, 24);

    pub(crate) fn new(data: &'a [u8]) -> OnDiskDirEntry<'a> {
        OnDiskDirEntry { data }
    }

    fn name_bytes(&self) -> &[u8] {
        &self.data[4..4 + MAX_NAME + 1]
    }

    /// Decode into a `DirEntry`; `None` for an unused record.
    pub(crate) fn get_entry(
        &self,
        data_start: BlockIdx,
    ) -> Result<Option<DirEntry>, &'static str> {
        if self.used() == 0 {
            return Ok(None);
        }
        let name_bytes = self.name_bytes();
        if name_bytes[MAX_NAME] != 0 {
            return Err("unterminated file name");
        }
        let terminated = &name_bytes[..name_bytes.iter().position(|b| *b == 0).unwrap_or(0)];
        let name = Filename::from_bytes(terminated).map_err(|_| "bad file name on disk")?;
        let head = match self.head() {
            NO_HEAD => None,
            n if n >= data_start.0 as i32 && n < DISK_BLOCKS as i32 => Some(BlockIdx(n as u32)),
            _ => return Err("file head outside the data region"),
        };
        let size = self.size();
        if (size == 0) != head.is_none() {
            return Err("file size does not match its chain");
        }
        Ok(Some(DirEntry {
            name,
            size,
            head,
            ref_cnt: 0,
        }))
    }
}

impl DirEntry {
    /// Encode as a 32-byte on-disk record.
    pub(crate) fn serialize(&self) -> [u8; DIR_ENTRY_LEN] {
        let mut data = [0u8; DIR_ENTRY_LEN];
        LittleEndian::write_u32(&mut data[0..4], 1);
        data[4..4 + MAX_NAME + 1].copy_from_slice(&self.name.contents);
        LittleEndian::write_u32(&mut data[20..24], self.size);
        let head = match self.head {
            Some(block) => block.0 as i32,
            None => NO_HEAD,
        };
        LittleEndian::write_i32(&mut data[24..28], head);
        data
    }
}

/// The volume's flat directory: a fixed table of [`crate::MAX_FILES`]
/// file slots.
pub(crate) struct Directory {
    entries: [Option<DirEntry>; MAX_FILES],
}

impl Directory {
    /// A directory with every slot unused, as written by `format`.
    pub(crate) fn new_empty() -> Directory {
        Directory {
            entries: [None; MAX_FILES],
        }
    }

    /// Decode the directory from its on-disk blocks.
    pub(crate) fn from_blocks(
        blocks: &[Block],
        data_start: BlockIdx,
    ) -> Result<Directory, &'static str> {
        let mut dir = Directory::new_empty();
        for slot in 0..MAX_FILES {
            let byte = slot * OnDiskDirEntry::LEN;
            let record = OnDiskDirEntry::new(
                &blocks[byte / Block::LEN][byte % Block::LEN..byte % Block::LEN + OnDiskDirEntry::LEN],
            );
            dir.entries[slot] = record.get_entry(data_start)?;
        }
        for (i, entry) in dir.iter() {
            if dir.iter().any(|(j, other)| j > i && other.name == entry.name) {
                return Err("duplicate file name in directory");
            }
        }
        Ok(dir)
    }

    /// Encode the directory into the blocks of its on-disk region.
    pub(crate) fn to_blocks(&self, region: BlockCount) -> Vec<Block> {
        let mut blocks = vec![Block::new(); region.0 as usize];
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some(entry) = entry {
                let byte = slot * OnDiskDirEntry::LEN;
                blocks[byte / Block::LEN]
                    [byte % Block::LEN..byte % Block::LEN + OnDiskDirEntry::LEN]
                    .copy_from_slice(&entry.serialize());
            }
        }
        blocks
    }

    /// Linear search for a file by name.
    pub(crate) fn find(&self, name: &Filename) -> Option<usize> {
        self.iter()
            .find(|(_, entry)| entry.name == *name)
            .map(|(i, _)| i)
    }

    /// Lowest-numbered unused slot.
    pub(crate) fn first_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(|entry| entry.is_none())
    }

    pub(crate) fn get(&self, index: usize) -> Option<&DirEntry> {
        self.entries.get(index).and_then(|entry| entry.as_ref())
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut DirEntry> {
        self.entries.get_mut(index).and_then(|entry| entry.as_mut())
    }

    pub(crate) fn insert(&mut self, index: usize, entry: DirEntry) {
        self.entries[index] = Some(entry);
    }

    pub(crate) fn clear(&mut self, index: usize) {
        self.entries[index] = None;
    }

    /// Used entries in slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &DirEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.as_ref().map(|e| (i, e)))
    }
}

/// An open-file descriptor, as handed out by [`crate::Volume::open`].
///
/// Descriptors are slot indices: the lowest free slot is reused first, and
/// a descriptor is only meaningful against the volume that produced it.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Fd(pub usize);

/// Per-descriptor state: which directory slot the descriptor refers to,
/// and its independent read/write position.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct FileHandle {
    pub(crate) file: usize,
    pub(crate) offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation() {
        assert!(Filename::create_from_str("a").is_ok());
        assert!(Filename::create_from_str("fifteen_bytes..").is_ok());
        assert_eq!(
            Filename::create_from_str("sixteen_bytes..."),
            Err(FilenameError::NameTooLong)
        );
        assert_eq!(Filename::create_from_str(""), Err(FilenameError::Empty));
        assert_eq!(
            Filename::create_from_str("nul\0byte"),
            Err(FilenameError::InvalidCharacter)
        );
    }

    #[test]
    fn filename_compares_without_padding() {
        let a = Filename::create_from_str("data.log").unwrap();
        let b = Filename::create_from_str("data.log").unwrap();
        let c = Filename::create_from_str("data.log2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_bytes(), b"data.log");
        assert_eq!(format!("{}", a), "data.log");
    }

    #[test]
    fn dir_entry_round_trips() {
        let entry = DirEntry {
            name: Filename::create_from_str("kernel.bin").unwrap(),
            size: 12345,
            head: Some(BlockIdx(42)),
            ref_cnt: 3,
        };
        let raw = entry.serialize();
        let back = OnDiskDirEntry::new(&raw)
            .get_entry(BlockIdx(10))
            .unwrap()
            .unwrap();
        assert_eq!(back.name, entry.name);
        assert_eq!(back.size, entry.size);
        assert_eq!(back.head, entry.head);
        // descriptor counts never persist
        assert_eq!(back.ref_cnt, 0);
    }

    #[test]
    fn unused_record_decodes_to_none() {
        let raw = [0u8; DIR_ENTRY_LEN];
        assert_eq!(OnDiskDirEntry::new(&raw).get_entry(BlockIdx(10)), Ok(None));
    }

    #[test]
    fn decode_rejects_incoherent_records() {
        let entry = DirEntry {
            name: Filename::create_from_str("a").unwrap(),
            size: 5,
            head: Some(BlockIdx(10)),
            ref_cnt: 0,
        };

        // head pointing into the metadata region
        let mut raw = entry.serialize();
        LittleEndian::write_i32(&mut raw[24..28], 3);
        assert!(OnDiskDirEntry::new(&raw).get_entry(BlockIdx(10)).is_err());

        // non-zero size with no chain
        let mut raw = entry.serialize();
        LittleEndian::write_i32(&mut raw[24..28], NO_HEAD);
        assert!(OnDiskDirEntry::new(&raw).get_entry(BlockIdx(10)).is_err());

        // name missing its terminator
        let mut raw = entry.serialize();
        for b in raw[4..4 + MAX_NAME + 1].iter_mut() {
            *b = b'x';
        }
        assert!(OnDiskDirEntry::new(&raw).get_entry(BlockIdx(10)).is_err());
    }

    #[test]
    fn directory_round_trips_and_rejects_duplicates() {
        let mut dir = Directory::new_empty();
        dir.insert(
            0,
            DirEntry {
                name: Filename::create_from_str("one").unwrap(),
                size: 0,
                head: None,
                ref_cnt: 0,
            },
        );
        dir.insert(
            5,
            DirEntry {
                name: Filename::create_from_str("two").unwrap(),
                size: 4096,
                head: Some(BlockIdx(11)),
                ref_cnt: 0,
            },
        );
        let blocks = dir.to_blocks(BlockCount(1));
        let back = Directory::from_blocks(&blocks, BlockIdx(10)).unwrap();
        let names: Vec<(usize, Filename)> = back.iter().map(|(i, e)| (i, e.name)).collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].0, 0);
        assert_eq!(names[1].0, 5);
        assert_eq!(back.find(&Filename::create_from_str("two").unwrap()), Some(5));
        assert_eq!(back.find(&Filename::create_from_str("three").unwrap()), None);

        // two slots with the same name cannot be loaded
        let mut dup = Directory::new_empty();
        let entry = DirEntry {
            name: Filename::create_from_str("twin").unwrap(),
            size: 0,
            head: None,
            ref_cnt: 0,
        };
        dup.insert(1, entry);
        dup.insert(2, entry);
        let blocks = dup.to_blocks(BlockCount(1));
        assert!(Directory::from_blocks(&blocks, BlockIdx(10)).is_err());
    }
}
