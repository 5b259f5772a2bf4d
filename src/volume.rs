//! The mounted volume and the public file API.

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

use log::{debug, info, warn};

use crate::blockdevice::{Block, BlockDevice, BlockIdx};
use crate::fat::{Fat, Superblock};
use crate::filesystem::{DirEntry, Directory, Fd, FileHandle, Filename};
use crate::{Error, DISK_BLOCKS, MAX_FILDES};

// ****************************************************************************
//
// Public Types
//
// ****************************************************************************

/// A mounted volume.
///
/// The volume owns its block device for the lifetime of the mount, so a
/// file operation cannot reach an unmounted volume and a device cannot be
/// mounted twice. [`Volume::unmount`] flushes the file allocation table
/// and the directory back to the device and hands the device back.
///
/// Several independent volumes may be live at once, each over its own
/// device. Nothing here is shared between them.
pub struct Volume<D>
where
    D: BlockDevice,
{
    block_device: D,
    superblock: Superblock,
    fat: Fat,
    dir: Directory,
    handles: [Option<FileHandle>; MAX_FILDES],
}

// ****************************************************************************
//
// Public Functions / Impl for Public Types
//
// ****************************************************************************

impl<D> Volume<D>
where
    D: BlockDevice,
{
    /// Write an empty file system onto the device, then hand the device
    /// back for mounting. Whatever the device held before is gone.
    pub fn format(block_device: D) -> Result<D, Error<D::Error>> {
        check_capacity(&block_device)?;
        let superblock = Superblock::default_layout();
        info!("formatting volume: {:?}", superblock);
        block_device
            .write(&[superblock.to_block()], BlockIdx(0))
            .map_err(Error::DeviceError)?;
        let fat = Fat::new_empty(superblock.data_start);
        block_device
            .write(&fat.to_blocks(), superblock.fat_start)
            .map_err(Error::DeviceError)?;
        let dir = Directory::new_empty();
        block_device
            .write(&dir.to_blocks(superblock.dir_blocks), superblock.dir_start)
            .map_err(Error::DeviceError)?;
        Ok(block_device)
    }

    /// Load a formatted volume from the device.
    ///
    /// Reads the superblock, the whole FAT region and the whole directory
    /// region, validating all three. The descriptor table starts empty.
    pub fn mount(block_device: D) -> Result<Volume<D>, Error<D::Error>> {
        check_capacity(&block_device)?;
        let mut blocks = [Block::new()];
        block_device
            .read(&mut blocks, BlockIdx(0), "read_superblock")
            .map_err(Error::DeviceError)?;
        let superblock = Superblock::create_from_block(&blocks[0]).map_err(Error::FormatError)?;

        let mut fat_blocks = vec![Block::new(); superblock.fat_blocks.0 as usize];
        block_device
            .read(&mut fat_blocks, superblock.fat_start, "read_fat")
            .map_err(Error::DeviceError)?;
        let fat = Fat::from_blocks(&fat_blocks, superblock.data_start).map_err(Error::FormatError)?;

        let mut dir_blocks = vec![Block::new(); superblock.dir_blocks.0 as usize];
        block_device
            .read(&mut dir_blocks, superblock.dir_start, "read_dir")
            .map_err(Error::DeviceError)?;
        let dir =
            Directory::from_blocks(&dir_blocks, superblock.data_start).map_err(Error::FormatError)?;

        // every file's chain must cover its size
        for (_, entry) in dir.iter() {
            let blocks_needed = blocks_for(entry.size);
            if fat.chain(entry.head).take(blocks_needed).count() < blocks_needed {
                return Err(Error::UnterminatedChain);
            }
        }

        debug!(
            "mounted volume: {} file(s), {} free block(s)",
            dir.iter().count(),
            fat.free_count()
        );
        Ok(Volume {
            block_device,
            superblock,
            fat,
            dir,
            handles: [None; MAX_FILDES],
        })
    }

    /// Flush the FAT and the directory back to the device and release it.
    ///
    /// Descriptors still open at this point are discarded; the files they
    /// referred to are unaffected.
    pub fn unmount(self) -> Result<D, Error<D::Error>> {
        let open = self.handles.iter().flatten().count();
        if open > 0 {
            warn!("unmounting with {} descriptor(s) still open", open);
        }
        self.block_device
            .write(&self.fat.to_blocks(), self.superblock.fat_start)
            .map_err(Error::DeviceError)?;
        self.block_device
            .write(
                &self.dir.to_blocks(self.superblock.dir_blocks),
                self.superblock.dir_start,
            )
            .map_err(Error::DeviceError)?;
        Ok(self.block_device)
    }

    /// Temporarily get access to the underlying block device.
    pub fn device(&mut self) -> &mut D {
        &mut self.block_device
    }

    /// Create an empty file. The name must be unused.
    pub fn create(&mut self, name: &str) -> Result<(), Error<D::Error>> {
        let filename = Filename::create_from_str(name)?;
        if self.dir.find(&filename).is_some() {
            return Err(Error::FileAlreadyExists);
        }
        let slot = self.dir.first_free_slot().ok_or(Error::DirectoryFull)?;
        debug!("create {:?} in slot {}", filename, slot);
        self.dir.insert(
            slot,
            DirEntry {
                name: filename,
                size: 0,
                head: None,
                ref_cnt: 0,
            },
        );
        Ok(())
    }

    /// Delete a file and free its blocks. Refused while any descriptor
    /// still refers to the file.
    pub fn delete(&mut self, name: &str) -> Result<(), Error<D::Error>> {
        let filename = Filename::create_from_str(name)?;
        let index = self.dir.find(&filename).ok_or(Error::FileNotFound)?;
        let head = match self.dir.get(index) {
            Some(entry) if entry.ref_cnt > 0 => {
                warn!("delete {:?} refused: {} descriptor(s) open", filename, entry.ref_cnt);
                return Err(Error::FileIsOpen);
            }
            Some(entry) => entry.head,
            None => return Err(Error::FileNotFound),
        };
        debug!("delete {:?} from slot {}", filename, index);
        self.fat.free_chain(head);
        self.dir.clear(index);
        Ok(())
    }

    /// Open a file, returning a descriptor with its offset at zero.
    ///
    /// A file may be open through several descriptors at once; each keeps
    /// its own offset.
    pub fn open(&mut self, name: &str) -> Result<Fd, Error<D::Error>> {
        let filename = Filename::create_from_str(name)?;
        let file = self.dir.find(&filename).ok_or(Error::FileNotFound)?;
        let slot = self
            .handles
            .iter()
            .position(|handle| handle.is_none())
            .ok_or(Error::TooManyOpenFiles)?;
        self.handles[slot] = Some(FileHandle { file, offset: 0 });
        if let Some(entry) = self.dir.get_mut(file) {
            entry.ref_cnt += 1;
        }
        debug!("open {:?} as fd {}", filename, slot);
        Ok(Fd(slot))
    }

    /// Close a descriptor.
    pub fn close(&mut self, fd: Fd) -> Result<(), Error<D::Error>> {
        let FileHandle { file, .. } = self.handle(fd)?;
        self.handles[fd.0] = None;
        if let Some(entry) = self.dir.get_mut(file) {
            entry.ref_cnt -= 1;
        }
        Ok(())
    }

    /// Read from the descriptor's current offset into `buffer`.
    ///
    /// Returns how many bytes were copied: the buffer length, capped at
    /// the bytes remaining before end-of-file. At or past end-of-file the
    /// result is 0.
    pub fn read(&mut self, fd: Fd, buffer: &mut [u8]) -> Result<usize, Error<D::Error>> {
        let FileHandle { file, offset } = self.handle(fd)?;
        let (head, size) = match self.dir.get(file) {
            Some(entry) => (entry.head, entry.size),
            None => return Err(Error::BadHandle),
        };
        if offset >= size {
            return Ok(0);
        }
        let to_read = buffer.len().min((size - offset) as usize);
        let mut read = 0;
        let mut pos = offset;
        let mut chain = self
            .fat
            .chain(head)
            .skip((offset / Block::LEN_U32) as usize);
        while read < to_read {
            let block_idx = match chain.next() {
                Some(b) => b,
                None => break,
            };
            let mut blocks = [Block::new()];
            self.block_device
                .read(&mut blocks, block_idx, "read")
                .map_err(Error::DeviceError)?;
            let block_offset = (pos % Block::LEN_U32) as usize;
            let to_copy = (Block::LEN - block_offset).min(to_read - read);
            buffer[read..read + to_copy]
                .copy_from_slice(&blocks[0][block_offset..block_offset + to_copy]);
            read += to_copy;
            pos += to_copy as u32;
        }
        if let Some(handle) = self.handles[fd.0].as_mut() {
            handle.offset = pos;
        }
        Ok(read)
    }

    /// Write `buffer` at the descriptor's current offset, growing the
    /// file as needed.
    ///
    /// Returns how many bytes landed. A result shorter than the buffer
    /// means the data region filled up part-way; `NotEnoughSpace` is only
    /// an error when nothing at all could be written. After a device
    /// error the file's size and chain still describe every byte that was
    /// successfully written.
    pub fn write(&mut self, fd: Fd, buffer: &[u8]) -> Result<usize, Error<D::Error>> {
        let FileHandle { file, mut offset } = self.handle(fd)?;
        let (mut head, mut size) = match self.dir.get(file) {
            Some(entry) => (entry.head, entry.size),
            None => return Err(Error::BadHandle),
        };
        let mut written = 0;
        // the block the previous iteration used, so consecutive blocks
        // cost one chain step instead of a walk from the head
        let mut cursor: Option<(usize, BlockIdx)> = None;
        'copy: while written < buffer.len() {
            let file_block = (offset / Block::LEN_U32) as usize;
            let resolved = match cursor {
                Some((k, b)) if k == file_block => Some(b),
                Some((k, b)) if k + 1 == file_block => self.fat.walk(Some(b), 1),
                _ => self.fat.walk(head, file_block),
            };
            let (block_idx, fresh) = match resolved {
                Some(b) => (b, false),
                None => {
                    // the chain ends right before this block; grow it by one
                    let tail = match cursor {
                        Some((k, b)) if k + 1 == file_block => Some(b),
                        _ if file_block > 0 => self.fat.walk(head, file_block - 1),
                        _ => None,
                    };
                    match self.fat.append(tail) {
                        Some(b) => {
                            if head.is_none() {
                                head = Some(b);
                            }
                            (b, true)
                        }
                        None => {
                            warn!("data region full after {} byte(s)", written);
                            break 'copy;
                        }
                    }
                }
            };
            cursor = Some((file_block, block_idx));
            let block_offset = (offset % Block::LEN_U32) as usize;
            let to_copy = (Block::LEN - block_offset).min(buffer.len() - written);
            // a fresh block starts out all zeros; anything else keeps its
            // bytes around the slice being overwritten
            let mut blocks = [Block::new()];
            if !fresh && (block_offset != 0 || to_copy != Block::LEN) {
                self.block_device
                    .read(&mut blocks, block_idx, "write_fill")
                    .map_err(Error::DeviceError)?;
            }
            blocks[0][block_offset..block_offset + to_copy]
                .copy_from_slice(&buffer[written..written + to_copy]);
            if let Err(e) = self.block_device.write(&blocks, block_idx) {
                if fresh {
                    // the block never got its bytes; drop it so the chain
                    // matches the committed size again
                    head = self.fat.shrink(head, blocks_for(size));
                    if let Some(entry) = self.dir.get_mut(file) {
                        entry.head = head;
                    }
                }
                return Err(Error::DeviceError(e));
            }
            written += to_copy;
            offset += to_copy as u32;
            if offset > size {
                size = offset;
            }
            if let Some(entry) = self.dir.get_mut(file) {
                entry.head = head;
                entry.size = size;
            }
            if let Some(handle) = self.handles[fd.0].as_mut() {
                handle.offset = offset;
            }
        }
        if written == 0 && !buffer.is_empty() {
            return Err(Error::NotEnoughSpace);
        }
        Ok(written)
    }

    /// Move the descriptor's offset. The offset may land anywhere from 0
    /// to the file's size inclusive; seeking past end-of-file is refused.
    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<(), Error<D::Error>> {
        let FileHandle { file, .. } = self.handle(fd)?;
        let size = match self.dir.get(file) {
            Some(entry) => entry.size,
            None => return Err(Error::BadHandle),
        };
        if offset > size {
            return Err(Error::InvalidOffset);
        }
        if let Some(handle) = self.handles[fd.0].as_mut() {
            handle.offset = offset;
        }
        Ok(())
    }

    /// Cut the file down to `length` bytes, freeing the blocks past the
    /// new end. Truncate only shrinks; a length beyond the current size
    /// is refused.
    ///
    /// The offset of every descriptor open on the file - not just this
    /// one - is clamped to the new length, so no descriptor is ever left
    /// pointing past end-of-file.
    pub fn truncate(&mut self, fd: Fd, length: u32) -> Result<(), Error<D::Error>> {
        let FileHandle { file, .. } = self.handle(fd)?;
        let (head, size) = match self.dir.get(file) {
            Some(entry) => (entry.head, entry.size),
            None => return Err(Error::BadHandle),
        };
        if length > size {
            return Err(Error::InvalidOffset);
        }
        debug!("truncate fd {} from {} to {} byte(s)", fd.0, size, length);
        let new_head = self.fat.shrink(head, blocks_for(length));
        if let Some(entry) = self.dir.get_mut(file) {
            entry.head = new_head;
            entry.size = length;
        }
        for handle in self.handles.iter_mut().flatten() {
            if handle.file == file && handle.offset > length {
                handle.offset = length;
            }
        }
        Ok(())
    }

    /// The size in bytes of the descriptor's file.
    pub fn file_size(&self, fd: Fd) -> Result<u32, Error<D::Error>> {
        let FileHandle { file, .. } = self.handle(fd)?;
        match self.dir.get(file) {
            Some(entry) => Ok(entry.size),
            None => Err(Error::BadHandle),
        }
    }

    /// The names of every file on the volume, in directory order.
    pub fn list_files(&self) -> Vec<Filename> {
        self.dir.iter().map(|(_, entry)| entry.name).collect()
    }

    /// Call `func` for every directory entry, in directory order.
    pub fn iterate_files<F>(&self, mut func: F)
    where
        F: FnMut(&DirEntry),
    {
        for (_, entry) in self.dir.iter() {
            func(entry);
        }
    }

    /// Unallocated blocks remaining in the data region.
    pub fn free_data_blocks(&self) -> usize {
        self.fat.free_count()
    }

    fn handle(&self, fd: Fd) -> Result<FileHandle, Error<D::Error>> {
        self.handles
            .get(fd.0)
            .copied()
            .flatten()
            .ok_or(Error::BadHandle)
    }
}

// ****************************************************************************
//
// Private Functions
//
// ****************************************************************************

/// Blocks needed to hold `bytes` bytes.
fn blocks_for(bytes: u32) -> usize {
    ((bytes + Block::LEN_U32 - 1) / Block::LEN_U32) as usize
}

fn check_capacity<D>(block_device: &D) -> Result<(), Error<D::Error>>
where
    D: BlockDevice,
{
    let num_blocks = block_device.num_blocks().map_err(Error::DeviceError)?;
    if (num_blocks.0 as usize) < DISK_BLOCKS {
        return Err(Error::FormatError("device too small for the volume"));
    }
    Ok(())
}

// ****************************************************************************
//
// Unit Tests
//
// ****************************************************************************

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::FileDisk;
    use crate::{FilenameError, MAX_FILDES, MAX_FILES};
    use std::path::PathBuf;

    const DATA_BLOCKS: usize = DISK_BLOCKS - 10;

    fn disk_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    fn fresh_volume(path: &PathBuf) -> Volume<FileDisk> {
        let _ = env_logger::builder().is_test(true).try_init();
        let disk = Volume::format(FileDisk::create(path).unwrap()).unwrap();
        Volume::mount(disk).unwrap()
    }

    #[test]
    fn freshly_formatted_volume_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let volume = fresh_volume(&disk_path(&dir, "disk.img"));
        assert!(volume.list_files().is_empty());
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS);

        // and stays empty across a mount cycle
        let device = volume.unmount().unwrap();
        let volume = Volume::mount(device).unwrap();
        assert!(volume.list_files().is_empty());
    }

    #[test]
    fn create_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("a").unwrap();
        let fd = volume.open("a").unwrap();
        assert_eq!(fd, Fd(0));
        assert_eq!(volume.write(fd, b"hello").unwrap(), 5);
        assert_eq!(volume.file_size(fd).unwrap(), 5);
        volume.seek(fd, 0).unwrap();
        let mut buffer = [0u8; 5];
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"hello");
        volume.close(fd).unwrap();
        volume.delete("a").unwrap();
        assert!(volume.list_files().is_empty());
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS);
    }

    #[test]
    fn descriptors_keep_independent_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("shared").unwrap();
        let first = volume.open("shared").unwrap();
        let second = volume.open("shared").unwrap();
        assert_eq!((first, second), (Fd(0), Fd(1)));
        assert_eq!(volume.write(first, b"abc").unwrap(), 3);
        // the second descriptor still reads from the start
        let mut buffer = [0u8; 3];
        assert_eq!(volume.read(second, &mut buffer).unwrap(), 3);
        assert_eq!(&buffer, b"abc");
    }

    #[test]
    fn writes_cross_block_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("big").unwrap();
        let fd = volume.open("big").unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(volume.write(fd, &data).unwrap(), 5000);
        assert_eq!(volume.file_size(fd).unwrap(), 5000);
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS - 2);

        volume.seek(fd, 4090).unwrap();
        let mut buffer = [0u8; 20];
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 20);
        assert_eq!(&buffer[..], &data[4090..4110]);
    }

    #[test]
    fn overwrites_preserve_their_surroundings() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("patchy").unwrap();
        let fd = volume.open("patchy").unwrap();
        volume.write(fd, b"0123456789").unwrap();
        volume.seek(fd, 3).unwrap();
        volume.write(fd, b"XYZ").unwrap();
        assert_eq!(volume.file_size(fd).unwrap(), 10);
        volume.seek(fd, 0).unwrap();
        let mut buffer = [0u8; 10];
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 10);
        assert_eq!(&buffer, b"012XYZ6789");
    }

    #[test]
    fn truncate_frees_trailing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("big").unwrap();
        let fd = volume.open("big").unwrap();
        let data = vec![0x5A; 5000];
        assert_eq!(volume.write(fd, &data).unwrap(), 5000);
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS - 2);

        volume.truncate(fd, 1).unwrap();
        assert_eq!(volume.file_size(fd).unwrap(), 1);
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS - 1);

        // the surviving byte is intact and the offset was clamped
        let mut buffer = [0u8; 4];
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 0);
        volume.seek(fd, 0).unwrap();
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 1);
        assert_eq!(buffer[0], 0x5A);

        volume.truncate(fd, 0).unwrap();
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS);
    }

    #[test]
    fn truncate_clamps_every_open_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("shared").unwrap();
        let first = volume.open("shared").unwrap();
        let second = volume.open("shared").unwrap();
        volume.write(first, &vec![1u8; 5000]).unwrap();
        volume.seek(second, 4000).unwrap();

        volume.truncate(first, 100).unwrap();
        // both descriptors now sit at the new end
        let mut buffer = [0u8; 8];
        assert_eq!(volume.read(first, &mut buffer).unwrap(), 0);
        assert_eq!(volume.read(second, &mut buffer).unwrap(), 0);
        volume.seek(second, 100).unwrap();
        assert!(matches!(
            volume.seek(second, 101),
            Err(Error::InvalidOffset)
        ));
    }

    #[test]
    fn directory_fills_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        for i in 0..MAX_FILES {
            volume.create(&format!("file{}", i)).unwrap();
        }
        assert!(matches!(
            volume.create("one_too_many"),
            Err(Error::DirectoryFull)
        ));
        assert_eq!(volume.list_files().len(), MAX_FILES);
    }

    #[test]
    fn descriptor_table_fills_and_guards_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("popular").unwrap();
        let fds: Vec<Fd> = (0..MAX_FILDES)
            .map(|_| volume.open("popular").unwrap())
            .collect();
        assert!(matches!(
            volume.open("popular"),
            Err(Error::TooManyOpenFiles)
        ));
        assert!(matches!(volume.delete("popular"), Err(Error::FileIsOpen)));
        for fd in fds {
            volume.close(fd).unwrap();
        }
        volume.delete("popular").unwrap();
    }

    #[test]
    fn contents_survive_a_mount_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = disk_path(&dir, "disk.img");
        let mut volume = fresh_volume(&path);
        volume.create("keep").unwrap();
        let fd = volume.open("keep").unwrap();
        let data: Vec<u8> = (0..9000u32).map(|i| (i * 7 % 251) as u8).collect();
        volume.write(fd, &data).unwrap();
        volume.unmount().unwrap();

        let mut volume = Volume::mount(FileDisk::open(&path).unwrap()).unwrap();
        let names = volume.list_files();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].as_bytes(), b"keep");
        let fd = volume.open("keep").unwrap();
        assert_eq!(volume.file_size(fd).unwrap(), 9000);
        let mut back = vec![0u8; 9000];
        assert_eq!(volume.read(fd, &mut back).unwrap(), 9000);
        assert_eq!(back, data);
    }

    #[test]
    fn reads_stop_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("short").unwrap();
        let fd = volume.open("short").unwrap();
        volume.write(fd, b"abc").unwrap();
        // offset is at the end: nothing more to read
        let mut buffer = [0u8; 16];
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 0);
        // a large request is capped at the file size
        volume.seek(fd, 1).unwrap();
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"bc");
        // reading an empty file is 0 too
        volume.create("empty").unwrap();
        let fd = volume.open("empty").unwrap();
        assert_eq!(volume.read(fd, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn argument_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("f").unwrap();
        let fd = volume.open("f").unwrap();
        volume.write(fd, b"12345").unwrap();

        assert!(matches!(volume.seek(fd, 6), Err(Error::InvalidOffset)));
        volume.seek(fd, 5).unwrap();
        assert!(matches!(volume.truncate(fd, 6), Err(Error::InvalidOffset)));

        assert!(matches!(volume.read(Fd(7), &mut [0u8; 1]), Err(Error::BadHandle)));
        assert!(matches!(
            volume.read(Fd(MAX_FILDES + 1), &mut [0u8; 1]),
            Err(Error::BadHandle)
        ));
        volume.close(fd).unwrap();
        assert!(matches!(volume.close(fd), Err(Error::BadHandle)));

        assert!(matches!(volume.open("ghost"), Err(Error::FileNotFound)));
        assert!(matches!(volume.delete("ghost"), Err(Error::FileNotFound)));
        volume.create("f2").unwrap();
        assert!(matches!(volume.create("f"), Err(Error::FileAlreadyExists)));
        assert!(matches!(
            volume.create("far_too_long_a_name"),
            Err(Error::FilenameError(FilenameError::NameTooLong))
        ));
    }

    #[test]
    fn exhausting_the_allocator_short_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("hog").unwrap();
        let fd = volume.open("hog").unwrap();
        // leave exactly one free block
        let almost_all = vec![0xEE; (DATA_BLOCKS - 1) * Block::LEN];
        assert_eq!(volume.write(fd, &almost_all).unwrap(), almost_all.len());
        assert_eq!(volume.free_data_blocks(), 1);

        // two blocks requested, one block of room: a short write
        let two_blocks = vec![0xDD; 2 * Block::LEN];
        assert_eq!(volume.write(fd, &two_blocks).unwrap(), Block::LEN);
        assert_eq!(volume.free_data_blocks(), 0);

        // nothing at all fits any more
        assert!(matches!(
            volume.write(fd, b"x"),
            Err(Error::NotEnoughSpace)
        ));
        // an empty write is still fine
        assert_eq!(volume.write(fd, b"").unwrap(), 0);

        // freeing the file brings the space back
        volume.close(fd).unwrap();
        volume.delete("hog").unwrap();
        assert_eq!(volume.free_data_blocks(), DATA_BLOCKS);
    }

    #[test]
    fn iterate_files_visits_in_directory_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("first").unwrap();
        volume.create("second").unwrap();
        let mut seen = Vec::new();
        volume.iterate_files(|entry| seen.push((entry.name, entry.size)));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0.as_bytes(), b"first");
        assert_eq!(seen[1].0.as_bytes(), b"second");
    }

    #[test]
    fn delete_reuses_the_lowest_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut volume = fresh_volume(&disk_path(&dir, "disk.img"));
        volume.create("a").unwrap();
        volume.create("b").unwrap();
        volume.create("c").unwrap();
        volume.delete("b").unwrap();
        volume.create("d").unwrap();
        let names: Vec<Vec<u8>> = volume
            .list_files()
            .iter()
            .map(|n| n.as_bytes().to_vec())
            .collect();
        assert_eq!(names, [b"a".to_vec(), b"d".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn mount_rejects_a_blank_device() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FileDisk::create(disk_path(&dir, "blank.img")).unwrap();
        // all-zero block 0 is not a valid superblock
        assert!(Volume::mount(disk).is_err());
    }
}
