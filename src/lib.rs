//! # flatfs
//!
//! > A single-volume, flat block file system in pure-Rust
//!
//! This crate implements a small file system with FAT-style linked
//! allocation on top of a fixed-size virtual block device. There is one
//! volume per device and one flat namespace per volume: no directories,
//! no permissions, no timestamps. Files are persistent named byte-streams
//! with the usual open/read/write/seek/truncate/close operations.
//!
//! The device is anything that implements the [`BlockDevice`] trait; a
//! file-backed implementation ([`FileDisk`]) ships with the crate so a
//! volume can live inside an ordinary file on the host.
//!
//! ```rust
//! use flatfs::{FileDisk, Volume};
//!
//! fn example(path: &str) -> Result<(), Box<dyn std::error::Error>> {
//!     let disk = Volume::format(FileDisk::create(path)?)?;
//!     let mut volume = Volume::mount(disk)?;
//!     volume.create("greeting")?;
//!     let fd = volume.open("greeting")?;
//!     volume.write(fd, b"hello")?;
//!     volume.seek(fd, 0)?;
//!     let mut buffer = [0u8; 5];
//!     let n = volume.read(fd, &mut buffer)?;
//!     assert_eq!(&buffer[..n], b"hello");
//!     volume.close(fd)?;
//!     volume.unmount()?;
//!     Ok(())
//! }
//! ```
//!
//! The FAT and directory are held in memory while the volume is mounted
//! and written back at unmount; data blocks are written through as they
//! change. The design assumes a clean unmount - crash recovery is out of
//! scope.

use core::fmt;

mod structure;

pub mod blockdevice;
pub mod disk;
pub mod filesystem;

mod fat;
mod volume;

#[doc(inline)]
pub use crate::blockdevice::{Block, BlockCount, BlockDevice, BlockIdx};

#[doc(inline)]
pub use crate::disk::FileDisk;

#[doc(inline)]
pub use crate::filesystem::{DirEntry, Fd, Filename, FilenameError};

#[doc(inline)]
pub use crate::volume::Volume;

/// Total number of blocks on the virtual disk.
pub const DISK_BLOCKS: usize = 8192;

/// Longest permitted file name, in bytes, not counting the terminator.
pub const MAX_NAME: usize = 15;

/// How many files the directory can hold.
pub const MAX_FILES: usize = 64;

/// How many descriptors may be open at once across the volume.
pub const MAX_FILDES: usize = 32;

/// One file allocation table slot per disk block.
pub const FAT_ENTRIES: usize = DISK_BLOCKS;

/// Represents all the ways the functions in this crate can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error<E>
where
    E: core::fmt::Debug,
{
    /// The underlying block device threw an error.
    DeviceError(E),
    /// The volume is badly formatted (or this code is buggy).
    FormatError(&'static str),
    /// The given file name was bad.
    FilenameError(FilenameError),
    /// That file doesn't exist.
    FileNotFound,
    /// Tried to create a file that already exists.
    FileAlreadyExists,
    /// Tried to delete a file while descriptors still refer to it.
    FileIsOpen,
    /// Every directory entry is taken.
    DirectoryFull,
    /// Every descriptor slot is taken.
    TooManyOpenFiles,
    /// The descriptor is out of range or not open.
    BadHandle,
    /// Offset or length out of bounds for the file.
    InvalidOffset,
    /// The data region has no free block for the operation.
    NotEnoughSpace,
    /// A block chain ran onto a free slot before its end marker.
    UnterminatedChain,
}

#[rustfmt::skip]
impl<E> fmt::Display for Error<E>
where
    E: core::fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeviceError(e)      => write!(f, "block device error: {:?}", e),
            Error::FormatError(msg)    => write!(f, "bad volume format: {}", msg),
            Error::FilenameError(e)    => write!(f, "bad file name: {:?}", e),
            Error::FileNotFound        => write!(f, "file not found"),
            Error::FileAlreadyExists   => write!(f, "file already exists"),
            Error::FileIsOpen          => write!(f, "file is open"),
            Error::DirectoryFull       => write!(f, "directory is full"),
            Error::TooManyOpenFiles    => write!(f, "descriptor table is full"),
            Error::BadHandle           => write!(f, "bad file descriptor"),
            Error::InvalidOffset       => write!(f, "offset out of bounds"),
            Error::NotEnoughSpace      => write!(f, "no free blocks left"),
            Error::UnterminatedChain   => write!(f, "block chain is not terminated"),
        }
    }
}

impl<E> std::error::Error for Error<E> where E: core::fmt::Debug {}

impl<E> From<FilenameError> for Error<E>
where
    E: core::fmt::Debug,
{
    fn from(value: FilenameError) -> Error<E> {
        Error::FilenameError(value)
    }
}
