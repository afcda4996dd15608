//! External collaborator contracts (spec §6): the block device adapter and
//! the timestamp provider. Both are traits the host implements; the core
//! `fat32` crate only ever calls through them.

use fat32_err::{Error, IoError, Result};
use log::error;

/// Fixed sector size the engine speaks. exFAT and most removable media
/// allow other shifts, but spec §4.8 requires `bytes_per_sect == 512` at
/// mount time, so the adapter contract is pinned to it too.
pub const SECTOR_SIZE: usize = 512;

/// Two callbacks reading/writing one 512-byte sector at a disk-absolute
/// LBA. `ok` in the spec's callback description is `Result<()>` here: a
/// `false`/failed callback becomes [`fat32_err::Error::Io`].
pub trait BlockDevice {
    /// Read the sector at `lba` into `buf`.
    fn read(&mut self, buf: &mut [u8; SECTOR_SIZE], lba: u32) -> Result<()>;

    /// Write `buf` to the sector at `lba`.
    fn write(&mut self, buf: &[u8; SECTOR_SIZE], lba: u32) -> Result<()>;
}

/// Helper for adapters whose underlying I/O reports failure as `bool`
/// rather than `Result`, matching how many embedded HALs surface it.
pub fn io_read_failed() -> Error {
    error!("block device read failed");
    Error::Io(IoError::Read)
}

pub fn io_write_failed() -> Error {
    error!("block device write failed");
    Error::Io(IoError::Write)
}

/// A decoded calendar timestamp, as returned by a [`TimestampProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp {
        year: 1980,
        month: 1,
        day: 1,
        hour: 0,
        min: 0,
        sec: 0,
    };
}

/// `get_timestamp() -> {year, month, day, hour, min, sec}` (spec §6).
pub trait TimestampProvider {
    fn get_timestamp(&self) -> Timestamp;
}

/// Default implementation: always returns the FAT epoch, 1980-01-01
/// 00:00:00, exactly as spec §6 describes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpochTimestampProvider;

impl TimestampProvider for EpochTimestampProvider {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp::EPOCH
    }
}
