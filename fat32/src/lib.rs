// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A self-contained FAT32 filesystem engine: the FAT cluster-chain
//! allocator, the SFN/LFN directory-entry codec, the sector window
//! cache, the file cursor, and the path resolver + mount table, behind
//! one public facade, [`Fs`].
//!
//! [`Fs`] lowers every call into the directory engine and the allocator
//! through the path resolver; every touch of persistent state passes
//! through a volume's sector window so dirty writes are coalesced and
//! ordered before a mutating call's trailing `sync_fs`.

mod bpb;
mod dir;
mod dirent;
mod fat_table;
mod file;
mod path;
mod time;
mod volume;
mod window;

pub use fat32_bdev::{BlockDevice, EpochTimestampProvider, Timestamp, TimestampProvider};
pub use fat32_err::{BrokenReason, DeniedReason, Error, IoError, ParamReason, Result};

pub use dirent::{ATTR_ARCHIVE, ATTR_DIR, ATTR_HIDDEN, ATTR_LABEL, ATTR_RO, ATTR_SYS};
pub use file::{File, Whence, O_APPEND, O_CREATE, O_READ, O_TRUNC, O_WRITE};

use fat32_err::DeniedReason as Denied;

/// One decoded directory entry, as returned by `stat` and `dir_read`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub attr: u8,
    pub size: u32,
    pub created: Timestamp,
    pub modified: Timestamp,
}

impl From<dirent::DecodedEntry> for DirEntry {
    fn from(e: dirent::DecodedEntry) -> Self {
        DirEntry {
            name: e.name,
            is_dir: e.is_dir(),
            attr: e.attr,
            size: e.size,
            created: time::unpack(e.created_date, e.created_time),
            modified: time::unpack(e.modified_date, e.modified_time),
        }
    }
}

/// An open directory cursor.
pub struct Dir {
    mount: String,
    cursor: dir::DirCursor,
}

/// The process-wide mount registry and public API entry point.
#[derive(Default)]
pub struct Fs {
    mounts: path::MountTable,
}

impl Fs {
    pub fn new() -> Self {
        Fs { mounts: path::MountTable::new() }
    }

    /// Mount `device` under `name`. `partition` selects an MBR partition
    /// table entry, or `0` for an unpartitioned device.
    pub fn mount(
        &mut self,
        name: &str,
        device: Box<dyn BlockDevice>,
        timestamp: Box<dyn TimestampProvider>,
        partition: usize,
    ) -> Result<()> {
        volume::mount(&mut self.mounts, name, device, timestamp, partition)
    }

    /// Mount with the default timestamp provider, which always reports
    /// the FAT epoch.
    pub fn mount_default_clock(
        &mut self,
        name: &str,
        device: Box<dyn BlockDevice>,
        partition: usize,
    ) -> Result<()> {
        self.mount(name, device, Box::new(EpochTimestampProvider), partition)
    }

    /// Flush and remove the mounted volume.
    pub fn umount(&mut self, name: &str) -> Result<()> {
        volume::umount(&mut self.mounts, name)
    }

    /// Flush a mounted volume's window and FSInfo cache without
    /// unmounting it.
    pub fn sync(&mut self, mount_name: &str) -> Result<()> {
        let vol = self.mounts.get_mut(mount_name)?;
        volume::sync_fs(vol)
    }

    /// Resolve `path` and return its decoded metadata.
    pub fn stat(&mut self, path: &str) -> Result<DirEntry> {
        let (_, _, resolved) = path::follow_path(&mut self.mounts, path)?;
        resolved.entry.map(DirEntry::from).ok_or(Error::Path)
    }

    /// Remove a file or empty directory.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (_, vol, resolved) = path::follow_path(&mut self.mounts, path)?;
        if resolved.is_mount_root {
            return Err(Error::Denied(Denied::ProtectedEntry));
        }
        let entry = resolved.entry.ok_or(Error::Path)?;
        dir::check_unlink_allowed(&entry, false)?;

        if entry.is_dir() {
            let target = if entry.cluster == 0 { vol.root_clust } else { entry.cluster };
            if !dir::dir_is_empty(&vol.geom, &mut vol.window, vol.device.as_mut(), &mut vol.fsinfo, target)? {
                return Err(Error::Denied(Denied::DirectoryNotEmpty));
            }
            fat_table::remove_chain(&vol.geom, &mut vol.window, vol.device.as_mut(), &mut vol.fsinfo, target)?;
        } else if entry.cluster != 0 {
            fat_table::remove_chain(
                &vol.geom,
                &mut vol.window,
                vol.device.as_mut(),
                &mut vol.fsinfo,
                entry.cluster,
            )?;
        }

        dir::remove_entries(
            &vol.geom,
            &mut vol.window,
            vol.device.as_mut(),
            &mut vol.fsinfo,
            entry.group_loc,
            entry.sfn_loc,
        )?;
        volume::sync_fs(vol)
    }

    /// Open (and optionally create) a file.
    pub fn open(&mut self, path: &str, flags: u8) -> Result<File> {
        file::open(&mut self.mounts, path, flags)
    }

    pub fn read(&mut self, file: &mut File, buf: &mut [u8]) -> Result<usize> {
        file::read(file, &mut self.mounts, buf)
    }

    pub fn write(&mut self, file: &mut File, data: &[u8]) -> Result<usize> {
        file::write(file, &mut self.mounts, data)
    }

    pub fn seek(&mut self, file: &mut File, offset: i64, whence: Whence) -> Result<u32> {
        file::seek(file, &mut self.mounts, offset, whence)
    }

    pub fn file_sync(&mut self, file: &mut File) -> Result<()> {
        file::sync(file, &mut self.mounts)
    }

    /// Equivalent to `file_sync`; the caller drops the handle afterward.
    pub fn close(&mut self, mut file: File) -> Result<()> {
        file::close(&mut file, &mut self.mounts)
    }

    /// Create a directory, writing its `.`/`..` stubs before linking it
    /// into its parent.
    pub fn dir_create(&mut self, path: &str) -> Result<()> {
        let (_, vol, resolved) = path::follow_path(&mut self.mounts, path)?;
        if resolved.is_mount_root || resolved.entry.is_some() {
            return Err(Error::Path);
        }
        let ts = time::pack(vol.timestamp.get_timestamp());

        let clust =
            fat_table::create_chain(&vol.geom, &mut vol.window, vol.device.as_mut(), &mut vol.fsinfo, 1)?;
        fat_table::clust_clear(&vol.geom, &mut vol.window, vol.device.as_mut(), clust)?;
        let parent_for_dotdot = if resolved.parent_is_root { 0 } else { resolved.parent_clust };
        dir::dir_create_stub(&vol.geom, &mut vol.window, vol.device.as_mut(), clust, parent_for_dotdot, ts)?;
        dir::dir_add(
            &vol.geom,
            &mut vol.window,
            vol.device.as_mut(),
            &mut vol.fsinfo,
            resolved.parent_clust,
            &resolved.last_name,
            ATTR_DIR,
            clust,
            0,
            ts,
        )?;
        volume::sync_fs(vol)
    }

    /// Open a directory cursor positioned at its start.
    pub fn dir_open(&mut self, path: &str) -> Result<Dir> {
        let (mount_name, vol, resolved) = path::follow_path(&mut self.mounts, path)?;
        let start_clust = if resolved.is_mount_root {
            vol.root_clust
        } else {
            let entry = resolved.entry.ok_or(Error::Path)?;
            if !entry.is_dir() {
                return Err(Error::Path);
            }
            if entry.cluster == 0 {
                vol.root_clust
            } else {
                entry.cluster
            }
        };
        Ok(Dir { mount: mount_name, cursor: dir::DirCursor::new(start_clust) })
    }

    /// Decode the entry the cursor currently points at and advance past
    /// it; `Err(Error::Eof)` at the end-of-directory marker.
    pub fn dir_read(&mut self, dir: &mut Dir) -> Result<DirEntry> {
        let vol = self.mounts.get_mut(&dir.mount)?;
        dir::dir_next(&mut dir.cursor, &vol.geom, &mut vol.window, vol.device.as_mut(), &mut vol.fsinfo)?
            .map(DirEntry::from)
            .ok_or(Error::Eof)
    }

    /// Advance past one entry group without decoding it.
    pub fn dir_next(&mut self, dir: &mut Dir) -> Result<()> {
        self.dir_read(dir).map(|_| ())
    }

    /// Re-seat the cursor at the directory's start cluster.
    pub fn dir_rewind(&mut self, dir: &mut Dir) {
        dir.cursor.rewind();
    }

    /// The stable string name for a negative error code.
    pub fn get_error(code: i32) -> &'static str {
        fat32_err::code_name(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::{dir, volume};

    /// Minimal in-memory block device backing a legal (if sparse) FAT32
    /// image, used to exercise mount/probe without a real disk. FAT32
    /// requires at least 65525 clusters, so even a "minimal" image here
    /// is tens of megabytes of (zero-filled, so cheaply allocated) Vec.
    struct MemDevice {
        sectors: Mutex<Vec<[u8; 512]>>,
    }

    impl BlockDevice for MemDevice {
        fn read(&mut self, buf: &mut [u8; 512], lba: u32) -> Result<()> {
            buf.copy_from_slice(&self.sectors.lock().unwrap()[lba as usize]);
            Ok(())
        }

        fn write(&mut self, buf: &[u8; 512], lba: u32) -> Result<()> {
            self.sectors.lock().unwrap()[lba as usize].copy_from_slice(buf);
            Ok(())
        }
    }

    fn format_minimal_image() -> MemDevice {
        let rsvd = 32u32;
        let num_fats = 2u32;
        let sect_per_clust = 1u8;
        let clusters = 65_536u32;
        let sect_per_fat = (clusters * 4).div_ceil(512);
        let data_start = rsvd + sect_per_fat * num_fats;
        let total_sectors = data_start + clusters * sect_per_clust as u32;

        let mut sectors = vec![[0u8; 512]; total_sectors as usize];
        {
            let bpb = &mut sectors[0];
            bpb[0] = 0xEB;
            bpb[1] = 0x00;
            bpb[2] = 0x90;
            bpb[11..13].copy_from_slice(&512u16.to_le_bytes());
            bpb[13] = sect_per_clust;
            bpb[14..16].copy_from_slice(&(rsvd as u16).to_le_bytes());
            bpb[16] = num_fats as u8;
            bpb[36..40].copy_from_slice(&sect_per_fat.to_le_bytes());
            bpb[44..48].copy_from_slice(&2u32.to_le_bytes());
            bpb[48..50].copy_from_slice(&1u16.to_le_bytes());
            bpb[32..36].copy_from_slice(&total_sectors.to_le_bytes());
            bpb[82..90].copy_from_slice(b"FAT32   ");
            bpb[510] = 0x55;
            bpb[511] = 0xAA;

            let fsinfo = &mut sectors[1];
            fsinfo[0..4].copy_from_slice(&0x4161_5252u32.to_le_bytes());
            fsinfo[484..488].copy_from_slice(&0x6141_7272u32.to_le_bytes());
            fsinfo[488..492].copy_from_slice(&(clusters - 1).to_le_bytes());
            fsinfo[492..496].copy_from_slice(&3u32.to_le_bytes());
            fsinfo[508..512].copy_from_slice(&0xAA55_0000u32.to_le_bytes());

            for copy in 0..num_fats {
                let sect = (rsvd + copy * sect_per_fat) as usize;
                sectors[sect][0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
                sectors[sect][4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
                sectors[sect][8..12].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
            }
        }
        MemDevice { sectors: Mutex::new(sectors) }
    }

    #[test]
    fn mount_and_stat_empty_root() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        let mut d = fs.dir_open("/m").unwrap();
        let err = fs.dir_read(&mut d).unwrap_err();
        assert!(matches!(err, Error::Eof));
    }

    #[test]
    fn create_write_close_reopen_read_round_trips() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        let mut f = fs.open("/m/a.txt", O_WRITE | O_CREATE).unwrap();
        let n = fs.write(&mut f, b"Hello\n").unwrap();
        assert_eq!(n, 6);
        fs.close(f).unwrap();

        let stat = fs.stat("/m/a.txt").unwrap();
        assert_eq!(stat.size, 6);
        assert!(!stat.is_dir);

        let mut f = fs.open("/m/a.txt", O_READ).unwrap();
        let mut buf = [0u8; 6];
        let n = fs.read(&mut f, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"Hello\n");
        fs.close(f).unwrap();
    }

    #[test]
    fn mkdir_then_unlink_then_unlink_again_is_path_error() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        fs.dir_create("/m/d").unwrap();
        let stat = fs.stat("/m/d").unwrap();
        assert!(stat.is_dir);

        fs.unlink("/m/d").unwrap();
        let err = fs.unlink("/m/d").unwrap_err();
        assert!(matches!(err, Error::Path));
    }

    #[test]
    fn unlink_nonempty_directory_is_denied() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        fs.dir_create("/m/d").unwrap();
        let f = fs.open("/m/d/f", O_WRITE | O_CREATE).unwrap();
        fs.close(f).unwrap();

        let err = fs.unlink("/m/d").unwrap_err();
        assert!(matches!(err, Error::Denied(Denied::DirectoryNotEmpty)));

        fs.unlink("/m/d/f").unwrap();
        fs.unlink("/m/d").unwrap();
    }

    #[test]
    fn seek_set_curr_end_match_tell() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        let mut f = fs.open("/m/a.bin", O_WRITE | O_READ | O_CREATE).unwrap();
        let data: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
        fs.write(&mut f, &data).unwrap();

        fs.seek(&mut f, 500, Whence::Set).unwrap();
        assert_eq!(f.tell(), 500);
        let mut buf = [0u8; 10];
        fs.read(&mut f, &mut buf).unwrap();
        assert_eq!(&buf, &data[500..510]);

        fs.seek(&mut f, -5, Whence::Curr).unwrap();
        assert_eq!(f.tell(), 505);

        let end = fs.seek(&mut f, 0, Whence::End).unwrap();
        assert_eq!(end, f.size());
        fs.close(f).unwrap();
    }

    #[test]
    fn long_filename_round_trips() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        let name = "a".repeat(200) + ".bin";
        let path = format!("/m/{name}");
        let f = fs.open(&path, O_WRITE | O_CREATE).unwrap();
        fs.close(f).unwrap();

        let mut d = fs.dir_open("/m").unwrap();
        let entry = fs.dir_read(&mut d).unwrap();
        assert_eq!(entry.name, name);

        fs.unlink(&path).unwrap();
    }

    #[test]
    fn write_to_preexisting_zero_cluster_entry_persists() {
        let dev = format_minimal_image();
        let mut fs = Fs::new();
        fs.mount_default_clock("m", Box::new(dev), 0).unwrap();

        // Simulate a zero-byte file created by another implementation,
        // which on-disk carries cluster 0 (no chain allocated yet) rather
        // than the one-cluster head this engine's own `open(CREATE)` always
        // allocates.
        {
            let vol = fs.mounts.get_mut("m").unwrap();
            dir::dir_add(
                &vol.geom,
                &mut vol.window,
                vol.device.as_mut(),
                &mut vol.fsinfo,
                vol.root_clust,
                "z.txt",
                ATTR_ARCHIVE,
                0,
                0,
                (0, 0),
            )
            .unwrap();
            volume::sync_fs(vol).unwrap();
        }

        let mut f = fs.open("/m/z.txt", O_WRITE).unwrap();
        let n = fs.write(&mut f, b"hi").unwrap();
        assert_eq!(n, 2);
        fs.close(f).unwrap();

        let stat = fs.stat("/m/z.txt").unwrap();
        assert_eq!(stat.size, 2);

        let mut f = fs.open("/m/z.txt", O_READ).unwrap();
        let mut buf = [0u8; 2];
        let n = fs.read(&mut f, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf, b"hi");
        fs.close(f).unwrap();
    }
}
