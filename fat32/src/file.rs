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

//! The file cursor: translating a byte offset into (cluster, sector,
//! within-sector index), a per-file 512-byte buffer independent of the
//! volume's shared window, and lazy cluster allocation on write-past-EOF
//! or forward seek.

use fat32_err::{BrokenReason, DeniedReason, Error, ParamReason, Result};

use crate::dir;
use crate::dirent::{self, EntryLoc, ATTR_ARCHIVE, SLOT_SIZE};
use crate::fat_table::{self, FatEntry};
use crate::path::{self, MountTable, Resolved};
use crate::volume::sync_fs;
use crate::window::SectorWindow;

pub const O_READ: u8 = 0x01;
pub const O_WRITE: u8 = 0x02;
pub const O_APPEND: u8 = 0x04;
pub const O_TRUNC: u8 = 0x08;
pub const O_CREATE: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Curr,
    End,
}

/// An open file handle.
pub struct File {
    mount: String,
    start_clust: u32,
    clust: u32,
    offset: u32,
    size: u32,
    flags: u8,
    buf: SectorWindow,
    group_loc: EntryLoc,
    sfn_loc: EntryLoc,
    accessed: bool,
    modified: bool,
}

impl File {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn tell(&self) -> u32 {
        self.offset
    }
}

/// Open `path` with `flags`, creating it when `CREATE` is set and no
/// entry exists. `TRUNC` eagerly resets `size` to 0; a size increase from
/// a plain write is instead deferred until `sync`.
pub(crate) fn open(mounts: &mut MountTable, path: &str, flags: u8) -> Result<File> {
    let (mount_name, vol, resolved) = path::follow_path(mounts, path)?;
    let Resolved { parent_clust, entry, last_name, .. } = resolved;

    let (start_clust, size, group_loc, sfn_loc) = match entry {
        Some(e) if e.is_dir() => return Err(Error::Path),
        Some(e) => (e.cluster, e.size, e.group_loc, e.sfn_loc),
        None if flags & O_CREATE != 0 => {
            let ts = dirent_timestamp(vol);
            let clust = fat_table::create_chain(
                &vol.geom,
                &mut vol.window,
                vol.device.as_mut(),
                &mut vol.fsinfo,
                1,
            )?;
            let loc = dir::dir_add(
                &vol.geom,
                &mut vol.window,
                vol.device.as_mut(),
                &mut vol.fsinfo,
                parent_clust,
                &last_name,
                dirent::ATTR_ARCHIVE,
                clust,
                0,
                ts,
            )?;
            (clust, 0, loc, loc)
        }
        None => return Err(Error::Denied(DeniedReason::NotFoundNoCreate)),
    };

    let size = if flags & O_TRUNC != 0 { 0 } else { size };

    let mut file = File {
        mount: mount_name,
        start_clust,
        clust: start_clust,
        offset: 0,
        size,
        flags,
        buf: SectorWindow::new(),
        group_loc,
        sfn_loc,
        accessed: false,
        modified: flags & O_TRUNC != 0,
    };

    seek(&mut file, mounts, 0, Whence::Set)?;
    if flags & O_APPEND != 0 {
        seek(&mut file, mounts, 0, Whence::End)?;
    }
    Ok(file)
}

fn dirent_timestamp(vol: &path::Volume) -> (u16, u16) {
    crate::time::pack(vol.timestamp.get_timestamp())
}

/// Read up to `buf.len()` bytes starting at the cursor, stopping at
/// end-of-file. Sets the `accessed` flag.
pub(crate) fn read(file: &mut File, mounts: &mut MountTable, buf: &mut [u8]) -> Result<usize> {
    if file.flags & O_READ == 0 {
        return Err(Error::Denied(DeniedReason::ReadOnlyHandle));
    }
    let mut total = 0usize;
    while total < buf.len() && file.offset < file.size {
        let sector_off = (file.offset % 512) as usize;
        let avail_in_sector = 512 - sector_off;
        let avail_in_file = (file.size - file.offset) as usize;
        let n = avail_in_sector.min(avail_in_file).min(buf.len() - total);
        buf[total..total + n].copy_from_slice(&file.buf.buf[sector_off..sector_off + n]);
        total += n;
        seek(file, mounts, n as i64, Whence::Curr)?;
    }
    if total > 0 {
        file.accessed = true;
    }
    Ok(total)
}

/// Write `data` starting at the cursor, extending the chain and the
/// recorded size past the current end as needed. Sets `modified` and
/// `accessed`.
pub(crate) fn write(file: &mut File, mounts: &mut MountTable, data: &[u8]) -> Result<usize> {
    if file.flags & O_WRITE == 0 {
        return Err(Error::Denied(DeniedReason::ReadOnlyHandle));
    }
    if !data.is_empty() && file.clust == 0 {
        // A pre-existing zero-length entry has no backing cluster at all
        // (a legal on-disk state); `open` only allocates one for a freshly
        // created file, so the first write here must do it, or the bytes
        // buffered below would have nowhere to flush to.
        let vol = mounts.get_mut(&file.mount)?;
        let clust =
            fat_table::create_chain(&vol.geom, &mut vol.window, vol.device.as_mut(), &mut vol.fsinfo, 1)?;
        file.start_clust = clust;
        file.clust = clust;
        let within = (file.offset as u64 / 512) % vol.geom.sect_per_clust as u64;
        let sect = vol.geom.clust_to_data_sect(clust) + within as u32;
        file.buf.move_window(vol.device.as_mut(), sect)?;
    }
    let mut total = 0usize;
    while total < data.len() {
        let sector_off = (file.offset % 512) as usize;
        let n = (512 - sector_off).min(data.len() - total);
        file.buf.buf[sector_off..sector_off + n].copy_from_slice(&data[total..total + n]);
        file.buf.dirty = true;
        total += n;
        let new_off = file.offset + n as u32;
        if new_off > file.size {
            file.size = new_off;
        }
        seek(file, mounts, n as i64, Whence::Curr)?;
    }
    if total > 0 {
        file.modified = true;
        file.accessed = true;
    }
    Ok(total)
}

/// Move the cursor and keep the per-file buffer, current cluster, and
/// offset consistent with it — pre-allocating clusters on a forward
/// seek past the chain's current end (spec §4.5 "seek").
pub(crate) fn seek(file: &mut File, mounts: &mut MountTable, offset: i64, whence: Whence) -> Result<u32> {
    let vol = mounts.get_mut(&file.mount)?;
    let bytes_per_clust = vol.geom.bytes_per_clust() as i64;

    let base: i64 = match whence {
        Whence::Set => 0,
        Whence::Curr => file.offset as i64,
        Whence::End => file.size as i64,
    };
    let target = base
        .checked_add(offset)
        .filter(|t| *t >= 0 && *t <= u32::MAX as i64)
        .ok_or(Error::Param(ParamReason::SeekOutOfRange))? as u32;

    let dst_idx = target as u64 / bytes_per_clust as u64;
    let src_idx = file.offset as u64 / bytes_per_clust as u64;

    let rewinding = dst_idx < src_idx || file.clust == 0;
    let (mut idx, mut clust) = if rewinding { (0u64, file.start_clust) } else { (src_idx, file.clust) };

    while idx < dst_idx {
        clust = if clust == 0 {
            let new = fat_table::create_chain(
                &vol.geom,
                &mut vol.window,
                vol.device.as_mut(),
                &mut vol.fsinfo,
                1,
            )?;
            file.start_clust = new;
            new
        } else {
            match fat_table::get_fat(&vol.geom, &mut vol.window, vol.device.as_mut(), clust)? {
                FatEntry::Used(next) => next,
                FatEntry::Last => fat_table::stretch(
                    &vol.geom,
                    &mut vol.window,
                    vol.device.as_mut(),
                    &mut vol.fsinfo,
                    Some(clust),
                )?,
                FatEntry::Free | FatEntry::Bad => {
                    return Err(Error::Broken(BrokenReason::ChainLink))
                }
            }
        };
        idx += 1;
    }
    file.clust = clust;

    let new_sect = if clust == 0 {
        None
    } else {
        let within = (target as u64 / 512) % vol.geom.sect_per_clust as u64;
        Some(vol.geom.clust_to_data_sect(clust) + within as u32)
    };

    if file.buf.lba() != new_sect {
        file.buf.flush(vol.device.as_mut())?;
        if let Some(sect) = new_sect {
            file.buf.move_window(vol.device.as_mut(), sect)?;
        }
    }
    file.offset = target;
    Ok(target)
}

/// Flush the per-file buffer, then — if the handle has been read or
/// written since the last sync — patch the parent directory's SFN slot
/// (access date always; modified date/time, size, and ARCHIVE only when
/// `modified`) through the volume window (spec §4.5 "sync").
pub(crate) fn sync(file: &mut File, mounts: &mut MountTable) -> Result<()> {
    let vol = mounts.get_mut(&file.mount)?;
    file.buf.flush(vol.device.as_mut())?;

    if file.accessed || file.modified {
        let now = dirent_timestamp(vol);
        vol.window.move_window(vol.device.as_mut(), file.sfn_loc.sector)?;
        let off = file.sfn_loc.idx * SLOT_SIZE;
        if file.accessed {
            vol.window.buf[off + 18..off + 20].copy_from_slice(&now.0.to_le_bytes());
        }
        if file.modified {
            vol.window.buf[off + 22..off + 24].copy_from_slice(&now.1.to_le_bytes());
            vol.window.buf[off + 24..off + 26].copy_from_slice(&now.0.to_le_bytes());
            vol.window.buf[off + 28..off + 32].copy_from_slice(&file.size.to_le_bytes());
            vol.window.buf[off + 11] |= ATTR_ARCHIVE;
            vol.window.buf[off + 20..off + 22]
                .copy_from_slice(&((file.start_clust >> 16) as u16).to_le_bytes());
            vol.window.buf[off + 26..off + 28]
                .copy_from_slice(&(file.start_clust as u16).to_le_bytes());
        }
        vol.window.dirty = true;
        sync_fs(vol)?;
        file.accessed = false;
        file.modified = false;
    }
    Ok(())
}

/// `close` is `sync` followed by discarding the handle (spec §4.5
/// "close"); the caller simply drops the returned `File`.
pub(crate) fn close(file: &mut File, mounts: &mut MountTable) -> Result<()> {
    sync(file, mounts)
}
