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

//! Directory traversal: walking a cluster chain's 32-byte slots, decoding
//! LFN+SFN groups, searching by name, and growing a directory to add a
//! new entry.

use fat32_bdev::BlockDevice;
use fat32_err::{BrokenReason, DeniedReason, Error, Result};

use crate::dirent::{
    self, DecodedEntry, EntryLoc, ATTR_LFN, ENTRY_END, ENTRY_FREE, MAX_LFN_SLOTS, SLOTS_PER_SECTOR,
    SLOT_SIZE,
};
use crate::fat_table::{self, FatEntry, FsInfoCache, Geometry};
use crate::window::SectorWindow;

/// A 32-byte slot's raw bytes plus the location it was read from.
struct RawSlot {
    raw: [u8; SLOT_SIZE],
    loc: EntryLoc,
}

/// Cursor over one directory's cluster chain. Root and non-root
/// directories are both just chains starting at some cluster — the root
/// directory is an ordinary cluster chain like any other.
pub(crate) struct DirCursor {
    start_clust: u32,
    clust: u32,
    sector_in_clust: u32,
    idx: usize,
}

impl DirCursor {
    pub(crate) fn new(start_clust: u32) -> Self {
        DirCursor { start_clust, clust: start_clust, sector_in_clust: 0, idx: 0 }
    }

    pub(crate) fn rewind(&mut self) {
        self.clust = self.start_clust;
        self.sector_in_clust = 0;
        self.idx = 0;
    }

    fn loc(&self, geom: &Geometry) -> EntryLoc {
        EntryLoc {
            cluster: self.clust,
            sector: geom.clust_to_data_sect(self.clust) + self.sector_in_clust,
            idx: self.idx,
        }
    }

    /// Advance one slot, crossing sector and cluster boundaries. Returns
    /// `Ok(false)` at the natural end of the chain (no more clusters and
    /// `extend` is false); with `extend` true, a directory's last
    /// cluster is grown via [`fat_table::stretch`] instead of ending.
    fn advance(
        &mut self,
        geom: &Geometry,
        window: &mut SectorWindow,
        device: &mut dyn BlockDevice,
        fsinfo: &mut FsInfoCache,
        extend: bool,
    ) -> Result<bool> {
        self.idx += 1;
        if self.idx < SLOTS_PER_SECTOR {
            return Ok(true);
        }
        self.idx = 0;
        self.sector_in_clust += 1;
        if self.sector_in_clust < geom.sect_per_clust as u32 {
            return Ok(true);
        }
        self.sector_in_clust = 0;
        match fat_table::get_fat(geom, window, device, self.clust)? {
            FatEntry::Used(next) => {
                self.clust = next;
                Ok(true)
            }
            FatEntry::Last if extend => {
                let next = fat_table::stretch(geom, window, device, fsinfo, Some(self.clust))?;
                fat_table::clust_clear(geom, window, device, next)?;
                self.clust = next;
                Ok(true)
            }
            FatEntry::Last => Ok(false),
            FatEntry::Free | FatEntry::Bad => Err(Error::Broken(BrokenReason::ChainLink)),
        }
    }

    fn read_slot(
        &self,
        geom: &Geometry,
        window: &mut SectorWindow,
        device: &mut dyn BlockDevice,
    ) -> Result<RawSlot> {
        let sect = geom.clust_to_data_sect(self.clust) + self.sector_in_clust;
        window.move_window(device, sect)?;
        let off = self.idx * SLOT_SIZE;
        let mut raw = [0u8; SLOT_SIZE];
        raw.copy_from_slice(&window.buf[off..off + SLOT_SIZE]);
        Ok(RawSlot { raw, loc: self.loc(geom) })
    }

    fn write_slot(
        &self,
        geom: &Geometry,
        window: &mut SectorWindow,
        device: &mut dyn BlockDevice,
        raw: &[u8; SLOT_SIZE],
    ) -> Result<()> {
        let sect = geom.clust_to_data_sect(self.clust) + self.sector_in_clust;
        window.move_window(device, sect)?;
        let off = self.idx * SLOT_SIZE;
        window.buf[off..off + SLOT_SIZE].copy_from_slice(raw);
        window.dirty = true;
        Ok(())
    }
}

/// Read and decode the next entry (LFN group, if any, plus its owning
/// SFN) starting at the cursor's current position, leaving the cursor on
/// the slot immediately after the group. Returns `Ok(None)` at the
/// end-of-directory marker.
pub(crate) fn dir_next(
    cursor: &mut DirCursor,
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
) -> Result<Option<DecodedEntry>> {
    loop {
        let slot = cursor.read_slot(geom, window, device)?;
        if slot.raw[0] == ENTRY_END {
            return Ok(None);
        }
        if slot.raw[0] == ENTRY_FREE {
            if !cursor.advance(geom, window, device, fsinfo, false)? {
                return Ok(None);
            }
            continue;
        }
        if slot.raw[11] == ATTR_LFN {
            let group_loc = slot.loc;
            let mut lfn_slots = vec![slot.raw];
            let mut expect_seq = slot.raw[0] & !0x40;
            if slot.raw[0] & 0x40 == 0 || expect_seq == 0 || expect_seq > MAX_LFN_SLOTS {
                return Err(Error::Broken(BrokenReason::LfnGroup));
            }
            let checksum = slot.raw[13];
            while expect_seq > 1 {
                if !cursor.advance(geom, window, device, fsinfo, false)? {
                    return Err(Error::Broken(BrokenReason::LfnGroup));
                }
                let next = cursor.read_slot(geom, window, device)?;
                if next.raw[11] != ATTR_LFN || next.raw[13] != checksum || next.raw[0] != expect_seq - 1
                {
                    return Err(Error::Broken(BrokenReason::LfnGroup));
                }
                lfn_slots.push(next.raw);
                expect_seq -= 1;
            }
            if !cursor.advance(geom, window, device, fsinfo, false)? {
                return Err(Error::Broken(BrokenReason::LfnGroup));
            }
            let sfn_slot = cursor.read_slot(geom, window, device)?;
            if sfn_slot.raw[11] == ATTR_LFN {
                return Err(Error::Broken(BrokenReason::LfnGroup));
            }
            let name11: [u8; 11] = sfn_slot.raw[0..11].try_into().unwrap();
            if dirent::sfn_checksum(&name11) != checksum {
                return Err(Error::Broken(BrokenReason::LfnGroup));
            }
            let units = dirent::lfn_group_decode(&lfn_slots)?;
            let entry = decode_sfn_tail(&sfn_slot, dirent::units_to_string(&units), true, group_loc);
            cursor.advance(geom, window, device, fsinfo, false)?;
            return Ok(Some(entry));
        }

        let name11: [u8; 11] = slot.raw[0..11].try_into().unwrap();
        let entry = decode_sfn_tail(&slot, dirent::sfn_name_decode(&name11), false, slot.loc);
        cursor.advance(geom, window, device, fsinfo, false)?;
        return Ok(Some(entry));
    }
}

fn decode_sfn_tail(slot: &RawSlot, name: String, has_lfn: bool, group_loc: EntryLoc) -> DecodedEntry {
    let (created_date, created_time, modified_date, modified_time, accessed_date) =
        dirent::sfn_dates(&slot.raw);
    DecodedEntry {
        name,
        has_lfn,
        attr: slot.raw[11],
        size: dirent::sfn_size(&slot.raw),
        cluster: dirent::sfn_cluster(&slot.raw),
        created_date,
        created_time,
        modified_date,
        modified_time,
        accessed_date,
        group_loc,
        sfn_loc: slot.loc,
    }
}

/// Find a live entry by name in the directory starting at `start_clust`.
/// Comparison is case-sensitive whenever the match candidate carries an
/// LFN (its name is taken verbatim from the UCS-2 units); a bare SFN
/// entry is matched case-insensitively against its decoded `"BASE.EXT"`
/// form.
pub(crate) fn dir_search(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    start_clust: u32,
    name: &str,
) -> Result<Option<DecodedEntry>> {
    let mut cursor = DirCursor::new(start_clust);
    while let Some(entry) = dir_next(&mut cursor, geom, window, device, fsinfo)? {
        let matched = if entry.has_lfn {
            entry.name == name
        } else {
            entry.name.eq_ignore_ascii_case(name)
        };
        if matched {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

/// Number of contiguous 32-byte slots a directory entry for `name`
/// occupies: one SFN slot plus one LFN slot per 13 UCS-2 units.
fn slots_needed(name: &str) -> Result<usize> {
    let units = dirent::name_to_units(name)?;
    Ok(1 + units.len().div_ceil(13))
}

/// Append a new directory entry for `name`, allocating and zeroing a
/// fresh cluster if the chain has no room. Returns the new entry's SFN
/// location.
#[allow(clippy::too_many_arguments)]
pub(crate) fn dir_add(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    start_clust: u32,
    name: &str,
    attr: u8,
    cluster: u32,
    size: u32,
    created: (u16, u16),
) -> Result<EntryLoc> {
    let need = slots_needed(name)?;
    let mut cursor = DirCursor::new(start_clust);

    let mut run_start: Option<EntryLoc> = None;
    let mut run_len = 0usize;
    let mut hit_end = false;

    loop {
        let slot = cursor.read_slot(geom, window, device)?;
        if slot.raw[0] == ENTRY_END {
            hit_end = true;
            break;
        }
        if slot.raw[0] == ENTRY_FREE {
            if run_start.is_none() {
                run_start = Some(slot.loc);
            }
            run_len += 1;
            if run_len >= need {
                break;
            }
        } else {
            run_start = None;
            run_len = 0;
        }
        if !cursor.advance(geom, window, device, fsinfo, true)? {
            hit_end = true;
            break;
        }
    }

    let write_at = if run_len >= need {
        run_start.unwrap()
    } else {
        cursor.loc(geom)
    };

    let short = dirent::short_name_from(name);
    let checksum = dirent::sfn_checksum(&short);
    let units = dirent::name_to_units(name)?;
    let lfn_slots = dirent::lfn_encode(&units, checksum);

    let mut writer = DirCursor {
        start_clust,
        clust: write_at.cluster,
        sector_in_clust: (write_at.sector - geom.clust_to_data_sect(write_at.cluster)),
        idx: write_at.idx,
    };

    for lfn in &lfn_slots {
        writer.write_slot(geom, window, device, lfn)?;
        if !writer.advance(geom, window, device, fsinfo, true)? {
            return Err(Error::Broken(BrokenReason::LfnGroup));
        }
    }

    let mut sfn_raw = [0u8; SLOT_SIZE];
    sfn_raw[0..11].copy_from_slice(&short);
    dirent::write_sfn_fields(&mut sfn_raw, attr, cluster, size, created, created, created.0);
    let sfn_loc = writer.loc(geom);
    writer.write_slot(geom, window, device, &sfn_raw)?;

    if hit_end && run_len < need {
        if writer.advance(geom, window, device, fsinfo, true)? {
            let end_marker = [0u8; SLOT_SIZE];
            writer.write_slot(geom, window, device, &end_marker)?;
        }
    }

    Ok(sfn_loc)
}

/// Mark every slot from `group_loc` through `sfn_loc` inclusive as free
/// (`0xE5`), used by `unlink`. The LFN group and its SFN are freed
/// together; the end-of-directory marker is never moved.
pub(crate) fn remove_entries(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    group_loc: EntryLoc,
    sfn_loc: EntryLoc,
) -> Result<()> {
    let mut cursor = DirCursor {
        start_clust: group_loc.cluster,
        clust: group_loc.cluster,
        sector_in_clust: group_loc.sector - geom.clust_to_data_sect(group_loc.cluster),
        idx: group_loc.idx,
    };
    loop {
        let here = cursor.loc(geom);
        let mut raw = cursor.read_slot(geom, window, device)?.raw;
        raw[0] = ENTRY_FREE;
        cursor.write_slot(geom, window, device, &raw)?;
        if here == sfn_loc {
            break;
        }
        if !cursor.advance(geom, window, device, fsinfo, false)? {
            return Err(Error::Broken(BrokenReason::LfnGroup));
        }
    }
    Ok(())
}

/// Is the directory starting at `start_clust` empty of everything but
/// `.` and `..`? Used by `unlink` to refuse removing a non-empty
/// directory.
pub(crate) fn dir_is_empty(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    start_clust: u32,
) -> Result<bool> {
    let mut cursor = DirCursor::new(start_clust);
    while let Some(entry) = dir_next(&mut cursor, geom, window, device, fsinfo)? {
        if entry.name != "." && entry.name != ".." {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Write the `.` and `..` stub entries into a freshly allocated,
/// zeroed directory cluster. `parent_clust` is the value `..` should
/// point at — `0` when the new directory's parent is the root.
pub(crate) fn dir_create_stub(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    self_clust: u32,
    parent_clust: u32,
    created: (u16, u16),
) -> Result<()> {
    let sect = geom.clust_to_data_sect(self_clust);
    window.move_window(device, sect)?;

    let mut dot = [0u8; SLOT_SIZE];
    dot[0..11].copy_from_slice(b".          ");
    dirent::write_sfn_fields(&mut dot, dirent::ATTR_DIR, self_clust, 0, created, created, created.0);
    window.buf[0..SLOT_SIZE].copy_from_slice(&dot);

    let mut dotdot = [0u8; SLOT_SIZE];
    dotdot[0..11].copy_from_slice(b"..         ");
    dirent::write_sfn_fields(
        &mut dotdot,
        dirent::ATTR_DIR,
        parent_clust,
        0,
        created,
        created,
        created.0,
    );
    window.buf[SLOT_SIZE..2 * SLOT_SIZE].copy_from_slice(&dotdot);

    window.dirty = true;
    window.flush(device)?;
    Ok(())
}

/// Refuse to unlink the entries `unlink` must always protect: the root
/// directory itself, or anything carrying RO/SYS/LABEL.
pub(crate) fn check_unlink_allowed(entry: &DecodedEntry, is_root: bool) -> Result<()> {
    if is_root {
        return Err(Error::Denied(DeniedReason::ProtectedEntry));
    }
    if entry.attr & (dirent::ATTR_RO | dirent::ATTR_SYS | dirent::ATTR_LABEL) != 0 {
        return Err(Error::Denied(DeniedReason::ProtectedEntry));
    }
    Ok(())
}

