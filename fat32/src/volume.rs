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

//! Volume lifecycle: probing a block device for a FAT32 BPB, mounting it
//! into the [`MountTable`], and the `sync_fs` write-back sequence (spec
//! §4.8 "Mount / probe / umount").

use fat32_bdev::{BlockDevice, TimestampProvider};
use fat32_err::{Error, ParamReason, Result};
use log::{error, warn};
use zerocopy::{FromBytes, IntoBytes};

use crate::bpb::{
    self, BootSector, FsInfoSector, MbrPartition, MBR_PARTITION_TABLE_OFFSET, MBR_SIGNATURE_OFFSET,
    PARTITION_TYPE_FAT32_LBA,
};
use crate::fat_table::{FsInfoCache, Geometry};
use crate::path::{MountTable, Volume};
use crate::window::SectorWindow;

const MAX_MOUNT_NAME: usize = 31;

/// Locate the FAT32 partition's first sector, per spec §4.8 "probe":
/// read LBA 0, and if it already looks like a BPB treat the whole device
/// as unpartitioned (`partition == 0` only); otherwise read it as an MBR
/// and look up `partition` in its table.
fn probe(device: &mut dyn BlockDevice, partition: usize) -> Result<u32> {
    let mut sector = [0u8; 512];
    device.read(&mut sector, 0)?;

    let candidate: BootSector = BootSector::read_from_bytes(&sector).map_err(|_| Error::NoFat)?;
    if bpb::bpb_looks_valid(&candidate) {
        return if partition == 0 { Ok(0) } else { Err(Error::NoFat) };
    }

    if sector[MBR_SIGNATURE_OFFSET] != 0x55 || sector[MBR_SIGNATURE_OFFSET + 1] != 0xAA {
        return Err(Error::NoFat);
    }
    let entry_off = MBR_PARTITION_TABLE_OFFSET + partition * 16;
    let entry_bytes = sector.get(entry_off..entry_off + 16).ok_or(Error::NoFat)?;
    let entry: MbrPartition = MbrPartition::read_from_bytes(entry_bytes).map_err(|_| Error::NoFat)?;
    if entry.partition_type != PARTITION_TYPE_FAT32_LBA {
        return Err(Error::NoFat);
    }
    Ok(entry.lba_first.get())
}

/// Mount the block device under `name`, recording it in `mounts` (spec
/// §4.8 "mount"). `partition` selects an MBR partition table entry, or
/// `0` for an unpartitioned (superfloppy) device.
pub(crate) fn mount(
    mounts: &mut MountTable,
    name: &str,
    mut device: Box<dyn BlockDevice>,
    timestamp: Box<dyn TimestampProvider>,
    partition: usize,
) -> Result<()> {
    if name.len() > MAX_MOUNT_NAME {
        return Err(Error::Param(ParamReason::NameTooLong));
    }

    let partition_lba = probe(device.as_mut(), partition)?;

    let mut bpb_sector = [0u8; 512];
    device.read(&mut bpb_sector, partition_lba)?;
    let bs: BootSector = BootSector::read_from_bytes(&bpb_sector).map_err(|_| Error::NoFat)?;
    if !bpb::bpb_looks_valid(&bs) {
        error!("BPB validation failed at partition LBA {partition_lba}");
        return Err(Error::NoFat);
    }

    let sect_per_fat = bs.sect_per_fat_32.get();
    let num_fats = bs.num_fats;
    let fat_start_sect = partition_lba + bs.rsvd_sect_cnt.get() as u32;
    let data_start_sect = fat_start_sect + sect_per_fat * num_fats as u32;
    let clust_count = bpb::cluster_count(&bs);

    // BPB_ExtFlags bit 7 set: both FATs are live and kept mirrored; clear:
    // only the FAT named by the low nibble (0 or 1 honored) is active.
    let ext_flags = bs.ext_flags.get();
    let mirror = ext_flags & 0x0080 != 0;
    let active_fat = if mirror { 0 } else { (ext_flags & 0x000F).min(1) as u8 };

    let geom = Geometry {
        fat_start_sect,
        sect_per_fat,
        num_fats,
        active_fat,
        mirror,
        data_start_sect,
        sect_per_clust: bs.sect_per_clust,
        max_clust: clust_count + 1,
        clust_count,
    };
    let root_clust = bs.root_clust.get();
    let fsinfo_sect = partition_lba + bs.fs_info.get() as u32;

    let mut window = SectorWindow::new();
    window.move_window(device.as_mut(), fsinfo_sect)?;
    let fsinfo_raw: FsInfoSector =
        FsInfoSector::read_from_bytes(&window.buf).map_err(|_| Error::NoFat)?;
    fsinfo_raw.validate()?;
    let fsinfo = FsInfoCache {
        free_count: fsinfo_raw.free_count.get(),
        next_free: fsinfo_raw.next_free.get(),
        dirty: false,
    };

    if mounts.volumes.contains_key(name) {
        warn!("mount name {name:?} already in use; replacing");
    }
    mounts.volumes.insert(
        name.to_string(),
        Volume { geom, device, timestamp, window, fsinfo, fsinfo_sect, root_clust, partition_lba },
    );
    Ok(())
}

/// Flush the window, and — if the FSInfo cache is dirty — patch
/// `next_free`/`free_cnt` into the FSInfo sector and flush again (spec
/// §4.1 "`sync_fs`"). Called at the end of every mutating public
/// operation (spec §7 "Propagation policy").
pub(crate) fn sync_fs(vol: &mut Volume) -> Result<()> {
    vol.window.flush(vol.device.as_mut())?;
    if vol.fsinfo.dirty {
        vol.window.move_window(vol.device.as_mut(), vol.fsinfo_sect)?;
        let mut fsinfo_raw: FsInfoSector =
            FsInfoSector::read_from_bytes(&vol.window.buf).map_err(|_| Error::NoFat)?;
        fsinfo_raw.free_count.set(vol.fsinfo.free_count);
        fsinfo_raw.next_free.set(vol.fsinfo.next_free);
        vol.window.buf.copy_from_slice(fsinfo_raw.as_bytes());
        vol.window.dirty = true;
        vol.window.flush(vol.device.as_mut())?;
        vol.fsinfo.dirty = false;
    }
    Ok(())
}

/// Remove the volume from the mount table, syncing it first (spec §4.8
/// "umount").
pub(crate) fn umount(mounts: &mut MountTable, name: &str) -> Result<()> {
    let vol = mounts.get_mut(name)?;
    sync_fs(vol)?;
    mounts.volumes.remove(name);
    Ok(())
}
