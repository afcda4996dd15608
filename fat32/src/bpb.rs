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

//! On-disk BIOS Parameter Block, FSInfo sector, and MBR partition record,
//! and the checks applied to them at mount time.

use zerocopy::{little_endian::U16 as U16le, little_endian::U32, FromBytes, IntoBytes, KnownLayout};

use fat32_err::{Error, Result};

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
pub(crate) struct BootSector {
    /// BS_jmpBoot. Valid forms are `EB ?? 90` or `E9 ?? ??`.
    pub jump_boot: [u8; 3],
    pub oem_name: [u8; 8],

    /// BPB_BytsPerSec. Must be 512.
    pub bytes_per_sect: U16le,
    /// BPB_SecPerClus. Power of two.
    pub sect_per_clust: u8,
    /// BPB_RsvdSecCnt. Sectors before the first FAT, including this one
    /// and the FSInfo sector.
    pub rsvd_sect_cnt: U16le,
    /// BPB_NumFATs. Must be 2.
    pub num_fats: u8,
    /// BPB_RootEntCnt. Must be 0 on FAT32.
    pub root_ent_cnt: U16le,
    /// BPB_TotSec16. Must be 0 on FAT32 (see `tot_sect_32`).
    pub tot_sect_16: U16le,
    pub media: u8,
    /// BPB_FATSz16. Must be 0 on FAT32 (see `sect_per_fat_32`).
    pub fat_sz_16: U16le,
    pub sect_per_track: U16le,
    pub num_heads: U16le,
    pub hidd_sect: U32,
    pub tot_sect_32: U32,

    pub sect_per_fat_32: U32,
    /// BPB_ExtFlags. Bit 7: 1 = one active FAT named by bits 0-3; 0 = both
    /// FATs are mirrored.
    pub ext_flags: U16le,
    pub fs_ver: U16le,
    /// BPB_RootClus. Usually 2.
    pub root_clust: U32,
    /// BPB_FSInfo. Must be 1.
    pub fs_info: U16le,
    pub bk_boot_sect: U16le,
    pub reserved: [u8; 12],

    pub drv_num: u8,
    pub reserved1: u8,
    pub boot_sig: u8,
    pub vol_id: U32,
    pub vol_lab: [u8; 11],
    /// BS_FilSysType. Informational only; must read `"FAT32   "`.
    pub fil_sys_type: [u8; 8],

    pub boot_code: [u8; 420],
    /// Must be `55 AA`.
    pub signature_word: [u8; 2],
}

#[repr(C)]
#[derive(Debug, FromBytes, IntoBytes, KnownLayout)]
pub(crate) struct FsInfoSector {
    /// Must equal `0x41615252`.
    pub lead_sig: U32,
    pub reserved1: [u8; 480],
    /// Must equal `0x61417272`.
    pub struct_sig: U32,
    pub free_count: U32,
    pub next_free: U32,
    pub reserved2: [u8; 12],
    /// Must equal `0xAA550000`.
    pub trail_sig: U32,
}

pub(crate) const FSINFO_LEAD_SIG: u32 = 0x4161_5252;
pub(crate) const FSINFO_STRUCT_SIG: u32 = 0x6141_7272;
pub(crate) const FSINFO_TRAIL_SIG: u32 = 0xAA55_0000;

impl FsInfoSector {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.lead_sig.get() != FSINFO_LEAD_SIG
            || self.struct_sig.get() != FSINFO_STRUCT_SIG
            || self.trail_sig.get() != FSINFO_TRAIL_SIG
        {
            return Err(Error::NoFat);
        }
        Ok(())
    }
}

/// One 16-byte MBR partition table record, starting at byte 446 of LBA 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout)]
pub(crate) struct MbrPartition {
    pub status: u8,
    pub chs_first: [u8; 3],
    pub partition_type: u8,
    pub chs_last: [u8; 3],
    pub lba_first: U32,
    pub num_sectors: U32,
}

pub(crate) const MBR_PARTITION_TABLE_OFFSET: usize = 446;
pub(crate) const MBR_SIGNATURE_OFFSET: usize = 510;
pub(crate) const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;

pub(crate) fn bpb_looks_valid(bs: &BootSector) -> bool {
    (bs.jump_boot[0] == 0xEB || bs.jump_boot[0] == 0xE9)
        && bs.num_fats == 2
        && bs.root_ent_cnt.get() == 0
        && bs.tot_sect_16.get() == 0
        && bs.fat_sz_16.get() == 0
        && bs.fs_info.get() == 1
        && &bs.fil_sys_type == b"FAT32   "
        && bs.bytes_per_sect.get() == 512
        && cluster_count(bs) >= 65525
}

pub(crate) fn cluster_count(bs: &BootSector) -> u32 {
    let fat_region = bs.rsvd_sect_cnt.get() as u32 + bs.sect_per_fat_32.get() * bs.num_fats as u32;
    let data_sectors = bs.tot_sect_32.get().saturating_sub(fat_region);
    data_sectors / bs.sect_per_clust.max(1) as u32
}
