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

//! The File Allocation Table: cluster classification, chain walking, and
//! the free-cluster allocator.
//!
//! Every FAT entry is 32 bits wide but only the low 28 are meaningful; the
//! top 4 are reserved and must survive a read-modify-write untouched.

use fat32_bdev::BlockDevice;
use fat32_err::{BrokenReason, Error, Result};

use crate::window::SectorWindow;

pub(crate) const FAT_ENTRY_MASK: u32 = 0x0FFF_FFFF;
const BAD_CLUSTER: u32 = 0x0FFF_FFF7;
const MIN_LAST: u32 = 0x0FFF_FFF8;

/// The classification of a single FAT entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FatEntry {
    Free,
    Used(u32),
    Bad,
    Last,
}

fn classify(raw: u32, clust_count: u32) -> Result<FatEntry> {
    let v = raw & FAT_ENTRY_MASK;
    if v == 0 {
        Ok(FatEntry::Free)
    } else if v == BAD_CLUSTER {
        Ok(FatEntry::Bad)
    } else if v >= MIN_LAST {
        Ok(FatEntry::Last)
    } else if (2..clust_count + 2).contains(&v) {
        Ok(FatEntry::Used(v))
    } else {
        Err(Error::Broken(BrokenReason::FatEntry))
    }
}

/// Static geometry derived from the BPB at mount time; never mutated
/// after `mount`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    /// `fat_sect[0]`: start of the first physical FAT copy.
    pub fat_start_sect: u32,
    pub sect_per_fat: u32,
    /// Number of physical FAT copies on disk (BPB validation pins this to
    /// 2; kept as a field rather than a constant so the allocator doesn't
    /// hardcode it).
    pub num_fats: u8,
    /// Index of the FAT copy reads and the first write land on, decoded
    /// from `ext_flags` at mount (spec §4.8).
    pub active_fat: u8,
    /// `ext_flags` bit 7: when set, every FAT copy is kept bit-identical
    /// (spec §8 testable property 5); when clear, only `active_fat` is
    /// live and the others are not touched.
    pub mirror: bool,
    pub data_start_sect: u32,
    pub sect_per_clust: u8,
    /// Highest valid cluster number, inclusive (clusters 0 and 1 are
    /// reserved; the first data cluster is 2).
    pub max_clust: u32,
    pub clust_count: u32,
}

impl Geometry {
    fn fat_copy_start(&self, copy: u8) -> u32 {
        self.fat_start_sect + copy as u32 * self.sect_per_fat
    }

    pub(crate) fn clust_to_fat_loc(&self, clust: u32) -> (u32, usize) {
        let byte_off = clust as u64 * 4;
        let sect = self.fat_copy_start(self.active_fat) + (byte_off / 512) as u32;
        let idx = (byte_off % 512) as usize;
        (sect, idx)
    }

    pub(crate) fn clust_to_data_sect(&self, clust: u32) -> u32 {
        self.data_start_sect + (clust - 2) * self.sect_per_clust as u32
    }

    pub(crate) fn bytes_per_clust(&self) -> u32 {
        self.sect_per_clust as u32 * 512
    }
}

/// Cached free-cluster count and allocation hint, mirrored from/to the
/// FSInfo sector.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FsInfoCache {
    pub free_count: u32,
    pub next_free: u32,
    pub dirty: bool,
}

/// Read one FAT entry for `clust`, reading through the shared sector
/// window.
pub(crate) fn get_fat(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    clust: u32,
) -> Result<FatEntry> {
    let (sect, idx) = geom.clust_to_fat_loc(clust);
    window.move_window(device, sect)?;
    let raw = u32::from_le_bytes(window.buf[idx..idx + 4].try_into().unwrap());
    classify(raw, geom.clust_count)
}

/// Write `value` (FREE, a chain link, BAD, or LAST) into cluster
/// `clust`'s entry, preserving its reserved top 4 bits. Writes the active
/// FAT copy first; when `geom.mirror` is set, every other physical FAT
/// copy is then written identically, in ascending index order (spec §5
/// "Ordering guarantees": active first, mirror second).
pub(crate) fn put_fat(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    clust: u32,
    value: u32,
) -> Result<()> {
    let (sect, idx) = geom.clust_to_fat_loc(clust);
    window.move_window(device, sect)?;
    let old = u32::from_le_bytes(window.buf[idx..idx + 4].try_into().unwrap());
    let new = (old & !FAT_ENTRY_MASK) | (value & FAT_ENTRY_MASK);
    window.buf[idx..idx + 4].copy_from_slice(&new.to_le_bytes());
    window.dirty = true;

    if geom.mirror {
        for copy in 0..geom.num_fats {
            if copy == geom.active_fat {
                continue;
            }
            let mirror_sect = geom.fat_copy_start(copy) + (clust as u64 * 4 / 512) as u32;
            window.flush(device)?;
            window.move_window(device, mirror_sect)?;
            window.buf[idx..idx + 4].copy_from_slice(&new.to_le_bytes());
            window.dirty = true;
        }
        window.flush(device)?;
        window.move_window(device, sect)?;
    }
    Ok(())
}

/// Zero every byte of cluster `clust`'s data region, used when a new
/// directory cluster is allocated so the fresh slots read as end-of-
/// directory markers.
pub(crate) fn clust_clear(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    clust: u32,
) -> Result<()> {
    let first = geom.clust_to_data_sect(clust);
    let zero = [0u8; 512];
    for s in 0..geom.sect_per_clust as u32 {
        window.move_window(device, first + s)?;
        window.buf.copy_from_slice(&zero);
        window.dirty = true;
        window.flush(device)?;
    }
    Ok(())
}

/// Scan forward from `fsinfo.next_free` for a FREE cluster, wrapping
/// around once. Returns [`Error::Full`] once the whole table has been
/// visited without finding one.
fn scan_free(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &FsInfoCache,
) -> Result<u32> {
    let start = fsinfo.next_free.clamp(2, geom.max_clust);
    let mut clust = start;
    for _ in 0..=geom.max_clust - 2 {
        if let FatEntry::Free = get_fat(geom, window, device, clust)? {
            return Ok(clust);
        }
        clust = if clust >= geom.max_clust { 2 } else { clust + 1 };
    }
    Err(Error::Full)
}

/// Allocate one free cluster, mark it [`FatEntry::Last`], link `prev`
/// into it if given, and update the FSInfo cache. Returns the new
/// cluster number.
///
/// When extending an existing chain, first probes `prev + 1` (wrapping to
/// 2) for a free cluster so a sequentially written file tends to land on
/// contiguous clusters; only falls back to the full linear scan from
/// `fsinfo.next_free` if that probe misses (spec §4.2 "stretch").
pub(crate) fn stretch(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    prev: Option<u32>,
) -> Result<u32> {
    let probed = match prev {
        Some(p) => {
            let candidate = if p >= geom.max_clust { 2 } else { p + 1 };
            match get_fat(geom, window, device, candidate)? {
                FatEntry::Free => Some(candidate),
                _ => None,
            }
        }
        None => None,
    };
    let clust = match probed {
        Some(c) => c,
        None => scan_free(geom, window, device, fsinfo)?,
    };
    put_fat(geom, window, device, clust, MIN_LAST)?;
    if let Some(p) = prev {
        put_fat(geom, window, device, p, clust)?;
    }
    fsinfo.free_count = fsinfo.free_count.saturating_sub(1);
    fsinfo.next_free = if clust >= geom.max_clust { 2 } else { clust + 1 };
    fsinfo.dirty = true;
    Ok(clust)
}

/// Allocate `n` clusters as one new chain (`n >= 1`), returning the head
/// cluster. Used by directory growth and by a file write past its
/// current last cluster.
pub(crate) fn create_chain(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    n: usize,
) -> Result<u32> {
    debug_assert!(n >= 1);
    let head = stretch(geom, window, device, fsinfo, None)?;
    let mut tail = head;
    for _ in 1..n {
        tail = stretch(geom, window, device, fsinfo, Some(tail))?;
    }
    Ok(head)
}

/// Free every cluster in the chain starting at `start`, in order,
/// updating the FSInfo cache as each one is released. `start` itself
/// becomes FREE too.
pub(crate) fn remove_chain(
    geom: &Geometry,
    window: &mut SectorWindow,
    device: &mut dyn BlockDevice,
    fsinfo: &mut FsInfoCache,
    start: u32,
) -> Result<()> {
    let mut clust = start;
    loop {
        let entry = get_fat(geom, window, device, clust)?;
        put_fat(geom, window, device, clust, 0)?;
        fsinfo.free_count = fsinfo.free_count.saturating_add(1);
        fsinfo.dirty = true;
        match entry {
            FatEntry::Used(next) => clust = next,
            FatEntry::Last => break,
            FatEntry::Free | FatEntry::Bad => {
                return Err(Error::Broken(BrokenReason::ChainLink));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom() -> Geometry {
        Geometry {
            fat_start_sect: 32,
            sect_per_fat: 8,
            num_fats: 2,
            active_fat: 0,
            mirror: true,
            data_start_sect: 48,
            sect_per_clust: 1,
            max_clust: 65,
            clust_count: 64,
        }
    }

    struct MemDevice {
        sectors: Vec<[u8; 512]>,
    }

    impl MemDevice {
        fn new(n: usize) -> Self {
            Self { sectors: vec![[0u8; 512]; n] }
        }
    }

    impl BlockDevice for MemDevice {
        fn read(&mut self, buf: &mut [u8; 512], lba: u32) -> Result<()> {
            buf.copy_from_slice(&self.sectors[lba as usize]);
            Ok(())
        }

        fn write(&mut self, buf: &[u8; 512], lba: u32) -> Result<()> {
            self.sectors[lba as usize].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0, 64).unwrap(), FatEntry::Free);
        assert_eq!(classify(5, 64).unwrap(), FatEntry::Used(5));
        assert_eq!(classify(BAD_CLUSTER, 64).unwrap(), FatEntry::Bad);
        assert_eq!(classify(MIN_LAST, 64).unwrap(), FatEntry::Last);
        assert!(classify(70, 64).is_err());
    }

    #[test]
    fn put_fat_preserves_reserved_bits() {
        let geom = geom();
        let mut dev = MemDevice::new(80);
        let mut window = SectorWindow::new();
        let (sect, idx) = geom.clust_to_fat_loc(2);
        window.move_window(&mut dev, sect).unwrap();
        window.buf[idx..idx + 4].copy_from_slice(&0xF000_0000u32.to_le_bytes());
        window.dirty = true;
        window.flush(&mut dev).unwrap();

        put_fat(&geom, &mut window, &mut dev, 2, 7).unwrap();
        let (sect, idx) = geom.clust_to_fat_loc(2);
        window.move_window(&mut dev, sect).unwrap();
        let raw = u32::from_le_bytes(window.buf[idx..idx + 4].try_into().unwrap());
        assert_eq!(raw, 0xF000_0007);
    }

    #[test]
    fn stretch_and_remove_chain_round_trip() {
        let geom = geom();
        let mut dev = MemDevice::new(80);
        let mut window = SectorWindow::new();
        let mut fsinfo = FsInfoCache { free_count: 64, next_free: 2, dirty: false };

        let head = create_chain(&geom, &mut window, &mut dev, &mut fsinfo, 3).unwrap();
        assert_eq!(fsinfo.free_count, 61);

        let mut count = 1;
        let mut clust = head;
        loop {
            match get_fat(&geom, &mut window, &mut dev, clust).unwrap() {
                FatEntry::Used(next) => {
                    count += 1;
                    clust = next;
                }
                FatEntry::Last => break,
                other => panic!("unexpected entry {other:?}"),
            }
        }
        assert_eq!(count, 3);

        remove_chain(&geom, &mut window, &mut dev, &mut fsinfo, head).unwrap();
        assert_eq!(fsinfo.free_count, 64);
        assert_eq!(get_fat(&geom, &mut window, &mut dev, head).unwrap(), FatEntry::Free);
    }

    #[test]
    fn allocation_failure_reports_full() {
        let geom = Geometry {
            fat_start_sect: 32,
            sect_per_fat: 1,
            num_fats: 1,
            active_fat: 0,
            mirror: false,
            data_start_sect: 33,
            sect_per_clust: 1,
            max_clust: 3,
            clust_count: 2,
        };
        let mut dev = MemDevice::new(40);
        let mut window = SectorWindow::new();
        let mut fsinfo = FsInfoCache { free_count: 2, next_free: 2, dirty: false };

        create_chain(&geom, &mut window, &mut dev, &mut fsinfo, 2).unwrap();
        let err = stretch(&geom, &mut window, &mut dev, &mut fsinfo, None).unwrap_err();
        assert!(matches!(err, Error::Full));
    }

    #[test]
    fn mirror_keeps_both_fat_copies_bit_equal() {
        let geom = geom();
        let mut dev = MemDevice::new(80);
        let mut window = SectorWindow::new();
        let mut fsinfo = FsInfoCache { free_count: 64, next_free: 2, dirty: false };

        create_chain(&geom, &mut window, &mut dev, &mut fsinfo, 3).unwrap();
        window.flush(&mut dev).unwrap();

        let copy0 = &dev.sectors[geom.fat_start_sect as usize
            ..(geom.fat_start_sect + geom.sect_per_fat) as usize];
        let copy1 = &dev.sectors[(geom.fat_start_sect + geom.sect_per_fat) as usize
            ..(geom.fat_start_sect + 2 * geom.sect_per_fat) as usize];
        assert_eq!(copy0, copy1);
    }

    #[test]
    fn non_mirrored_volume_leaves_inactive_fat_copy_untouched() {
        let mut geom = geom();
        geom.mirror = false;
        geom.active_fat = 1;
        let mut dev = MemDevice::new(80);
        let mut window = SectorWindow::new();
        let mut fsinfo = FsInfoCache { free_count: 64, next_free: 2, dirty: false };

        create_chain(&geom, &mut window, &mut dev, &mut fsinfo, 3).unwrap();
        window.flush(&mut dev).unwrap();

        let inactive_copy_0 = &dev.sectors[geom.fat_start_sect as usize];
        assert!(inactive_copy_0.iter().all(|&b| b == 0));
    }
}
