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

//! The volume's single cached sector (spec §4.1).
//!
//! `SectorWindow` mediates every touch of FAT, directory, and FSInfo state.
//! A move to a different LBA flushes whatever is dirty first, so two
//! writes to the same sector always coalesce and cross-LBA ordering
//! follows call order — the ordering guarantee spec §5 describes.

use fat32_bdev::{BlockDevice, SECTOR_SIZE};
use fat32_err::Result;

pub(crate) struct SectorWindow {
    pub(crate) buf: [u8; SECTOR_SIZE],
    lba: Option<u32>,
    pub(crate) dirty: bool,
}

impl SectorWindow {
    pub(crate) fn new() -> Self {
        Self {
            buf: [0u8; SECTOR_SIZE],
            lba: None,
            dirty: false,
        }
    }

    pub(crate) fn lba(&self) -> Option<u32> {
        self.lba
    }

    /// Guarantees that on return the window caches sector `sect` and is
    /// clean-or-will-be-written-before-reassignment.
    pub(crate) fn move_window(&mut self, device: &mut dyn BlockDevice, sect: u32) -> Result<()> {
        if self.lba != Some(sect) {
            self.flush(device)?;
            device.read(&mut self.buf, sect)?;
            self.lba = Some(sect);
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self, device: &mut dyn BlockDevice) -> Result<()> {
        if self.dirty {
            if let Some(lba) = self.lba {
                device.write(&self.buf, lba)?;
            }
            self.dirty = false;
        }
        Ok(())
    }

    pub(crate) fn is_clean(&self) -> bool {
        !self.dirty
    }
}
