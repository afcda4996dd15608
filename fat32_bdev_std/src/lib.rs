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

use std::{fs::File, os::unix::fs::FileExt};

use fat32_bdev::{io_read_failed, io_write_failed, BlockDevice, SECTOR_SIZE};
use fat32_err::Result;

/// A [`BlockDevice`] backed by a single `std::fs::File`, addressing
/// disk-absolute LBAs as `lba * 512` byte offsets.
pub struct FileBlockDevice {
    file: File,
}

impl FileBlockDevice {
    pub fn open(path: &str) -> std::io::Result<Self> {
        Ok(Self {
            file: File::options().read(true).write(true).open(path)?,
        })
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read(&mut self, buf: &mut [u8; SECTOR_SIZE], lba: u32) -> Result<()> {
        self.file
            .read_exact_at(buf, lba as u64 * SECTOR_SIZE as u64)
            .map_err(|_| io_read_failed())
    }

    fn write(&mut self, buf: &[u8; SECTOR_SIZE], lba: u32) -> Result<()> {
        self.file
            .write_all_at(buf, lba as u64 * SECTOR_SIZE as u64)
            .map_err(|_| io_write_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    #[test]
    fn round_trips_a_sector() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.as_file_mut()
            .set_len(4 * SECTOR_SIZE as u64)
            .unwrap();
        tmp.flush().unwrap();
        tmp.seek(SeekFrom::Start(0)).unwrap();

        let mut dev = FileBlockDevice::open(tmp.path().to_str().unwrap()).unwrap();
        let mut sector = [0xAB_u8; SECTOR_SIZE];
        dev.write(&sector, 2).unwrap();
        sector = [0u8; SECTOR_SIZE];
        dev.read(&mut sector, 2).unwrap();
        assert!(sector.iter().all(|&b| b == 0xAB));
    }
}
