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

use std::io::{Seek, SeekFrom, Write};

use fat32_bdev::{BlockDevice, SECTOR_SIZE};
use fat32_bdev_std::FileBlockDevice;

fn scratch_file(sectors: u64) -> tempfile::NamedTempFile {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().set_len(sectors * SECTOR_SIZE as u64).unwrap();
    tmp
}

#[test]
fn distinct_lbas_do_not_alias() {
    let tmp = scratch_file(8);
    let mut dev = FileBlockDevice::open(tmp.path().to_str().unwrap()).unwrap();

    for lba in 0..8u32 {
        let sector = [lba as u8; SECTOR_SIZE];
        dev.write(&sector, lba).unwrap();
    }
    for lba in 0..8u32 {
        let mut sector = [0u8; SECTOR_SIZE];
        dev.read(&mut sector, lba).unwrap();
        assert!(sector.iter().all(|&b| b == lba as u8));
    }
}

#[test]
fn read_past_end_of_file_fails() {
    let tmp = scratch_file(1);
    let mut dev = FileBlockDevice::open(tmp.path().to_str().unwrap()).unwrap();
    let mut sector = [0u8; SECTOR_SIZE];
    assert!(dev.read(&mut sector, 5).is_err());
}

#[test]
fn from_file_wraps_an_already_open_handle() {
    let mut tmp = scratch_file(2);
    tmp.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
    tmp.flush().unwrap();

    let file = tmp.reopen().unwrap();
    let mut dev = FileBlockDevice::from_file(file);
    let sector = [0x42u8; SECTOR_SIZE];
    dev.write(&sector, 1).unwrap();

    let mut back = [0u8; SECTOR_SIZE];
    dev.read(&mut back, 1).unwrap();
    assert_eq!(back, sector);
}
