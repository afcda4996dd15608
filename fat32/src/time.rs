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

//! FAT date/time codec (spec §3, "Timestamps").

use fat32_bdev::Timestamp;

/// Pack a [`Timestamp`] into FAT's 16-bit date and 16-bit time fields.
/// Seconds are quantized to 2-second resolution, as the on-disk format
/// cannot represent odd seconds.
pub fn pack(ts: Timestamp) -> (u16, u16) {
    let year_off = ts.year.saturating_sub(1980) & 0x3f;
    let date = (year_off << 9) | ((ts.month as u16 & 0xf) << 5) | (ts.day as u16 & 0x1f);
    let time = ((ts.sec as u16 / 2) & 0x1f)
        | ((ts.min as u16 & 0x3f) << 5)
        | ((ts.hour as u16 & 0x1f) << 11);
    (date, time)
}

/// Unpack FAT date/time fields back into a [`Timestamp`]. Inverse of
/// [`pack`], used by `stat` to report created/modified times.
pub fn unpack(date: u16, time: u16) -> Timestamp {
    Timestamp {
        year: 1980 + (date >> 9),
        month: ((date >> 5) & 0xf) as u8,
        day: (date & 0x1f) as u8,
        hour: ((time >> 11) & 0x1f) as u8,
        min: ((time >> 5) & 0x3f) as u8,
        sec: ((time & 0x1f) * 2) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_round_trips() {
        let (date, time) = pack(Timestamp::EPOCH);
        assert_eq!(date, 0x0021); // (0<<9)|(1<<5)|1
        assert_eq!(time, 0);
        assert_eq!(unpack(date, time), Timestamp::EPOCH);
    }

    #[test]
    fn seconds_quantize_to_two() {
        let ts = Timestamp {
            year: 2024,
            month: 3,
            day: 15,
            hour: 10,
            min: 30,
            sec: 45,
        };
        let (date, time) = pack(ts);
        let back = unpack(date, time);
        assert_eq!(back.sec, 44);
        assert_eq!(back.min, 30);
        assert_eq!(back.hour, 10);
    }
}
