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

//! Directory-entry encoding and decoding: the 8.3 short name, the LFN
//! protocol and its checksum cross-binding, and the decoded view of a
//! directory entry group.

use fat32_err::{BrokenReason, Error, Result};

pub const ATTR_RO: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYS: u8 = 0x04;
pub const ATTR_LABEL: u8 = 0x08;
pub const ATTR_DIR: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;
pub const ATTR_LFN: u8 = 0x0F;

pub const ENTRY_FREE: u8 = 0xE5;
pub const ENTRY_END: u8 = 0x00;

pub const SLOT_SIZE: usize = 32;
pub const SLOTS_PER_SECTOR: usize = 512 / SLOT_SIZE;
pub const MAX_LFN_SLOTS: u8 = 20;
pub const MAX_NAME_LEN: usize = 255;

/// A cursor's position within a directory's cluster chain, narrowed to
/// exactly the (cluster, sector, slot) triple a disk write needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLoc {
    pub cluster: u32,
    pub sector: u32,
    pub idx: usize,
}

/// A decoded directory entry: either a bare SFN, or an LFN group plus its
/// owning SFN, reduced to the fields callers (`stat`, `read_dir`, the path
/// resolver) need.
#[derive(Debug, Clone)]
pub struct DecodedEntry {
    pub name: String,
    pub has_lfn: bool,
    pub attr: u8,
    pub size: u32,
    pub cluster: u32,
    pub created_date: u16,
    pub created_time: u16,
    pub modified_date: u16,
    pub modified_time: u16,
    pub accessed_date: u16,
    /// Location of the first slot of the entry (the topmost LFN slot, or
    /// the SFN itself when there is no LFN group).
    pub group_loc: EntryLoc,
    /// Location of the owning SFN slot.
    pub sfn_loc: EntryLoc,
}

impl DecodedEntry {
    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIR != 0
    }
}

/// Characters that pass through unmodified into an 8.3 name; everything
/// else (including anything non-ASCII) becomes `_`.
fn is_sfn_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'()-@^_`{}~".contains(&b)
}

fn sanitize_component(s: &str, out: &mut [u8]) {
    for (slot, c) in out.iter_mut().zip(s.chars()) {
        let u = c.to_ascii_uppercase();
        *slot = if u.is_ascii() && is_sfn_char(u as u8) {
            u as u8
        } else {
            b'_'
        };
    }
}

/// Build the 11-byte 8.3 short name for `name`, splitting on the last
/// `.`, uppercasing, filtering to the legal character set, and padding
/// with `0x20`. Names/extensions longer than 8/3 characters are
/// truncated — disambiguating truncated duplicates with `~N` suffixes is
/// explicitly out of scope.
pub fn short_name_from(name: &str) -> [u8; 11] {
    let (base, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos + 1..]),
        _ => (name, ""),
    };
    let mut out = [b' '; 11];
    let base_chars: Vec<char> = base.chars().take(8).collect();
    let base_str: String = base_chars.into_iter().collect();
    sanitize_component(&base_str, &mut out[0..8]);
    let ext_chars: Vec<char> = ext.chars().take(3).collect();
    let ext_str: String = ext_chars.into_iter().collect();
    sanitize_component(&ext_str, &mut out[8..11]);
    out
}

/// Render an on-disk 11-byte short name back to `"BASE.EXT"` (or `"BASE"`
/// when the extension is blank), trimming the `0x20` padding.
pub fn sfn_name_decode(raw: &[u8; 11]) -> String {
    let base = trim_pad(&raw[0..8]);
    let ext = trim_pad(&raw[8..11]);
    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

fn trim_pad(s: &[u8]) -> String {
    let end = s.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    s[..end].iter().map(|&b| b as char).collect()
}

/// Rotate-right-add checksum over an SFN's 11 name bytes.
pub fn sfn_checksum(name11: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in name11 {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
    }
    sum
}

/// Convert a filename to UCS-2 code units. Anything beyond the low byte
/// of each character is dropped — an 8-bit pass-through, not a full
/// Unicode encoding.
pub fn name_to_units(name: &str) -> Result<Vec<u16>> {
    let units: Vec<u16> = name.chars().map(|c| (c as u32 & 0xFF) as u16).collect();
    if units.is_empty() || units.len() > MAX_NAME_LEN {
        return Err(Error::Broken(BrokenReason::NameTooLong));
    }
    Ok(units)
}

pub fn units_to_string(units: &[u16]) -> String {
    units.iter().map(|&u| (u as u8) as char).collect()
}

fn lfn_slot_chars(raw: &[u8; SLOT_SIZE]) -> [u16; 13] {
    let mut out = [0u16; 13];
    for i in 0..5 {
        out[i] = u16::from_le_bytes([raw[1 + 2 * i], raw[2 + 2 * i]]);
    }
    for i in 0..6 {
        out[5 + i] = u16::from_le_bytes([raw[14 + 2 * i], raw[15 + 2 * i]]);
    }
    for i in 0..2 {
        out[11 + i] = u16::from_le_bytes([raw[28 + 2 * i], raw[29 + 2 * i]]);
    }
    out
}

fn write_lfn_slot_chars(raw: &mut [u8; SLOT_SIZE], chars: &[u16; 13]) {
    for i in 0..5 {
        raw[1 + 2 * i..3 + 2 * i].copy_from_slice(&chars[i].to_le_bytes());
    }
    for i in 0..6 {
        raw[14 + 2 * i..16 + 2 * i].copy_from_slice(&chars[5 + i].to_le_bytes());
    }
    for i in 0..2 {
        raw[28 + 2 * i..30 + 2 * i].copy_from_slice(&chars[11 + i].to_le_bytes());
    }
}

/// Build the LFN slots for `units`, in physical (on-disk) order: the
/// topmost slot first, numbered `n` with bit `0x40` set, down to slot `1`
/// immediately preceding the SFN. `checksum` is the owning SFN's 8.3
/// checksum, cross-bound into every slot's `crc` field.
pub fn lfn_encode(units: &[u16], checksum: u8) -> Vec<[u8; SLOT_SIZE]> {
    let n = units.len().div_ceil(13) as u8;
    let mut slots = Vec::with_capacity(n as usize);
    for seq in (1..=n).rev() {
        let start = (seq as usize - 1) * 13;
        let remaining = units.len() - start;
        let mut chunk = [0xFFFFu16; 13];
        if remaining >= 13 {
            chunk.copy_from_slice(&units[start..start + 13]);
        } else {
            chunk[..remaining].copy_from_slice(&units[start..]);
            chunk[remaining] = 0x0000;
        }

        let mut raw = [0u8; SLOT_SIZE];
        raw[0] = if seq == n { seq | 0x40 } else { seq };
        write_lfn_slot_chars(&mut raw, &chunk);
        raw[11] = ATTR_LFN;
        raw[12] = 0;
        raw[13] = checksum;
        raw[26] = 0;
        raw[27] = 0;
        slots.push(raw);
    }
    slots
}

/// Reconstruct the UCS-2 code units from an LFN group's slots, given in
/// the same physical (topmost-first) order [`lfn_encode`] produces.
pub fn lfn_group_decode(raw_slots_topdown: &[[u8; SLOT_SIZE]]) -> Result<Vec<u16>> {
    let mut units = Vec::new();
    for (pos, raw) in raw_slots_topdown.iter().enumerate().rev() {
        let chars = lfn_slot_chars(raw);
        if pos == 0 {
            for &c in chars.iter() {
                if c == 0x0000 {
                    break;
                }
                units.push(c);
            }
        } else {
            units.extend_from_slice(&chars);
        }
    }
    if units.len() > MAX_NAME_LEN {
        return Err(Error::Broken(BrokenReason::NameTooLong));
    }
    Ok(units)
}

/// Fill an SFN slot's shared tail: attr/cluster/size/timestamps. Callers
/// fill the 11-byte name separately (it differs between a fresh entry and
/// the `.`/`..` stubs).
pub fn write_sfn_fields(
    raw: &mut [u8; SLOT_SIZE],
    attr: u8,
    cluster: u32,
    size: u32,
    created: (u16, u16),
    modified: (u16, u16),
    accessed_date: u16,
) {
    raw[11] = attr;
    raw[12] = 0; // NTRes
    raw[13] = 0; // CrtTimeTenth
    raw[14..16].copy_from_slice(&created.1.to_le_bytes());
    raw[16..18].copy_from_slice(&created.0.to_le_bytes());
    raw[18..20].copy_from_slice(&accessed_date.to_le_bytes());
    raw[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    raw[22..24].copy_from_slice(&modified.1.to_le_bytes());
    raw[24..26].copy_from_slice(&modified.0.to_le_bytes());
    raw[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
}

pub fn sfn_cluster(raw: &[u8; SLOT_SIZE]) -> u32 {
    let hi = u16::from_le_bytes([raw[20], raw[21]]) as u32;
    let lo = u16::from_le_bytes([raw[26], raw[27]]) as u32;
    (hi << 16) | lo
}

pub fn sfn_size(raw: &[u8; SLOT_SIZE]) -> u32 {
    u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]])
}

pub fn sfn_dates(raw: &[u8; SLOT_SIZE]) -> (u16, u16, u16, u16, u16) {
    let created_time = u16::from_le_bytes([raw[14], raw[15]]);
    let created_date = u16::from_le_bytes([raw[16], raw[17]]);
    let accessed_date = u16::from_le_bytes([raw[18], raw[19]]);
    let modified_time = u16::from_le_bytes([raw[22], raw[23]]);
    let modified_date = u16::from_le_bytes([raw[24], raw[25]]);
    (created_date, created_time, modified_date, modified_time, accessed_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_pads_and_uppercases() {
        assert_eq!(&short_name_from("hello.txt"), b"HELLO   TXT");
        assert_eq!(&short_name_from("a"), b"A          ");
    }

    #[test]
    fn short_name_rejects_illegal_chars() {
        assert_eq!(&short_name_from("a b.c+d"), b"A_B     C_D");
    }

    #[test]
    fn sfn_name_decode_round_trips() {
        assert_eq!(sfn_name_decode(&short_name_from("hello.txt")), "HELLO.TXT");
        assert_eq!(sfn_name_decode(b"A          "), "A");
    }

    #[test]
    fn lfn_slot_counts_match_length_boundaries() {
        assert_eq!(lfn_encode(&vec![0u16; 13], 0).len(), 1);
        assert_eq!(lfn_encode(&vec![0u16; 14], 0).len(), 2);
        assert_eq!(lfn_encode(&vec![0u16; 255], 0).len(), 20);
    }

    #[test]
    fn lfn_round_trips_a_name() {
        let units = name_to_units("a quite long file name.bin").unwrap();
        let checksum = sfn_checksum(&short_name_from("a quite long file name.bin"));
        let slots = lfn_encode(&units, checksum);
        let decoded = lfn_group_decode(&slots).unwrap();
        assert_eq!(decoded, units);
        assert_eq!(units_to_string(&decoded), "a quite long file name.bin");
    }

    #[test]
    fn lfn_head_marks_highest_seq() {
        let units = name_to_units("twentysevencharacterlongname.x").unwrap();
        let slots = lfn_encode(&units, 0);
        let n = slots.len() as u8;
        assert_eq!(slots[0][0], n | 0x40);
        assert_eq!(slots[slots.len() - 1][0], 1);
    }
}
