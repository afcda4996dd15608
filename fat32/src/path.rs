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

//! Path resolution and the mount table (spec §4.4 "Paths", §4.8 "Mount
//! table"). Paths are always `/mount/a/b/c` — an absolute mount name
//! followed by zero or more components walked one directory at a time.

use std::collections::HashMap;

use fat32_bdev::{BlockDevice, TimestampProvider};
use fat32_err::{Error, ParamReason, Result};

use crate::dir;
use crate::dirent::DecodedEntry;
use crate::fat_table::{FsInfoCache, Geometry};
use crate::window::SectorWindow;

/// One mounted volume: its geometry, its block device, the shared
/// sector window, and the FSInfo cache (spec §4.1, §4.8).
pub(crate) struct Volume {
    pub(crate) geom: Geometry,
    pub(crate) device: Box<dyn BlockDevice>,
    pub(crate) timestamp: Box<dyn TimestampProvider>,
    pub(crate) window: SectorWindow,
    pub(crate) fsinfo: FsInfoCache,
    pub(crate) fsinfo_sect: u32,
    pub(crate) root_clust: u32,
    pub(crate) partition_lba: u32,
}

/// Every mounted volume, keyed by the name it was mounted under (spec
/// §4.8: "mount names are opaque to the engine").
#[derive(Default)]
pub(crate) struct MountTable {
    pub(crate) volumes: HashMap<String, Volume>,
}

impl MountTable {
    pub(crate) fn new() -> Self {
        MountTable { volumes: HashMap::new() }
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut Volume> {
        self.volumes
            .get_mut(name)
            .ok_or(Error::Param(ParamReason::UnknownMount))
    }
}

/// Split `/mount/a/b/c` into the mount name and the remaining
/// components. A bare `/mount` or `/mount/` resolves to zero components
/// (the mount's root directory).
fn split_path(path: &str) -> Result<(&str, Vec<&str>)> {
    let trimmed = path.strip_prefix('/').ok_or(Error::Path)?;
    let mut parts = trimmed.split('/').filter(|s| !s.is_empty());
    let mount = parts.next().ok_or(Error::Path)?;
    Ok((mount, parts.collect()))
}

/// The resolved result of walking a path down to its final component:
/// the cluster of the directory containing it, and — unless the path
/// names the mount root itself — the decoded entry found there.
pub(crate) struct Resolved {
    pub(crate) parent_clust: u32,
    pub(crate) parent_is_root: bool,
    pub(crate) entry: Option<DecodedEntry>,
    pub(crate) last_name: String,
    /// True only when `path` named the mount itself (zero components) —
    /// distinguishes "this path is the root" from "this path's last
    /// component was not found", both of which otherwise leave `entry`
    /// empty.
    pub(crate) is_mount_root: bool,
}

/// Walk `path` component by component, returning the mount name, the
/// volume, and the resolution of the final component (spec §4.4 "Path
/// resolution"). Every component except the last must name an existing
/// directory; the last component may be absent (the caller decides
/// whether that is `DENIED` or a create opportunity).
pub(crate) fn follow_path<'a>(
    mounts: &'a mut MountTable,
    path: &str,
) -> Result<(String, &'a mut Volume, Resolved)> {
    let (mount_name, components) = split_path(path)?;
    let mount_name = mount_name.to_string();
    let vol = mounts.get_mut(&mount_name)?;

    if components.is_empty() {
        return Ok((
            mount_name,
            vol,
            Resolved {
                parent_clust: 0,
                parent_is_root: true,
                entry: None,
                last_name: String::new(),
                is_mount_root: true,
            },
        ));
    }

    let mut dir_clust = vol.root_clust;
    let mut is_root = true;
    for (i, comp) in components.iter().enumerate() {
        let found = dir::dir_search(
            &vol.geom,
            &mut vol.window,
            vol.device.as_mut(),
            &mut vol.fsinfo,
            dir_clust,
            comp,
        )?;
        let is_last = i == components.len() - 1;
        match found {
            Some(entry) if is_last => {
                return Ok((
                    mount_name,
                    vol,
                    Resolved {
                        parent_clust: dir_clust,
                        parent_is_root: is_root,
                        entry: Some(entry),
                        last_name: comp.to_string(),
                        is_mount_root: false,
                    },
                ));
            }
            Some(entry) if entry.is_dir() => {
                dir_clust = if entry.cluster == 0 { vol.root_clust } else { entry.cluster };
                is_root = false;
            }
            Some(_) => return Err(Error::Path),
            None if is_last => {
                return Ok((
                    mount_name,
                    vol,
                    Resolved {
                        parent_clust: dir_clust,
                        parent_is_root: is_root,
                        entry: None,
                        last_name: comp.to_string(),
                        is_mount_root: false,
                    },
                ));
            }
            None => return Err(Error::Path),
        }
    }
    unreachable!("loop always returns on the last component")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_separates_mount_and_components() {
        let (mount, comps) = split_path("/disk0/a/b.txt").unwrap();
        assert_eq!(mount, "disk0");
        assert_eq!(comps, vec!["a", "b.txt"]);
    }

    #[test]
    fn split_path_root_only() {
        let (mount, comps) = split_path("/disk0").unwrap();
        assert_eq!(mount, "disk0");
        assert!(comps.is_empty());
    }

    #[test]
    fn split_path_rejects_relative() {
        assert!(split_path("disk0/a").is_err());
    }
}
