//! The install manifest: files a fresh client writes to disk.
//!
//! Unlike root, which covers everything a build can serve, the install
//! manifest lists only the loose files an installation lays down
//! (executables, libraries, bootstrap data), each tagged with the
//! platforms and regions it applies to. Tags carry one bit per entry,
//! most significant bit first.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::ioutils::read_cstring;
use crate::keys::{ContentKey, KEY_LENGTH};
use crate::{Error, Result};

const INSTALL_MAGIC: [u8; 2] = *b"IN";

/// Install manifest header, multi-byte fields big-endian.
#[derive(Debug, Clone)]
pub struct InstallHeader {
    pub version: u8,
    pub hash_size: u8,
    pub tag_count: u16,
    pub entry_count: u32,
}

/// One tag and the set of entries it marks.
#[derive(Debug, Clone)]
pub struct InstallTag {
    pub name: String,
    /// Tag category (platform, architecture, region, ...).
    pub kind: u16,
    mask: Vec<u8>,
}

impl InstallTag {
    /// Whether this tag marks the entry at `index`.
    pub fn marks(&self, index: usize) -> bool {
        self.mask
            .get(index / 8)
            .is_some_and(|byte| byte & (0x80 >> (index % 8)) != 0)
    }
}

/// One file the installer writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntry {
    /// Path relative to the install root.
    pub path: String,
    pub ckey: ContentKey,
    pub size: u32,
}

/// Parsed install manifest.
pub struct InstallManifest {
    pub header: InstallHeader,
    tags: Vec<InstallTag>,
    entries: Vec<InstallEntry>,
}

impl InstallManifest {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(raw);

        let mut magic = [0u8; 2];
        cursor.read_exact(&mut magic)?;
        if magic != INSTALL_MAGIC {
            return Err(Error::BadMagic("install"));
        }

        let version = cursor.read_u8()?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                format: "install",
                version: u32::from(version),
            });
        }
        let hash_size = cursor.read_u8()?;
        if usize::from(hash_size) != KEY_LENGTH {
            return Err(Error::UnsupportedVersion {
                format: "install hash width",
                version: u32::from(hash_size),
            });
        }
        let tag_count = cursor.read_u16::<BigEndian>()?;
        let entry_count = cursor.read_u32::<BigEndian>()?;

        let mask_len = (entry_count as usize).div_ceil(8);
        let mut tags = Vec::with_capacity(usize::from(tag_count));
        for _ in 0..tag_count {
            let name = read_cstring(&mut cursor)?;
            let kind = cursor.read_u16::<BigEndian>()?;
            let mut mask = vec![0u8; mask_len];
            cursor.read_exact(&mut mask)?;
            tags.push(InstallTag { name, kind, mask });
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let path = read_cstring(&mut cursor)?;
            let mut ckey = [0u8; KEY_LENGTH];
            cursor.read_exact(&mut ckey)?;
            let size = cursor.read_u32::<BigEndian>()?;
            entries.push(InstallEntry {
                path,
                ckey: ContentKey::new(ckey),
                size,
            });
        }

        debug!(
            "Install manifest: {} entries, {} tags",
            entries.len(),
            tags.len()
        );
        Ok(Self {
            header: InstallHeader {
                version,
                hash_size,
                tag_count,
                entry_count,
            },
            tags,
            entries,
        })
    }

    pub fn tags(&self) -> &[InstallTag] {
        &self.tags
    }

    pub fn entries(&self) -> &[InstallEntry] {
        &self.entries
    }

    /// Entry for an exact path, matched case-insensitively.
    pub fn entry_for(&self, path: &str) -> Option<&InstallEntry> {
        self.entries
            .iter()
            .find(|entry| entry.path.eq_ignore_ascii_case(path))
    }

    /// Entries marked with every one of the given tag names.
    pub fn entries_tagged<'a>(&'a self, wanted: &[&str]) -> Vec<&'a InstallEntry> {
        let masks: Vec<&InstallTag> = self
            .tags
            .iter()
            .filter(|tag| wanted.iter().any(|name| tag.name.eq_ignore_ascii_case(name)))
            .collect();
        if masks.len() != wanted.len() {
            return Vec::new();
        }

        self.entries
            .iter()
            .enumerate()
            .filter(|(index, _)| masks.iter().all(|tag| tag.marks(*index)))
            .map(|(_, entry)| entry)
            .collect()
    }
}
