//! Root table: file ids and path hashes to content keys.
//!
//! The root file is the entry point of a build's manifest chain. Each
//! record maps a numeric file id to the content key of one variant of
//! that file, tagged with the locales and content flags the variant
//! serves. `TSFM` (`MFST` little-endian) files come in three header
//! generations; the oldest has no magic at all and interleaves name
//! hashes with records.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::io::{ErrorKind, Read, Seek};
use std::ops::BitAnd;

use byteorder::{LittleEndian, ReadBytesExt};
use modular_bitfield::{bitfield, prelude::*};
use tracing::debug;

use crate::jenkins3;
use crate::keys::{ContentKey, KEY_LENGTH};
use crate::{Error, Result};

const ROOT_MAGIC: &[u8; 4] = b"TSFM";

/// Root file header. Three generations exist on the wire: no magic at
/// all (legacy), magic plus file counts, and magic plus an explicit
/// header size, version and file counts.
#[derive(Debug)]
pub struct RootHeader {
    /// Records interleave name hashes instead of storing them in a
    /// trailing array.
    pub legacy_records: bool,
    pub version: u32,
    pub total_file_count: u32,
    pub named_file_count: u32,
    /// Blocks may omit their name-hash array when flagged.
    pub allow_unnamed: bool,
}

impl RootHeader {
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; ROOT_MAGIC.len()];
        reader.read_exact(&mut magic)?;
        if &magic != ROOT_MAGIC {
            // Legacy roots start straight at the first block.
            reader.seek_relative(-(ROOT_MAGIC.len() as i64))?;
            return Ok(Self {
                legacy_records: true,
                version: 0,
                total_file_count: 0,
                named_file_count: 0,
                allow_unnamed: true,
            });
        }

        let first = reader.read_u32::<LittleEndian>()?;
        let mut version = 0;
        let total_file_count;
        if first == 0x18 {
            // Newest generation: explicit header size, then version.
            version = reader.read_u32::<LittleEndian>()?;
            total_file_count = reader.read_u32::<LittleEndian>()?;
        } else {
            total_file_count = first;
        }
        let named_file_count = reader.read_u32::<LittleEndian>()?;
        if first == 0x18 {
            // Padding up to the declared header size.
            reader.seek_relative(4)?;
        }

        Ok(Self {
            legacy_records: false,
            version,
            total_file_count,
            named_file_count,
            allow_unnamed: total_file_count != named_file_count,
        })
    }
}

/// Bitmask of locales a record applies to.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct LocaleFlags {
    #[skip]
    __: B1,
    pub en_us: bool, // 0x2
    pub ko_kr: bool, // 0x4
    #[skip]
    __: B1,

    pub fr_fr: bool, // 0x10
    pub de_de: bool, // 0x20
    pub zh_cn: bool, // 0x40
    pub es_es: bool, // 0x80

    pub zh_tw: bool, // 0x100
    pub en_gb: bool, // 0x200
    pub en_cn: bool, // 0x400
    pub en_tw: bool, // 0x800

    pub es_mx: bool, // 0x1000
    pub ru_ru: bool, // 0x2000
    pub pt_br: bool, // 0x4000
    pub it_it: bool, // 0x8000

    pub pt_pt: bool, // 0x10000
    #[skip]
    __: B15,
}

impl LocaleFlags {
    /// Mask matching every locale.
    pub fn any_locale() -> Self {
        Self::from(0xffff_ffff)
    }

    /// `true` if the mask covers every locale.
    pub fn all(&self) -> bool {
        self == &Self::any_locale()
    }

    /// `true` if at least one bit is set.
    pub fn any(&self) -> bool {
        u32::from(*self) != 0
    }
}

impl BitAnd for LocaleFlags {
    type Output = LocaleFlags;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::from(u32::from(self) & u32::from(rhs))
    }
}

/// Content flags tagging what a record variant is for.
#[bitfield(bytes = 4)]
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub struct ContentFlags {
    /// High-resolution texture variant.
    pub high_res_texture: bool, // 0x1
    #[skip]
    __: B1,
    /// Listed in the install manifest.
    pub install: bool, // 0x4
    /// Windows clients only.
    pub windows: bool, // 0x8

    /// macOS clients only.
    pub macos: bool, // 0x10
    /// `x86_32` binary.
    pub x86_32: bool, // 0x20
    /// `x86_64` binary.
    pub x86_64: bool, // 0x40
    /// Low-violence variant.
    pub low_violence: bool, // 0x80

    pub do_not_load: bool, // 0x100
    #[skip]
    __: B2,
    /// Only set for `UpdatePlugin.{dll,dylib}`.
    pub update_plugin: bool, // 0x800

    #[skip]
    __: B3,
    /// `aarch64` binary.
    pub aarch64: bool, // 0x8000

    #[skip]
    __: B11,
    pub encrypted: bool, // 0x8000000

    pub no_name_hash: bool, // 0x10000000
    /// Non-1280px-wide cinematics.
    pub uncommon_resolution: bool, // 0x20000000
    pub bundle: bool, // 0x40000000
    pub no_compression: bool, // 0x80000000
}

/// The locale and content tags of one record.
#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct RecordFlags {
    pub locale: LocaleFlags,
    pub content: ContentFlags,
}

/// One variant of a file id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRecord {
    pub flags: RecordFlags,
    pub ckey: ContentKey,
}

/// How [`RootTable::resolve`] chooses among several variants of the
/// same file id. Candidates are always filtered by locale first; ties
/// keep the variant declared last in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPolicy {
    /// Prefer variants whose content flags are a subset of the given
    /// active set, then fewest flag bits outside it.
    PreferCompatible(ContentFlags),
    /// Only variants whose content flags equal the given set exactly.
    Exact(ContentFlags),
    /// Ignore content flags entirely.
    LastDeclared,
}

impl Default for RootPolicy {
    fn default() -> Self {
        Self::PreferCompatible(ContentFlags::new())
    }
}

/// Parsed root table.
///
/// Variants of one file id keep their declaration order so that
/// resolution tie-breaks are stable.
pub struct RootTable {
    records: BTreeMap<u32, Vec<RootRecord>>,
    name_hash_fid: HashMap<u64, u32>,
}

impl RootTable {
    /// Parse a root file, keeping only blocks that overlap
    /// `locale_filter` (or apply to all locales). Pass
    /// [`LocaleFlags::any_locale`] to keep everything.
    pub fn parse<R: Read + Seek>(reader: &mut R, locale_filter: LocaleFlags) -> Result<Self> {
        let header = RootHeader::parse(reader)?;
        let mut table = Self {
            records: BTreeMap::new(),
            name_hash_fid: HashMap::new(),
        };

        // Blocks run to EOF; nothing announces the last one.
        loop {
            match table.read_block(reader, &header, locale_filter) {
                Ok(()) => {}
                Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Root table: {} file ids, {} name hashes",
            table.records.len(),
            table.name_hash_fid.len()
        );
        Ok(table)
    }

    fn read_block<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        header: &RootHeader,
        locale_filter: LocaleFlags,
    ) -> Result<()> {
        let num_records = reader.read_u32::<LittleEndian>()? as usize;

        let flags = if header.version == 2 {
            // Version 2 swaps the order and splits content flags over
            // three fields.
            let locale = LocaleFlags::from(reader.read_u32::<LittleEndian>()?);
            let low = reader.read_u32::<LittleEndian>()?;
            let high = reader.read_u32::<LittleEndian>()?;
            let extra = reader.read_u8()?;
            RecordFlags {
                locale,
                content: ContentFlags::from(low | high | (u32::from(extra) << 17)),
            }
        } else {
            RecordFlags {
                content: ContentFlags::from(reader.read_u32::<LittleEndian>()?),
                locale: LocaleFlags::from(reader.read_u32::<LittleEndian>()?),
            }
        };

        if num_records == 0 {
            return Ok(());
        }

        let has_name_hashes =
            header.legacy_records || !(header.allow_unnamed && flags.content.no_name_hash());

        if !flags.locale.all() && !(flags.locale & locale_filter).any() {
            // Not a locale we keep. Record size is the same in both
            // record generations, just arranged differently.
            let record_length =
                size_of::<u32>() + KEY_LENGTH + if has_name_hashes { size_of::<u64>() } else { 0 };
            reader.seek_relative((num_records * record_length) as i64)?;
            return Ok(());
        }

        // File ids are delta-coded: the first record carries an
        // absolute id, later ones add `1 + delta` to the previous.
        let mut file_ids = Vec::with_capacity(num_records);
        let mut file_id = 0u32;
        for i in 0..num_records {
            let delta = reader.read_i32::<LittleEndian>()?;
            file_id = if i == 0 {
                u32::try_from(delta).map_err(|_| Error::FileIdDeltaOverflow)?
            } else {
                file_id
                    .checked_add(1)
                    .and_then(|id| id.checked_add_signed(delta))
                    .ok_or(Error::FileIdDeltaOverflow)?
            };
            file_ids.push(file_id);
        }

        if header.legacy_records {
            for &file_id in &file_ids {
                let mut ckey = [0u8; KEY_LENGTH];
                reader.read_exact(&mut ckey)?;
                self.push_record(file_id, flags, ContentKey::new(ckey));
                let hash = reader.read_u64::<LittleEndian>()?;
                self.name_hash_fid.entry(hash).or_insert(file_id);
            }
        } else {
            for &file_id in &file_ids {
                let mut ckey = [0u8; KEY_LENGTH];
                reader.read_exact(&mut ckey)?;
                self.push_record(file_id, flags, ContentKey::new(ckey));
            }
            if has_name_hashes {
                for &file_id in &file_ids {
                    let hash = reader.read_u64::<LittleEndian>()?;
                    self.name_hash_fid.entry(hash).or_insert(file_id);
                }
            }
        }

        Ok(())
    }

    fn push_record(&mut self, file_id: u32, flags: RecordFlags, ckey: ContentKey) {
        self.records
            .entry(file_id)
            .or_default()
            .push(RootRecord { flags, ckey });
    }

    /// Content key of a file id for the given locale, with variant
    /// selection driven by `policy`. Falls back to an `en_us` variant
    /// when the wanted locale has none.
    pub fn resolve(
        &self,
        file_id: u32,
        locale: LocaleFlags,
        policy: RootPolicy,
    ) -> Option<ContentKey> {
        let records = self.records.get(&file_id)?;
        pick(records, locale, policy).or_else(|| {
            if locale.en_us() {
                None
            } else {
                pick(records, LocaleFlags::new().with_en_us(true), policy)
            }
        })
    }

    /// [`Self::resolve`] addressed by path instead of file id.
    pub fn resolve_by_name(
        &self,
        path: &str,
        locale: LocaleFlags,
        policy: RootPolicy,
    ) -> Option<ContentKey> {
        self.file_id_for(path)
            .and_then(|file_id| self.resolve(file_id, locale, policy))
    }

    /// File id for a path, via the lookup3 path hash.
    pub fn file_id_for(&self, path: &str) -> Option<u32> {
        self.file_id_for_hash(jenkins3::hash_path(path))
    }

    /// File id for a precomputed path hash.
    pub fn file_id_for_hash(&self, hash: u64) -> Option<u32> {
        self.name_hash_fid.get(&hash).copied()
    }

    /// All variants kept for a file id, in declaration order.
    pub fn records(&self, file_id: u32) -> &[RootRecord] {
        self.records.get(&file_id).map_or(&[], Vec::as_slice)
    }

    pub fn file_count(&self) -> usize {
        self.records.len()
    }

    pub fn named_count(&self) -> usize {
        self.name_hash_fid.len()
    }
}

impl Debug for RootTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootTable")
            .field("records.len", &self.records.len())
            .field("name_hash_fid.len", &self.name_hash_fid.len())
            .finish()
    }
}

fn pick(records: &[RootRecord], locale: LocaleFlags, policy: RootPolicy) -> Option<ContentKey> {
    let matching = records
        .iter()
        .filter(|record| record.flags.locale.all() || (record.flags.locale & locale).any());

    match policy {
        RootPolicy::LastDeclared => matching.last().map(|record| record.ckey),
        RootPolicy::Exact(wanted) => matching
            .filter(|record| record.flags.content == wanted)
            .last()
            .map(|record| record.ckey),
        RootPolicy::PreferCompatible(active) => {
            let active = u32::from(active);
            let mut best: Option<(u32, ContentKey)> = None;
            for record in matching {
                let extra = (u32::from(record.flags.content) & !active).count_ones();
                let better = match best {
                    // `<=` keeps the later declaration on ties.
                    Some((current, _)) => extra <= current,
                    None => true,
                };
                if better {
                    best = Some((extra, record.ckey));
                }
            }
            best.map(|(_, ckey)| ckey)
        }
    }
}
