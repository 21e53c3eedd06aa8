//! Key store for encrypted content.
//!
//! Keys are identified by a 64-bit name and are 16 bytes long. A small set
//! of publicly known keys is compiled in; additional keys come from key
//! files (one `name key` pair per line) or runtime registration. Later
//! registrations win on name collision, so user-supplied keys override the
//! built-in set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::CryptoError;

/// Publicly known content keys, sourced from the community key registry.
/// The full database is much larger; these cover the encrypted files a
/// fresh client touches first.
const BUILTIN_KEYS: &[(u64, [u8; 16])] = &[
    (
        0xFA50_5078_126A_CB3E,
        [
            0xBD, 0xC5, 0x18, 0x62, 0xAB, 0xED, 0x79, 0xB2, 0xDE, 0x48, 0xC8, 0xE7, 0xE6, 0x6C,
            0x62, 0x00,
        ],
    ),
    (
        0xFF81_3F7D_062A_C0BC,
        [
            0xAA, 0x0B, 0x5C, 0x77, 0xF0, 0x88, 0xCC, 0xC2, 0xD3, 0x90, 0x49, 0xBD, 0x26, 0x7F,
            0x06, 0x6D,
        ],
    ),
    (
        0xD1E9_B5ED_F928_3668,
        [
            0x8E, 0x4A, 0x25, 0x79, 0x89, 0x4E, 0x38, 0xB4, 0xAB, 0x90, 0x58, 0xBA, 0x5C, 0x73,
            0x28, 0xEE,
        ],
    ),
    (
        0xB767_2964_1141_CB34,
        [
            0x98, 0x49, 0xD1, 0xAA, 0x7B, 0x1F, 0xD0, 0x98, 0x19, 0xC5, 0xC6, 0x62, 0x83, 0xA3,
            0x26, 0xEC,
        ],
    ),
    (
        0xFFB9_469F_F16E_6BF8,
        [
            0xD5, 0x14, 0xBD, 0x19, 0x09, 0xA9, 0xE5, 0xDC, 0x87, 0x03, 0xF4, 0xB8, 0xBB, 0x1D,
            0xFD, 0x9A,
        ],
    ),
    (
        0x0EBE_36B5_010D_FD7F,
        [
            0x9A, 0x89, 0xCC, 0x7E, 0x3A, 0xCB, 0x29, 0xCF, 0x14, 0xC6, 0x0B, 0xC1, 0x3B, 0x1E,
            0x46, 0x16,
        ],
    ),
    (
        0xDEE3_A052_1EFF_6F03,
        [
            0xAD, 0x74, 0x0C, 0xE3, 0xFF, 0xFF, 0x92, 0x31, 0x46, 0x81, 0x26, 0x98, 0x57, 0x08,
            0xE1, 0xB9,
        ],
    ),
];

/// Store of decryption keys, keyed by 64-bit key name.
pub struct Keyring {
    keys: HashMap<u64, [u8; 16]>,
}

impl Keyring {
    /// Create a keyring seeded with the built-in key set.
    pub fn new() -> Self {
        let keys = BUILTIN_KEYS.iter().copied().collect::<HashMap<_, _>>();
        debug!("Seeded keyring with {} built-in keys", keys.len());
        Self { keys }
    }

    /// Create a keyring with no keys at all.
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Look up a key by name. Absence is not an error here; the decoder
    /// decides what a missing key means for the chunk it is working on.
    pub fn get(&self, name: u64) -> Option<&[u8; 16]> {
        self.keys.get(&name)
    }

    /// Register a key, replacing any existing entry with the same name.
    pub fn register(&mut self, name: u64, key: [u8; 16]) {
        self.keys.insert(name, key);
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the keyring holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load keys from a file of `name key` pairs.
    ///
    /// Fields may be separated by whitespace, commas, or tabs, which covers
    /// the txt/csv/tsv layouts key dumps circulate in. Lines starting with
    /// `#`, `;`, or `//` are comments. Malformed lines are logged and
    /// skipped rather than failing the whole file.
    ///
    /// Returns the number of keys loaded.
    pub fn load_key_file(&mut self, path: &Path) -> Result<usize, CryptoError> {
        let content = fs::read_to_string(path)?;
        let mut loaded = 0;

        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty()
                || line.starts_with('#')
                || line.starts_with(';')
                || line.starts_with("//")
            {
                continue;
            }

            let mut fields = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|f| !f.is_empty());
            let (Some(name), Some(key)) = (fields.next(), fields.next()) else {
                warn!("Skipping short key line {} in {:?}", line_no + 1, path);
                continue;
            };

            match (parse_key_name(name), parse_key_value(key)) {
                (Some(name), Some(key)) => {
                    self.register(name, key);
                    loaded += 1;
                }
                (None, _) => {
                    warn!(
                        "Skipping line {} in {:?}: bad key name {:?}",
                        line_no + 1,
                        path,
                        name
                    );
                }
                (_, None) => {
                    warn!(
                        "Skipping line {} in {:?}: bad key value {:?}",
                        line_no + 1,
                        path,
                        key
                    );
                }
            }
        }

        info!("Loaded {} keys from {:?}", loaded, path);
        Ok(loaded)
    }

    /// Load keys from the conventional locations: the `CASCADE_KEYS_PATH`
    /// environment variable (file or directory), the user config directory,
    /// and `~/.tactkeys`. Missing locations are silently skipped.
    pub fn load_from_standard_dirs(&mut self) -> Result<usize, CryptoError> {
        let mut total = 0;

        if let Ok(path) = std::env::var("CASCADE_KEYS_PATH") {
            let path = PathBuf::from(path);
            if path.is_file() {
                match self.load_key_file(&path) {
                    Ok(count) => total += count,
                    Err(e) => warn!("Failed to load keys from CASCADE_KEYS_PATH: {}", e),
                }
            } else if path.is_dir() {
                total += self.load_key_dir(&path)?;
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let dir = config_dir.join("cascade");
            if dir.is_dir() {
                total += self.load_key_dir(&dir)?;
            }
        }

        if let Some(home) = dirs::home_dir() {
            let dir = home.join(".tactkeys");
            if dir.is_dir() {
                total += self.load_key_dir(&dir)?;
            }
        }

        Ok(total)
    }

    fn load_key_dir(&mut self, dir: &Path) -> Result<usize, CryptoError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            let looks_like_keys = name.ends_with(".txt")
                || name.ends_with(".csv")
                || name.ends_with(".tsv")
                || name.contains("key");
            if !looks_like_keys {
                continue;
            }
            match self.load_key_file(&path) {
                Ok(count) => total += count,
                Err(e) => warn!("Failed to load keys from {:?}: {}", path, e),
            }
        }

        Ok(total)
    }
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a 64-bit key name, with or without an `0x` prefix.
fn parse_key_name(field: &str) -> Option<u64> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    if digits.len() != 16 && !field.starts_with("0x") && !field.starts_with("0X") {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Parse a 32-hex-digit key value.
fn parse_key_value(field: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(field).ok()?;
    bytes.try_into().ok()
}
