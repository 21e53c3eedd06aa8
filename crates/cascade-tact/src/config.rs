//! Build and CDN configuration documents.
//!
//! Both are plain-text `key = value` files fetched from the CDN `config`
//! path. Values are whitespace-separated lists; hash-valued keys carry the
//! content hash first and, where present, the encoded hash second.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::keys::{ContentKey, EncodingKey};
use crate::{Error, Result};

/// A parsed `key = value` document.
#[derive(Debug, Clone, Default)]
pub struct ConfigDoc {
    values: HashMap<String, String>,
}

impl ConfigDoc {
    /// Parse a document. Lines without a `=` and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                trace!("Skipping config line without '=': {line:?}");
                continue;
            };
            values.insert(key.trim().to_string(), value.trim().to_string());
        }

        debug!("Parsed config with {} entries", values.len());
        Self { values }
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value for `key` split on whitespace.
    pub fn fields(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build configuration: names the tables that make up one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub doc: ConfigDoc,
}

impl BuildConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            doc: ConfigDoc::parse(text),
        }
    }

    fn first_key(&self, key: &'static str) -> Result<ContentKey> {
        let fields = self.doc.fields(key);
        let first = fields.first().ok_or(Error::ConfigKey(key))?;
        first.parse().map_err(|_| Error::ConfigKey(key))
    }

    /// Content key of the root table.
    pub fn root(&self) -> Result<ContentKey> {
        self.first_key("root")
    }

    /// Content and encoding keys of the encoding table.
    ///
    /// The encoding key is what the CDN serves; without it the table could
    /// only be fetched by resolving through itself.
    pub fn encoding(&self) -> Result<(ContentKey, EncodingKey)> {
        let fields = self.doc.fields("encoding");
        match fields.as_slice() {
            [ckey, ekey, ..] => {
                let ckey = ckey.parse().map_err(|_| Error::ConfigKey("encoding"))?;
                let ekey = ekey.parse().map_err(|_| Error::ConfigKey("encoding"))?;
                Ok((ckey, ekey))
            }
            _ => Err(Error::ConfigKey("encoding")),
        }
    }

    /// Declared (decoded, encoded) sizes of the encoding table.
    pub fn encoding_size(&self) -> Option<(u64, u64)> {
        let fields = self.doc.fields("encoding-size");
        match fields.as_slice() {
            [decoded, encoded, ..] => Some((decoded.parse().ok()?, encoded.parse().ok()?)),
            _ => None,
        }
    }

    /// Content key of the install manifest.
    pub fn install(&self) -> Result<ContentKey> {
        self.first_key("install")
    }

    /// Content key of the download manifest.
    pub fn download(&self) -> Result<ContentKey> {
        self.first_key("download")
    }

    /// Content key of the size file.
    pub fn size_manifest(&self) -> Result<ContentKey> {
        self.first_key("size")
    }

    pub fn build_name(&self) -> Option<&str> {
        self.doc.get("build-name")
    }

    pub fn build_uid(&self) -> Option<&str> {
        self.doc.get("build-uid")
    }
}

/// CDN configuration: names the archives a build's content lives in.
#[derive(Debug, Clone)]
pub struct CdnConfig {
    pub doc: ConfigDoc,
}

impl CdnConfig {
    pub fn parse(text: &str) -> Self {
        Self {
            doc: ConfigDoc::parse(text),
        }
    }

    /// Archive hashes in declaration order. The position of a hash in this
    /// list is the archive id used by index entries.
    pub fn archives(&self) -> Vec<&str> {
        self.doc.fields("archives")
    }

    /// Declared sizes of the archive `.index` files, parallel to
    /// [`archives`](Self::archives).
    pub fn archive_index_sizes(&self) -> Vec<u64> {
        self.doc
            .fields("archives-index-size")
            .iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    pub fn archive_group(&self) -> Option<&str> {
        self.doc.get("archive-group")
    }

    /// Index of loose (unarchived) files, when the build publishes one.
    pub fn file_index(&self) -> Option<&str> {
        self.doc.get("file-index")
    }

    pub fn patch_archives(&self) -> Vec<&str> {
        self.doc.fields("patch-archives")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines() {
        let doc = ConfigDoc::parse(
            "# Build Configuration\n\
             \n\
             root = 2b99bfec7aea23a6a5c4b1b5032d463e\n\
             build-name = WOW-46247patch10.2.5_Retail\n\
             not a config line\n",
        );
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.get("root"), Some("2b99bfec7aea23a6a5c4b1b5032d463e"));
        assert_eq!(doc.get("build-name"), Some("WOW-46247patch10.2.5_Retail"));
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn empty_values_are_kept() {
        let doc = ConfigDoc::parse("patch =\n");
        assert_eq!(doc.get("patch"), Some(""));
        assert!(doc.fields("patch").is_empty());
    }

    #[test]
    fn build_config_typed_accessors() {
        let build = BuildConfig::parse(
            "root = 2b99bfec7aea23a6a5c4b1b5032d463e\n\
             install = e179c91cecb9e582351ab5ab2a9b4e4f 6a5f4bd8d491d2578c9152fd82b8e561\n\
             encoding = 0446edcd339098488b2b7ea7d19db204 b50a4d2ccb25a3ba5a9e9f0478440a69\n\
             encoding-size = 109811008 109849419\n\
             build-name = WOW-46247patch10.2.5_Retail\n\
             build-uid = wow\n",
        );

        assert_eq!(
            build.root().unwrap().to_string(),
            "2b99bfec7aea23a6a5c4b1b5032d463e"
        );
        let (ckey, ekey) = build.encoding().unwrap();
        assert_eq!(ckey.to_string(), "0446edcd339098488b2b7ea7d19db204");
        assert_eq!(ekey.to_string(), "b50a4d2ccb25a3ba5a9e9f0478440a69");
        assert_eq!(build.encoding_size(), Some((109_811_008, 109_849_419)));
        assert_eq!(
            build.install().unwrap().to_string(),
            "e179c91cecb9e582351ab5ab2a9b4e4f"
        );
        assert_eq!(build.build_uid(), Some("wow"));
    }

    #[test]
    fn build_config_missing_keys_error() {
        let build = BuildConfig::parse("build-uid = wow\n");
        assert!(matches!(build.root(), Err(Error::ConfigKey("root"))));
        assert!(matches!(
            build.encoding(),
            Err(Error::ConfigKey("encoding"))
        ));
    }

    #[test]
    fn encoding_requires_both_hashes() {
        let build = BuildConfig::parse("encoding = 0446edcd339098488b2b7ea7d19db204\n");
        assert!(build.encoding().is_err());
    }

    #[test]
    fn cdn_config_archive_order_is_preserved() {
        let cdn = CdnConfig::parse(
            "archives = aa1b2c3d4e5f60718293a4b5c6d7e8f9 bb1b2c3d4e5f60718293a4b5c6d7e8f9\n\
             archives-index-size = 11010 22020\n\
             archive-group = cc1b2c3d4e5f60718293a4b5c6d7e8f9\n\
             file-index = dd1b2c3d4e5f60718293a4b5c6d7e8f9\n",
        );

        assert_eq!(
            cdn.archives(),
            [
                "aa1b2c3d4e5f60718293a4b5c6d7e8f9",
                "bb1b2c3d4e5f60718293a4b5c6d7e8f9"
            ]
        );
        assert_eq!(cdn.archive_index_sizes(), [11010, 22020]);
        assert_eq!(cdn.file_index(), Some("dd1b2c3d4e5f60718293a4b5c6d7e8f9"));
        assert!(cdn.patch_archives().is_empty());
    }
}
