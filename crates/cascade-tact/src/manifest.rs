//! Pipe-separated build manifests.
//!
//! The patch service (`versions`, `cdns`) and local installs
//! (`.build.info`) describe builds with the same tabular text format: a
//! header row of `Name!TYPE:length` fields, an optional `## seqn = N`
//! line, then one row per record, all fields separated by `|`.

use tracing::{debug, trace};

use crate::{Error, Result};

/// Declared type of a manifest column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Hex,
    Dec,
}

impl FieldKind {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "STRING" => Some(Self::String),
            "HEX" => Some(Self::Hex),
            "DEC" | "DECIMAL" => Some(Self::Dec),
            _ => None,
        }
    }
}

/// One column of a manifest header.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub length: u32,
}

impl Field {
    /// Parse a `Name!TYPE:length` header cell.
    fn parse(cell: &str, line: usize) -> Result<Self> {
        let syntax = |reason: &str| Error::ManifestSyntax {
            line,
            reason: format!("{reason}: {cell:?}"),
        };

        let (name, spec) = cell.split_once('!').ok_or_else(|| syntax("field has no type"))?;
        let (kind, length) = spec
            .split_once(':')
            .ok_or_else(|| syntax("field type has no length"))?;
        Ok(Self {
            name: name.trim().to_string(),
            kind: FieldKind::parse(kind).ok_or_else(|| syntax("unknown field type"))?,
            length: length.parse().map_err(|_| syntax("bad field length"))?,
        })
    }
}

/// A parsed manifest document.
#[derive(Debug, Clone)]
pub struct Manifest {
    fields: Vec<Field>,
    /// Server-side sequence number, when the document carries one.
    pub seqn: Option<u64>,
    rows: Vec<Vec<String>>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields: Vec<Field> = Vec::new();
        let mut seqn = None;
        let mut rows = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix("##") {
                if let Some(value) = rest.trim().strip_prefix("seqn") {
                    seqn = value.trim_start_matches([' ', '=']).trim().parse().ok();
                }
                continue;
            }

            if fields.is_empty() {
                for cell in line.split('|') {
                    fields.push(Field::parse(cell, index + 1)?);
                }
                trace!("Manifest header: {} fields", fields.len());
                continue;
            }

            let row: Vec<String> = line.split('|').map(|v| v.trim().to_string()).collect();
            if row.len() != fields.len() {
                return Err(Error::ManifestSyntax {
                    line: index + 1,
                    reason: format!("row has {} fields, header has {}", row.len(), fields.len()),
                });
            }
            rows.push(row);
        }

        if fields.is_empty() {
            return Err(Error::ManifestSyntax {
                line: 0,
                reason: "document has no header row".into(),
            });
        }

        debug!("Parsed manifest: {} rows, seqn {:?}", rows.len(), seqn);
        Ok(Self { fields, seqn, rows })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Index of the named column, matched case-insensitively.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::MissingColumn(name.to_string()))
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|values| Row {
            manifest: self,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One data row, addressable by column name.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    manifest: &'a Manifest,
    values: &'a [String],
}

impl Row<'_> {
    pub fn get(&self, name: &str) -> Option<&str> {
        let index = self.manifest.column(name).ok()?;
        self.values.get(index).map(String::as_str)
    }

    fn get_or_empty(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }
}

/// One row of a patch-service `versions` manifest.
#[derive(Debug, Clone)]
pub struct VersionEntry {
    pub region: String,
    /// Hash of the build config document.
    pub build_config: String,
    /// Hash of the CDN config document.
    pub cdn_config: String,
    pub key_ring: Option<String>,
    pub build_id: u32,
    pub versions_name: String,
    pub product_config: Option<String>,
}

pub fn parse_versions(text: &str) -> Result<Vec<VersionEntry>> {
    let doc = Manifest::parse(text)?;
    doc.column("Region")?;
    doc.column("BuildConfig")?;
    doc.column("CDNConfig")?;

    Ok(doc
        .rows()
        .map(|row| VersionEntry {
            region: row.get_or_empty("Region"),
            build_config: row.get_or_empty("BuildConfig"),
            cdn_config: row.get_or_empty("CDNConfig"),
            key_ring: row.get("KeyRing").filter(|v| !v.is_empty()).map(Into::into),
            build_id: row
                .get("BuildId")
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            versions_name: row.get_or_empty("VersionsName"),
            product_config: row
                .get("ProductConfig")
                .filter(|v| !v.is_empty())
                .map(Into::into),
        })
        .collect())
}

/// One row of a patch-service `cdns` manifest.
#[derive(Debug, Clone)]
pub struct CdnEntry {
    /// Region this row serves.
    pub name: String,
    /// Product path component, e.g. `tpr/wow`.
    pub path: String,
    pub hosts: Vec<String>,
    /// Full server URLs, when the service advertises them.
    pub servers: Vec<String>,
    pub config_path: String,
}

pub fn parse_cdns(text: &str) -> Result<Vec<CdnEntry>> {
    let doc = Manifest::parse(text)?;
    doc.column("Name")?;
    doc.column("Hosts")?;
    doc.column("Path")?;

    Ok(doc
        .rows()
        .map(|row| CdnEntry {
            name: row.get_or_empty("Name"),
            path: row.get_or_empty("Path"),
            hosts: split_list(row.get("Hosts")),
            servers: split_list(row.get("Servers")),
            config_path: row.get_or_empty("ConfigPath"),
        })
        .collect())
}

/// One row of a local install's `.build.info`.
#[derive(Debug, Clone)]
pub struct InstalledBuild {
    pub branch: String,
    pub active: bool,
    /// Hash of the build config under `Data/config`.
    pub build_key: String,
    /// Hash of the CDN config under `Data/config`.
    pub cdn_key: String,
    pub cdn_hosts: Vec<String>,
    pub cdn_path: String,
    pub product: String,
    pub version: String,
    pub tags: Vec<String>,
}

pub fn parse_build_info(text: &str) -> Result<Vec<InstalledBuild>> {
    let doc = Manifest::parse(text)?;
    doc.column("Build Key")?;
    doc.column("Product")?;

    Ok(doc
        .rows()
        .map(|row| InstalledBuild {
            branch: row.get_or_empty("Branch"),
            active: row.get("Active").is_some_and(|v| v == "1"),
            build_key: row.get_or_empty("Build Key"),
            cdn_key: row.get_or_empty("CDN Key"),
            cdn_hosts: split_list(row.get("CDN Hosts")),
            cdn_path: row.get_or_empty("CDN Path"),
            product: row.get_or_empty("Product"),
            version: row.get_or_empty("Version"),
            tags: split_list(row.get("Tags")),
        })
        .collect())
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split_whitespace()
        .map(Into::into)
        .collect()
}
