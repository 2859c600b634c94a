//! Content type resolution for package parts.
//!
//! `[Content_Types].xml` assigns a content type to every part either by an `Override`
//! keyed on the exact partname or by a `Default` keyed on the partname's extension.
//! [`ContentTypeMap`] answers lookups on the read path and, on the write path, is rebuilt
//! from the final part list as the smallest set of records that still describes every part.

use crate::constants::content_type as ct;
use crate::error::{OpcError, Result};
use crate::oxml::{self, TypesRecord};
use crate::packuri::PackURI;
use phf::phf_map;
use std::collections::BTreeMap;

/// Standard defaults for extensions that map to exactly one content type.
///
/// `.bin` is absent on purpose: it is shared by the printer-settings types of all three
/// main document formats.
static WELL_KNOWN_DEFAULTS: phf::Map<&'static str, &'static str> = phf_map! {
    ".bmp" => ct::BMP,
    ".emf" => ct::X_EMF,
    ".fntdata" => ct::X_FONTDATA,
    ".gif" => ct::GIF,
    ".jpe" => ct::JPEG,
    ".jpeg" => ct::JPEG,
    ".jpg" => ct::JPEG,
    ".png" => ct::PNG,
    ".rels" => ct::OPC_RELATIONSHIPS,
    ".tif" => ct::TIFF,
    ".tiff" => ct::TIFF,
    ".wdp" => ct::MS_PHOTO,
    ".wmf" => ct::X_WMF,
    ".xlsx" => ct::SML_SHEET,
    ".xml" => ct::XML,
};

/// The standard default content type for `ext` (with its leading period), if the
/// extension is unambiguous.
pub fn default_content_type(ext: &str) -> Option<&'static str> {
    WELL_KNOWN_DEFAULTS
        .get(ext.to_ascii_lowercase().as_str())
        .copied()
}

/// Overrides by exact partname and defaults by lowercased extension.
///
/// Both tables are ordered so that serialization is deterministic: defaults by extension,
/// then overrides by partname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentTypeMap {
    /// Maps extensions (lowercase, leading period included) to default content types
    defaults: BTreeMap<String, String>,

    /// Maps exact partnames to override content types
    overrides: BTreeMap<PackURI, String>,
}

impl ContentTypeMap {
    /// Create a new empty content type map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the content types item.
    ///
    /// Fails with [`OpcError::MalformedContentTypes`] if the XML does not parse, the document
    /// element is not `<Types>`, a record lacks a required attribute, or an override names
    /// a partname that is not a valid PackURI.
    pub fn from_xml(xml: &[u8]) -> Result<Self> {
        let records = oxml::parse_types(xml).map_err(OpcError::MalformedContentTypes)?;

        let mut map = Self::new();
        for record in records {
            match record {
                TypesRecord::Default {
                    extension,
                    content_type,
                } => map.add_default(&extension, content_type),
                TypesRecord::Override {
                    partname,
                    content_type,
                } => {
                    let partname = PackURI::new(partname).map_err(|e| {
                        OpcError::MalformedContentTypes(format!("Override PartName: {}", e))
                    })?;
                    map.add_override(partname, content_type);
                },
            }
        }
        Ok(map)
    }

    /// Add a default content type for an extension, with or without its leading period.
    pub fn add_default(&mut self, extension: &str, content_type: impl Into<String>) {
        self.defaults
            .insert(normalize_ext(extension), content_type.into());
    }

    /// Add an override content type for a specific partname.
    pub fn add_override(&mut self, partname: PackURI, content_type: impl Into<String>) {
        self.overrides.insert(partname, content_type.into());
    }

    /// Content type of `partname`: its override if any, else the default for its extension.
    ///
    /// Fails with [`OpcError::UnknownContentType`] when neither exists.
    pub fn get(&self, partname: &PackURI) -> Result<&str> {
        if let Some(content_type) = self.overrides.get(partname) {
            return Ok(content_type.as_str());
        }

        let ext = partname.ext();
        if ext.is_empty() {
            return Err(OpcError::UnknownContentType(partname.to_string()));
        }

        self.defaults
            .get(ext.to_ascii_lowercase().as_str())
            .map(String::as_str)
            .ok_or_else(|| OpcError::UnknownContentType(partname.to_string()))
    }

    /// Default content type registered for `ext` (with its leading period).
    pub fn default_for(&self, ext: &str) -> Option<&str> {
        self.defaults.get(&normalize_ext(ext)).map(String::as_str)
    }

    /// Override content type registered for `partname`.
    pub fn override_for(&self, partname: &PackURI) -> Option<&str> {
        self.overrides.get(partname).map(String::as_str)
    }

    /// Number of default records.
    pub fn defaults_len(&self) -> usize {
        self.defaults.len()
    }

    /// Number of override records.
    pub fn overrides_len(&self) -> usize {
        self.overrides.len()
    }

    /// Build the minimal map describing `parts`, given as `(partname, content_type)` pairs.
    ///
    /// Parts are grouped by extension. Each group contributes one default: its most frequent
    /// content type, ties going to the lexicographically smallest. Every part whose type
    /// differs from its group's default, and every extensionless part, gets an override.
    /// `.rels` always defaults to the relationships type and `.xml` always has a default,
    /// `application/xml` unless the `.xml` parts agree on something else.
    pub fn from_parts<'a, I>(parts: I) -> Self
    where
        I: IntoIterator<Item = (&'a PackURI, &'a str)>,
    {
        let mut groups: BTreeMap<String, Vec<(&'a PackURI, &'a str)>> = BTreeMap::new();
        let mut map = Self::new();

        for (partname, content_type) in parts {
            let ext = partname.ext();
            if ext.is_empty() {
                map.add_override(partname.clone(), content_type);
            } else {
                groups
                    .entry(ext.to_ascii_lowercase())
                    .or_default()
                    .push((partname, content_type));
            }
        }

        for (ext, members) in groups {
            let default = if ext == ".rels" {
                ct::OPC_RELATIONSHIPS
            } else {
                majority_content_type(&members)
            };

            for &(partname, content_type) in &members {
                if content_type != default {
                    map.add_override(partname.clone(), content_type);
                }
            }
            map.defaults.insert(ext, default.to_string());
        }

        map.defaults
            .entry(".rels".to_string())
            .or_insert_with(|| ct::OPC_RELATIONSHIPS.to_string());
        map.defaults
            .entry(".xml".to_string())
            .or_insert_with(|| ct::XML.to_string());

        map
    }

    /// Serialize as a `[Content_Types].xml` document.
    pub fn to_xml(&self) -> String {
        oxml::write_types(
            self.defaults
                .iter()
                .map(|(ext, content_type)| (ext.trim_start_matches('.'), content_type.as_str())),
            self.overrides
                .iter()
                .map(|(partname, content_type)| (partname.as_str(), content_type.as_str())),
        )
    }
}

/// Most frequent content type in a non-empty extension group; ties go to the smallest.
fn majority_content_type<'a>(members: &[(&PackURI, &'a str)]) -> &'a str {
    let mut counts: BTreeMap<&'a str, usize> = BTreeMap::new();
    for &(_, content_type) in members {
        *counts.entry(content_type).or_default() += 1;
    }

    let mut best = ("", 0usize);
    for (content_type, count) in counts {
        // Ascending iteration, so only a strictly larger count displaces the current best
        if count > best.1 {
            best = (content_type, count);
        }
    }
    best.0
}

fn normalize_ext(extension: &str) -> String {
    let extension = extension.to_ascii_lowercase();
    if extension.starts_with('.') {
        extension
    } else {
        format!(".{}", extension)
    }
}
