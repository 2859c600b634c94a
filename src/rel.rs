//! Relationship-related objects for OPC packages.
//!
//! A live [`Relationship`] points either at a part in the owning package, by [`PartId`],
//! or at an external URI. Relative references are never stored for internal targets;
//! they are computed from the target's current partname whenever they are needed, so a
//! part renamed before save still serializes correctly.

use crate::constants::target_mode;
use crate::error::{OpcError, Result};
use crate::oxml;
use crate::part::{PartId, PartSet};
use std::borrow::Cow;
use std::ops::Index;

/// Value of the `TargetMode` attribute of a relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetMode {
    #[default]
    Internal,
    External,
}

impl TargetMode {
    /// Interpret an optional `TargetMode` attribute. Anything but `External` is Internal.
    pub fn from_attr(value: Option<&str>) -> Self {
        match value {
            Some(target_mode::EXTERNAL) => TargetMode::External,
            _ => TargetMode::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetMode::Internal => target_mode::INTERNAL,
            TargetMode::External => target_mode::EXTERNAL,
        }
    }
}

/// What a relationship points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelTarget {
    /// A part of the same package
    Part(PartId),
    /// An external resource, stored as the raw URI
    External(String),
}

/// A single relationship from a source (the package or a part) to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1", "rId2")
    r_id: String,

    /// Relationship type URI
    reltype: String,

    target: RelTarget,

    /// Base URI of the source, used to compute relative references
    base_uri: String,
}

impl Relationship {
    /// Create a new relationship whose source has the base URI `base_uri`.
    pub fn new(
        r_id: impl Into<String>,
        reltype: impl Into<String>,
        target: RelTarget,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            r_id: r_id.into(),
            reltype: reltype.into(),
            target,
            base_uri: base_uri.into(),
        }
    }

    /// Get the relationship ID.
    #[inline]
    pub fn r_id(&self) -> &str {
        &self.r_id
    }

    /// Get the relationship type.
    #[inline]
    pub fn reltype(&self) -> &str {
        &self.reltype
    }

    #[inline]
    pub fn target(&self) -> &RelTarget {
        &self.target
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self.target, RelTarget::External(_))
    }

    #[inline]
    pub fn target_mode(&self) -> TargetMode {
        if self.is_external() {
            TargetMode::External
        } else {
            TargetMode::Internal
        }
    }

    /// The part this relationship points at.
    ///
    /// Fails with [`OpcError::InvalidOperation`] for an external relationship.
    pub fn target_part(&self) -> Result<PartId> {
        match &self.target {
            RelTarget::Part(id) => Ok(*id),
            RelTarget::External(_) => Err(OpcError::InvalidOperation(format!(
                "target_part is undefined for external relationship '{}'",
                self.r_id
            ))),
        }
    }

    /// The reference as it would be written to the `Target` attribute.
    ///
    /// External targets give back the stored URI. Internal targets are computed from the
    /// target part's current partname, relative to the source's base URI.
    pub fn target_ref(&self, parts: &PartSet) -> Result<Cow<'_, str>> {
        match &self.target {
            RelTarget::External(url) => Ok(Cow::Borrowed(url.as_str())),
            RelTarget::Part(id) => {
                let partname = parts.partname(*id)?;
                Ok(Cow::Owned(partname.relative_ref(&self.base_uri)))
            },
        }
    }
}

/// Ordered collection of the relationships from a single source.
///
/// Lookup by rId is a linear scan that returns the first match; the collection does not
/// enforce rId uniqueness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipCollection {
    /// Base URI of the source
    base_uri: String,

    rels: Vec<Relationship>,
}

impl RelationshipCollection {
    /// Create a new empty relationships collection.
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            rels: Vec::new(),
        }
    }

    #[inline]
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Move the collection to a new base URI, as when its source part is renamed.
    pub fn set_base_uri(&mut self, base_uri: &str) {
        self.base_uri = base_uri.to_string();
        for rel in &mut self.rels {
            rel.base_uri = base_uri.to_string();
        }
    }

    /// Append a relationship and return it. The rId is taken as given.
    pub fn add_relationship(
        &mut self,
        reltype: impl Into<String>,
        target: RelTarget,
        r_id: impl Into<String>,
    ) -> &Relationship {
        let idx = self.rels.len();
        self.rels.push(Relationship::new(r_id, reltype, target, self.base_uri.clone()));
        &self.rels[idx]
    }

    /// Get the first relationship with the given ID.
    pub fn get(&self, r_id: &str) -> Option<&Relationship> {
        self.rels.iter().find(|rel| rel.r_id == r_id)
    }

    /// Get the relationship at `idx` in insertion order.
    #[inline]
    pub fn get_index(&self, idx: usize) -> Option<&Relationship> {
        self.rels.get(idx)
    }

    /// Get the single relationship of a specific type.
    ///
    /// Fails with [`OpcError::RelationshipNotFound`] if there is none and with
    /// [`OpcError::AmbiguousRelationship`] if there is more than one.
    pub fn rel_of_type(&self, reltype: &str) -> Result<&Relationship> {
        let mut matching = self.rels.iter().filter(|rel| rel.reltype == reltype);
        match (matching.next(), matching.next()) {
            (Some(rel), None) => Ok(rel),
            (None, _) => Err(OpcError::RelationshipNotFound(format!(
                "No relationship of type '{}'",
                reltype
            ))),
            (Some(_), Some(_)) => Err(OpcError::AmbiguousRelationship(format!(
                "Multiple relationships of type '{}'",
                reltype
            ))),
        }
    }

    /// Get the next available relationship ID.
    ///
    /// IDs have the form "rId1", "rId2", ..., and the lowest unused number wins, so gaps
    /// left by removed relationships are reused.
    pub fn next_r_id(&self) -> String {
        let mut used: Vec<u32> = self
            .rels
            .iter()
            .filter_map(|rel| {
                rel.r_id
                    .strip_prefix("rId")
                    .and_then(|digits| atoi_simd::parse::<u32, false, false>(digits.as_bytes()).ok())
            })
            .collect();
        used.sort_unstable();
        used.dedup();

        let mut next = 1u32;
        for num in used {
            match num.cmp(&next) {
                std::cmp::Ordering::Equal => next += 1,
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Less => {},
            }
        }

        let mut buf = itoa::Buffer::new();
        let mut r_id = String::with_capacity(8);
        r_id.push_str("rId");
        r_id.push_str(buf.format(next));
        r_id
    }

    /// Get the relationship of `reltype` to `target`, adding one with the next rId if none
    /// exists.
    pub fn get_or_add(&mut self, reltype: &str, target: PartId) -> &Relationship {
        let existing = self
            .rels
            .iter()
            .position(|rel| rel.reltype == reltype && rel.target == RelTarget::Part(target));
        match existing {
            Some(idx) => &self.rels[idx],
            None => {
                let r_id = self.next_r_id();
                self.add_relationship(reltype, RelTarget::Part(target), r_id)
            },
        }
    }

    /// Get or add an external relationship, returning its rId.
    pub fn get_or_add_ext_rel(&mut self, reltype: &str, target_ref: &str) -> String {
        let existing = self.rels.iter().find(|rel| {
            rel.reltype == reltype
                && matches!(&rel.target, RelTarget::External(url) if url == target_ref)
        });
        if let Some(rel) = existing {
            return rel.r_id.clone();
        }

        let r_id = self.next_r_id();
        self.add_relationship(reltype, RelTarget::External(target_ref.to_string()), r_id)
            .r_id
            .clone()
    }

    /// Remove the first relationship with the given ID.
    pub fn remove(&mut self, r_id: &str) -> Option<Relationship> {
        let idx = self.rels.iter().position(|rel| rel.r_id == r_id)?;
        Some(self.rels.remove(idx))
    }

    /// Get an iterator over all relationships, in insertion order.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Relationship> {
        self.rels.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rels.is_empty()
    }

    /// The internal targets, in insertion order.
    pub(crate) fn target_parts(&self) -> impl Iterator<Item = PartId> + '_ {
        self.rels.iter().filter_map(|rel| match rel.target {
            RelTarget::Part(id) => Some(id),
            RelTarget::External(_) => None,
        })
    }

    /// Serialize as a `.rels` item, one record per relationship in insertion order.
    ///
    /// Fails with [`OpcError::PartNotFound`] if an internal target is not in `parts`.
    pub fn to_xml(&self, parts: &PartSet) -> Result<String> {
        let entries = self
            .rels
            .iter()
            .map(|rel| -> Result<_> {
                Ok((
                    rel.r_id(),
                    rel.reltype(),
                    rel.target_ref(parts)?,
                    rel.is_external(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(oxml::write_relationships(entries))
    }
}

impl Default for RelationshipCollection {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Index<usize> for RelationshipCollection {
    type Output = Relationship;

    fn index(&self, idx: usize) -> &Relationship {
        &self.rels[idx]
    }
}

impl<'a> IntoIterator for &'a RelationshipCollection {
    type Item = &'a Relationship;
    type IntoIter = std::slice::Iter<'a, Relationship>;

    fn into_iter(self) -> Self::IntoIter {
        self.rels.iter()
    }
}
