//! Low-level, read-only API to a serialized Open Packaging Convention (OPC) package.
//!
//! [`PackageReader`] walks the relationship graph of a physical package, starting at the
//! package relationships, and loads every reachable internal part exactly once. What it
//! produces is still addressed by partname; wiring parts to each other is left to
//! [`OpcPackage`](crate::package::OpcPackage).

use crate::content_types::ContentTypeMap;
use crate::error::{OpcError, Result};
use crate::oxml::{self, RelationshipRecord};
use crate::packuri::{PACKAGE_URI, PackURI};
use crate::phys_pkg::PhysPkgReader;
use crate::rel::TargetMode;
use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Serialized relationship as read from a .rels item.
///
/// Contains all relationship information in string form, before being converted into a
/// live relationship with a resolved part reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedRelationship {
    /// Base URI for resolving relative references
    pub base_uri: String,

    /// Relationship ID (e.g., "rId1")
    pub r_id: String,

    /// Relationship type URI
    pub reltype: String,

    /// Target reference (relative URI or external URL), as stored
    pub target_ref: String,

    /// Target mode (Internal or External)
    pub target_mode: TargetMode,
}

impl SerializedRelationship {
    /// Build from one parsed `<Relationship>` record. A missing `TargetMode` means Internal.
    pub(crate) fn from_record(base_uri: &str, record: RelationshipRecord) -> Self {
        Self {
            base_uri: base_uri.to_string(),
            r_id: record.r_id,
            reltype: record.reltype,
            target_ref: record.target_ref,
            target_mode: TargetMode::from_attr(record.target_mode.as_deref()),
        }
    }

    /// Check if this is an external relationship.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.target_mode == TargetMode::External
    }

    /// The absolute partname of the target.
    ///
    /// Resolves the relative target reference against the base URI. Fails with
    /// [`OpcError::InvalidOperation`] for an external relationship, which has no partname.
    pub fn target_partname(&self) -> Result<PackURI> {
        if self.is_external() {
            return Err(OpcError::InvalidOperation(format!(
                "target_partname is undefined for external relationship '{}'",
                self.r_id
            )));
        }
        PackURI::from_rel_ref(&self.base_uri, &self.target_ref)
    }
}

/// The serialized relationships of one source, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedRelationshipCollection {
    srels: SmallVec<[SerializedRelationship; 8]>,
}

impl SerializedRelationshipCollection {
    /// Load the collection for a source whose base URI is `base_uri`.
    ///
    /// `None` means the source has no relationships item, which yields an empty collection.
    pub fn load_from_xml(base_uri: &str, rels_xml: Option<&[u8]>) -> Result<Self> {
        let Some(xml) = rels_xml else {
            return Ok(Self::default());
        };

        let records = oxml::parse_relationships(xml).map_err(|msg| {
            OpcError::MalformedRelationships(format!("relationships for '{}': {}", base_uri, msg))
        })?;
        Ok(Self {
            srels: records
                .into_iter()
                .map(|record| SerializedRelationship::from_record(base_uri, record))
                .collect(),
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SerializedRelationship> {
        self.srels.iter()
    }

    pub fn len(&self) -> usize {
        self.srels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.srels.is_empty()
    }

    fn get(&self, idx: usize) -> Option<&SerializedRelationship> {
        self.srels.get(idx)
    }
}

impl<'a> IntoIterator for &'a SerializedRelationshipCollection {
    type Item = &'a SerializedRelationship;
    type IntoIter = std::slice::Iter<'a, SerializedRelationship>;

    fn into_iter(self) -> Self::IntoIter {
        self.srels.iter()
    }
}

impl IntoIterator for SerializedRelationshipCollection {
    type Item = SerializedRelationship;
    type IntoIter = smallvec::IntoIter<[SerializedRelationship; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.srels.into_iter()
    }
}

/// Serialized part with its content and relationships.
///
/// Represents a part as loaded from the physical package, before being converted into a
/// live part.
#[derive(Debug, Clone)]
pub struct SerializedPart {
    /// The partname (URI) of this part
    pub partname: PackURI,

    /// The content type of this part
    pub content_type: String,

    /// The type of the relationship this part was first reached through
    pub reltype: String,

    /// The binary content of this part
    pub blob: Bytes,

    /// Serialized relationships from this part
    pub srels: SerializedRelationshipCollection,
}

/// Package reader that provides access to serialized parts and relationships.
#[derive(Debug)]
pub struct PackageReader {
    content_types: ContentTypeMap,

    /// Package-level relationships
    pkg_srels: SerializedRelationshipCollection,

    /// All reachable parts, in discovery order
    sparts: Vec<SerializedPart>,
}

impl PackageReader {
    /// Discover every part reachable from the package relationships of `phys_reader`.
    ///
    /// The walk is depth-first and pre-order: a part is emitted before the parts it
    /// relates to. Each part is read exactly once however many relationships target it,
    /// so cycles terminate. External relationships are never followed. The physical
    /// reader is closed when discovery ends, whether or not it succeeded.
    pub fn from_phys_reader(phys_reader: &mut dyn PhysPkgReader) -> Result<Self> {
        let discovered = Self::discover(phys_reader);
        let closed = phys_reader.close();
        let reader = discovered?;
        closed?;
        Ok(reader)
    }

    fn discover(phys_reader: &mut dyn PhysPkgReader) -> Result<Self> {
        let content_types = ContentTypeMap::from_xml(&phys_reader.content_types_xml()?)?;

        let package_uri = PackURI::package();
        let pkg_srels = SerializedRelationshipCollection::load_from_xml(
            package_uri.base_uri(),
            phys_reader.rels_xml_for(&package_uri)?.as_deref(),
        )?;

        let mut sparts: Vec<SerializedPart> = Vec::with_capacity(32);
        let mut visited: HashSet<PackURI> = HashSet::with_capacity(32);

        // Each frame is (source, index of the next relationship to follow). A source of
        // `None` is the package itself, `Some(i)` is `sparts[i]`.
        let mut stack: Vec<(Option<usize>, usize)> = vec![(None, 0)];

        while let Some(frame) = stack.last_mut() {
            let (source, next) = *frame;
            frame.1 += 1;

            let srels = match source {
                Some(idx) => &sparts[idx].srels,
                None => &pkg_srels,
            };
            let Some(srel) = srels.get(next) else {
                stack.pop();
                continue;
            };
            if srel.is_external() {
                continue;
            }

            let partname = srel.target_partname()?;
            if !visited.insert(partname.clone()) {
                trace!(partname = %partname, "part already discovered");
                continue;
            }
            let r_id = srel.r_id.clone();
            let reltype = srel.reltype.clone();

            let blob = match phys_reader.blob_for(&partname) {
                Ok(blob) => blob,
                Err(OpcError::MissingMember(_)) => {
                    let source_uri = match source {
                        Some(idx) => sparts[idx].partname.to_string(),
                        None => PACKAGE_URI.to_string(),
                    };
                    return Err(OpcError::DanglingRelationshipTarget {
                        source_uri,
                        r_id,
                        target: partname.to_string(),
                    });
                },
                Err(e) => return Err(e),
            };
            let content_type = content_types.get(&partname)?.to_string();
            let srels = SerializedRelationshipCollection::load_from_xml(
                partname.base_uri(),
                phys_reader.rels_xml_for(&partname)?.as_deref(),
            )?;

            trace!(
                partname = %partname,
                content_type = %content_type,
                reltype = %reltype,
                rels = srels.len(),
                "discovered part"
            );
            sparts.push(SerializedPart {
                partname,
                content_type,
                reltype,
                blob: Bytes::from(blob),
                srels,
            });
            stack.push((Some(sparts.len() - 1), 0));
        }

        debug!(parts = sparts.len(), "package discovery complete");
        Ok(Self {
            content_types,
            pkg_srels,
            sparts,
        })
    }

    /// The content type map read from `[Content_Types].xml`.
    pub fn content_types(&self) -> &ContentTypeMap {
        &self.content_types
    }

    /// Get an iterator over all serialized parts, in discovery order.
    pub fn iter_sparts(&self) -> impl Iterator<Item = &SerializedPart> {
        self.sparts.iter()
    }

    /// Every serialized relationship paired with the partname of its source.
    ///
    /// Package relationships come first under `/`, then each part's in discovery order.
    pub fn iter_srels(&self) -> impl Iterator<Item = (&str, &SerializedRelationship)> {
        let pkg = self.pkg_srels.iter().map(|srel| (PACKAGE_URI, srel));
        let parts = self.sparts.iter().flat_map(|spart| {
            spart
                .srels
                .iter()
                .map(move |srel| (spart.partname.as_str(), srel))
        });
        pkg.chain(parts)
    }

    /// Get package-level relationships.
    pub fn pkg_srels(&self) -> &SerializedRelationshipCollection {
        &self.pkg_srels
    }

    /// Take ownership of package-level relationships.
    pub fn take_pkg_srels(&mut self) -> SerializedRelationshipCollection {
        std::mem::take(&mut self.pkg_srels)
    }

    /// Take ownership of all serialized parts.
    pub fn take_sparts(&mut self) -> Vec<SerializedPart> {
        std::mem::take(&mut self.sparts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::content_type as ct;
    use std::borrow::Cow;
    use std::collections::HashMap;

    /// In-memory physical package that records which members were read.
    #[derive(Default)]
    struct MemReader {
        members: HashMap<String, Vec<u8>>,
        reads: Vec<String>,
        closed: bool,
    }

    impl MemReader {
        fn with(mut self, name: &str, blob: impl Into<Vec<u8>>) -> Self {
            self.members.insert(name.to_string(), blob.into());
            self
        }

        fn part_reads(&self, name: &str) -> usize {
            self.reads.iter().filter(|read| *read == name).count()
        }
    }

    impl PhysPkgReader for MemReader {
        fn blob_for(&mut self, pack_uri: &PackURI) -> Result<Vec<u8>> {
            if self.closed {
                return Err(OpcError::InvalidOperation("closed".to_string()));
            }
            self.reads.push(pack_uri.to_string());
            self.members
                .get(pack_uri.as_str())
                .cloned()
                .ok_or_else(|| OpcError::MissingMember(pack_uri.to_string()))
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    fn rels(entries: &[(&str, &str, bool)]) -> Vec<u8> {
        oxml::write_relationships(entries.iter().map(|&(r_id, target, external)| {
            (r_id, "http://rt", Cow::Borrowed(target), external)
        }))
        .into_bytes()
    }

    fn content_types() -> Vec<u8> {
        let mut map = ContentTypeMap::new();
        map.add_default("xml", ct::XML);
        map.add_default("rels", ct::OPC_RELATIONSHIPS);
        map.add_override(PackURI::new("/sub/part3.bin").unwrap(), "app/bin");
        map.to_xml().into_bytes()
    }

    /// package -> part1, package -> external; part1 -> part2; part2 -> part1, part3
    fn cyclic_package() -> MemReader {
        MemReader::default()
            .with("/[Content_Types].xml", content_types())
            .with(
                "/_rels/.rels",
                rels(&[("rId1", "part1.xml", false), ("rId2", "http://example.com", true)]),
            )
            .with("/part1.xml", "<p1/>")
            .with("/_rels/part1.xml.rels", rels(&[("rId1", "sub/part2.xml", false)]))
            .with("/sub/part2.xml", "<p2/>")
            .with(
                "/sub/_rels/part2.xml.rels",
                rels(&[("rId1", "../part1.xml", false), ("rId2", "part3.bin", false)]),
            )
            .with("/sub/part3.bin", vec![0u8, 1, 2])
    }

    #[test]
    fn test_serialized_relationship_targets() {
        let srel = SerializedRelationship {
            base_uri: "/ppt/slides".to_string(),
            r_id: "rId1".to_string(),
            reltype: "t".to_string(),
            target_ref: "../media/image1.png".to_string(),
            target_mode: TargetMode::Internal,
        };
        assert!(!srel.is_external());
        assert_eq!(srel.target_partname().unwrap().as_str(), "/ppt/media/image1.png");

        let external = SerializedRelationship {
            target_mode: TargetMode::External,
            target_ref: "https://example.com".to_string(),
            ..srel
        };
        assert!(external.is_external());
        assert!(matches!(
            external.target_partname(),
            Err(OpcError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_load_srels() {
        let empty = SerializedRelationshipCollection::load_from_xml("/word", None).unwrap();
        assert!(empty.is_empty());

        let xml = rels(&[("rId1", "media/a.png", false), ("rId9", "http://x", true)]);
        let srels = SerializedRelationshipCollection::load_from_xml("/word", Some(&xml)).unwrap();
        let ids: Vec<_> = srels.iter().map(|srel| srel.r_id.as_str()).collect();
        assert_eq!(ids, ["rId1", "rId9"]);
        assert_eq!(srels.iter().next().unwrap().base_uri, "/word");
        assert!(srels.iter().nth(1).unwrap().is_external());

        let err = SerializedRelationshipCollection::load_from_xml("/word", Some(b"<nope/>"))
            .unwrap_err();
        assert!(matches!(err, OpcError::MalformedRelationships(_)));
    }

    #[test]
    fn test_discovery_visits_each_part_once() {
        let mut phys = cyclic_package();
        let reader = PackageReader::from_phys_reader(&mut phys).unwrap();

        let names: Vec<_> = reader.iter_sparts().map(|spart| spart.partname.as_str()).collect();
        assert_eq!(names, ["/part1.xml", "/sub/part2.xml", "/sub/part3.bin"]);
        assert!(reader.iter_sparts().all(|spart| spart.reltype == "http://rt"));

        assert_eq!(phys.part_reads("/part1.xml"), 1);
        assert_eq!(phys.part_reads("/sub/part2.xml"), 1);
        assert_eq!(phys.part_reads("/sub/part3.bin"), 1);
        assert!(phys.closed);

        let part3 = reader.iter_sparts().nth(2).unwrap();
        assert_eq!(part3.content_type, "app/bin");
        assert_eq!(part3.blob.as_ref(), &[0u8, 1, 2]);
        assert!(part3.srels.is_empty());
    }

    #[test]
    fn test_iter_srels_order() {
        let mut phys = cyclic_package();
        let reader = PackageReader::from_phys_reader(&mut phys).unwrap();

        let srels: Vec<_> = reader
            .iter_srels()
            .map(|(source, srel)| (source, srel.r_id.as_str()))
            .collect();
        assert_eq!(
            srels,
            [
                ("/", "rId1"),
                ("/", "rId2"),
                ("/part1.xml", "rId1"),
                ("/sub/part2.xml", "rId1"),
                ("/sub/part2.xml", "rId2"),
            ]
        );
    }

    #[test]
    fn test_dangling_target_fails_and_closes() {
        let mut phys = MemReader::default()
            .with("/[Content_Types].xml", content_types())
            .with("/_rels/.rels", rels(&[("rId1", "part1.xml", false)]))
            .with("/part1.xml", "<p1/>")
            .with("/_rels/part1.xml.rels", rels(&[("rId4", "missing.xml", false)]));

        let err = PackageReader::from_phys_reader(&mut phys).unwrap_err();
        match err {
            OpcError::DanglingRelationshipTarget {
                source_uri,
                r_id,
                target,
            } => {
                assert_eq!(source_uri, "/part1.xml");
                assert_eq!(r_id, "rId4");
                assert_eq!(target, "/missing.xml");
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(phys.closed);
    }

    #[test]
    fn test_unknown_content_type() {
        let mut phys = MemReader::default()
            .with("/[Content_Types].xml", content_types())
            .with("/_rels/.rels", rels(&[("rId1", "image.png", false)]))
            .with("/image.png", vec![0x89]);

        assert!(matches!(
            PackageReader::from_phys_reader(&mut phys),
            Err(OpcError::UnknownContentType(name)) if name == "/image.png"
        ));
    }

    #[test]
    fn test_missing_content_types() {
        let mut phys = MemReader::default().with("/_rels/.rels", rels(&[]));
        assert!(matches!(
            PackageReader::from_phys_reader(&mut phys),
            Err(OpcError::MalformedPackage(_))
        ));
        assert!(phys.closed);
    }

    #[test]
    fn test_package_without_relationships() {
        let mut phys = MemReader::default().with("/[Content_Types].xml", content_types());
        let reader = PackageReader::from_phys_reader(&mut phys).unwrap();
        assert!(reader.pkg_srels().is_empty());
        assert_eq!(reader.iter_sparts().count(), 0);
    }
}
