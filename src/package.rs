//! Objects that implement reading and writing OPC packages.
//!
//! [`OpcPackage`] is the live object graph of a package: package-level relationships plus
//! the arena of parts they reach. Loading goes physical reader → [`PackageReader`] →
//! unmarshal; saving runs every part's pre-marshal hook and hands the graph to
//! [`PackageWriter`].

use crate::config::{ReadOptions, WriteOptions};
use crate::constants::relationship_type;
use crate::error::{OpcError, Result};
use crate::packuri::{PACKAGE_URI, PackURI};
use crate::part::{PartFactory, PartId, PartKind, PartSet};
use crate::phys_pkg::{PhysPkgReader, PhysPkgWriter, ZipPkgReader, ZipPkgWriter};
use crate::pkgreader::{PackageReader, SerializedRelationship};
use crate::pkgwriter::PackageWriter;
use crate::rel::{RelTarget, Relationship, RelationshipCollection};
use fixedbitset::FixedBitSet;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::debug;

/// Main API class for working with OPC packages.
///
/// # Example
/// ```no_run
/// use litchi_opc::OpcPackage;
///
/// let mut pkg = OpcPackage::open("document.docx")?;
/// let main = pkg.main_document_part()?;
/// println!("{} is {}", main.partname(), main.content_type());
/// pkg.save("copy.docx")?;
/// # Ok::<(), litchi_opc::OpcError>(())
/// ```
#[derive(Debug)]
pub struct OpcPackage {
    /// Package-level relationships
    rels: RelationshipCollection,

    /// Every part of the package, reachable or not
    parts: PartSet,
}

impl OpcPackage {
    /// Create a new empty OPC package.
    pub fn new() -> Self {
        Self {
            rels: RelationshipCollection::new(PACKAGE_URI),
            parts: PartSet::default(),
        }
    }

    /// Open an OPC package from a file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &ReadOptions::default(), &PartFactory::default())
    }

    /// Open an OPC package from a file, constructing parts through `factory`.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: &ReadOptions,
        factory: &PartFactory,
    ) -> Result<Self> {
        let mut phys_reader = ZipPkgReader::open(path, options)?;
        Self::from_phys_reader(&mut phys_reader, factory)
    }

    /// Load an OPC package from a reader.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        Self::from_reader_with(reader, &ReadOptions::default(), &PartFactory::default())
    }

    pub fn from_reader_with<R: Read + Seek>(
        reader: R,
        options: &ReadOptions,
        factory: &PartFactory,
    ) -> Result<Self> {
        let mut phys_reader = ZipPkgReader::new(reader, options)?;
        Self::from_phys_reader(&mut phys_reader, factory)
    }

    /// Load an OPC package held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }

    /// Load an OPC package from any physical package reader.
    ///
    /// Either the whole package loads or an error is returned; the reader is closed in
    /// both cases.
    pub fn from_phys_reader(
        phys_reader: &mut dyn PhysPkgReader,
        factory: &PartFactory,
    ) -> Result<Self> {
        let pkg_reader = PackageReader::from_phys_reader(phys_reader)?;
        Self::unmarshal(pkg_reader, factory)
    }

    /// Build the live graph from the output of a [`PackageReader`].
    ///
    /// Every part is constructed before any relationship is wired, so targets resolve
    /// regardless of discovery order. Post-unmarshal hooks then run in construction order.
    pub fn unmarshal(mut pkg_reader: PackageReader, factory: &PartFactory) -> Result<Self> {
        let mut package = Self::new();
        let pkg_srels = pkg_reader.take_pkg_srels();
        let sparts = pkg_reader.take_sparts();

        // First pass: construct every part
        let mut wiring = Vec::with_capacity(sparts.len());
        for spart in sparts {
            let part = factory.load(spart.partname, spart.content_type, spart.blob)?;
            let id = package.parts.insert(part)?;
            wiring.push((id, spart.srels));
        }

        // Second pass: wire relationships by partname
        for srel in pkg_srels {
            let target = resolve_target(&package.parts, PACKAGE_URI, &srel)?;
            package.rels.add_relationship(srel.reltype, target, srel.r_id);
        }
        for (id, srels) in &wiring {
            let source_uri = package.parts.partname(*id)?.to_string();
            for srel in srels {
                let target = resolve_target(&package.parts, &source_uri, srel)?;
                package.part_mut(*id)?.add_relationship(&srel.reltype, target, &srel.r_id);
            }
        }

        for (id, _) in &wiring {
            package.part_mut(*id)?.after_unmarshal()?;
        }

        debug!(
            parts = package.parts.len(),
            pkg_rels = package.rels.len(),
            "unmarshalled package"
        );
        Ok(package)
    }

    /// Save the package to a file.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.save_with(path, &WriteOptions::default())
    }

    pub fn save_with<P: AsRef<Path>>(&mut self, path: P, options: &WriteOptions) -> Result<()> {
        let file = File::create(path)?;
        let mut phys_writer = ZipPkgWriter::new(BufWriter::new(file), options.clone());
        self.marshal(&mut phys_writer)?;
        phys_writer.into_inner()?.flush()?;
        Ok(())
    }

    /// Write the package to any seekable sink, returning the sink.
    pub fn write_to<W: Write + Seek>(&mut self, sink: W, options: &WriteOptions) -> Result<W> {
        let mut phys_writer = ZipPkgWriter::new(sink, options.clone());
        self.marshal(&mut phys_writer)?;
        phys_writer.into_inner()
    }

    /// Serialize the package to bytes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let cursor = self.write_to(Cursor::new(Vec::new()), &WriteOptions::default())?;
        Ok(cursor.into_inner())
    }

    /// Run every part's pre-marshal hook, in enumeration order, then write the package
    /// through `phys_writer`.
    pub fn marshal(&mut self, phys_writer: &mut dyn PhysPkgWriter) -> Result<()> {
        for id in self.parts() {
            self.part_mut(id)?.before_marshal()?;
        }
        PackageWriter::write(phys_writer, self)
    }

    /// Every part reachable from the package relationships, each exactly once.
    ///
    /// The walk is depth-first and pre-order, following relationships in insertion
    /// order, and so matches the order in which a loaded package was discovered.
    pub fn parts(&self) -> Vec<PartId> {
        let mut visited = FixedBitSet::with_capacity(self.parts.len());
        let mut order = Vec::with_capacity(self.parts.len());

        // (source, index of the next relationship to follow); `None` is the package
        let mut stack: Vec<(Option<PartId>, usize)> = vec![(None, 0)];
        while let Some(frame) = stack.last_mut() {
            let (source, next) = *frame;
            frame.1 += 1;

            let rels = match source {
                Some(id) => match self.parts.get(id) {
                    Some(part) => part.rels(),
                    None => {
                        stack.pop();
                        continue;
                    },
                },
                None => &self.rels,
            };
            let Some(rel) = rels.get_index(next) else {
                stack.pop();
                continue;
            };
            let RelTarget::Part(target) = *rel.target() else {
                continue;
            };
            if target.index() >= self.parts.len() || visited.put(target.index()) {
                continue;
            }

            order.push(target);
            stack.push((Some(target), 0));
        }
        order
    }

    /// Iterate over the reachable parts in enumeration order.
    pub fn iter_parts(&self) -> impl Iterator<Item = (PartId, &PartKind)> {
        self.parts()
            .into_iter()
            .filter_map(|id| self.parts.get(id).map(|part| (id, part)))
    }

    /// Iterate over every relationship of the package and its reachable parts, paired with
    /// the partname of its source. Package relationships come first, under `/`.
    pub fn iter_rels(&self) -> impl Iterator<Item = (&str, &Relationship)> {
        let pkg = self.rels.iter().map(|rel| (PACKAGE_URI, rel));
        let parts = self.iter_parts().flat_map(|(_, part)| {
            part.rels()
                .iter()
                .map(move |rel| (part.partname().as_str(), rel))
        });
        pkg.chain(parts)
    }

    /// Get the number of reachable parts.
    pub fn part_count(&self) -> usize {
        self.parts().len()
    }

    /// Get a part by id.
    pub fn part(&self, id: PartId) -> Result<&PartKind> {
        self.parts
            .get(id)
            .ok_or_else(|| OpcError::PartNotFound(format!("no part with index {}", id.index())))
    }

    /// Get a mutable reference to a part by id.
    pub fn part_mut(&mut self, id: PartId) -> Result<&mut PartKind> {
        self.parts
            .get_mut(id)
            .ok_or_else(|| OpcError::PartNotFound(format!("no part with index {}", id.index())))
    }

    /// Get the id of the part named `partname`.
    pub fn part_id(&self, partname: &PackURI) -> Option<PartId> {
        self.parts.id_of(partname)
    }

    /// Get a part by its partname.
    pub fn part_by_name(&self, partname: &PackURI) -> Result<&PartKind> {
        let id = self
            .part_id(partname)
            .ok_or_else(|| OpcError::PartNotFound(partname.to_string()))?;
        self.part(id)
    }

    /// Check if a part exists in the package.
    pub fn contains_part(&self, partname: &PackURI) -> bool {
        self.parts.id_of(partname).is_some()
    }

    /// The part arena, needed to compute relative references of relationships.
    pub fn part_set(&self) -> &PartSet {
        &self.parts
    }

    /// Get the part targeted by the single package relationship of type `reltype`.
    pub fn part_by_reltype(&self, reltype: &str) -> Result<&PartKind> {
        let id = self.rels.rel_of_type(reltype)?.target_part()?;
        self.part(id)
    }

    /// Get a reference to the main document part.
    ///
    /// For Word documents, this is the document.xml part.
    /// For Excel, the workbook.xml part.
    /// For PowerPoint, the presentation.xml part.
    pub fn main_document_part(&self) -> Result<&PartKind> {
        self.part_by_reltype(relationship_type::OFFICE_DOCUMENT)
    }

    /// Add a part to the package and return its id.
    ///
    /// The part only becomes visible to enumeration, and is only saved, once some
    /// relationship reaches it.
    pub fn add_part(&mut self, part: impl Into<PartKind>) -> Result<PartId> {
        self.parts.insert(part.into())
    }

    /// Give a part a new partname. Relationships to it follow the rename.
    pub fn rename_part(&mut self, id: PartId, partname: PackURI) -> Result<()> {
        self.parts.rename(id, partname)
    }

    /// Get a reference to the package-level relationships.
    pub fn rels(&self) -> &RelationshipCollection {
        &self.rels
    }

    /// Get a mutable reference to the package-level relationships.
    pub fn rels_mut(&mut self) -> &mut RelationshipCollection {
        &mut self.rels
    }

    /// Append a package-level relationship with a caller-chosen rId.
    pub fn add_relationship(
        &mut self,
        reltype: &str,
        target: RelTarget,
        r_id: &str,
    ) -> &Relationship {
        self.rels.add_relationship(reltype, target, r_id)
    }

    /// Relate the package to a part, reusing an existing relationship of the same type.
    pub fn relate_to(&mut self, target: PartId, reltype: &str) -> String {
        self.rels.get_or_add(reltype, target).r_id().to_string()
    }

    /// Find the next available partname for a part template.
    ///
    /// `template` holds a `%d` placeholder, filled with the lowest positive number that
    /// does not name an existing part.
    ///
    /// # Example
    /// ```
    /// # use litchi_opc::OpcPackage;
    /// let pkg = OpcPackage::new();
    /// let next_image = pkg.next_partname("/word/media/image%d.png").unwrap();
    /// assert_eq!(next_image.as_str(), "/word/media/image1.png");
    /// ```
    pub fn next_partname(&self, template: &str) -> Result<PackURI> {
        if !template.contains("%d") {
            return Err(OpcError::InvalidOperation(format!(
                "partname template '{}' has no %d placeholder",
                template
            )));
        }

        // At most `len` candidates can be taken, so this ends by `len + 1`
        let mut buf = itoa::Buffer::new();
        let mut n = 1usize;
        loop {
            let candidate = PackURI::new(template.replace("%d", buf.format(n)))?;
            if !self.contains_part(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

impl Default for OpcPackage {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a serialized relationship onto the live target it names.
fn resolve_target(
    parts: &PartSet,
    source_uri: &str,
    srel: &SerializedRelationship,
) -> Result<RelTarget> {
    if srel.is_external() {
        return Ok(RelTarget::External(srel.target_ref.clone()));
    }

    let partname = srel.target_partname()?;
    parts
        .id_of(&partname)
        .map(RelTarget::Part)
        .ok_or_else(|| OpcError::DanglingRelationshipTarget {
            source_uri: source_uri.to_string(),
            r_id: srel.r_id.clone(),
            target: partname.to_string(),
        })
}
