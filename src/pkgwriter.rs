//! Package writer for OPC packages.
//!
//! Writes `[Content_Types].xml`, the package relationships item, and then every reachable
//! part followed by its relationships item, if it has any relationships.

use crate::content_types::ContentTypeMap;
use crate::error::Result;
use crate::package::OpcPackage;
use crate::packuri::PackURI;
use crate::phys_pkg::PhysPkgWriter;
use tracing::debug;

/// Serializes the live graph of an [`OpcPackage`] through a physical writer.
pub struct PackageWriter;

impl PackageWriter {
    /// Write `package` to `phys_writer` and close it.
    ///
    /// Pre-marshal hooks are not run here; [`OpcPackage::marshal`] runs them first.
    pub fn write(phys_writer: &mut dyn PhysPkgWriter, package: &OpcPackage) -> Result<()> {
        let parts = package.parts();

        Self::write_content_types(phys_writer, package)?;
        Self::write_pkg_rels(phys_writer, package)?;
        Self::write_parts(phys_writer, package)?;
        phys_writer.close()?;

        debug!(parts = parts.len(), "wrote package");
        Ok(())
    }

    /// Write the `[Content_Types].xml` item describing every reachable part.
    fn write_content_types(
        phys_writer: &mut dyn PhysPkgWriter,
        package: &OpcPackage,
    ) -> Result<()> {
        let cti = ContentTypeMap::from_parts(
            package
                .iter_parts()
                .map(|(_, part)| (part.partname(), part.content_type())),
        );
        phys_writer.write(&PackURI::content_types(), cti.to_xml().as_bytes())
    }

    /// Write package-level relationships. The package item is written even when empty.
    fn write_pkg_rels(phys_writer: &mut dyn PhysPkgWriter, package: &OpcPackage) -> Result<()> {
        let rels_xml = package.rels().to_xml(package.part_set())?;
        phys_writer.write(&PackURI::package().rels_uri(), rels_xml.as_bytes())
    }

    /// Write all parts and their relationships.
    fn write_parts(phys_writer: &mut dyn PhysPkgWriter, package: &OpcPackage) -> Result<()> {
        for (_, part) in package.iter_parts() {
            phys_writer.write(part.partname(), part.blob())?;

            if !part.rels().is_empty() {
                let rels_xml = part.rels().to_xml(package.part_set())?;
                phys_writer.write(&part.partname().rels_uri(), rels_xml.as_bytes())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::content_type as ct;
    use crate::part::BlobPart;
    use crate::rel::RelTarget;

    /// Physical writer that keeps members in write order.
    #[derive(Default)]
    struct MemWriter {
        members: Vec<(String, Vec<u8>)>,
        closes: usize,
    }

    impl PhysPkgWriter for MemWriter {
        fn write(&mut self, pack_uri: &PackURI, blob: &[u8]) -> Result<()> {
            self.members.push((pack_uri.to_string(), blob.to_vec()));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    impl MemWriter {
        fn names(&self) -> Vec<&str> {
            self.members.iter().map(|(name, _)| name.as_str()).collect()
        }

        fn member(&self, name: &str) -> &str {
            self.members
                .iter()
                .find(|(member, _)| member == name)
                .map(|(_, blob)| std::str::from_utf8(blob).unwrap())
                .unwrap()
        }
    }

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    #[test]
    fn test_write_order_and_rels_items() {
        let mut pkg = OpcPackage::new();
        let doc = pkg
            .add_part(BlobPart::new(
                uri("/word/document.xml"),
                ct::WML_DOCUMENT_MAIN,
                "<w:document/>",
            ))
            .unwrap();
        let image = pkg
            .add_part(BlobPart::new(uri("/word/media/image1.png"), ct::PNG, vec![0x89u8, 0x50]))
            .unwrap();
        pkg.relate_to(doc, "http://rt/officeDocument");
        pkg.part_mut(doc).unwrap().relate_to(image, "http://rt/image");

        let mut phys = MemWriter::default();
        PackageWriter::write(&mut phys, &pkg).unwrap();

        assert_eq!(
            phys.names(),
            [
                "/[Content_Types].xml",
                "/_rels/.rels",
                "/word/document.xml",
                "/word/_rels/document.xml.rels",
                "/word/media/image1.png",
            ]
        );
        assert_eq!(phys.closes, 1);

        assert!(
            phys.member("/word/_rels/document.xml.rels")
                .contains(r#"Target="media/image1.png""#)
        );
        assert!(phys.member("/_rels/.rels").contains(r#"Target="word/document.xml""#));

        let types =
            ContentTypeMap::from_xml(phys.member("/[Content_Types].xml").as_bytes()).unwrap();
        assert_eq!(types.get(&uri("/word/document.xml")).unwrap(), ct::WML_DOCUMENT_MAIN);
        assert_eq!(types.get(&uri("/word/media/image1.png")).unwrap(), ct::PNG);
    }

    #[test]
    fn test_unreachable_parts_are_not_written() {
        let mut pkg = OpcPackage::new();
        pkg.add_part(BlobPart::new(uri("/orphan.xml"), ct::XML, "<o/>")).unwrap();

        let mut phys = MemWriter::default();
        PackageWriter::write(&mut phys, &pkg).unwrap();
        assert_eq!(phys.names(), ["/[Content_Types].xml", "/_rels/.rels"]);
    }

    #[test]
    fn test_external_relationships_only() {
        let mut pkg = OpcPackage::new();
        pkg.add_relationship(
            "http://rt/link",
            RelTarget::External("https://example.com/a?b&c".to_string()),
            "rId1",
        );

        let mut phys = MemWriter::default();
        PackageWriter::write(&mut phys, &pkg).unwrap();
        assert!(phys.member("/_rels/.rels").contains(
            r#"Target="https://example.com/a?b&amp;c" TargetMode="External""#
        ));
    }
}
