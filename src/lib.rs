//! Litchi OPC - the Open Packaging Convention core of Office Open XML
//!
//! An OPC package is a ZIP container of named *parts*, each with a content type, linked by
//! typed, directed *relationships*. This crate reads such a package into a live object
//! graph, lets callers inspect and change it, and writes it back out.
//!
//! # Layers
//!
//! - [`PackURI`]: absolute in-package paths and relative reference resolution
//! - [`ContentTypeMap`]: content type lookup on read, minimal default/override set on write
//! - [`PackageReader`]: discovery of every part reachable from the package relationships
//! - [`OpcPackage`], [`Part`], [`RelationshipCollection`]: the live graph
//! - [`PackageWriter`]: serialization of the live graph
//! - [`PhysPkgReader`], [`PhysPkgWriter`]: the boundary to the ZIP container
//!
//! # Example - Reading and rewriting a package
//!
//! ```no_run
//! use litchi_opc::OpcPackage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pkg = OpcPackage::open("presentation.pptx")?;
//!
//! for (_, part) in pkg.iter_parts() {
//!     println!("{} ({} bytes): {}", part.partname(), part.blob().len(), part.content_type());
//! }
//!
//! pkg.save("copy.pptx")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Format-specific parts
//!
//! ```no_run
//! use litchi_opc::{content_type, BlobPart, OpcPackage, Part, PartFactory, ReadOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = PartFactory::new().with(content_type::PML_SLIDE, |partname, content_type, blob| {
//!     Ok(Box::new(BlobPart::new(partname, content_type, blob)) as Box<dyn Part>)
//! });
//! let pkg = OpcPackage::open_with("deck.pptx", &ReadOptions::default(), &factory)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod content_types;
pub mod error;
mod oxml;
pub mod package;
pub mod packuri;
pub mod part;
pub mod phys_pkg;
pub mod pkgreader;
pub mod pkgwriter;
pub mod rel;

pub use config::{Compression, ReadOptions, WriteOptions};
pub use constants::{content_type, relationship_type};
pub use content_types::{ContentTypeMap, default_content_type};
pub use error::{OpcError, Result};
pub use package::OpcPackage;
pub use packuri::PackURI;
pub use part::{BlobPart, Part, PartFactory, PartId, PartKind, PartSet};
pub use phys_pkg::{PhysPkgReader, PhysPkgWriter, ZipPkgReader, ZipPkgWriter};
pub use pkgreader::{
    PackageReader, SerializedPart, SerializedRelationship, SerializedRelationshipCollection,
};
pub use pkgwriter::PackageWriter;
pub use rel::{RelTarget, Relationship, RelationshipCollection, TargetMode};
