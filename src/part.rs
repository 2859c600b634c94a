//! Open Packaging Convention (OPC) objects related to package parts.
//!
//! Every part of a package implements [`Part`]. Parts live in a [`PartSet`] arena owned
//! by the package and are addressed by [`PartId`]; relationships hold ids rather than
//! references, so the cycles a package graph may contain never become ownership cycles.
//!
//! Format-specific parts plug in through a [`PartFactory`], which maps a content type to
//! a constructor. Content types nobody registered load as a plain [`BlobPart`].

use crate::error::{OpcError, Result};
use crate::packuri::PackURI;
use crate::rel::{RelTarget, Relationship, RelationshipCollection};
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Handle of a part within the [`PartSet`] of one package.
///
/// Ids are stable for the lifetime of the package, including across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId(usize);

impl PartId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Trait representing a part in an OPC package.
///
/// Parts are the fundamental units of content in an OPC package. Each part has a unique
/// partname (PackURI), a content type, a blob, and relationships to other parts.
pub trait Part: Any + fmt::Debug {
    /// Get the partname of this part.
    fn partname(&self) -> &PackURI;

    /// Store a new partname.
    ///
    /// Implementations must also move their relationship collection to the new base URI.
    fn set_partname(&mut self, partname: PackURI);

    /// Get the content type of this part.
    fn content_type(&self) -> &str;

    /// Get the binary content of this part.
    fn blob(&self) -> &[u8];

    /// Replace the binary content of this part.
    fn set_blob(&mut self, blob: Bytes);

    /// Get the relationships for this part.
    fn rels(&self) -> &RelationshipCollection;

    /// Get mutable access to the relationships for this part.
    fn rels_mut(&mut self) -> &mut RelationshipCollection;

    /// Append a relationship with a caller-chosen rId.
    fn add_relationship(&mut self, reltype: &str, target: RelTarget, r_id: &str) -> &Relationship {
        self.rels_mut().add_relationship(reltype, target, r_id)
    }

    /// Add or get a relationship to another part, returning its rId.
    fn relate_to(&mut self, target: PartId, reltype: &str) -> String {
        self.rels_mut().get_or_add(reltype, target).r_id().to_string()
    }

    /// Add or get an external relationship, returning its rId.
    fn relate_to_ext(&mut self, target_url: &str, reltype: &str) -> String {
        self.rels_mut().get_or_add_ext_rel(reltype, target_url)
    }

    /// Called once the part's relationships have been attached during load.
    fn after_unmarshal(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called before the part is written. A part that caches a parsed form of its blob
    /// brings the blob up to date here.
    fn before_marshal(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A basic implementation of a Part that stores binary content.
///
/// This is the part type for every content type without a registered constructor.
#[derive(Debug, Clone)]
pub struct BlobPart {
    /// The partname (URI) of this part
    partname: PackURI,

    /// The content type of this part
    content_type: String,

    /// The binary content of this part
    blob: Bytes,

    /// Relationships from this part to other parts
    rels: RelationshipCollection,
}

impl BlobPart {
    /// Create a new BlobPart with no relationships.
    pub fn new(partname: PackURI, content_type: impl Into<String>, blob: impl Into<Bytes>) -> Self {
        let rels = RelationshipCollection::new(partname.base_uri());
        Self {
            partname,
            content_type: content_type.into(),
            blob: blob.into(),
            rels,
        }
    }
}

impl Part for BlobPart {
    fn partname(&self) -> &PackURI {
        &self.partname
    }

    fn set_partname(&mut self, partname: PackURI) {
        self.rels.set_base_uri(partname.base_uri());
        self.partname = partname;
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn blob(&self) -> &[u8] {
        &self.blob
    }

    fn set_blob(&mut self, blob: Bytes) {
        self.blob = blob;
    }

    fn rels(&self) -> &RelationshipCollection {
        &self.rels
    }

    fn rels_mut(&mut self) -> &mut RelationshipCollection {
        &mut self.rels
    }
}

/// A loaded part: either the generic representation or one built by a registered
/// constructor.
#[derive(Debug)]
pub enum PartKind {
    Generic(BlobPart),
    Custom(Box<dyn Part>),
}

impl PartKind {
    pub fn as_part(&self) -> &dyn Part {
        match self {
            PartKind::Generic(part) => part,
            PartKind::Custom(part) => part.as_ref(),
        }
    }

    pub fn as_part_mut(&mut self) -> &mut dyn Part {
        match self {
            PartKind::Generic(part) => part,
            PartKind::Custom(part) => part.as_mut(),
        }
    }

    /// Whether this part came from a registered constructor.
    pub fn is_custom(&self) -> bool {
        matches!(self, PartKind::Custom(_))
    }

    /// Borrow the concrete part type, if it is `T`.
    pub fn downcast_ref<T: Part>(&self) -> Option<&T> {
        let part: &dyn Any = self.as_part();
        part.downcast_ref::<T>()
    }

    /// Mutably borrow the concrete part type, if it is `T`.
    pub fn downcast_mut<T: Part>(&mut self) -> Option<&mut T> {
        let part: &mut dyn Any = self.as_part_mut();
        part.downcast_mut::<T>()
    }
}

impl Deref for PartKind {
    type Target = dyn Part;

    fn deref(&self) -> &Self::Target {
        self.as_part()
    }
}

impl DerefMut for PartKind {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_part_mut()
    }
}

impl From<BlobPart> for PartKind {
    fn from(part: BlobPart) -> Self {
        PartKind::Generic(part)
    }
}

impl From<Box<dyn Part>> for PartKind {
    fn from(part: Box<dyn Part>) -> Self {
        PartKind::Custom(part)
    }
}

/// Constructor registered for a content type.
pub type PartConstructor =
    Box<dyn Fn(PackURI, String, Bytes) -> Result<Box<dyn Part>> + Send + Sync>;

/// Registry selecting how a part is constructed, keyed by content type alone.
///
/// The host application fills the registry once and then passes it by reference to
/// every open, during which it is only read.
///
/// # Example
///
/// ```rust
/// use litchi_opc::{BlobPart, Part, PartFactory};
///
/// let factory =
///     PartFactory::new().with("application/vnd.example+xml", |partname, content_type, blob| {
///         Ok(Box::new(BlobPart::new(partname, content_type, blob)) as Box<dyn Part>)
///     });
/// assert!(factory.is_registered("application/vnd.example+xml"));
/// ```
#[derive(Default)]
pub struct PartFactory {
    constructors: HashMap<String, PartConstructor>,
}

impl PartFactory {
    /// Create a factory with no registered content types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `constructor` for `content_type`, replacing any earlier registration.
    pub fn register<F>(&mut self, content_type: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(PackURI, String, Bytes) -> Result<Box<dyn Part>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(content_type.into(), Box::new(constructor));
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, content_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(PackURI, String, Bytes) -> Result<Box<dyn Part>> + Send + Sync + 'static,
    {
        self.register(content_type, constructor);
        self
    }

    pub fn is_registered(&self, content_type: &str) -> bool {
        self.constructors.contains_key(content_type)
    }

    /// Construct the part for `content_type`, falling back to a [`BlobPart`].
    pub fn load(&self, partname: PackURI, content_type: String, blob: Bytes) -> Result<PartKind> {
        match self.constructors.get(content_type.as_str()) {
            Some(constructor) => Ok(PartKind::Custom(constructor(partname, content_type, blob)?)),
            None => Ok(PartKind::Generic(BlobPart::new(partname, content_type, blob))),
        }
    }
}

impl fmt::Debug for PartFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut content_types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        content_types.sort_unstable();
        f.debug_struct("PartFactory")
            .field("content_types", &content_types)
            .finish()
    }
}

/// Arena owning every part of a package, indexed by partname.
#[derive(Debug, Default)]
pub struct PartSet {
    parts: Vec<PartKind>,
    by_name: HashMap<PackURI, PartId>,
}

impl PartSet {
    /// Add a part, failing with [`OpcError::DuplicatePartname`] if its name is taken.
    ///
    /// The part's relationship collection is re-based onto its partname's base URI,
    /// whatever base its constructor chose.
    pub fn insert(&mut self, mut part: PartKind) -> Result<PartId> {
        let partname = part.partname().clone();
        if self.by_name.contains_key(&partname) {
            return Err(OpcError::DuplicatePartname(partname.to_string()));
        }
        part.rels_mut().set_base_uri(partname.base_uri());

        let id = PartId(self.parts.len());
        self.parts.push(part);
        self.by_name.insert(partname, id);
        Ok(id)
    }

    #[inline]
    pub fn get(&self, id: PartId) -> Option<&PartKind> {
        self.parts.get(id.0)
    }

    #[inline]
    pub fn get_mut(&mut self, id: PartId) -> Option<&mut PartKind> {
        self.parts.get_mut(id.0)
    }

    /// The id of the part named `partname`.
    pub fn id_of(&self, partname: &PackURI) -> Option<PartId> {
        self.by_name.get(partname).copied()
    }

    /// The current partname of `id`, failing with [`OpcError::PartNotFound`] for an id
    /// that does not belong to this set.
    pub fn partname(&self, id: PartId) -> Result<&PackURI> {
        self.get(id)
            .map(|part| part.partname())
            .ok_or_else(|| OpcError::PartNotFound(format!("no part with index {}", id.0)))
    }

    /// Give part `id` a new partname, keeping the name index in step.
    pub fn rename(&mut self, id: PartId, partname: PackURI) -> Result<()> {
        let old = self.partname(id)?.clone();
        if old == partname {
            return Ok(());
        }
        if self.by_name.contains_key(&partname) {
            return Err(OpcError::DuplicatePartname(partname.to_string()));
        }

        self.by_name.remove(&old);
        self.by_name.insert(partname.clone(), id);
        if let Some(part) = self.parts.get_mut(id.0) {
            part.set_partname(partname);
            let base_uri = part.partname().base_uri().to_string();
            part.rels_mut().set_base_uri(&base_uri);
        }
        Ok(())
    }

    /// Number of parts in the arena, reachable or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// All parts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (PartId, &PartKind)> {
        self.parts
            .iter()
            .enumerate()
            .map(|(idx, part)| (PartId(idx), part))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Part that counts its lifecycle hooks and rewrites its blob on marshal.
    #[derive(Debug)]
    pub(crate) struct CountingPart {
        pub inner: BlobPart,
        pub unmarshalled: usize,
        pub marshalled: usize,
    }

    impl CountingPart {
        pub fn load(partname: PackURI, content_type: String, blob: Bytes) -> Result<Box<dyn Part>> {
            Ok(Box::new(CountingPart {
                inner: BlobPart::new(partname, content_type, blob),
                unmarshalled: 0,
                marshalled: 0,
            }))
        }
    }

    impl Part for CountingPart {
        fn partname(&self) -> &PackURI {
            self.inner.partname()
        }

        fn set_partname(&mut self, partname: PackURI) {
            self.inner.set_partname(partname);
        }

        fn content_type(&self) -> &str {
            self.inner.content_type()
        }

        fn blob(&self) -> &[u8] {
            self.inner.blob()
        }

        fn set_blob(&mut self, blob: Bytes) {
            self.inner.set_blob(blob);
        }

        fn rels(&self) -> &RelationshipCollection {
            self.inner.rels()
        }

        fn rels_mut(&mut self) -> &mut RelationshipCollection {
            self.inner.rels_mut()
        }

        fn after_unmarshal(&mut self) -> Result<()> {
            self.unmarshalled += 1;
            Ok(())
        }

        fn before_marshal(&mut self) -> Result<()> {
            self.marshalled += 1;
            let blob = format!("<counted n=\"{}\"/>", self.marshalled);
            self.inner.set_blob(Bytes::from(blob));
            Ok(())
        }
    }

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    #[test]
    fn test_blob_part() {
        let content: Vec<u8> = vec![0x89, 0x50, 0x4E, 0x47]; // PNG header
        let mut part = BlobPart::new(uri("/word/media/image1.png"), "image/png", content.clone());

        assert_eq!(part.content_type(), "image/png");
        assert_eq!(part.blob(), content.as_slice());
        assert_eq!(part.rels().base_uri(), "/word/media");

        part.set_blob(Bytes::from_static(b"new"));
        assert_eq!(part.blob(), b"new");
    }

    #[test]
    fn test_set_partname_rebases_rels() {
        let mut part = BlobPart::new(uri("/word/document.xml"), "app/doc", Vec::<u8>::new());
        part.relate_to_ext("https://example.com", "http://rt/link");
        part.set_partname(uri("/doc/main.xml"));

        assert_eq!(part.partname().as_str(), "/doc/main.xml");
        assert_eq!(part.rels().base_uri(), "/doc");
    }

    #[test]
    fn test_relate_to_reuses_rids() {
        let mut parts = PartSet::default();
        let target = parts
            .insert(BlobPart::new(uri("/word/styles.xml"), "app/styles", Vec::<u8>::new()).into())
            .unwrap();
        let mut part = BlobPart::new(uri("/word/document.xml"), "app/doc", Vec::<u8>::new());

        assert_eq!(part.relate_to(target, "http://rt/styles"), "rId1");
        assert_eq!(part.relate_to(target, "http://rt/styles"), "rId1");
        assert_eq!(part.relate_to_ext("https://example.com", "http://rt/link"), "rId2");
        part.add_relationship("http://rt/other", RelTarget::Part(target), "rId7");
        assert_eq!(part.rels().len(), 3);
        assert_eq!(part.rels()[0].target_ref(&parts).unwrap(), "styles.xml");
    }

    #[test]
    fn test_factory_dispatches_on_content_type() {
        let factory = PartFactory::new().with("app/counted", CountingPart::load);

        let custom = factory
            .load(uri("/a.xml"), "app/counted".to_string(), Bytes::from_static(b"<a/>"))
            .unwrap();
        assert!(custom.is_custom());
        assert!(custom.downcast_ref::<CountingPart>().is_some());
        assert!(custom.downcast_ref::<BlobPart>().is_none());

        // Same extension, different content type: the partname plays no part in dispatch
        let generic = factory
            .load(uri("/counted.xml"), "app/other".to_string(), Bytes::new())
            .unwrap();
        assert!(!generic.is_custom());
        assert!(generic.downcast_ref::<BlobPart>().is_some());
        assert_eq!(generic.content_type(), "app/other");
    }

    #[test]
    fn test_factory_register_replaces() {
        let mut factory = PartFactory::new();
        factory.register("app/x", CountingPart::load);
        factory.register("app/x", |partname, content_type, blob| {
            Ok(Box::new(BlobPart::new(partname, content_type, blob)) as Box<dyn Part>)
        });

        let part = factory.load(uri("/x.bin"), "app/x".to_string(), Bytes::new()).unwrap();
        assert!(part.downcast_ref::<BlobPart>().is_some());
        assert!(format!("{:?}", factory).contains("app/x"));
    }

    #[test]
    fn test_part_set() {
        let mut parts = PartSet::default();
        let a = parts
            .insert(BlobPart::new(uri("/a.xml"), "app/a", Vec::<u8>::new()).into())
            .unwrap();
        let b = parts
            .insert(BlobPart::new(uri("/b.xml"), "app/b", Vec::<u8>::new()).into())
            .unwrap();

        assert!(matches!(
            parts.insert(BlobPart::new(uri("/a.xml"), "app/c", Vec::<u8>::new()).into()),
            Err(OpcError::DuplicatePartname(_))
        ));
        assert_eq!(parts.id_of(&uri("/b.xml")), Some(b));
        assert!(matches!(parts.rename(a, uri("/b.xml")), Err(OpcError::DuplicatePartname(_))));

        parts.rename(a, uri("/sub/c.xml")).unwrap();
        assert_eq!(parts.id_of(&uri("/a.xml")), None);
        assert_eq!(parts.id_of(&uri("/sub/c.xml")), Some(a));
        assert_eq!(parts.get(a).unwrap().rels().base_uri(), "/sub");
        assert_eq!(parts.len(), 2);
    }
}
