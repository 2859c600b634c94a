/// Error types for OPC package operations
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpcError {
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Malformed package: {0}")]
    MalformedPackage(String),

    #[error("Malformed content types item: {0}")]
    MalformedContentTypes(String),

    #[error("Malformed relationships item: {0}")]
    MalformedRelationships(String),

    #[error("Content type not found for partname: {0}")]
    UnknownContentType(String),

    #[error("Relationship '{r_id}' from '{source_uri}' targets missing part '{target}'")]
    DanglingRelationshipTarget {
        source_uri: String,
        r_id: String,
        target: String,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(String),

    #[error("Ambiguous relationship: {0}")]
    AmbiguousRelationship(String),

    #[error("Invalid pack URI: {0}")]
    InvalidPackUri(String),

    #[error("Package member not found: {0}")]
    MissingMember(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    #[error("Partname already in use: {0}")]
    DuplicatePartname(String),

    #[error("Package member '{name}' exceeds the {limit} byte read limit")]
    PartTooLarge { name: String, limit: u64 },

    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("XML error: {0}")]
    XmlError(#[from] quick_xml::Error),
}

impl From<quick_xml::events::attributes::AttrError> for OpcError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        OpcError::XmlError(err.into())
    }
}

pub type Result<T> = std::result::Result<T, OpcError>;
