//! The PackURI value type and the well-known package URIs.
//!
//! A PackURI names a part within an OPC package. It is always absolute, uses forward
//! slashes as separators, and the package itself is the pseudo-partname `/`.

use crate::error::{OpcError, Result};
use std::borrow::Borrow;
use std::fmt;

/// The package pseudo-partname, representing the package itself
pub const PACKAGE_URI: &str = "/";

/// The URI of the `[Content_Types].xml` item
pub const CONTENT_TYPES_URI: &str = "/[Content_Types].xml";

/// An absolute, slash-rooted partname within an OPC package.
///
/// Equality and ordering are those of the underlying string. Every derived component
/// (`base_uri`, `filename`, `ext`, `membername`, `rels_uri`) is computed on access.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackURI {
    /// The full pack URI string (e.g., "/word/document.xml")
    uri: String,
}

impl PackURI {
    /// Create a new PackURI, failing with [`OpcError::InvalidPackUri`] unless `uri`
    /// begins with a forward slash.
    pub fn new<S: Into<String>>(uri: S) -> Result<Self> {
        let uri = uri.into();
        if !uri.starts_with('/') {
            return Err(OpcError::InvalidPackUri(format!(
                "PackURI must begin with slash, got '{}'",
                uri
            )));
        }
        Ok(PackURI { uri })
    }

    /// The package pseudo-partname `/`.
    pub fn package() -> Self {
        PackURI {
            uri: PACKAGE_URI.to_string(),
        }
    }

    /// The URI of the content types item.
    pub fn content_types() -> Self {
        PackURI {
            uri: CONTENT_TYPES_URI.to_string(),
        }
    }

    /// Translate `relative_ref` onto `base_uri` and normalize the result.
    ///
    /// `"../slideLayouts/slideLayout1.xml"` against `"/ppt/slides"` yields
    /// `"/ppt/slideLayouts/slideLayout1.xml"`. A reference that is already absolute
    /// replaces the base entirely. `..` segments never climb above the root.
    pub fn from_rel_ref(base_uri: &str, relative_ref: &str) -> Result<Self> {
        let joined = if relative_ref.starts_with('/') {
            relative_ref.to_string()
        } else if base_uri.ends_with('/') {
            format!("{}{}", base_uri, relative_ref)
        } else {
            format!("{}/{}", base_uri, relative_ref)
        };
        Self::new(normalize_path(&joined))
    }

    /// The directory portion of this PackURI.
    ///
    /// `"/ppt/slides"` for `"/ppt/slides/slide1.xml"`, `"/"` for both the package
    /// pseudo-partname and any part directly under the root.
    pub fn base_uri(&self) -> &str {
        match self.uri.rfind('/') {
            Some(0) | None => "/",
            Some(pos) => &self.uri[..pos],
        }
    }

    /// The last path segment; empty for the package pseudo-partname.
    pub fn filename(&self) -> &str {
        match self.uri.rfind('/') {
            Some(pos) => &self.uri[pos + 1..],
            None => "",
        }
    }

    /// The extension of the filename including its period, e.g. `".xml"`.
    ///
    /// Empty when the filename has no period or only a leading one (`"/_rels/.rels"`
    /// has no extension, matching POSIX `splitext`).
    pub fn ext(&self) -> &str {
        let filename = self.filename();
        match filename.rfind('.') {
            Some(pos) if filename[..pos].chars().any(|c| c != '.') => &filename[pos..],
            _ => "",
        }
    }

    /// Numeric suffix of a tuple partname, e.g. 21 for `"/ppt/slides/slide21.xml"`.
    ///
    /// `None` for singleton partnames such as `"/ppt/presentation.xml"`.
    pub fn idx(&self) -> Option<u32> {
        let filename = self.filename();
        let stem = match filename.rfind('.') {
            Some(pos) => &filename[..pos],
            None => filename,
        };
        let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 || digits == stem.len() {
            return None;
        }
        stem[stem.len() - digits..].parse().ok()
    }

    /// The URI with its leading slash stripped, the form used as the ZIP member name.
    ///
    /// Empty for the package pseudo-partname.
    #[inline]
    pub fn membername(&self) -> &str {
        &self.uri[1..]
    }

    /// Relative reference from `base_uri` to this PackURI.
    ///
    /// `"/ppt/media/image1.png"` against `"/ppt/slides"` yields `"../media/image1.png"`.
    pub fn relative_ref(&self, base_uri: &str) -> String {
        if base_uri == "/" {
            return self.membername().to_string();
        }

        let from: Vec<&str> = base_uri.split('/').filter(|s| !s.is_empty()).collect();
        let to: Vec<&str> = self.uri.split('/').filter(|s| !s.is_empty()).collect();

        // The filename never counts towards the shared directory prefix
        let common = from
            .iter()
            .zip(to.iter().take(to.len().saturating_sub(1)))
            .take_while(|(a, b)| a == b)
            .count();

        let mut segments: Vec<&str> = Vec::with_capacity(from.len() - common + to.len() - common);
        segments.extend(std::iter::repeat_n("..", from.len() - common));
        segments.extend_from_slice(&to[common..]);
        segments.join("/")
    }

    /// The PackURI of the relationships item belonging to this source.
    ///
    /// `"/word/_rels/document.xml.rels"` for `"/word/document.xml"`, and
    /// `"/_rels/.rels"` for the package pseudo-partname.
    pub fn rels_uri(&self) -> PackURI {
        let base_uri = self.base_uri();
        let uri = if base_uri == "/" {
            format!("/_rels/{}.rels", self.filename())
        } else {
            format!("{}/_rels/{}.rels", base_uri, self.filename())
        };
        PackURI { uri }
    }

    /// Whether this is the package pseudo-partname `/`.
    #[inline]
    pub fn is_package(&self) -> bool {
        self.uri == PACKAGE_URI
    }

    /// Get the full URI string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.uri
    }
}

/// Collapse empty, `.` and `..` segments of an absolute path.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                segments.pop();
            },
            _ => segments.push(segment),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

impl fmt::Display for PackURI {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

impl AsRef<str> for PackURI {
    fn as_ref(&self) -> &str {
        &self.uri
    }
}

impl Borrow<str> for PackURI {
    fn borrow(&self) -> &str {
        &self.uri
    }
}

impl TryFrom<&str> for PackURI {
    type Error = OpcError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn uri(s: &str) -> PackURI {
        PackURI::new(s).unwrap()
    }

    #[test]
    fn test_packuri_new() {
        assert!(PackURI::new("/word/document.xml").is_ok());
        assert!(matches!(
            PackURI::new("word/document.xml"),
            Err(OpcError::InvalidPackUri(_))
        ));
        assert!(PackURI::new("").is_err());
    }

    #[test]
    fn test_base_uri() {
        assert_eq!(uri("/ppt/slides/slide1.xml").base_uri(), "/ppt/slides");
        assert_eq!(uri("/presentation.xml").base_uri(), "/");
        assert_eq!(PackURI::package().base_uri(), "/");
    }

    #[test]
    fn test_filename_and_ext() {
        let slide = uri("/ppt/slides/slide1.xml");
        assert_eq!(slide.filename(), "slide1.xml");
        assert_eq!(slide.ext(), ".xml");

        assert_eq!(uri("/docProps/thumbnail.jpeg").ext(), ".jpeg");
        assert_eq!(uri("/customXml/item").ext(), "");
        assert_eq!(uri("/_rels/.rels").ext(), "");
        assert_eq!(PackURI::package().filename(), "");
        assert_eq!(PackURI::package().ext(), "");
    }

    #[test]
    fn test_idx() {
        assert_eq!(uri("/ppt/slides/slide21.xml").idx(), Some(21));
        assert_eq!(uri("/ppt/presentation.xml").idx(), None);
        assert_eq!(uri("/ppt/media/2.png").idx(), None);
    }

    #[test]
    fn test_membername() {
        assert_eq!(uri("/word/document.xml").membername(), "word/document.xml");
        assert_eq!(PackURI::package().membername(), "");
    }

    #[test]
    fn test_rels_uri() {
        assert_eq!(PackURI::package().rels_uri().as_str(), "/_rels/.rels");
        assert_eq!(
            uri("/word/document.xml").rels_uri().as_str(),
            "/word/_rels/document.xml.rels"
        );
        assert_eq!(
            uri("/presentation.xml").rels_uri().as_str(),
            "/_rels/presentation.xml.rels"
        );
    }

    #[test]
    fn test_from_rel_ref() {
        let cases = [
            ("/", "docProps/core.xml", "/docProps/core.xml"),
            ("/ppt", "viewProps.xml", "/ppt/viewProps.xml"),
            (
                "/ppt/slides",
                "../slideLayouts/slideLayout1.xml",
                "/ppt/slideLayouts/slideLayout1.xml",
            ),
            ("/ppt/slides", "../media/image1.png", "/ppt/media/image1.png"),
            ("/ppt/slides", "./slide2.xml", "/ppt/slides/slide2.xml"),
            ("/ppt/slides", "/docProps/app.xml", "/docProps/app.xml"),
            ("/ppt", "../../../theme.xml", "/theme.xml"),
        ];
        for (base, rel, expected) in cases {
            assert_eq!(PackURI::from_rel_ref(base, rel).unwrap().as_str(), expected);
        }
    }

    #[test]
    fn test_relative_ref() {
        let image = uri("/ppt/media/image1.png");
        assert_eq!(image.relative_ref("/ppt/slides"), "../media/image1.png");
        assert_eq!(image.relative_ref("/"), "ppt/media/image1.png");
        assert_eq!(image.relative_ref("/ppt/media"), "image1.png");
        assert_eq!(image.relative_ref("/ppt"), "media/image1.png");
        assert_eq!(
            uri("/ppt/presentation.xml").relative_ref("/ppt/slides/deep"),
            "../../presentation.xml"
        );
    }

    #[test]
    fn test_ordering_is_string_ordering() {
        let mut uris = vec![uri("/b.xml"), uri("/a/z.xml"), uri("/a.xml")];
        uris.sort();
        let sorted: Vec<&str> = uris.iter().map(PackURI::as_str).collect();
        assert_eq!(sorted, ["/a.xml", "/a/z.xml", "/b.xml"]);
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_]{1,8}(\\.[a-z]{1,4})?"
    }

    proptest! {
        #[test]
        fn relative_ref_inverts_resolution(
            base in proptest::collection::vec(segment(), 0..4),
            target in proptest::collection::vec(segment(), 1..5),
        ) {
            let base_uri = format!("/{}", base.join("/"));
            let partname = PackURI::new(format!("/{}", target.join("/"))).unwrap();
            let rel_ref = partname.relative_ref(&base_uri);
            let resolved = PackURI::from_rel_ref(&base_uri, &rel_ref).unwrap();
            prop_assert_eq!(resolved, partname);
        }

        #[test]
        fn resolution_is_always_normalized(
            base in proptest::collection::vec(segment(), 0..4),
            rel in proptest::collection::vec(
                prop_oneof![Just("..".to_string()), Just(".".to_string()), segment()],
                1..6,
            ),
        ) {
            let base_uri = format!("/{}", base.join("/"));
            let resolved = PackURI::from_rel_ref(&base_uri, &rel.join("/")).unwrap();
            prop_assert!(resolved.as_str().starts_with('/'));
            prop_assert!(!resolved.as_str().split('/').any(|s| s == ".." || s == "."));
            prop_assert!(!resolved.as_str().contains("//"));
        }
    }
}
