//! Typed access to the two package-level XML items.
//!
//! `[Content_Types].xml` and the `.rels` relationships items have tiny, flat schemas, so
//! each record kind gets an explicit reader that pulls its named attributes off the element
//! and reports a missing required attribute by name. The matching writers emit the
//! canonical serialized form.

use crate::constants::{namespace, target_mode, XML_DECLARATION};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Write as _;

/// One child record of `<Types>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypesRecord {
    /// `<Default Extension="xml" ContentType="application/xml"/>`
    Default { extension: String, content_type: String },
    /// `<Override PartName="/word/document.xml" ContentType="..."/>`
    Override { partname: String, content_type: String },
}

/// One `<Relationship>` record of a `.rels` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RelationshipRecord {
    pub r_id: String,
    pub reltype: String,
    pub target_ref: String,
    pub target_mode: Option<String>,
}

/// Parse `[Content_Types].xml` into its records, in document order.
pub(crate) fn parse_types(xml: &[u8]) -> Result<Vec<TypesRecord>, String> {
    let mut records = Vec::new();
    for_each_child(xml, b"Types", |reader, e| {
        match e.local_name().as_ref() {
            b"Default" => {
                let [extension, content_type] =
                    read_attrs(reader, e, [b"Extension".as_slice(), b"ContentType"])?;
                records.push(TypesRecord::Default {
                    extension: required(extension, "Default", "Extension")?,
                    content_type: required(content_type, "Default", "ContentType")?,
                });
            },
            b"Override" => {
                let [partname, content_type] =
                    read_attrs(reader, e, [b"PartName".as_slice(), b"ContentType"])?;
                records.push(TypesRecord::Override {
                    partname: required(partname, "Override", "PartName")?,
                    content_type: required(content_type, "Override", "ContentType")?,
                });
            },
            _ => {},
        }
        Ok(())
    })?;
    Ok(records)
}

/// Parse a `.rels` item into its relationship records, in document order.
pub(crate) fn parse_relationships(xml: &[u8]) -> Result<Vec<RelationshipRecord>, String> {
    let mut records = Vec::new();
    for_each_child(xml, b"Relationships", |reader, e| {
        if e.local_name().as_ref() == b"Relationship" {
            let [r_id, reltype, target_ref, target_mode] = read_attrs(
                reader,
                e,
                [b"Id".as_slice(), b"Type", b"Target", b"TargetMode"],
            )?;
            records.push(RelationshipRecord {
                r_id: required(r_id, "Relationship", "Id")?,
                reltype: required(reltype, "Relationship", "Type")?,
                target_ref: required(target_ref, "Relationship", "Target")?,
                target_mode,
            });
        }
        Ok(())
    })?;
    Ok(records)
}

/// Serialize a `<Types>` document. Extensions are given without their leading period.
pub(crate) fn write_types<'a>(
    defaults: impl IntoIterator<Item = (&'a str, &'a str)>,
    overrides: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> String {
    let mut xml = String::with_capacity(1024);
    xml.push_str(XML_DECLARATION);
    xml.push('\n');
    let _ = writeln!(xml, r#"<Types xmlns="{}">"#, namespace::OPC_CONTENT_TYPES);

    for (extension, content_type) in defaults {
        let _ = writeln!(
            xml,
            r#"  <Default Extension="{}" ContentType="{}"/>"#,
            escape(extension),
            escape(content_type)
        );
    }
    for (partname, content_type) in overrides {
        let _ = writeln!(
            xml,
            r#"  <Override PartName="{}" ContentType="{}"/>"#,
            escape(partname),
            escape(content_type)
        );
    }

    xml.push_str("</Types>");
    xml
}

/// Serialize a `<Relationships>` document from `(rId, reltype, target_ref, is_external)`.
pub(crate) fn write_relationships<'a>(
    rels: impl IntoIterator<Item = (&'a str, &'a str, std::borrow::Cow<'a, str>, bool)>,
) -> String {
    let mut xml = String::with_capacity(512);
    xml.push_str(XML_DECLARATION);
    xml.push('\n');
    let _ = writeln!(xml, r#"<Relationships xmlns="{}">"#, namespace::OPC_RELATIONSHIPS);

    for (r_id, reltype, target_ref, is_external) in rels {
        let _ = write!(
            xml,
            r#"  <Relationship Id="{}" Type="{}" Target="{}""#,
            escape(r_id),
            escape(reltype),
            escape(target_ref.as_ref())
        );
        if is_external {
            let _ = write!(xml, r#" TargetMode="{}""#, target_mode::EXTERNAL);
        }
        xml.push_str("/>\n");
    }

    xml.push_str("</Relationships>");
    xml
}

/// Walk every element of `xml`, checking that the document element is `root` and handing
/// each descendant element to `visit`.
fn for_each_child<F>(xml: &[u8], root: &[u8], mut visit: F) -> Result<(), String>
where
    F: FnMut(&Reader<&[u8]>, &BytesStart<'_>) -> Result<(), String>,
{
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if !seen_root {
                    if e.local_name().as_ref() != root {
                        return Err(format!(
                            "expected <{}> document element, found <{}>",
                            String::from_utf8_lossy(root),
                            String::from_utf8_lossy(e.local_name().as_ref())
                        ));
                    }
                    seen_root = true;
                } else {
                    visit(&reader, e)?;
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML parse error at position {}: {}",
                    reader.buffer_position(),
                    e
                ));
            },
            _ => {},
        }
        buf.clear();
    }

    if !seen_root {
        return Err(format!(
            "missing <{}> document element",
            String::from_utf8_lossy(root)
        ));
    }
    Ok(())
}

/// Collect the values of the named attributes of `e`, matched by local name.
fn read_attrs<const N: usize>(
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
    names: [&[u8]; N],
) -> Result<[Option<String>; N], String> {
    let mut values: [Option<String>; N] = std::array::from_fn(|_| None);
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = attr.key.local_name();
        if let Some(slot) = names.iter().position(|name| *name == key.as_ref()) {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|err| err.to_string())?;
            values[slot] = Some(value.into_owned());
        }
    }
    Ok(values)
}

fn required(value: Option<String>, element: &str, attribute: &str) -> Result<String, String> {
    value.ok_or_else(|| format!("<{}> is missing required attribute '{}'", element, attribute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_parse_types() {
        let xml = br#"<?xml version="1.0"?>
            <Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
                <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
                <Override PartName="/word/document.xml" ContentType="app/doc"></Override>
            </Types>"#;

        let records = parse_types(xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            TypesRecord::Override {
                partname: "/word/document.xml".to_string(),
                content_type: "app/doc".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_types_rejects_missing_attribute() {
        let xml = br#"<Types><Default Extension="xml"/></Types>"#;
        let err = parse_types(xml).unwrap_err();
        assert!(err.contains("ContentType"), "{}", err);
    }

    #[test]
    fn test_parse_types_rejects_wrong_root_and_garbage() {
        assert!(parse_types(b"<Relationships/>").is_err());
        assert!(parse_types(b"not xml at all").is_err());
        assert!(parse_types(b"").is_err());
        assert!(parse_types(b"<Types><Default></Types>").is_err());
    }

    #[test]
    fn test_parse_relationships_unescapes_values() {
        let xml = br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Id="rId1" Type="t" Target="https://example.com/?a=1&amp;b=2" TargetMode="External"/>
            <Relationship Id="rId2" Type="t" Target="media/image1.png"/>
        </Relationships>"#;

        let records = parse_relationships(xml).unwrap();
        assert_eq!(records[0].target_ref, "https://example.com/?a=1&b=2");
        assert_eq!(records[0].target_mode.as_deref(), Some("External"));
        assert_eq!(records[1].target_mode, None);
    }

    #[test]
    fn test_write_relationships_escapes_and_marks_external() {
        let xml = write_relationships([
            ("rId1", "t", Cow::Borrowed("a&b.xml"), false),
            ("rId2", "t", Cow::Borrowed("https://example.com"), true),
        ]);
        assert!(xml.contains(r#"<Relationship Id="rId1" Type="t" Target="a&amp;b.xml"/>"#));
        assert!(xml.contains(
            r#"<Relationship Id="rId2" Type="t" Target="https://example.com" TargetMode="External"/>"#
        ));

        let records = parse_relationships(xml.as_bytes()).unwrap();
        assert_eq!(records[0].target_ref, "a&b.xml");
    }

    #[test]
    fn test_write_types_layout() {
        let xml = write_types([("png", "image/png")], [("/a.xml", "app/a")]);
        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.contains(r#"<Default Extension="png" ContentType="image/png"/>"#));
        assert!(xml.contains(r#"<Override PartName="/a.xml" ContentType="app/a"/>"#));
        assert!(xml.ends_with("</Types>"));
    }
}
