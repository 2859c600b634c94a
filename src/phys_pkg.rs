//! Provides a general interface to a physical OPC package (ZIP file).
//!
//! The package layers above this module only ever talk to a physical package through
//! [`PhysPkgReader`] and [`PhysPkgWriter`]. [`ZipPkgReader`] and [`ZipPkgWriter`] are the
//! ZIP implementations used by `OpcPackage::open` and `OpcPackage::save`.

use crate::config::{Compression, ReadOptions, WriteOptions};
use crate::error::{OpcError, Result};
use crate::packuri::PackURI;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::trace;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Read access to the members of a physical package.
pub trait PhysPkgReader {
    /// Bytes of the member stored under `pack_uri`.
    ///
    /// Fails with [`OpcError::MissingMember`] if there is no such member.
    fn blob_for(&mut self, pack_uri: &PackURI) -> Result<Vec<u8>>;

    /// The `[Content_Types].xml` item, which every package must contain.
    fn content_types_xml(&mut self) -> Result<Vec<u8>> {
        match self.blob_for(&PackURI::content_types()) {
            Err(OpcError::MissingMember(_)) => Err(OpcError::MalformedPackage(
                "package has no [Content_Types].xml item".to_string(),
            )),
            other => other,
        }
    }

    /// The relationships item for `source_uri`, or `None` if the source has none.
    fn rels_xml_for(&mut self, source_uri: &PackURI) -> Result<Option<Vec<u8>>> {
        match self.blob_for(&source_uri.rels_uri()) {
            Ok(blob) => Ok(Some(blob)),
            Err(OpcError::MissingMember(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Release the underlying container. No further reads are made afterwards.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Write access to the members of a physical package.
pub trait PhysPkgWriter {
    /// Store `blob` as the member for `pack_uri`.
    fn write(&mut self, pack_uri: &PackURI, blob: &[u8]) -> Result<()>;

    /// Flush and finalize the container. Called exactly once, after the last write.
    fn close(&mut self) -> Result<()>;
}

/// Physical package reader over a ZIP archive.
pub struct ZipPkgReader<R: Read + Seek> {
    /// The underlying ZIP archive; `None` once closed
    archive: Option<ZipArchive<R>>,

    /// Largest uncompressed member size accepted, if limited
    max_part_size: Option<u64>,
}

impl ZipPkgReader<BufReader<File>> {
    /// Open an OPC package from a file path.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or isn't a valid ZIP file.
    pub fn open<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(OpcError::PackageNotFound(path.display().to_string()));
        }

        let file = File::open(path)?;
        Self::new(BufReader::new(file), options)
    }
}

impl ZipPkgReader<Cursor<Vec<u8>>> {
    /// Create a reader over an in-memory package.
    pub fn from_bytes(data: Vec<u8>, options: &ReadOptions) -> Result<Self> {
        Self::new(Cursor::new(data), options)
    }
}

impl<R: Read + Seek> ZipPkgReader<R> {
    /// Create a reader over any seekable source.
    ///
    /// Fails with [`OpcError::MalformedPackage`] if the source is not a readable ZIP archive.
    pub fn new(reader: R, options: &ReadOptions) -> Result<Self> {
        let archive = ZipArchive::new(reader)
            .map_err(|e| OpcError::MalformedPackage(format!("unreadable ZIP archive: {}", e)))?;
        Ok(Self {
            archive: Some(archive),
            max_part_size: options.max_part_size,
        })
    }

    /// Number of members in the archive.
    pub fn len(&self) -> usize {
        self.archive.as_ref().map_or(0, ZipArchive::len)
    }

    /// Check if the archive has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a specific member exists in the package.
    pub fn contains(&self, pack_uri: &PackURI) -> bool {
        self.archive
            .as_ref()
            .is_some_and(|archive| archive.index_for_name(pack_uri.membername()).is_some())
    }

    fn archive_mut(&mut self) -> Result<&mut ZipArchive<R>> {
        self.archive.as_mut().ok_or_else(|| {
            OpcError::InvalidOperation("physical package reader is already closed".to_string())
        })
    }
}

impl<R: Read + Seek> PhysPkgReader for ZipPkgReader<R> {
    fn blob_for(&mut self, pack_uri: &PackURI) -> Result<Vec<u8>> {
        let max_part_size = self.max_part_size;
        let membername = pack_uri.membername();

        let mut file = match self.archive_mut()?.by_name(membername) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => {
                return Err(OpcError::MissingMember(pack_uri.to_string()));
            },
            Err(e) => return Err(e.into()),
        };
        if file.is_dir() {
            return Err(OpcError::MissingMember(pack_uri.to_string()));
        }

        let declared = file.size();
        if let Some(limit) = max_part_size.filter(|limit| declared > *limit) {
            return Err(OpcError::PartTooLarge {
                name: membername.to_string(),
                limit,
            });
        }

        // The declared size comes from the archive and cannot be trusted as a bound
        let mut blob = Vec::with_capacity(declared.min(1 << 20) as usize);
        match max_part_size {
            Some(limit) => {
                (&mut file).take(limit + 1).read_to_end(&mut blob)?;
                if blob.len() as u64 > limit {
                    return Err(OpcError::PartTooLarge {
                        name: membername.to_string(),
                        limit,
                    });
                }
            },
            None => {
                file.read_to_end(&mut blob)?;
            },
        }

        trace!(member = membername, bytes = blob.len(), "read package member");
        Ok(blob)
    }

    fn close(&mut self) -> Result<()> {
        self.archive = None;
        Ok(())
    }
}

/// Physical package writer producing a ZIP archive.
pub struct ZipPkgWriter<W: Write + Seek> {
    /// The underlying ZIP writer; `None` once closed
    archive: Option<ZipWriter<W>>,

    /// The finished sink, available after `close`
    finished: Option<W>,

    options: WriteOptions,
}

impl ZipPkgWriter<Cursor<Vec<u8>>> {
    /// Create a new package writer that writes to memory.
    pub fn in_memory(options: WriteOptions) -> Self {
        Self::new(Cursor::new(Vec::new()), options)
    }
}

impl<W: Write + Seek> ZipPkgWriter<W> {
    /// Create a new package writer over `sink`.
    pub fn new(sink: W, options: WriteOptions) -> Self {
        Self {
            archive: Some(ZipWriter::new(sink)),
            finished: None,
            options,
        }
    }

    /// Consume the writer and return the finished sink.
    ///
    /// Fails with [`OpcError::InvalidOperation`] if [`PhysPkgWriter::close`] was not called.
    pub fn into_inner(self) -> Result<W> {
        self.finished.ok_or_else(|| {
            OpcError::InvalidOperation("physical package writer was not closed".to_string())
        })
    }

    fn file_options(&self, pack_uri: &PackURI) -> SimpleFileOptions {
        let method = match self.options.compression_for(pack_uri) {
            Compression::Deflated => CompressionMethod::Deflated,
            Compression::Stored => CompressionMethod::Stored,
        };
        let options = SimpleFileOptions::default().compression_method(method);
        match method {
            CompressionMethod::Deflated => {
                options.compression_level(self.options.compression_level)
            },
            _ => options,
        }
    }
}

impl<W: Write + Seek> PhysPkgWriter for ZipPkgWriter<W> {
    fn write(&mut self, pack_uri: &PackURI, blob: &[u8]) -> Result<()> {
        let options = self.file_options(pack_uri);
        let archive = self.archive.as_mut().ok_or_else(|| {
            OpcError::InvalidOperation("physical package writer is already closed".to_string())
        })?;

        archive.start_file(pack_uri.membername(), options)?;
        archive.write_all(blob)?;
        trace!(member = pack_uri.membername(), bytes = blob.len(), "wrote package member");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let archive = self.archive.take().ok_or_else(|| {
            OpcError::InvalidOperation("physical package writer is already closed".to_string())
        })?;
        self.finished = Some(archive.finish()?);
        Ok(())
    }
}
