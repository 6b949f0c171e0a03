//! DOCX zip I/O.
//!
//! A package is kept as the ordered list of `(entry_name, bytes)` pairs it
//! was read from, so entries nobody touches are written back unchanged and
//! in their original order.

use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use crate::error::DocumentError;

#[derive(Debug, Clone, Default)]
pub struct DocxPackage {
    entries: Vec<(String, Vec<u8>)>,
}

impl DocxPackage {
    /// Read a DOCX zip from disk.
    pub fn open(path: &Path) -> Result<Self, DocumentError> {
        let file = std::fs::File::open(path).map_err(|e| DocumentError::io(path, e))?;
        Self::read_from(file)
    }

    /// Read a DOCX zip held in memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocumentError> {
        Self::read_from(Cursor::new(bytes))
    }

    fn read_from<R: Read + Seek>(reader: R) -> Result<Self, DocumentError> {
        let mut archive = zip::ZipArchive::new(reader)?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| DocumentError::io(name.clone(), e))?;
            entries.push((name, data));
        }
        Ok(Self { entries })
    }

    /// Write the package to disk.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let file = std::fs::File::create(path).map_err(|e| DocumentError::io(path, e))?;
        self.write_to(file)?;
        Ok(())
    }

    /// Serialize the package to an in-memory zip.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        let cursor = self.write_to(Cursor::new(Vec::new()))?;
        Ok(cursor.into_inner())
    }

    /// Media entries are STORED, everything else DEFLATED, matching the
    /// layout Word itself produces.
    fn write_to<W: Write + Seek>(&self, writer: W) -> Result<W, DocumentError> {
        let mut zip = zip::ZipWriter::new(writer);
        let deflated = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in &self.entries {
            let opts = if name.starts_with("word/media/") {
                stored
            } else {
                deflated
            };
            zip.start_file(name.as_str(), opts)?;
            zip.write_all(data)
                .map_err(|e| DocumentError::io(name.clone(), e))?;
        }
        Ok(zip.finish()?)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    /// Entry content as UTF-8 text (lossy, like the original reader).
    pub fn get_text(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Replace an entry's bytes, or append a new entry.
    pub fn set(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = data,
            None => self.entries.push((name.to_string(), data)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
