//! Minimal ZIP reader for XLSX packages
//!
//! Reads the central directory once, then extracts entries on demand, either
//! fully or as a decompressing stream.

use crate::error::{ExcelError, Result};
use flate2::read::DeflateDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// ZIP local file header signature
const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// ZIP central directory signature
const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// ZIP end of central directory signature
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub compression_method: u16,
    pub offset: u64,
}

/// ZIP archive reader over any seekable source
pub struct StreamingZipReader<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
}

impl StreamingZipReader<BufReader<File>> {
    /// Open a ZIP file and read its central directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read + Seek> StreamingZipReader<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let entries = read_central_directory(&mut source)?;
        Ok(StreamingZipReader { source, entries })
    }

    /// Get list of all entries in the ZIP
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name
    pub fn find_entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read an entry's decompressed data into a vector
    pub fn read_entry_by_name(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.read_entry_streaming_by_name(name)?
            .read_to_end(&mut data)?;
        Ok(data)
    }

    /// Decompressing reader for an entry, without loading it into memory
    pub fn read_entry_streaming_by_name(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let entry = self
            .find_entry(name)
            .ok_or_else(|| ExcelError::ReadError(format!("Entry not found: {}", name)))?
            .clone();

        self.read_entry_streaming(&entry)
    }

    /// Decompressing reader for an entry
    pub fn read_entry_streaming(&mut self, entry: &ZipEntry) -> Result<Box<dyn Read + '_>> {
        self.source.seek(SeekFrom::Start(entry.offset))?;

        let signature = read_u32_le(&mut self.source)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(ExcelError::ReadError(
                "Invalid local file header signature".to_string(),
            ));
        }

        // Version, flags, method, time, date, CRC and both sizes; the
        // central directory already has the sizes.
        self.source.seek(SeekFrom::Current(22))?;

        let filename_len = read_u16_le(&mut self.source)? as i64;
        let extra_len = read_u16_le(&mut self.source)? as i64;
        self.source
            .seek(SeekFrom::Current(filename_len + extra_len))?;

        let limited_reader = (&mut self.source).take(entry.compressed_size);

        match entry.compression_method {
            8 => Ok(Box::new(DeflateDecoder::new(limited_reader))),
            0 => Ok(Box::new(limited_reader)),
            method => Err(ExcelError::ReadError(format!(
                "Unsupported compression method: {}",
                method
            ))),
        }
    }
}

/// Read the central directory from the archive
fn read_central_directory<R: Read + Seek>(source: &mut R) -> Result<Vec<ZipEntry>> {
    let eocd_offset = find_eocd(source)?;
    source.seek(SeekFrom::Start(eocd_offset))?;

    let signature = read_u32_le(source)?;
    if signature != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(ExcelError::ReadError(format!(
            "Invalid end of central directory signature: 0x{:08x}",
            signature
        )));
    }

    // Disk number fields
    source.seek(SeekFrom::Current(4))?;
    let _entries_on_disk = read_u16_le(source)?;
    let total_entries = read_u16_le(source)? as usize;
    let _cd_size = read_u32_le(source)?;
    let cd_offset = read_u32_le(source)? as u64;

    source.seek(SeekFrom::Start(cd_offset))?;

    let mut entries = Vec::with_capacity(total_entries);
    for _ in 0..total_entries {
        let signature = read_u32_le(source)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            break;
        }

        // Version made by, version needed, flags
        source.seek(SeekFrom::Current(6))?;
        let compression_method = read_u16_le(source)?;
        // Modification time, date, CRC-32
        source.seek(SeekFrom::Current(8))?;

        let compressed_size = read_u32_le(source)? as u64;
        let uncompressed_size = read_u32_le(source)? as u64;
        let filename_len = read_u16_le(source)? as usize;
        let extra_len = read_u16_le(source)? as usize;
        let comment_len = read_u16_le(source)? as usize;

        // Disk number, internal attributes, external attributes
        source.seek(SeekFrom::Current(8))?;
        let offset = read_u32_le(source)? as u64;

        let mut filename_buf = vec![0u8; filename_len];
        source.read_exact(&mut filename_buf)?;
        let name = String::from_utf8_lossy(&filename_buf).to_string();

        source.seek(SeekFrom::Current((extra_len + comment_len) as i64))?;

        entries.push(ZipEntry {
            name,
            compressed_size,
            uncompressed_size,
            compression_method,
            offset,
        });
    }

    Ok(entries)
}

/// Find the end of central directory record by scanning from the end
fn find_eocd<R: Read + Seek>(source: &mut R) -> Result<u64> {
    let size = source.seek(SeekFrom::End(0))?;

    // EOCD is 22 bytes plus a comment of at most 64 KiB
    let search_start = size.saturating_sub(65557);
    source.seek(SeekFrom::Start(search_start))?;

    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;

    buffer
        .windows(4)
        .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
        .map(|i| search_start + i as u64)
        .ok_or_else(|| ExcelError::ReadError("End of central directory not found".to_string()))
}

fn read_u16_le<R: Read>(source: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(source: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
