//! Streaming ZIP writer that compresses parts on-the-fly
//!
//! Entries are written with a data descriptor (general purpose bit 3), so the
//! output never has to be seekable: sizes and CRC follow the compressed data.

use crate::error::{ExcelError, Result};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

/// Entry already written, kept for the central directory
struct ZipEntry {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

/// Writer that counts the bytes passed through to the output
struct CountingWriter<W: Write> {
    output: W,
    written: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.output.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.output.flush()
    }
}

struct CurrentEntry<W: Write> {
    name: String,
    local_header_offset: u64,
    data_offset: u64,
    crc: Crc32,
    uncompressed_count: u64,
    encoder: DeflateEncoder<CountingWriter<W>>,
}

enum Output<W: Write> {
    Idle(CountingWriter<W>),
    InEntry(CurrentEntry<W>),
    /// An I/O error left the output in an unknown state
    Broken,
}

/// Streaming ZIP writer over any byte sink
pub struct StreamingZipWriter<W: Write> {
    output: Output<W>,
    entries: Vec<ZipEntry>,
    compression_level: u32,
}

impl<W: Write> StreamingZipWriter<W> {
    /// `compression_level` is clamped to 0..=9
    pub fn new(output: W, compression_level: u32) -> Self {
        Self {
            output: Output::Idle(CountingWriter { output, written: 0 }),
            entries: Vec::new(),
            compression_level: compression_level.min(9),
        }
    }

    /// Compressed bytes emitted so far
    pub fn bytes_written(&self) -> u64 {
        match &self.output {
            Output::Idle(w) => w.written,
            Output::InEntry(entry) => entry.encoder.get_ref().written,
            Output::Broken => 0,
        }
    }

    /// Start a new entry (file) in the ZIP, finishing the previous one
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        let mut output = self.take_idle()?;
        if name.len() > u16::MAX as usize {
            self.output = Output::Idle(output);
            return Err(ExcelError::WriteError(format!("entry name too long: {}", name)));
        }

        let local_header_offset = output.written;
        output.write_all(&local_file_header(name))?;

        let data_offset = output.written;
        let encoder = DeflateEncoder::new(output, Compression::new(self.compression_level));
        self.output = Output::InEntry(CurrentEntry {
            name: name.to_string(),
            local_header_offset,
            data_offset,
            crc: Crc32::new(),
            uncompressed_count: 0,
            encoder,
        });
        Ok(())
    }

    /// Write uncompressed data to the current entry
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.output {
            Output::InEntry(entry) => {
                entry.crc.update(data);
                entry.uncompressed_count += data.len() as u64;
                if let Err(e) = entry.encoder.write_all(data) {
                    self.output = Output::Broken;
                    return Err(e.into());
                }
                Ok(())
            }
            _ => Err(ExcelError::WriteError("No entry started".to_string())),
        }
    }

    /// Take the raw output, closing the open entry if there is one
    fn take_idle(&mut self) -> Result<CountingWriter<W>> {
        match std::mem::replace(&mut self.output, Output::Broken) {
            Output::Idle(output) => Ok(output),
            Output::InEntry(entry) => self.finish_entry(entry),
            Output::Broken => Err(ExcelError::WriteError(
                "ZIP output is unusable after an earlier write failure".to_string(),
            )),
        }
    }

    fn finish_entry(&mut self, entry: CurrentEntry<W>) -> Result<CountingWriter<W>> {
        let mut output = entry.encoder.finish()?;

        let crc = entry.crc.finalize();
        let compressed_size = to_u32(output.written - entry.data_offset, &entry.name)?;
        let uncompressed_size = to_u32(entry.uncompressed_count, &entry.name)?;

        output.write_all(&[0x50, 0x4b, 0x07, 0x08])?;
        output.write_all(&crc.to_le_bytes())?;
        output.write_all(&compressed_size.to_le_bytes())?;
        output.write_all(&uncompressed_size.to_le_bytes())?;

        self.entries.push(ZipEntry {
            name: entry.name,
            local_header_offset: entry.local_header_offset,
            crc32: crc,
            compressed_size,
            uncompressed_size,
        });
        Ok(output)
    }

    /// Write the central directory and hand back the output
    pub fn finish(mut self) -> Result<W> {
        let mut output = self.take_idle()?;
        let central_dir_offset = output.written;

        for entry in &self.entries {
            let offset = to_u32(entry.local_header_offset, &entry.name)?;
            output.write_all(&[0x50, 0x4b, 0x01, 0x02])?; // central dir sig
            output.write_all(&[20, 0])?; // version made by
            output.write_all(&[20, 0])?; // version needed
            output.write_all(&[8, 0])?; // general purpose bit flag (bit 3 set)
            output.write_all(&[8, 0])?; // compression method
            output.write_all(&[0, 0, 0x21, 0])?; // mod time/date (1980-01-01)
            output.write_all(&entry.crc32.to_le_bytes())?;
            output.write_all(&entry.compressed_size.to_le_bytes())?;
            output.write_all(&entry.uncompressed_size.to_le_bytes())?;
            output.write_all(&(entry.name.len() as u16).to_le_bytes())?;
            output.write_all(&0u16.to_le_bytes())?; // extra len
            output.write_all(&0u16.to_le_bytes())?; // file comment len
            output.write_all(&0u16.to_le_bytes())?; // disk number start
            output.write_all(&0u16.to_le_bytes())?; // internal attrs
            output.write_all(&0u32.to_le_bytes())?; // external attrs
            output.write_all(&offset.to_le_bytes())?;
            output.write_all(entry.name.as_bytes())?;
        }

        let central_dir_size = to_u32(output.written - central_dir_offset, "central directory")?;
        let central_dir_offset = to_u32(central_dir_offset, "central directory")?;
        let entry_count = u16::try_from(self.entries.len())
            .map_err(|_| ExcelError::WriteError("too many ZIP entries".to_string()))?;

        output.write_all(&[0x50, 0x4b, 0x05, 0x06])?;
        output.write_all(&0u16.to_le_bytes())?; // disk number
        output.write_all(&0u16.to_le_bytes())?; // disk with central dir
        output.write_all(&entry_count.to_le_bytes())?;
        output.write_all(&entry_count.to_le_bytes())?;
        output.write_all(&central_dir_size.to_le_bytes())?;
        output.write_all(&central_dir_offset.to_le_bytes())?;
        output.write_all(&0u16.to_le_bytes())?; // comment len

        output.flush()?;
        Ok(output.output)
    }
}

impl<W: Write> Write for StreamingZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_data(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn local_file_header(name: &str) -> Vec<u8> {
    let mut header = Vec::with_capacity(30 + name.len());
    header.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]); // signature
    header.extend_from_slice(&[20, 0]); // version needed
    header.extend_from_slice(&[8, 0]); // general purpose bit flag (bit 3 set)
    header.extend_from_slice(&[8, 0]); // compression method = deflate
    header.extend_from_slice(&[0, 0, 0x21, 0]); // mod time/date
    header.extend_from_slice(&0u32.to_le_bytes()); // crc32 placeholder
    header.extend_from_slice(&0u32.to_le_bytes()); // compressed size placeholder
    header.extend_from_slice(&0u32.to_le_bytes()); // uncompressed size placeholder
    header.extend_from_slice(&(name.len() as u16).to_le_bytes());
    header.extend_from_slice(&0u16.to_le_bytes()); // extra len
    header.extend_from_slice(name.as_bytes());
    header
}

// No ZIP64 support: every size and offset must fit in 32 bits.
fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ExcelError::WriteError(format!("{} exceeds the 4 GiB ZIP limit", what)))
}
