//! Classic pcap capture file codec
//
// https://github.com/rust-iot/rust-shadow
// Copyright 2024 Ryan Kurte

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Link-layer type for 802.11 frames with a radiotap header
pub const LINKTYPE_IEEE802_11_RADIOTAP: u32 = 127;

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65535;

/// Streaming pcap writer
pub struct Writer<W: Write> {
    inner: W,
}

impl Writer<BufWriter<File>> {
    /// Create a capture file, writing the global header
    pub fn create<P: AsRef<Path>>(path: P, link_type: u32) -> io::Result<Self> {
        Writer::new(BufWriter::new(File::create(path)?), link_type)
    }
}

impl<W: Write> Writer<W> {
    pub fn new(mut inner: W, link_type: u32) -> io::Result<Self> {
        inner.write_u32::<LittleEndian>(MAGIC)?;
        inner.write_u16::<LittleEndian>(VERSION_MAJOR)?;
        inner.write_u16::<LittleEndian>(VERSION_MINOR)?;
        // Timezone offset and timestamp accuracy, unused by convention
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(0)?;
        inner.write_u32::<LittleEndian>(SNAPLEN)?;
        inner.write_u32::<LittleEndian>(link_type)?;

        Ok(Self { inner })
    }

    /// Append one captured frame
    pub fn write_frame(&mut self, at: SystemTime, frame: &[u8]) -> io::Result<()> {
        let since_epoch = at.duration_since(UNIX_EPOCH).unwrap_or_default();

        self.inner
            .write_u32::<LittleEndian>(since_epoch.as_secs() as u32)?;
        self.inner
            .write_u32::<LittleEndian>(since_epoch.subsec_micros())?;
        self.inner.write_u32::<LittleEndian>(frame.len() as u32)?;
        self.inner.write_u32::<LittleEndian>(frame.len() as u32)?;
        self.inner.write_all(frame)?;

        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming pcap reader
pub struct Reader<R: Read> {
    inner: R,
    link_type: u32,
}

impl Reader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Reader::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> Reader<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let magic = inner.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad pcap magic: {:08x}", magic),
            ));
        }

        // Version, timezone, accuracy, snaplen
        for _ in 0..3 {
            inner.read_u32::<LittleEndian>()?;
        }
        inner.read_u32::<LittleEndian>()?;

        let link_type = inner.read_u32::<LittleEndian>()?;

        Ok(Self { inner, link_type })
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Read the next frame, `None` at end of file
    pub fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let _ts_sec = match self.inner.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let _ts_usec = self.inner.read_u32::<LittleEndian>()?;
        let incl_len = self.inner.read_u32::<LittleEndian>()? as usize;
        let _orig_len = self.inner.read_u32::<LittleEndian>()?;

        if incl_len > SNAPLEN as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "record larger than snaplen",
            ));
        }

        let mut frame = vec![0u8; incl_len];
        self.inner.read_exact(&mut frame)?;

        Ok(Some(frame))
    }
}
