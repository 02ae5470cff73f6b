//! Output files: the frame container format, file naming and id allocation

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::domain::model::StreamInfo;

pub mod naming;
pub mod reader;
pub mod writer;

pub use naming::{ClipNamer, NamingScheme, SequenceGenerator};
pub use reader::{ContainerReader, ContainerSegmentReader};
pub use writer::{ContainerWriter, ContainerWriterFactory};

/// File extension of the raw frame container
pub const CONTAINER_EXTENSION: &str = "frames";

/// Magic bytes at the start of every container file
pub const CONTAINER_MAGIC: &[u8; 8] = b"EVCFRM01";

/// Size of the fixed container header in bytes
pub const HEADER_LEN: u64 = 24;

/// Per-record prefix: frame index (u64) + capture timestamp in micros (i64)
pub const RECORD_PREFIX_LEN: u64 = 16;

/// Fixed header of a frame container.
///
/// Layout (little endian): magic[8], width u32, height u32, fps u32,
/// bytes_per_frame u32. Records follow back to back, each
/// `RECORD_PREFIX_LEN + bytes_per_frame` bytes long, so frame `n` sits at a
/// computable offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bytes_per_frame: u32,
}

impl ContainerHeader {
    pub fn from_info(info: &StreamInfo) -> Self {
        Self {
            width: info.width,
            height: info.height,
            fps: info.fps,
            bytes_per_frame: info.frame_bytes() as u32,
        }
    }

    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            fps: self.fps,
            width: self.width,
            height: self.height,
        }
    }

    pub fn record_len(&self) -> u64 {
        RECORD_PREFIX_LEN + self.bytes_per_frame as u64
    }

    /// Byte offset of record `n`
    pub fn record_offset(&self, n: u64) -> u64 {
        HEADER_LEN + n * self.record_len()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(CONTAINER_MAGIC)?;
        out.write_all(&self.width.to_le_bytes())?;
        out.write_all(&self.height.to_le_bytes())?;
        out.write_all(&self.fps.to_le_bytes())?;
        out.write_all(&self.bytes_per_frame.to_le_bytes())?;
        Ok(())
    }

    /// Read a header; `Ok(None)` when the magic does not match
    pub fn read_from<R: Read>(input: &mut R) -> std::io::Result<Option<Self>> {
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        if &magic != CONTAINER_MAGIC {
            return Ok(None);
        }
        let mut word = [0u8; 4];
        let mut next = |input: &mut R| -> std::io::Result<u32> {
            input.read_exact(&mut word)?;
            Ok(u32::from_le_bytes(word))
        };
        let width = next(input)?;
        let height = next(input)?;
        let fps = next(input)?;
        let bytes_per_frame = next(input)?;
        Ok(Some(Self {
            width,
            height,
            fps,
            bytes_per_frame,
        }))
    }
}
