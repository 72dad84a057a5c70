//! Image header as prepended to every image by the signing tool.

use embedded_storage_async::nor_flash::ReadNorFlash;
use serde::{Deserialize, Serialize};

use crate::{AreaId, Error, area::FlashMap, log, manager::Config, strategies::StartOffset};

/// Magic of a version 1 header.
pub const HEADER_MAGIC_V1: u32 = 0x96f3_b83d;

/// Size of a version 1 header on flash.
pub const HEADER_SIZE_V1: usize = 32;

/// Semantic version of an image.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct SemVer {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

/// On-flash formats of the image header.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum HeaderFormat {
    V1,
}

impl HeaderFormat {
    pub const fn tag(self) -> u32 {
        match self {
            HeaderFormat::V1 => 1,
        }
    }

    /// Bytes needed by [`ImageHeader::encode`] for a header in this format.
    pub const fn min_capacity(self) -> usize {
        match self {
            // Version tag, image size and the semantic version.
            HeaderFormat::V1 => 4 + 4 + 8,
        }
    }
}

/// Fields of an image header relevant to the application.
///
/// Only ever constructed from a header that passed validation.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ImageHeader {
    pub format: HeaderFormat,
    pub image_size: u32,
    pub version: SemVer,
}

impl ImageHeader {
    /// Encode into the version tagged layout, returning the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        let len = self.format.min_capacity();
        let out = out.get_mut(..len).ok_or(Error::BufferTooSmall)?;

        out[0..4].copy_from_slice(&self.format.tag().to_le_bytes());
        out[4..8].copy_from_slice(&self.image_size.to_le_bytes());
        out[8] = self.version.major;
        out[9] = self.version.minor;
        out[10..12].copy_from_slice(&self.version.revision.to_le_bytes());
        out[12..16].copy_from_slice(&self.version.build_num.to_le_bytes());

        Ok(len)
    }
}

/// Version 1 header as stored on flash, in native byte order.
#[derive(Debug)]
struct RawHeaderV1 {
    magic: u32,
    header_size: u16,
    image_size: u32,
    version: SemVer,
}

const fn le_u16(raw: &[u8; HEADER_SIZE_V1], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

const fn le_u32(raw: &[u8; HEADER_SIZE_V1], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

impl RawHeaderV1 {
    const fn from_bytes(raw: &[u8; HEADER_SIZE_V1]) -> Self {
        // Load address at 4, flags at 16 and padding are of no use to the application.
        Self {
            magic: le_u32(raw, 0),
            header_size: le_u16(raw, 8),
            image_size: le_u32(raw, 12),
            version: SemVer {
                major: raw[20],
                minor: raw[21],
                revision: le_u16(raw, 22),
                build_num: le_u32(raw, 24),
            },
        }
    }

    fn validate(self) -> Result<Self, Error> {
        if self.magic != HEADER_MAGIC_V1 {
            return Err(Error::BadMagic);
        }

        // Larger headers are fine, the image may have been linked with extra padding.
        if (self.header_size as usize) < HEADER_SIZE_V1 {
            return Err(Error::HeaderTooSmall);
        }

        Ok(self)
    }

    async fn read(area: &mut impl ReadNorFlash, offset: u32) -> Result<Self, Error> {
        let mut raw = [0u8; HEADER_SIZE_V1];
        area.read(offset, &mut raw).await.map_err(Error::storage)?;

        Self::from_bytes(&raw).validate()
    }
}

/// Read the header of the image in an area.
///
/// `capacity` is the room the caller has for the result; it is checked before flash is touched.
pub async fn read_bank_header<M: FlashMap>(
    map: &mut M,
    config: &Config,
    id: AreaId,
    capacity: usize,
) -> Result<ImageHeader, Error> {
    let format = HeaderFormat::V1;
    if capacity < format.min_capacity() {
        return Err(Error::BufferTooSmall);
    }

    let StartOffset { offset, .. } = config.layout.start_offset(map, config, id).await;

    let mut area = crate::area::open(map, id)?;
    let header = match format {
        HeaderFormat::V1 => {
            let raw = RawHeaderV1::read(&mut area, offset).await.inspect_err(|e| {
                log::warn!("No valid header in area {:?}: {:?}", id, e);
            })?;

            ImageHeader {
                format,
                image_size: raw.image_size,
                version: raw.version,
            }
        }
    };

    log::debug!("Header of area {:?}: {:?}", id, header);
    Ok(header)
}
