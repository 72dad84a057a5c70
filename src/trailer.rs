//! Bit-exact codec for the swap status trailer at the tail of an image slot.
//!
//! The bootloader reads the same fields to decide on the swap to perform at boot, hence the
//! layout must not change:
//!
//! ```text
//! size - 40  swap info   (image number << 4 | swap type)
//! size - 32  copy done   (0x01 when set)
//! size - 24  image ok    (0x01 when set)
//! size - 16  magic       (16 bytes)
//! ```
//!
//! Every field starts at a multiple of [`MAX_ALIGN`] and is padded with erased bytes.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use serde::{Deserialize, Serialize};

use crate::{Error, log};

/// Size of the trailer magic.
pub const MAGIC_SIZE: usize = 16;

/// Largest write alignment of any flash holding an image slot.
pub const MAX_ALIGN: usize = 8;

/// Magic marking a trailer as written by an update request or the bootloader.
pub const MAGIC: [u8; MAGIC_SIZE] = [
    0x77, 0xc2, 0x95, 0xf3, 0x60, 0xd2, 0xef, 0x7f, 0x35, 0x52, 0x50, 0x0f, 0x2c, 0xb6, 0x79, 0x80,
];

const ERASED: u8 = 0xff;
const FLAG_SET: u8 = 0x01;

const SWAP_INFO: usize = 0;
const COPY_DONE: usize = MAX_ALIGN;
const IMAGE_OK: usize = 2 * MAX_ALIGN;
const MAGIC_AT: usize = 3 * MAX_ALIGN;

/// Bytes read from the tail of the area to decode a [`SwapState`].
const LEN: usize = MAGIC_AT + MAGIC_SIZE;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Magic {
    /// Never written: the slot holds a pre-programmed image or nothing at all.
    Unset,
    Good,
    Bad,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Flag {
    Unset,
    Set,
    Bad,
}

/// Swap type as encoded in the lower nibble of the swap info field.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SwapKind {
    None = 1,
    Test = 2,
    Permanent = 3,
    Revert = 4,
}

impl SwapKind {
    const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SwapKind::None),
            2 => Some(SwapKind::Test),
            3 => Some(SwapKind::Permanent),
            4 => Some(SwapKind::Revert),
            _ => None,
        }
    }
}

/// Decoded contents of a trailer.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SwapState {
    pub magic: Magic,
    pub image_ok: Flag,
    pub copy_done: Flag,
    pub swap_type: SwapKind,
    pub image_num: u8,
}

impl SwapState {
    /// State of a slot whose trailer has never been written.
    pub const EMPTY: SwapState = SwapState {
        magic: Magic::Unset,
        image_ok: Flag::Unset,
        copy_done: Flag::Unset,
        swap_type: SwapKind::None,
        image_num: 0,
    };

    fn decode(raw: &[u8; LEN]) -> Self {
        let magic = &raw[MAGIC_AT..];
        let magic = if is_erased(magic) {
            Magic::Unset
        } else if magic == MAGIC {
            Magic::Good
        } else {
            Magic::Bad
        };

        let (swap_type, image_num) = match raw[SWAP_INFO] {
            ERASED => (SwapKind::None, 0),
            info => match SwapKind::from_code(info & 0x0f) {
                Some(kind) => (kind, info >> 4),
                None => (SwapKind::None, 0),
            },
        };

        SwapState {
            magic,
            image_ok: decode_flag(raw[IMAGE_OK]),
            copy_done: decode_flag(raw[COPY_DONE]),
            swap_type,
            image_num,
        }
    }
}

fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == ERASED)
}

const fn decode_flag(value: u8) -> Flag {
    match value {
        ERASED => Flag::Unset,
        FLAG_SET => Flag::Set,
        _ => Flag::Bad,
    }
}

/// Offset of the first trailer field within an area of `capacity` bytes.
fn start(capacity: usize) -> Result<u32, Error> {
    if capacity % MAX_ALIGN != 0 {
        return Err(Error::Unaligned);
    }

    capacity
        .checked_sub(LEN)
        .and_then(|start| u32::try_from(start).ok())
        .ok_or(Error::TrailerOutOfBounds)
}

const fn check_granularity(size: usize) -> Result<(), Error> {
    if size == 0 || size > MAX_ALIGN || MAX_ALIGN % size != 0 {
        return Err(Error::Unaligned);
    }
    Ok(())
}

/// Read and decode the trailer of an area.
pub async fn read_swap_state<F: ReadNorFlash>(area: &mut F) -> Result<SwapState, Error> {
    check_granularity(F::READ_SIZE)?;
    let start = start(area.capacity())?;

    let mut raw = [0u8; LEN];
    area.read(start, &mut raw).await.map_err(Error::storage)?;

    Ok(SwapState::decode(&raw))
}

async fn write_field<F: NorFlash>(area: &mut F, field: usize, value: u8) -> Result<(), Error> {
    check_granularity(F::WRITE_SIZE)?;
    let start = start(area.capacity())?;

    let mut buf = [ERASED; MAX_ALIGN];
    buf[0] = value;

    area.write(start + field as u32, &buf[..F::WRITE_SIZE])
        .await
        .map_err(Error::storage)
}

pub async fn write_magic<F: NorFlash>(area: &mut F) -> Result<(), Error> {
    check_granularity(F::WRITE_SIZE)?;
    let start = start(area.capacity())?;

    log::debug!("Writing trailer magic");
    area.write(start + MAGIC_AT as u32, &MAGIC)
        .await
        .map_err(Error::storage)
}

pub async fn write_image_ok<F: NorFlash>(area: &mut F) -> Result<(), Error> {
    log::debug!("Writing image ok");
    write_field(area, IMAGE_OK, FLAG_SET).await
}

pub async fn write_copy_done<F: NorFlash>(area: &mut F) -> Result<(), Error> {
    log::debug!("Writing copy done");
    write_field(area, COPY_DONE, FLAG_SET).await
}

pub async fn write_swap_info<F: NorFlash>(
    area: &mut F,
    swap_type: SwapKind,
    image_num: u8,
) -> Result<(), Error> {
    if image_num > 0x0f {
        return Err(Error::InvalidImage);
    }

    log::debug!("Writing swap info {:?} for image {}", swap_type, image_num);
    write_field(area, SWAP_INFO, (image_num << 4) | swap_type as u8).await
}

/// Erase the blocks holding the trailer, leaving any earlier blocks untouched.
///
/// Fails with [`Error::SharedEraseBlock`], leaving the area untouched, if anything besides the
/// trailer is stored in those blocks.
pub async fn erase_trailer<F: NorFlash>(area: &mut F) -> Result<(), Error> {
    check_granularity(F::READ_SIZE)?;
    let capacity = area.capacity();
    let start = start(capacity)?;
    let from = start - start % F::ERASE_SIZE as u32;

    let mut buf = [0u8; 4 * MAX_ALIGN];
    let mut offset = from;
    while offset < start {
        let chunk = &mut buf[..(start - offset).min(4 * MAX_ALIGN as u32) as usize];
        area.read(offset, chunk).await.map_err(Error::storage)?;
        if !is_erased(chunk) {
            log::warn!("Image data at {} shares an erase block with the trailer", offset);
            return Err(Error::SharedEraseBlock);
        }
        offset += chunk.len() as u32;
    }

    log::debug!("Erasing trailer from {}", from);
    area.erase(from, capacity as u32)
        .await
        .map_err(Error::storage)
}
