//! Image slot management for firmware updates, sharing its on-flash contract with the bootloader.
//!
//! Reads image headers, tracks which slot the running image was loaded from and records pending
//! swaps and confirmations in the trailer at the tail of each slot.
#![no_std]

use embedded_storage_async::nor_flash::{NorFlashError, NorFlashErrorKind};
use serde::{Deserialize, Serialize};

pub mod active;
pub mod area;
pub mod header;
pub mod manager;
pub mod strategies;
pub mod swap;
pub mod trailer;

#[cfg(feature = "retained_state")]
pub mod state;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

pub use active::{ActiveSlotSource, BootInfo, BootInfoKey, NoBootInfo};
pub use area::{FlashMap, Sector};
pub use header::{HeaderFormat, ImageHeader, SemVer};
pub use manager::{Config, ImageManager, ImageSlots};
pub use strategies::{Layout, Placement, StartOffset};
pub use swap::SwapType;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use ::log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! noop {
        ($fmt:literal $(, $arg:expr)* $(,)?) => {{
            $( let _ = &$arg; )*
        }};
    }
    pub(crate) use noop as debug;
    pub(crate) use noop as error;
    pub(crate) use noop as info;
    pub(crate) use noop as warn;
}

/// Maximum number of independently managed image pairs.
pub const MAX_IMAGES: usize = 3;

/// Identifier of a flash area as known to the partition table.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct AreaId(pub u8);

impl AreaId {
    /// Sentinel for a slot that could not be determined.
    ///
    /// Never handed to a [`FlashMap`], opening it fails with [`Error::InvalidSlot`].
    pub const INVALID: AreaId = AreaId(255);

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// Index of an image pair in a multi-image configuration.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct ImageIndex(pub u8);

impl ImageIndex {
    pub const PRIMARY: ImageIndex = ImageIndex(0);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The flash driver reported an error.
    Storage(NorFlashErrorKind),
    /// The flash map has no area with this id, or it could not be opened.
    Unavailable,
    /// The active slot is unknown, see [`AreaId::INVALID`].
    InvalidSlot,
    /// No image pair is configured for this index.
    InvalidImage,
    /// The image header does not start with the expected magic.
    BadMagic,
    /// The image header declares a size below the minimum for its format.
    HeaderTooSmall,
    /// The caller's buffer cannot hold the requested structure.
    BufferTooSmall,
    /// Returned by [`FlashMap::sectors`] when more sectors exist than fit in the buffer.
    NoMem,
    /// The area is too small to hold a trailer.
    TrailerOutOfBounds,
    /// The trailer magic is neither erased nor valid.
    BadTrailer,
    /// The flash write granularity is not compatible with the trailer alignment.
    Unaligned,
    /// The pending upgrade could not be persisted.
    UpgradeNotRecorded,
    /// The image could not be marked as confirmed.
    NotConfirmed,
    /// The image extends into the erase blocks holding the trailer.
    SharedEraseBlock,
    /// The retained boot information could not be read.
    BootInfo,
}

/// Coarse classification of [`Error`], as seen by a C-style caller.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Category {
    Io,
    Format,
    NoMem,
    Fault,
}

impl Error {
    pub const fn category(self) -> Category {
        match self {
            Error::Storage(_) | Error::Unavailable | Error::BootInfo | Error::NotConfirmed => {
                Category::Io
            }
            Error::BadMagic | Error::HeaderTooSmall => Category::Format,
            Error::BufferTooSmall | Error::NoMem => Category::NoMem,
            Error::InvalidSlot
            | Error::InvalidImage
            | Error::TrailerOutOfBounds
            | Error::BadTrailer
            | Error::Unaligned
            | Error::UpgradeNotRecorded
            | Error::SharedEraseBlock => Category::Fault,
        }
    }

    /// Negative errno value for this error.
    ///
    /// Format errors share `-EIO` with storage errors, as the bootloader reports them.
    pub const fn code(self) -> i32 {
        const EIO: i32 = 5;
        const ENOMEM: i32 = 12;
        const EFAULT: i32 = 14;

        match self.category() {
            Category::Io | Category::Format => -EIO,
            Category::NoMem => -ENOMEM,
            Category::Fault => -EFAULT,
        }
    }

    pub(crate) fn storage(e: impl NorFlashError) -> Self {
        Error::Storage(e.kind())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Storage(kind) => defmt::write!(f, "Storage({})", defmt::Debug2Format(kind)),
            other => defmt::write!(f, "{}", defmt::Debug2Format(other)),
        }
    }
}
