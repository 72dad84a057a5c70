//! Information retained by the bootloader for the application.
//!
//! The bootloader records which slot it loaded the image from, amongst others, before jumping
//! to the application. This is what the application uses to resolve its active slot in RAM load mode.

use serde::{Deserialize, Serialize};

use crate::{Error, SemVer};

pub mod retained;

pub use retained::RetainedBootInfo;

/// Value stored for a [`crate::BootInfoKey`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Record {
    Byte(u8),
    Word(u32),
    Version(SemVer),
}

impl Record {
    /// Raw little endian value, as handed out by boot information lookups.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, Error> {
        let mut raw = [0u8; 8];
        let len = match self {
            Record::Byte(value) => {
                raw[0] = *value;
                1
            }
            Record::Word(value) => {
                raw[..4].copy_from_slice(&value.to_le_bytes());
                4
            }
            Record::Version(version) => {
                raw[0] = version.major;
                raw[1] = version.minor;
                raw[2..4].copy_from_slice(&version.revision.to_le_bytes());
                raw[4..8].copy_from_slice(&version.build_num.to_le_bytes());
                8
            }
        };

        out.get_mut(..len)
            .ok_or(Error::BufferTooSmall)?
            .copy_from_slice(&raw[..len]);
        Ok(len)
    }
}
