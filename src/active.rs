//! Resolution of the slot the running image was loaded from.

use serde::{Deserialize, Serialize};

use crate::{AreaId, Error, log};

/// Keys of the information the bootloader retains for the application.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[repr(u8)]
pub enum BootInfoKey {
    Mode = 0,
    SignatureType = 1,
    Recovery = 2,
    RunningSlot = 3,
    BootloaderVersion = 4,
    MaxApplicationSize = 5,
}

/// Read access to the information retained by the bootloader.
#[allow(async_fn_in_trait)]
pub trait BootInfo {
    /// Copy the value for `key` into `out`, returning its length.
    async fn lookup(&mut self, key: BootInfoKey, out: &mut [u8]) -> Result<usize, Error>;
}

/// Boot information for devices on which the bootloader does not retain anything.
pub struct NoBootInfo;

impl BootInfo for NoBootInfo {
    async fn lookup(&mut self, _key: BootInfoKey, _out: &mut [u8]) -> Result<usize, Error> {
        Err(Error::BootInfo)
    }
}

/// Where the active slot is taken from.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ActiveSlotSource {
    /// The slot the image was linked for.
    Fixed(AreaId),
    /// The bootloader loads images to RAM, and tells which slot it took the image from.
    RamLoad,
}

impl ActiveSlotSource {
    /// Resolve the active slot.
    ///
    /// Yields [`AreaId::INVALID`] if the bootloader does not tell; opening that slot fails.
    pub async fn resolve(self, info: &mut impl BootInfo) -> AreaId {
        match self {
            ActiveSlotSource::Fixed(id) => id,
            ActiveSlotSource::RamLoad => {
                let mut slot = [0u8; 1];
                match info.lookup(BootInfoKey::RunningSlot, &mut slot).await {
                    Ok(len) if len > 0 => {
                        log::debug!("Active slot: {}", slot[0]);
                        AreaId(slot[0])
                    }
                    Ok(_) => {
                        log::error!("Failed to fetch active slot: no value");
                        AreaId::INVALID
                    }
                    Err(e) => {
                        log::error!("Failed to fetch active slot: {:?}", e);
                        AreaId::INVALID
                    }
                }
            }
        }
    }
}
