//! Slot layouts, deciding where in a slot the image header starts.

use serde::{Deserialize, Serialize};

use crate::{AreaId, area::FlashMap, log, manager::Config};

pub mod offset;
pub mod standard;

/// A slot layout as used by the bootloader to move images around.
#[allow(async_fn_in_trait)]
pub trait Strategy {
    /// Offset of the image header within area `id`.
    async fn start_offset<M: FlashMap>(
        &self,
        map: &mut M,
        config: &Config,
        id: AreaId,
    ) -> StartOffset;
}

/// Layout selected for all slots of a device.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum Layout {
    /// Images start at the beginning of every slot.
    #[default]
    Standard,
    /// Images in a secondary slot start after its first sector, which the swap uses for its progress.
    SwapUsingOffset,
}

impl Layout {
    pub async fn start_offset<M: FlashMap>(
        &self,
        map: &mut M,
        config: &Config,
        id: AreaId,
    ) -> StartOffset {
        let start = match self {
            Layout::Standard => standard::Standard.start_offset(map, config, id).await,
            Layout::SwapUsingOffset => offset::SwapUsingOffset.start_offset(map, config, id).await,
        };

        log::debug!("Start offset for area {:?}: {}", id, start.offset);
        start
    }
}

/// How a start offset was determined.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Placement {
    /// The image starts at the beginning of the slot.
    Start,
    /// The image starts after the first sector of the slot.
    Shifted,
    /// The sector layout was unavailable, assuming the beginning of the slot.
    ///
    /// A header read from the wrong offset fails validation, hence this is not an error.
    Degraded,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StartOffset {
    pub offset: u32,
    pub placement: Placement,
}

impl StartOffset {
    pub const START: StartOffset = StartOffset {
        offset: 0,
        placement: Placement::Start,
    };

    pub const DEGRADED: StartOffset = StartOffset {
        offset: 0,
        placement: Placement::Degraded,
    };
}
