//! Swap state machine, recording update requests and confirmations in slot trailers.
//!
//! The bootloader decides what to do at boot based on the trailers of both slots of an image:
//!
//! * **Test**: the secondary slot holds an update that is swapped in once. If the update does not
//!   confirm itself, the next boot swaps the previous image back.
//! * **Permanent**: the secondary slot holds an update that is swapped in for good.
//! * **Revert**: the primary slot holds a swapped in image that was never confirmed.
//!
//! All functions open one area at a time, and release it before returning.
//! Callers are responsible for not mutating the state of a slot concurrently.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};
use serde::{Deserialize, Serialize};

use crate::{
    AreaId, Error, ImageIndex,
    area::{self, FlashMap},
    log,
    manager::Config,
    trailer::{self, Flag, Magic, SwapKind, SwapState},
};

/// Action the bootloader will take for an image on next boot.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SwapType {
    None,
    /// Swap in the update for a single boot, reverting unless confirmed.
    Test(ImageIndex),
    /// Swap in the update for good.
    Permanent(ImageIndex),
    /// Swap the previous image back in.
    Revert,
}

impl SwapType {
    fn decide(primary: &SwapState, secondary: &SwapState) -> Self {
        let image = ImageIndex(secondary.image_num);

        match (secondary.magic, secondary.image_ok) {
            (Magic::Good, Flag::Unset) => SwapType::Test(image),
            (Magic::Good, Flag::Set) => SwapType::Permanent(image),
            (Magic::Unset, _)
                if primary.magic == Magic::Good
                    && primary.image_ok == Flag::Unset
                    && primary.copy_done == Flag::Set =>
            {
                SwapType::Revert
            }
            _ => SwapType::None,
        }
    }
}

pub(crate) async fn read_state<M: FlashMap>(map: &mut M, id: AreaId) -> Result<SwapState, Error> {
    let mut area = area::open(map, id)?;
    trailer::read_swap_state(&mut area).await
}

/// Pending swap type of an image, without changing any state.
pub async fn swap_type_multi<M: FlashMap>(
    map: &mut M,
    config: &Config,
    image: ImageIndex,
) -> Result<SwapType, Error> {
    let slots = config.image(image)?;
    let Some(secondary) = slots.secondary else {
        return Ok(SwapType::None);
    };

    let primary_state = read_state(map, slots.primary).await?;
    let secondary_state = match read_state(map, secondary).await {
        Ok(state) => state,
        Err(Error::Unavailable) => {
            log::info!("Secondary slot of image {:?} unreachable, treating as empty", image);
            SwapState::EMPTY
        }
        Err(e) => return Err(e),
    };

    let swap_type = SwapType::decide(&primary_state, &secondary_state);
    log::info!("Swap type of image {:?}: {:?}", image, swap_type);
    Ok(swap_type)
}

/// Request a swap to the image in the secondary slot of `image` on next boot.
///
/// Replaces any request that is already pending for this image.
pub async fn request_upgrade_multi<M: FlashMap>(
    map: &mut M,
    config: &Config,
    image: ImageIndex,
    permanent: bool,
) -> Result<(), Error> {
    let slots = config.image(image)?;
    let Some(secondary) = slots.secondary else {
        log::error!("Image {:?} has no secondary slot to upgrade from", image);
        return Err(Error::UpgradeNotRecorded);
    };

    set_pending(map, secondary, image, permanent)
        .await
        .map_err(|e| {
            log::error!("Failed to request upgrade of image {:?}: {:?}", image, e);
            Error::UpgradeNotRecorded
        })
}

async fn write_request<F: NorFlash>(
    area: &mut F,
    image: ImageIndex,
    permanent: bool,
) -> Result<(), Error> {
    // Magic first: a power loss before the image ok flag leaves a test request.
    trailer::write_magic(area).await?;
    if permanent {
        trailer::write_image_ok(area).await?;
    }

    let kind = if permanent {
        SwapKind::Permanent
    } else {
        SwapKind::Test
    };
    trailer::write_swap_info(area, kind, image.0).await
}

async fn set_pending<M: FlashMap>(
    map: &mut M,
    id: AreaId,
    image: ImageIndex,
    permanent: bool,
) -> Result<(), Error> {
    let mut area = area::open(map, id)?;
    let state = trailer::read_swap_state(&mut area).await?;

    match state.magic {
        Magic::Unset => write_request(&mut area, image, permanent).await,
        Magic::Good => {
            let same_image = state.image_num == image.0;
            match (state.image_ok, permanent) {
                (Flag::Unset, false) | (Flag::Set, true) if same_image => {
                    log::debug!("Upgrade of image {:?} already requested", image);
                    Ok(())
                }
                (Flag::Unset, true) if same_image => trailer::write_image_ok(&mut area).await,
                _ => {
                    // Flash bits cannot be set back without an erase.
                    trailer::erase_trailer(&mut area).await?;
                    write_request(&mut area, image, permanent).await
                }
            }
        }
        Magic::Bad => {
            // Nothing to recover, clear the slot to allow future upgrades.
            log::warn!("Corrupt trailer in area {:?}, erasing", id);
            let size = area.capacity() as u32;
            area.erase(0, size).await.map_err(Error::storage)?;
            Err(Error::BadTrailer)
        }
    }
}

/// Mark the image in an area as accepted, so it will not be reverted.
///
/// Confirming a confirmed image, or an image that never took part in a swap, does nothing.
/// Any failure is reported as [`Error::NotConfirmed`].
pub async fn confirm_slot<M: FlashMap>(map: &mut M, id: AreaId) -> Result<(), Error> {
    set_confirmed(map, id).await.map_err(|e| {
        log::error!("Failed to confirm image in area {:?}: {:?}", id, e);
        Error::NotConfirmed
    })
}

async fn set_confirmed<M: FlashMap>(map: &mut M, id: AreaId) -> Result<(), Error> {
    let mut area = area::open(map, id)?;
    let state = trailer::read_swap_state(&mut area).await?;

    match (state.magic, state.image_ok) {
        (Magic::Good, Flag::Unset) => {
            log::info!("Confirming image in area {:?}", id);
            trailer::write_image_ok(&mut area).await
        }
        (Magic::Good, Flag::Set) | (Magic::Unset, _) => Ok(()),
        (Magic::Good, Flag::Bad) | (Magic::Bad, _) => Err(Error::BadTrailer),
    }
}

/// Confirm the image running from the primary slot of `image`.
pub async fn confirm_multi<M: FlashMap>(
    map: &mut M,
    config: &Config,
    image: ImageIndex,
) -> Result<(), Error> {
    let slots = config.image(image).map_err(|_| Error::NotConfirmed)?;
    confirm_slot(map, slots.primary).await
}

/// Whether the image in an area has been accepted.
///
/// Images that never took part in a swap were programmed at manufacturing and count as confirmed.
pub async fn is_slot_confirmed<M: FlashMap>(map: &mut M, id: AreaId) -> bool {
    match read_state(map, id).await {
        Ok(state) if state.magic == Magic::Unset => true,
        Ok(state) => state.image_ok == Flag::Set,
        Err(e) => {
            log::error!("Failed to read swap state of area {:?}: {:?}", id, e);
            false
        }
    }
}
