//! Device configuration, and the entry point combining it with the flash map and active slot.

use serde::{Deserialize, Serialize};

use crate::{
    AreaId, Error, ImageIndex, MAX_IMAGES,
    active::{ActiveSlotSource, BootInfo},
    area::{self, FlashMap},
    header::{self, ImageHeader},
    log,
    strategies::{Layout, StartOffset},
    swap::{self, SwapType},
};

/// Slots holding the running image and its update.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ImageSlots {
    pub primary: AreaId,
    /// Absent if the image can not be updated through a swap.
    pub secondary: Option<AreaId>,
}

/// Capabilities of a device, chosen when building the application.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Config {
    pub layout: Layout,
    pub active_slot: ActiveSlotSource,
    images: [Option<ImageSlots>; MAX_IMAGES],
}

impl Config {
    /// Device with a single image, running from its primary slot.
    pub const fn single(slots: ImageSlots) -> Self {
        Self {
            layout: Layout::Standard,
            active_slot: ActiveSlotSource::Fixed(slots.primary),
            images: [Some(slots), None, None],
        }
    }

    /// Device with an image per entry, the first one running from its primary slot.
    pub fn multi<const N: usize>(images: [ImageSlots; N]) -> Self {
        const { assert!(N > 0 && N <= MAX_IMAGES) };

        let mut config = Self::single(images[0]);
        for (slot, image) in config.images.iter_mut().zip(images) {
            *slot = Some(image);
        }
        config
    }

    pub const fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub const fn with_active_slot(mut self, active_slot: ActiveSlotSource) -> Self {
        self.active_slot = active_slot;
        self
    }

    pub fn image(&self, index: ImageIndex) -> Result<ImageSlots, Error> {
        self.images
            .get(index.0 as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidImage)
    }

    /// Image for which `id` is the secondary slot.
    pub fn secondary_image(&self, id: AreaId) -> Option<ImageIndex> {
        self.images
            .iter()
            .position(|slots| slots.is_some_and(|slots| slots.secondary == Some(id)))
            .map(|i| ImageIndex(i as u8))
    }
}

/// Image management for the running application or bootloader.
///
/// Holds the active slot as resolved once at startup.
pub struct ImageManager<M: FlashMap> {
    flash: M,
    config: Config,
    active: AreaId,
}

impl<M: FlashMap> ImageManager<M> {
    pub const fn new(flash: M, config: Config, active: AreaId) -> Self {
        Self {
            flash,
            config,
            active,
        }
    }

    /// Resolve the active slot as configured, and construct the manager.
    pub async fn resolve(flash: M, config: Config, info: &mut impl BootInfo) -> Self {
        let active = config.active_slot.resolve(info).await;
        if !active.is_valid() {
            log::warn!("Active slot unknown, operations on it will fail");
        }

        Self::new(flash, config, active)
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Slot the running image was loaded from, possibly [`AreaId::INVALID`].
    pub const fn active_slot(&self) -> AreaId {
        self.active
    }

    pub fn flash(&mut self) -> &mut M {
        &mut self.flash
    }

    pub fn into_flash(self) -> M {
        self.flash
    }

    /// Read the header of the image in an area.
    ///
    /// `capacity` is the room the caller reserved for the header, see [`crate::HeaderFormat::min_capacity`].
    pub async fn read_bank_header(
        &mut self,
        id: AreaId,
        capacity: usize,
    ) -> Result<ImageHeader, Error> {
        header::read_bank_header(&mut self.flash, &self.config, id, capacity).await
    }

    pub async fn start_offset(&mut self, id: AreaId) -> StartOffset {
        self.config
            .layout
            .start_offset(&mut self.flash, &self.config, id)
            .await
    }

    /// Pending swap type of the first image.
    pub async fn swap_type(&mut self) -> Result<SwapType, Error> {
        self.swap_type_multi(ImageIndex::PRIMARY).await
    }

    pub async fn swap_type_multi(&mut self, image: ImageIndex) -> Result<SwapType, Error> {
        swap::swap_type_multi(&mut self.flash, &self.config, image).await
    }

    /// Request an upgrade of the first image on next boot.
    ///
    /// A permanent upgrade does not need to be confirmed, and will not be reverted.
    pub async fn request_upgrade(&mut self, permanent: bool) -> Result<(), Error> {
        self.request_upgrade_multi(ImageIndex::PRIMARY, permanent).await
    }

    pub async fn request_upgrade_multi(
        &mut self,
        image: ImageIndex,
        permanent: bool,
    ) -> Result<(), Error> {
        swap::request_upgrade_multi(&mut self.flash, &self.config, image, permanent).await
    }

    /// Confirm the running image.
    pub async fn confirm(&mut self) -> Result<(), Error> {
        swap::confirm_slot(&mut self.flash, self.active).await
    }

    pub async fn confirm_multi(&mut self, image: ImageIndex) -> Result<(), Error> {
        swap::confirm_multi(&mut self.flash, &self.config, image).await
    }

    /// Whether the running image is confirmed.
    pub async fn is_confirmed(&mut self) -> bool {
        swap::is_slot_confirmed(&mut self.flash, self.active).await
    }

    pub async fn is_confirmed_multi(&mut self, image: ImageIndex) -> bool {
        match self.config.image(image) {
            Ok(slots) => swap::is_slot_confirmed(&mut self.flash, slots.primary).await,
            Err(_) => false,
        }
    }

    /// Offset of the trailer status region within an area.
    pub async fn trailer_offset_for_area(&mut self, id: AreaId) -> Result<u32, Error> {
        area::trailer_offset_for_area(&mut self.flash, id).await
    }

    /// Erase an area, typically the secondary slot before writing an update.
    pub async fn erase_bank(&mut self, id: AreaId) -> Result<(), Error> {
        area::erase_bank(&mut self.flash, id).await
    }
}
