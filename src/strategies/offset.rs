//! Layout for 'swap using offset', in which the bootloader keeps the first sector of the secondary slot free.
//!
//! An update is written to the secondary slot starting at its second sector.
//! While swapping, every sector is moved down by one, leaving the image at the beginning of the
//! slot once the swap completes. Hence the image only starts at the beginning of the secondary slot
//! if it has been swapped out, and is waiting to be reverted.

use crate::{
    AreaId, Error,
    area::{FlashMap, Sector},
    log,
    manager::Config,
    strategies::{Placement, StartOffset, Strategy},
    swap::{self, SwapType},
};

pub struct SwapUsingOffset;

impl Strategy for SwapUsingOffset {
    async fn start_offset<M: FlashMap>(
        &self,
        map: &mut M,
        config: &Config,
        id: AreaId,
    ) -> StartOffset {
        // Only secondary slots are shifted.
        let Some(image) = config.secondary_image(id) else {
            return StartOffset::START;
        };

        match swap::swap_type_multi(map, config, image).await {
            Ok(SwapType::Revert) => return StartOffset::START,
            Ok(_) => {}
            Err(e) => log::warn!("Swap type of image {:?} unknown: {:?}", image, e),
        }

        // Only the first sector is of interest, the area is expected to have more.
        let mut sectors = [Sector::default(); 1];
        match map.sectors(id, &mut sectors) {
            Ok(1) | Err(Error::NoMem) => StartOffset {
                offset: sectors[0].size,
                placement: Placement::Shifted,
            },
            Ok(count) => {
                log::error!("Area {:?} reported {} sectors", id, count);
                StartOffset::DEGRADED
            }
            Err(e) => {
                log::error!("Failed to get sectors of area {:?}: {:?}", id, e);
                StartOffset::DEGRADED
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::{
        ImageIndex,
        manager::{Config, ImageSlots},
        mock::{MockFlashMap, PRIMARY, PRIMARY_1, SECONDARY, SECONDARY_1, SECTOR_SIZE},
        strategies::Layout,
        trailer,
    };

    fn config() -> Config {
        Config::multi([
            ImageSlots {
                primary: PRIMARY,
                secondary: Some(SECONDARY),
            },
            ImageSlots {
                primary: PRIMARY_1,
                secondary: Some(SECONDARY_1),
            },
        ])
        .with_layout(Layout::SwapUsingOffset)
    }

    fn start_offset(map: &mut MockFlashMap, id: AreaId) -> StartOffset {
        block_on(SwapUsingOffset.start_offset(map, &config(), id))
    }

    #[test]
    fn primary_not_shifted() {
        let mut map = MockFlashMap::new();

        assert_eq!(start_offset(&mut map, PRIMARY), StartOffset::START);
        assert_eq!(start_offset(&mut map, PRIMARY_1), StartOffset::START);
    }

    #[test]
    fn secondary_shifted() {
        let mut map = MockFlashMap::new();

        let start = start_offset(&mut map, SECONDARY);
        assert_eq!(start.offset, SECTOR_SIZE);
        assert_eq!(start.placement, Placement::Shifted);

        assert_eq!(start_offset(&mut map, SECONDARY_1).offset, SECTOR_SIZE);
        assert_eq!(map.open_handles(), 0);
    }

    #[test]
    fn single_sector() {
        let mut map = MockFlashMap::with_tiny(SECONDARY, SECTOR_SIZE);

        let start = start_offset(&mut map, SECONDARY);
        assert_eq!(start.offset, SECTOR_SIZE);
        assert_eq!(start.placement, Placement::Shifted);
    }

    #[test]
    fn revert_not_shifted() {
        let mut map = MockFlashMap::new();

        // Swapped image in the primary slot, never confirmed.
        block_on(async {
            let mut primary = map.open(PRIMARY).unwrap();
            trailer::write_magic(&mut primary).await.unwrap();
            trailer::write_copy_done(&mut primary).await.unwrap();
        });

        assert_eq!(
            block_on(swap::swap_type_multi(&mut map, &config(), ImageIndex(0))),
            Ok(SwapType::Revert)
        );
        assert_eq!(start_offset(&mut map, SECONDARY), StartOffset::START);

        // The other image is unaffected.
        assert_eq!(start_offset(&mut map, SECONDARY_1).offset, SECTOR_SIZE);
    }

    #[test]
    fn degraded() {
        let mut map = MockFlashMap::new();
        map.fail_sectors(SECONDARY);

        assert_eq!(start_offset(&mut map, SECONDARY), StartOffset::DEGRADED);
    }

    #[test]
    fn layout_dispatch() {
        let mut map = MockFlashMap::new();

        let standard = config().with_layout(Layout::Standard);
        assert_eq!(
            block_on(Layout::Standard.start_offset(&mut map, &standard, SECONDARY)),
            StartOffset::START
        );
        assert_eq!(
            block_on(Layout::SwapUsingOffset.start_offset(&mut map, &config(), SECONDARY)).offset,
            SECTOR_SIZE
        );
    }
}
