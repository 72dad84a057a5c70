//! Access to flash areas and the location of the trailer at their tail.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

use crate::{AreaId, Error, log, trailer};

/// Physical sector of a flash area, relative to the start of the area.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Sector {
    pub offset: u32,
    pub size: u32,
}

/// Partition table of a device, handing out the flash areas holding image slots.
///
/// An opened area is released when the returned handle is dropped.
pub trait FlashMap {
    type Area<'a>: NorFlash
    where
        Self: 'a;

    /// Open an area for reading and writing, addressed from its own start.
    fn open(&mut self, id: AreaId) -> Result<Self::Area<'_>, Error>;

    /// Fill `sectors` with the layout of an area, returning the number of sectors written.
    ///
    /// If the area has more sectors than fit, `sectors` is filled completely and [`Error::NoMem`] is returned.
    fn sectors(&self, id: AreaId, sectors: &mut [Sector]) -> Result<usize, Error>;
}

/// Open an area, refusing the sentinel slot before the flash map gets to see it.
pub(crate) fn open<M: FlashMap>(map: &mut M, id: AreaId) -> Result<M::Area<'_>, Error> {
    if !id.is_valid() {
        log::error!("Refusing to open invalid slot");
        return Err(Error::InvalidSlot);
    }

    map.open(id)
}

/// Offset of the trailer status region, counted from the start of an area of `area_size` bytes.
///
/// Negative when the area is too small to hold a trailer.
pub const fn trailer_offset(area_size: u32) -> i64 {
    area_size as i64 - trailer::MAGIC_SIZE as i64 - 2 * trailer::MAX_ALIGN as i64
}

/// Offset of the trailer status region of an area.
pub async fn trailer_offset_for_area(map: &mut impl FlashMap, id: AreaId) -> Result<u32, Error> {
    let size = {
        let area = open(map, id)?;
        area.capacity()
    };

    let offset = u32::try_from(size)
        .map(trailer_offset)
        .map_err(|_| Error::TrailerOutOfBounds)?;

    u32::try_from(offset).map_err(|_| {
        log::error!("Area {:?} of {} bytes cannot hold a trailer", id, size);
        Error::TrailerOutOfBounds
    })
}

/// Erase an entire area, including its trailer.
pub async fn erase_bank(map: &mut impl FlashMap, id: AreaId) -> Result<(), Error> {
    let mut area = open(map, id)?;
    let size = area.capacity() as u32;

    log::info!("Erasing area {:?} ({} bytes)", id, size);
    area.erase(0, size).await.map_err(Error::storage)
}
