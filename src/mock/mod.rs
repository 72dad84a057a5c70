use std::{cell::Cell, vec, vec::Vec};

use embedded_storage_async::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::{
    AreaId, Error, SemVer,
    active::{BootInfo, BootInfoKey},
    area::{FlashMap, Sector},
    manager::{Config, ImageSlots},
};

pub const SECTOR_SIZE: u32 = 1024;
const SLOT_SIZE: u32 = 8 * SECTOR_SIZE;

pub const PRIMARY: AreaId = AreaId(1);
pub const SECONDARY: AreaId = AreaId(2);
pub const PRIMARY_1: AreaId = AreaId(3);
pub const SECONDARY_1: AreaId = AreaId(4);

/// Single image device running from `PRIMARY`.
pub fn config() -> Config {
    Config::single(ImageSlots {
        primary: PRIMARY,
        secondary: Some(SECONDARY),
    })
}

pub fn raw_header(magic: u32, header_size: u16, image_size: u32, version: SemVer) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[0..4].copy_from_slice(&magic.to_le_bytes());
    raw[4..8].copy_from_slice(&0x0800_0000u32.to_le_bytes());
    raw[8..10].copy_from_slice(&header_size.to_le_bytes());
    raw[12..16].copy_from_slice(&image_size.to_le_bytes());
    raw[20] = version.major;
    raw[21] = version.minor;
    raw[22..24].copy_from_slice(&version.revision.to_le_bytes());
    raw[24..28].copy_from_slice(&version.build_num.to_le_bytes());
    raw
}

/// NOR flash in RAM: erases to `0xff`, writes can only clear bits.
pub struct MockArea {
    data: Vec<u8>,
    fail_writes: bool,
}

impl MockArea {
    pub fn new(size: u32) -> Self {
        Self {
            data: vec![0xff; size as usize],
            fail_writes: false,
        }
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite contents directly, as a programmer would.
    pub fn fill(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn is_erased(&self) -> bool {
        self.data.iter().all(|b| *b == 0xff)
    }

    fn range(&self, offset: u32, len: usize) -> Result<core::ops::Range<usize>, NorFlashErrorKind> {
        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl ErrorType for MockArea {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockArea {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockArea {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = SECTOR_SIZE as usize;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        let aligned = |addr: u32| {
            addr as usize % Self::ERASE_SIZE == 0 || addr as usize == self.data.len()
        };
        if from > to || !aligned(from) || !aligned(to) {
            return Err(NorFlashErrorKind::NotAligned);
        }

        let range = self.range(from, (to - from) as usize)?;
        self.data[range].fill(0xff);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }

        let range = self.range(offset, bytes.len())?;
        for (cell, byte) in self.data[range].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// Opened area, counted as open until dropped.
pub struct MockHandle<'a> {
    area: &'a mut MockArea,
    open: &'a Cell<usize>,
}

impl Drop for MockHandle<'_> {
    fn drop(&mut self) {
        self.open.set(self.open.get() - 1);
    }
}

impl ErrorType for MockHandle<'_> {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockHandle<'_> {
    const READ_SIZE: usize = MockArea::READ_SIZE;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.area.read(offset, bytes).await
    }

    fn capacity(&self) -> usize {
        self.area.capacity()
    }
}

impl NorFlash for MockHandle<'_> {
    const WRITE_SIZE: usize = MockArea::WRITE_SIZE;
    const ERASE_SIZE: usize = MockArea::ERASE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.area.erase(from, to).await
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.area.write(offset, bytes).await
    }
}

/// Flash map with two image pairs.
pub struct MockFlashMap {
    areas: Vec<(AreaId, MockArea)>,
    open: Cell<usize>,
    opened: usize,
    fail_sectors: Option<AreaId>,
}

impl MockFlashMap {
    pub fn new() -> Self {
        Self {
            areas: [PRIMARY, SECONDARY, PRIMARY_1, SECONDARY_1]
                .into_iter()
                .map(|id| (id, MockArea::new(SLOT_SIZE)))
                .collect(),
            open: Cell::new(0),
            opened: 0,
            fail_sectors: None,
        }
    }

    /// Flash map in which area `id` is only `size` bytes large.
    pub fn with_tiny(id: AreaId, size: u32) -> Self {
        let mut map = Self::new();
        *map.area_mut(id) = MockArea::new(size);
        map
    }

    pub fn area(&self, id: AreaId) -> &MockArea {
        &self.areas.iter().find(|(i, _)| *i == id).unwrap().1
    }

    pub fn area_mut(&mut self, id: AreaId) -> &mut MockArea {
        &mut self.areas.iter_mut().find(|(i, _)| *i == id).unwrap().1
    }

    pub fn fail_sectors(&mut self, id: AreaId) {
        self.fail_sectors = Some(id);
    }

    pub fn fail_writes(&mut self, id: AreaId) {
        self.area_mut(id).fail_writes = true;
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.open.get()
    }

    /// Number of times any area was requested to be opened.
    pub fn opened(&self) -> usize {
        self.opened
    }
}

impl FlashMap for MockFlashMap {
    type Area<'a>
        = MockHandle<'a>
    where
        Self: 'a;

    fn open(&mut self, id: AreaId) -> Result<Self::Area<'_>, Error> {
        self.opened += 1;

        let area = self
            .areas
            .iter_mut()
            .find(|(i, _)| *i == id)
            .map(|(_, area)| area)
            .ok_or(Error::Unavailable)?;

        self.open.set(self.open.get() + 1);
        Ok(MockHandle {
            area,
            open: &self.open,
        })
    }

    fn sectors(&self, id: AreaId, sectors: &mut [Sector]) -> Result<usize, Error> {
        if self.fail_sectors == Some(id) {
            return Err(Error::Unavailable);
        }

        let size = self
            .areas
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, area)| area.size())
            .ok_or(Error::Unavailable)?;

        let count = size.div_ceil(SECTOR_SIZE) as usize;
        for (i, sector) in sectors.iter_mut().take(count).enumerate() {
            let offset = i as u32 * SECTOR_SIZE;
            *sector = Sector {
                offset,
                size: SECTOR_SIZE.min(size - offset),
            };
        }

        if count > sectors.len() {
            Err(Error::NoMem)
        } else {
            Ok(count)
        }
    }
}

/// Boot information holding only a running slot, if any.
pub struct MockBootInfo {
    running_slot: Option<Vec<u8>>,
    last_key: Option<BootInfoKey>,
}

impl MockBootInfo {
    pub fn new(running_slot: Option<&[u8]>) -> Self {
        Self {
            running_slot: running_slot.map(|v| v.to_vec()),
            last_key: None,
        }
    }

    pub fn last_key(&self) -> Option<BootInfoKey> {
        self.last_key
    }
}

impl BootInfo for MockBootInfo {
    async fn lookup(&mut self, key: BootInfoKey, out: &mut [u8]) -> Result<usize, Error> {
        self.last_key = Some(key);

        let value = match (key, &self.running_slot) {
            (BootInfoKey::RunningSlot, Some(value)) => value,
            _ => return Err(Error::BootInfo),
        };
        let out = out.get_mut(..value.len()).ok_or(Error::BufferTooSmall)?;
        out.copy_from_slice(value);
        Ok(value.len())
    }
}
