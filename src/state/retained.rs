//! Boot information kept in a dedicated flash partition.
//!
//! Leverages `sequential-storage` and `postcard` to store and serialize/deserialize the records,
//! keyed by [`BootInfoKey`].

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::NoCache,
    map::{SerializationError, Value},
};

use crate::{
    Error,
    active::{BootInfo, BootInfoKey},
    log,
    state::Record,
};

const BUFFER_SIZE: usize = 64;

impl<'a> Value<'a> for Record {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            // Data type mismatch between Value and what is stored on disk.
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadBool
            | postcard::Error::DeserializeBadChar
            | postcard::Error::DeserializeBadUtf8
            | postcard::Error::DeserializeBadOption
            | postcard::Error::DeserializeBadEnum
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })
    }
}

/// Boot information stored in a flash partition shared by bootloader and application.
pub struct RetainedBootInfo<NVM: NorFlash> {
    nvm: NVM,
    cache: NoCache,
}

impl<NVM: NorFlash> RetainedBootInfo<NVM> {
    pub fn new(nvm: NVM) -> Self {
        Self {
            nvm,
            cache: NoCache::new(),
        }
    }

    pub fn into_inner(self) -> NVM {
        self.nvm
    }

    fn range(&self) -> core::ops::Range<u32> {
        0..self.nvm.capacity() as u32
    }

    pub async fn fetch(&mut self, key: BootInfoKey) -> Result<Option<Record>, Error> {
        let mut data_buffer = [0u8; BUFFER_SIZE];
        let range = self.range();

        sequential_storage::map::fetch_item::<u8, Record, _>(
            &mut self.nvm,
            range,
            &mut self.cache,
            &mut data_buffer,
            &(key as u8),
        )
        .await
        .map_err(|e| {
            log::error!("Failed to fetch boot info: {:?}", loggable(&e));
            Error::BootInfo
        })
    }

    /// Record a value, replacing any earlier value for the same key.
    pub async fn store(&mut self, key: BootInfoKey, record: Record) -> Result<(), Error> {
        let mut data_buffer = [0u8; BUFFER_SIZE];
        let range = self.range();

        log::debug!("Storing boot info {:?}: {:?}", key, record);

        sequential_storage::map::store_item::<u8, Record, _>(
            &mut self.nvm,
            range,
            &mut self.cache,
            &mut data_buffer,
            &(key as u8),
            &record,
        )
        .await
        .map_err(|e| {
            log::error!("Failed to store boot info: {:?}", loggable(&e));
            Error::BootInfo
        })
    }
}

impl<NVM: NorFlash> BootInfo for RetainedBootInfo<NVM> {
    async fn lookup(&mut self, key: BootInfoKey, out: &mut [u8]) -> Result<usize, Error> {
        match self.fetch(key).await? {
            Some(record) => record.encode(out),
            None => Err(Error::BootInfo),
        }
    }
}

#[cfg(feature = "defmt")]
fn loggable<T: core::fmt::Debug>(value: &T) -> defmt::Debug2Format<'_, T> {
    defmt::Debug2Format(value)
}

#[cfg(not(feature = "defmt"))]
fn loggable<T: core::fmt::Debug>(value: &T) -> &T {
    value
}
