//! Layout where every image starts at the beginning of its slot.

use crate::{
    AreaId,
    area::FlashMap,
    manager::Config,
    strategies::{StartOffset, Strategy},
};

pub struct Standard;

impl Strategy for Standard {
    async fn start_offset<M: FlashMap>(
        &self,
        _map: &mut M,
        _config: &Config,
        _id: AreaId,
    ) -> StartOffset {
        StartOffset::START
    }
}
