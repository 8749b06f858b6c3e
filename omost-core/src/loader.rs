use std::future::Future;

use anyhow::Result;
use hf_hub::api::tokio::Api;

use crate::llm::LlmVariant;
use crate::{DeviceMap, LlmLike};

pub trait Loader {
    type Model: LlmLike;

    fn load(
        variant: LlmVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
