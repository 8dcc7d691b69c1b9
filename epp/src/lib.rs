pub mod conf;
pub mod datalayer;
pub mod logging;

use std::sync::Arc;

pub use conf::EppConfig;
use datalayer::Datalayer;
use datalayer::extractor::{AdapterLocator, AdapterStore, LoraAdapterExtractor};
use datalayer::source::K8sNotificationSource;
use epp_framework::DataLayerError;
use epp_framework::datalayer::Gvk;

pub const LORA_TRACKER_NAME: &str = "lora-tracker";

/// Data layer wired from configuration, plus the derived store the
/// scheduler reads.
pub struct Wired {
    pub datalayer: Datalayer,
    pub adapters: AdapterStore,
    pub source_name: String,
}

pub fn source_name_for(gvk: &Gvk) -> String {
    format!("{}-notifications", gvk.kind.to_ascii_lowercase())
}

/// Registers the notification source for the configured kind and the LoRA
/// adapter extractor on it. Any error here should abort startup.
pub fn wire(conf: &EppConfig) -> Result<Wired, DataLayerError> {
    let datalayer = Datalayer::new(conf.watch_buffer, conf.namespace_filter());
    let source_name = source_name_for(&conf.watch_gvk);
    let source = Arc::new(K8sNotificationSource::for_kind(
        source_name.clone(),
        conf.watch_gvk.clone(),
    ));
    datalayer.registry().register(source)?;

    let adapters = AdapterStore::default();
    let extractor = Arc::new(LoraAdapterExtractor::new(
        LORA_TRACKER_NAME,
        AdapterLocator::from_annotation(&conf.lora_annotation),
        adapters.clone(),
    ));
    datalayer.registry().add_extractor(&source_name, extractor)?;

    Ok(Wired {
        datalayer,
        adapters,
        source_name,
    })
}
