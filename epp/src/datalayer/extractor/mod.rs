pub mod lora;

pub use lora::{
    AdapterLocator, AdapterStore, DEFAULT_ADAPTER_ANNOTATION,
    LORA_EXTRACTOR_TYPE, LoraAdapterExtractor,
};
