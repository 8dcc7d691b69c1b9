use envconfig::Envconfig;
use epp_framework::datalayer::Gvk;

use crate::datalayer::extractor::DEFAULT_ADAPTER_ANNOTATION;

#[derive(Envconfig, Clone, Debug)]
pub struct EppConfig {
    /// Empty means every namespace.
    #[envconfig(from = "EPP_POOL_NAMESPACE", default = "default")]
    pub pool_namespace: String,

    #[envconfig(from = "EPP_WATCH_GVK", default = "v1/Pod")]
    pub watch_gvk: Gvk,

    #[envconfig(from = "EPP_WATCH_BUFFER", default = "1024")]
    pub watch_buffer: usize,

    #[envconfig(
        from = "EPP_LORA_ANNOTATION",
        default = "inference.networking.x-k8s.io/lora-adapters"
    )]
    pub lora_annotation: String,

    #[envconfig(from = "EPP_WATCH_STDIN", default = "true")]
    pub watch_stdin: bool,
}

impl Default for EppConfig {
    fn default() -> Self {
        Self {
            pool_namespace: "default".into(),
            watch_gvk: Gvk::new("", "v1", "Pod"),
            watch_buffer: 1024,
            lora_annotation: DEFAULT_ADAPTER_ANNOTATION.into(),
            watch_stdin: true,
        }
    }
}

impl EppConfig {
    pub fn namespace_filter(&self) -> Option<String> {
        let ns = self.pool_namespace.trim();
        if ns.is_empty() {
            None
        } else {
            Some(ns.to_string())
        }
    }
}
