mod kuaishou;
mod openrtb;

pub use kuaishou::KuaishouAdapter;
pub use openrtb::OpenRtbAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use adx_types::{BidRequest, BidResponse};

use crate::config::SspConfig;
use crate::error::{AdxError, Result};

/// Per-SSP wire codec: dialect bytes to canonical request, canonical
/// response back to dialect bytes.
pub trait SspAdapter: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<BidRequest>;

    fn encode(&self, response: &BidResponse) -> Result<Vec<u8>>;
}

/// Adapter lookup keyed by SSP id, built once from the enabled SSP
/// configs at startup.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SspAdapter>>,
    configs: HashMap<String, SspConfig>,
}

impl AdapterRegistry {
    pub fn new(ssps: &[SspConfig]) -> Self {
        let mut adapters = HashMap::new();
        let mut configs = HashMap::new();

        for cfg in ssps.iter().filter(|s| s.enabled) {
            adapters.insert(cfg.id.clone(), create_adapter(&cfg.protocol));
            configs.insert(cfg.id.clone(), cfg.clone());
        }

        Self { adapters, configs }
    }

    pub fn get(&self, ssp_id: &str) -> Result<(Arc<dyn SspAdapter>, SspConfig)> {
        let adapter = self
            .adapters
            .get(ssp_id)
            .ok_or_else(|| AdxError::NotConfigured(format!("no adapter for SSP '{ssp_id}'")))?;
        let config = self
            .configs
            .get(ssp_id)
            .ok_or_else(|| AdxError::NotConfigured(format!("no config for SSP '{ssp_id}'")))?;
        Ok((adapter.clone(), config.clone()))
    }

    pub fn count(&self) -> usize {
        self.adapters.len()
    }
}

fn create_adapter(protocol: &str) -> Arc<dyn SspAdapter> {
    match protocol {
        "kuaishou" => Arc::new(KuaishouAdapter),
        // Unknown protocols fall back to the canonical dialect.
        _ => Arc::new(OpenRtbAdapter),
    }
}

/// SSP id resolution precedence: `sspid` query param, `X-SSP-ID`
/// header, legacy `ssid` query param, then the path tag.
pub fn resolve_ssp_id(
    sspid_param: Option<&str>,
    header: Option<&str>,
    ssid_param: Option<&str>,
    path_tag: Option<&str>,
) -> Option<String> {
    [sspid_param, header, ssid_param, path_tag]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssp(id: &str, protocol: &str, enabled: bool) -> SspConfig {
        serde_yaml::from_str(&format!(
            "id: {id}\nprotocol: {protocol}\nenabled: {enabled}"
        ))
        .unwrap()
    }

    #[test]
    fn registry_serves_enabled_ssps_only() {
        let registry = AdapterRegistry::new(&[
            ssp("s1", "openrtb", true),
            ssp("s2", "kuaishou", true),
            ssp("s3", "openrtb", false),
        ]);

        assert_eq!(registry.count(), 2);
        assert!(registry.get("s1").is_ok());
        assert!(matches!(
            registry.get("s3"),
            Err(AdxError::NotConfigured(_))
        ));
    }

    #[test]
    fn unknown_protocol_falls_back_to_canonical() {
        let registry = AdapterRegistry::new(&[ssp("s1", "somebody-new", true)]);
        let (adapter, _) = registry.get("s1").unwrap();

        let resp = BidResponse::empty("r1");
        let bytes = adapter.encode(&resp).unwrap();
        assert_eq!(serde_json::from_slice::<BidResponse>(&bytes).unwrap(), resp);
    }

    #[test]
    fn ssp_id_resolution_precedence() {
        assert_eq!(
            resolve_ssp_id(Some("q"), Some("h"), Some("legacy"), Some("path")),
            Some("q".to_string())
        );
        assert_eq!(
            resolve_ssp_id(None, Some("h"), Some("legacy"), None),
            Some("h".to_string())
        );
        assert_eq!(
            resolve_ssp_id(Some(""), None, Some("legacy"), None),
            Some("legacy".to_string())
        );
        assert_eq!(
            resolve_ssp_id(None, None, None, Some("kuaishou")),
            Some("kuaishou".to_string())
        );
        assert_eq!(resolve_ssp_id(None, None, None, None), None);
    }
}
