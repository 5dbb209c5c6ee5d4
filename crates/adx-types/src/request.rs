use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Field -> values map consumed by targeting retrieval.
/// Filled by the SSP adapter and the feature-completion stage.
pub type Assignments = HashMap<String, Vec<String>>;

/// Canonical bid request. Immutable once it enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    pub id: String,
    pub imp: Vec<Impression>,
    #[serde(default)]
    pub device: Device,
    #[serde(default)]
    pub user: UserInfo,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub assignments: Assignments,
}

/// One advertisement slot to be filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impression {
    pub id: String,
    #[serde(default)]
    pub tag_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub formats: Vec<String>,
    #[serde(default)]
    pub bid_floor_micros: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub screen_w: u32,
    #[serde(default)]
    pub screen_h: u32,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub ua: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Coarse geo bucket, e.g. "cn-sh" or "us-ca".
    #[serde(default)]
    pub geo: String,
    #[serde(default)]
    pub age_bucket: String,
    #[serde(default)]
    pub gender: String,
}

impl BidRequest {
    pub fn new(id: impl Into<String>, imp: Vec<Impression>) -> Self {
        Self {
            id: id.into(),
            imp,
            device: Device::default(),
            user: UserInfo::default(),
            assignments: Assignments::new(),
        }
    }
}

impl Impression {
    pub fn banner(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            tag_id: String::new(),
            width,
            height,
            formats: vec!["banner".to_string()],
            bid_floor_micros: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_json() {
        let mut req = BidRequest::new("r1", vec![Impression::banner("1", 320, 50)]);
        req.device.os = "ios".to_string();
        req.assignments
            .insert("USER_OS".to_string(), vec!["ios".to_string()]);

        let bytes = serde_json::to_vec(&req).unwrap();
        let back: BidRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn missing_optional_sections_default() {
        let req: BidRequest =
            serde_json::from_str(r#"{"id":"r2","imp":[{"id":"1"}]}"#).unwrap();
        assert_eq!(req.device.os, "");
        assert!(req.assignments.is_empty());
        assert_eq!(req.imp[0].width, 0);
    }
}
