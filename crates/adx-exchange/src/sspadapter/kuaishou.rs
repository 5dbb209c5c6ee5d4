use serde::{Deserialize, Serialize};

use adx_types::{Bid, BidRequest, BidResponse, Device, Impression, UserInfo};

use crate::error::{AdxError, Result};
use crate::sspadapter::SspAdapter;

/// Kuaishou dialect codec. The wire schema uses its own field names,
/// numeric OS codes and a status-flagged response envelope.
pub struct KuaishouAdapter;

#[derive(Debug, Deserialize)]
struct KsBidRequest {
    request_id: String,
    #[serde(default)]
    imps: Vec<KsImp>,
    #[serde(default)]
    device: Option<KsDevice>,
    #[serde(default)]
    user: Option<KsUser>,
}

#[derive(Debug, Deserialize)]
struct KsImp {
    imp_id: String,
    #[serde(default)]
    pos_id: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    styles: Vec<String>,
    #[serde(default)]
    floor_price: i64,
}

#[derive(Debug, Default, Deserialize)]
struct KsDevice {
    #[serde(default)]
    os_type: u32,
    #[serde(default)]
    os_version: String,
    #[serde(default)]
    screen_width: u32,
    #[serde(default)]
    screen_height: u32,
    #[serde(default)]
    ip: String,
    #[serde(default)]
    user_agent: String,
}

#[derive(Debug, Default, Deserialize)]
struct KsUser {
    #[serde(default)]
    region: String,
    #[serde(default)]
    age: String,
    #[serde(default)]
    gender: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KsBidResponse {
    request_id: String,
    /// 0 = filled, 1 = no bid.
    status: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ads: Vec<KsAd>,
}

#[derive(Debug, Serialize, Deserialize)]
struct KsAd {
    imp_id: String,
    dsp_id: String,
    price_micros: i64,
    #[serde(default)]
    creative_id: String,
    #[serde(default)]
    html_snippet: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

const OS_ANDROID: u32 = 1;
const OS_IOS: u32 = 2;

fn map_os(os_type: u32) -> &'static str {
    match os_type {
        OS_ANDROID => "android",
        OS_IOS => "ios",
        _ => "unknown",
    }
}

impl SspAdapter for KuaishouAdapter {
    fn decode(&self, data: &[u8]) -> Result<BidRequest> {
        let ks: KsBidRequest = serde_json::from_slice(data)
            .map_err(|e| AdxError::BadRequest(format!("malformed Kuaishou bid request: {e}")))?;

        if ks.imps.is_empty() {
            return Err(AdxError::BadRequest(
                "no impression in Kuaishou bid request".to_string(),
            ));
        }

        let device = ks.device.unwrap_or_default();
        let user = ks.user.unwrap_or_default();

        let mut request = BidRequest::new(
            ks.request_id,
            ks.imps
                .into_iter()
                .map(|imp| Impression {
                    id: imp.imp_id,
                    tag_id: imp.pos_id,
                    width: imp.width,
                    height: imp.height,
                    formats: imp.styles,
                    bid_floor_micros: imp.floor_price,
                })
                .collect(),
        );

        request.device = Device {
            os: map_os(device.os_type).to_string(),
            os_version: device.os_version,
            screen_w: device.screen_width,
            screen_h: device.screen_height,
            ip: device.ip,
            ua: device.user_agent,
        };
        request.user = UserInfo {
            geo: user.region,
            age_bucket: user.age,
            gender: user.gender,
        };

        Ok(request)
    }

    fn encode(&self, response: &BidResponse) -> Result<Vec<u8>> {
        let ks = KsBidResponse {
            request_id: response.request_id.clone(),
            status: if response.bids.is_empty() { 1 } else { 0 },
            ads: response
                .bids
                .iter()
                .map(|bid| KsAd {
                    imp_id: bid.imp_id.clone(),
                    dsp_id: bid.bidder_id.clone(),
                    price_micros: bid.cpm_micros,
                    creative_id: bid.creative_id.clone(),
                    html_snippet: bid.adm.clone(),
                    width: bid.width,
                    height: bid.height,
                })
                .collect(),
        };

        Ok(serde_json::to_vec(&ks)?)
    }
}

impl KuaishouAdapter {
    /// Inverse of `encode` over the lossless subset (everything except
    /// bid categories, which the dialect cannot carry).
    #[cfg(test)]
    fn decode_response(&self, data: &[u8]) -> Result<BidResponse> {
        let ks: KsBidResponse = serde_json::from_slice(data)?;
        Ok(BidResponse {
            request_id: ks.request_id,
            bids: ks
                .ads
                .into_iter()
                .map(|ad| Bid {
                    bidder_id: ad.dsp_id,
                    imp_id: ad.imp_id,
                    cpm_micros: ad.price_micros,
                    adm: ad.html_snippet,
                    creative_id: ad.creative_id,
                    width: ad.width,
                    height: ad.height,
                    categories: Vec::new(),
                })
                .collect(),
        })
    }
}
