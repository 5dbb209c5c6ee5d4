use adx_types::{BidRequest, BidResponse};

use crate::error::{AdxError, Result};
use crate::sspadapter::SspAdapter;

/// Canonical JSON dialect: the wire format is the canonical model
/// itself, so both directions are lossless.
pub struct OpenRtbAdapter;

impl SspAdapter for OpenRtbAdapter {
    fn decode(&self, data: &[u8]) -> Result<BidRequest> {
        serde_json::from_slice(data)
            .map_err(|e| AdxError::BadRequest(format!("malformed bid request: {e}")))
    }

    fn encode(&self, response: &BidResponse) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adx_types::{Bid, Impression};

    #[test]
    fn decode_rejects_malformed_body() {
        let err = OpenRtbAdapter.decode(b"{oops").unwrap_err();
        assert!(matches!(err, AdxError::BadRequest(_)));
    }

    #[test]
    fn response_roundtrip_is_lossless() {
        let resp = BidResponse {
            request_id: "r1".to_string(),
            bids: vec![Bid {
                bidder_id: "b2".to_string(),
                imp_id: "1".to_string(),
                cpm_micros: 700_000,
                adm: "<ad/>".to_string(),
                creative_id: "cr-9".to_string(),
                width: 320,
                height: 50,
                categories: vec!["news".to_string()],
            }],
        };

        let bytes = OpenRtbAdapter.encode(&resp).unwrap();
        let back: BidResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn request_decode_matches_canonical_json() {
        let req = BidRequest::new("r1", vec![Impression::banner("1", 320, 50)]);
        let bytes = serde_json::to_vec(&req).unwrap();
        assert_eq!(OpenRtbAdapter.decode(&bytes).unwrap(), req);
    }
}
