use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A visitor was exposed to a variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignActivation {
    pub env_id: String,
    pub visitor_id: String,
    pub customer_id: Option<String>,
    pub campaign_id: String,
    pub variation_id: String,
    /// When the activation happened, in epoch milliseconds.
    pub timestamp: i64,
}

/// Context attributes reported for a visitor, optionally on behalf of a partner integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorContext {
    pub env_id: String,
    pub visitor_id: String,
    pub customer_id: Option<String>,
    pub partner: Option<String>,
    pub context: Map<String, Value>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackingHit {
    CampaignActivation(CampaignActivation),
    VisitorContext(VisitorContext),
}

/// A hit as the collector expects it. `qt` is the time spent buffered.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t")]
pub enum WireHit {
    #[serde(rename = "CAMPAIGN")]
    Campaign {
        cid: String,
        vid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cuid: Option<String>,
        caid: String,
        vaid: String,
        qt: i64,
    },
    #[serde(rename = "SEGMENT")]
    Segment {
        cid: String,
        vid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cuid: Option<String>,
        s: Map<String, Value>,
        qt: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEnvelope {
    #[serde(rename = "t")]
    pub batch_type: &'static str,
    #[serde(rename = "ds")]
    pub data_source: &'static str,
    #[serde(rename = "h")]
    pub hits: Vec<WireHit>,
    #[serde(rename = "cv")]
    pub custom_variables: BTreeMap<&'static str, String>,
}

fn non_empty(id: Option<String>) -> Option<String> {
    id.filter(|id| !id.is_empty())
}

impl TrackingHit {
    pub fn timestamp(&self) -> i64 {
        match self {
            TrackingHit::CampaignActivation(hit) => hit.timestamp,
            TrackingHit::VisitorContext(hit) => hit.timestamp,
        }
    }

    /// Converts to the wire shape, with the queue time measured against `now_ms`.
    pub fn into_wire(self, now_ms: i64) -> WireHit {
        let qt = now_ms - self.timestamp();
        match self {
            TrackingHit::CampaignActivation(hit) => WireHit::Campaign {
                cid: hit.env_id,
                vid: hit.visitor_id,
                cuid: non_empty(hit.customer_id),
                caid: hit.campaign_id,
                vaid: hit.variation_id,
                qt,
            },
            TrackingHit::VisitorContext(hit) => {
                let s = match hit.partner.filter(|p| !p.is_empty()) {
                    Some(partner) => Map::from_iter([(partner, Value::Object(hit.context))]),
                    None => hit.context,
                };
                WireHit::Segment {
                    cid: hit.env_id,
                    vid: hit.visitor_id,
                    cuid: non_empty(hit.customer_id),
                    s,
                    qt,
                }
            }
        }
    }
}

impl BatchEnvelope {
    pub fn new(hits: Vec<WireHit>) -> Self {
        Self {
            batch_type: "BATCH",
            data_source: "APP",
            hits,
            custom_variables: BTreeMap::from([
                ("0", "runner, self-hosted".to_string()),
                ("1", format!("version, {}", env!("CARGO_PKG_VERSION"))),
                ("2", format!("rust-version, {}", env!("RUSTC_VERSION"))),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn test_campaign_wire_format() {
        let hit = TrackingHit::CampaignActivation(CampaignActivation {
            env_id: "env_id".to_string(),
            visitor_id: "visitor_id".to_string(),
            customer_id: None,
            campaign_id: "campaign_id".to_string(),
            variation_id: "variation_id".to_string(),
            timestamp: 1_000,
        });

        assert_json_eq!(
            serde_json::to_value(hit.into_wire(1_250)).unwrap(),
            json!({
                "t": "CAMPAIGN",
                "cid": "env_id",
                "vid": "visitor_id",
                "caid": "campaign_id",
                "vaid": "variation_id",
                "qt": 250
            })
        );
    }

    #[test]
    fn test_segment_wire_format_with_partner() {
        let context = Map::from_iter([("key".to_string(), json!("value"))]);
        let hit = TrackingHit::VisitorContext(VisitorContext {
            env_id: "env_id".to_string(),
            visitor_id: "visitor_id".to_string(),
            customer_id: Some("customer_id".to_string()),
            partner: Some("mixpanel".to_string()),
            context: context.clone(),
            timestamp: 1_000,
        });

        assert_json_eq!(
            serde_json::to_value(hit.into_wire(1_000)).unwrap(),
            json!({
                "t": "SEGMENT",
                "cid": "env_id",
                "vid": "visitor_id",
                "cuid": "customer_id",
                "s": {"mixpanel": {"key": "value"}},
                "qt": 0
            })
        );

        let plain = TrackingHit::VisitorContext(VisitorContext {
            env_id: "env_id".to_string(),
            visitor_id: "visitor_id".to_string(),
            customer_id: Some(String::new()),
            partner: None,
            context,
            timestamp: 1_000,
        });
        let wire = serde_json::to_value(plain.into_wire(1_000)).unwrap();
        assert_eq!(wire["s"], json!({"key": "value"}));
        assert!(wire.get("cuid").is_none());
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = serde_json::to_value(BatchEnvelope::new(vec![])).unwrap();
        assert_eq!(envelope["t"], "BATCH");
        assert_eq!(envelope["ds"], "APP");
        assert_eq!(envelope["h"], json!([]));
        assert_eq!(envelope["cv"]["0"], "runner, self-hosted");
        let version = envelope["cv"]["1"].as_str().unwrap();
        assert_eq!(version, format!("version, {}", env!("CARGO_PKG_VERSION")));
        let rust_version = envelope["cv"]["2"].as_str().unwrap();
        assert_eq!(
            rust_version,
            format!("rust-version, {}", env!("RUSTC_VERSION"))
        );
        assert_ne!(rust_version, "rust-version, ");
    }
}
