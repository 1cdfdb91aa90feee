use std::collections::HashMap;

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Map, Value};

use crate::assignments::VisitorCache;
use crate::environment::bucketing::BucketingResponse;
use crate::environment::Environment;
use crate::hits::{CampaignActivation, VisitorContext};

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// A `bucketing.json` payload with one campaign `cid`, variation group `vgid` and variation `vid`.
pub fn sample_bucketing_json(panic: bool) -> Value {
    json!({
        "panic": panic,
        "campaigns": [{
            "id": "cid",
            "slug": "slug",
            "type": "ab",
            "bucketRanges": [{"r": [0.0, 100.0]}],
            "variationGroups": [{
                "id": "vgid",
                "targeting": {
                    "targetingGroups": [{
                        "targetings": [{"operator": "EQUALS", "key": "fs_all_users", "value": ""}]
                    }]
                },
                "variations": [{
                    "id": "vid",
                    "reference": false,
                    "allocation": 100,
                    "modifications": {
                        "type": "FLAG",
                        "value": {"flag": true}
                    }
                }]
            }]
        }],
        "accountSettings": {
            "enabledXPC": true,
            "enabled1v1t": true
        }
    })
}

pub fn sample_environment(env_id: &str) -> Environment {
    let response: BucketingResponse = match serde_json::from_value(sample_bucketing_json(false)) {
        Ok(response) => response,
        Err(e) => panic!("sample bucketing payload does not parse: {e}"),
    };
    response.into_environment(env_id)
}

pub fn sample_assignments(entries: &[(&str, &str, bool)]) -> HashMap<String, VisitorCache> {
    entries
        .iter()
        .map(|(group, variation, activated)| {
            (group.to_string(), VisitorCache::new(*variation, *activated))
        })
        .collect()
}

pub fn sample_activation(visitor_id: &str) -> CampaignActivation {
    CampaignActivation {
        env_id: "env_id".to_string(),
        visitor_id: visitor_id.to_string(),
        customer_id: Some("customer_id".to_string()),
        campaign_id: "campaign_id".to_string(),
        variation_id: "variation_id".to_string(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

pub fn sample_context(visitor_id: &str) -> VisitorContext {
    let mut context = Map::new();
    context.insert("key".to_string(), json!("value"));

    VisitorContext {
        env_id: "env_id".to_string(),
        visitor_id: visitor_id.to_string(),
        customer_id: None,
        partner: None,
        context,
        timestamp: Utc::now().timestamp_millis(),
    }
}
