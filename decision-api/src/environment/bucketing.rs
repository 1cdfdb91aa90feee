//! Wire shape of `bucketing.json` as served by the CDN. Only the fields the decision runtime
//! reads are declared; anything else in the payload is ignored.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::models::{Campaign, Environment, Modifications, Variation, VariationGroup};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BucketingResponse {
    pub panic: bool,
    pub campaigns: Vec<BucketingCampaign>,
    pub account_settings: AccountSettings,
    pub visitor_consolidation: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    #[serde(rename = "enabled1v1t")]
    pub enabled_1v1t: bool,
    #[serde(rename = "enabledXPC")]
    pub enabled_xpc: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketingCampaign {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "type", default)]
    pub campaign_type: String,
    #[serde(default)]
    pub bucket_ranges: Vec<BucketRange>,
    #[serde(default)]
    pub variation_groups: Vec<BucketingVariationGroup>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BucketRange {
    pub r: Vec<f64>,
}

#[derive(Debug, Deserialize)]
pub struct BucketingVariationGroup {
    pub id: String,
    #[serde(default)]
    pub targeting: Value,
    #[serde(default)]
    pub variations: Vec<BucketingVariation>,
}

#[derive(Debug, Deserialize)]
pub struct BucketingVariation {
    pub id: String,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub allocation: f64,
    #[serde(default)]
    pub modifications: BucketingModifications,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BucketingModifications {
    #[serde(rename = "type")]
    pub modification_type: String,
    pub value: Map<String, Value>,
}

impl BucketingResponse {
    pub fn into_environment(self, env_id: &str) -> Environment {
        Environment {
            id: env_id.to_string(),
            campaigns: self
                .campaigns
                .into_iter()
                .map(|c| Arc::new(c.into()))
                .collect(),
            is_panic: self.panic,
            single_assignment: self.account_settings.enabled_1v1t,
            use_reconciliation: self.account_settings.enabled_xpc || self.visitor_consolidation,
            cache_enabled: true,
        }
    }
}

impl From<BucketingCampaign> for Campaign {
    fn from(c: BucketingCampaign) -> Self {
        Campaign {
            id: c.id,
            slug: c.slug,
            campaign_type: c.campaign_type,
            bucket_ranges: c.bucket_ranges.into_iter().map(|r| r.r).collect(),
            variation_groups: c
                .variation_groups
                .into_iter()
                .map(|vg| VariationGroup {
                    id: vg.id,
                    targeting: vg.targeting,
                    variations: vg.variations.into_iter().map(Variation::from).collect(),
                })
                .collect(),
        }
    }
}

impl From<BucketingVariation> for Variation {
    fn from(v: BucketingVariation) -> Self {
        Variation {
            id: v.id,
            reference: v.reference,
            allocation: v.allocation,
            modifications: Modifications {
                modification_type: v.modifications.modification_type,
                value: v.modifications.value,
            },
        }
    }
}
