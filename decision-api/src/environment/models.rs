use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One published configuration of an environment.
///
/// Cloning is cheap: campaigns are shared, only the list holding them is copied. A caller that
/// edits its list never affects the loader's snapshot or other callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub campaigns: Vec<Arc<Campaign>>,
    pub is_panic: bool,
    /// "1 visitor 1 test": a visitor is exposed to a single campaign at a time.
    pub single_assignment: bool,
    pub use_reconciliation: bool,
    pub cache_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub slug: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub bucket_ranges: Vec<Vec<f64>>,
    pub variation_groups: Vec<VariationGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationGroup {
    pub id: String,
    // Evaluated by the decision engine, never inspected here
    pub targeting: Value,
    pub variations: Vec<Variation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub id: String,
    pub reference: bool,
    pub allocation: f64,
    pub modifications: Modifications,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifications {
    #[serde(rename = "type")]
    pub modification_type: String,
    pub value: Map<String, Value>,
}

impl Campaign {
    pub fn variation_group(&self, id: &str) -> Option<&VariationGroup> {
        self.variation_groups.iter().find(|vg| vg.id == id)
    }
}

impl Environment {
    pub fn campaign(&self, id: &str) -> Option<&Arc<Campaign>> {
        self.campaigns.iter().find(|c| c.id == id)
    }
}
