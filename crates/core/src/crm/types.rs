use crate::domain::deal::RawDeal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEAL_PROPERTIES: [&str; 5] = [
    "dealname",
    "amount",
    "dealstage",
    "closedate",
    "hs_lastmodifieddate",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealsPage {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

impl DealsPage {
    pub fn next_after(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paging {
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextPage {
    pub after: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSpotDeal {
    pub id: String,
    #[serde(default)]
    pub properties: DealProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealProperties {
    pub dealname: Option<String>,
    pub dealstage: Option<String>,
    pub amount: Option<Value>,
    pub hs_lastmodifieddate: Option<String>,
}

impl HubSpotDeal {
    pub fn into_raw_deal(self) -> RawDeal {
        let props = self.properties;
        RawDeal {
            id: self.id,
            name: non_blank(props.dealname),
            stage: non_blank(props.dealstage),
            amount: props.amount.as_ref().and_then(parse_amount),
            last_modified: props
                .hs_lastmodifieddate
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
        }
    }
}

// HubSpot sends amounts as strings ("1000", "2500.50") and an empty string when unset.
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
