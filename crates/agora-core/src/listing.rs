use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::MarketError;
use crate::money::Credits;
use crate::types::{AgentId, ListingId, Timestamp};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PriceModel {
    PerCall,
    PerUnit,
    PerHour,
    Flat,
}

impl FromStr for PriceModel {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_call" => Ok(PriceModel::PerCall),
            "per_unit" => Ok(PriceModel::PerUnit),
            "per_hour" => Ok(PriceModel::PerHour),
            "flat" => Ok(PriceModel::Flat),
            other => Err(MarketError::Validation(format!("unknown price model: {other}"))),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    Paused,
    Archived,
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListingStatus::Active => "active",
            ListingStatus::Paused => "paused",
            ListingStatus::Archived => "archived",
        })
    }
}

/// A seller's offer of a named skill at a price model.
///
/// Unique per (seller, skill, status) so a seller cannot carry two active
/// listings for the same skill.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub seller: AgentId,
    pub skill_id: String,
    pub description: Option<String>,
    pub price_model: PriceModel,
    pub base_price: Credits,
    pub currency: String,
    pub sla: Option<Value>,
    pub status: ListingStatus,
    pub created_at: Timestamp,
}
