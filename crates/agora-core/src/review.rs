use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentId, JobId, Timestamp};

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRole {
    ClientReviewingSeller,
    SellerReviewingClient,
}

/// One review per (job, reviewer). Allowed only on jobs in
/// {completed, failed, resolved}; rating bounded to [1, 5].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub job_id: JobId,
    pub reviewer: AgentId,
    pub reviewee: AgentId,
    pub role: ReviewRole,
    pub rating: u8,
    pub tags: Vec<String>,
    pub comment: Option<String>,
    pub created_at: Timestamp,
}
