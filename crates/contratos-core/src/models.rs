use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::ContractStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub world_id: String,
    pub name: Option<String>,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    pub kind: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub delivery_deadline: DateTime<Utc>,
    pub approval_deadline: DateTime<Utc>,
    pub description: Option<String>,
    pub creator_world_id: String,
    pub counterpart_world_id: Option<String>,
    pub status: ContractStatus,
    pub linking_code: String,
    pub creator_approved: bool,
    pub counterpart_approved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn is_party(&self, world_id: &str) -> bool {
        self.creator_world_id == world_id
            || self.counterpart_world_id.as_deref() == Some(world_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldIdLink {
    pub id: Uuid,
    pub nullifier_hash: String,
    pub action: String,
    pub signal: Option<String>,
    pub verification_level: Option<String>,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractMessage {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub sender_world_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_world_id: String,
    pub contract_id: Uuid,
    pub kind: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}
