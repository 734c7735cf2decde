use chrono::{DateTime, Utc};
use contratos_core::{Contract, ContractMessage, ContractStatus, User, WorldIdLink};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONTRACTS_CREATED_CHANNEL: &str = "contracts.created";
pub const CONTRACTS_DECIDED_CHANNEL: &str = "contracts.decided";
pub const CONTRACTS_ARBITRATION_CHANNEL: &str = "contracts.arbitration";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub user_count: i64,
    pub worldid_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    pub world_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTestUsersResponse {
    pub deleted: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContractRequest {
    pub kind: String,
    pub amount: Decimal,
    pub delivery_deadline: DateTime<Utc>,
    pub description: Option<String>,
    pub creator_world_id: String,
    pub counterpart_world_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractView {
    #[serde(flatten)]
    pub contract: Contract,
    pub creator_name: Option<String>,
    pub counterpart_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContractsResponse {
    pub contracts: Vec<ContractView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideContractRequest {
    pub approve: bool,
    pub counterpart_world_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub sender_world_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    pub messages: Vec<ContractMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofPayload {
    pub nullifier_hash: Option<String>,
    pub merkle_root: Option<String>,
    pub proof: Option<String>,
    pub verification_level: Option<String>,
    pub signal_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub payload: Option<ProofPayload>,
    pub action: Option<String>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub message: String,
    pub link: WorldIdLink,
    pub user: Option<User>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsLinkedRequest {
    pub nullifier_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsLinkedResponse {
    pub nullifier_hash: String,
    pub linked: bool,
    pub link: Option<WorldIdLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListLinksResponse {
    pub links: Vec<WorldIdLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractCreatedEvent {
    pub contract_id: Uuid,
    pub creator_world_id: String,
    pub counterpart_world_id: Option<String>,
    pub linking_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDecidedEvent {
    pub contract_id: Uuid,
    pub status: ContractStatus,
    pub decided_by_world_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationStartedEvent {
    pub contract_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[test]
    fn contract_view_flattens_into_one_object() {
        let view = ContractView {
            contract: Contract {
                id: Uuid::new_v4(),
                kind: "servicio".to_string(),
                amount: Decimal::new(150000, 2),
                fee: Decimal::new(1500, 2),
                delivery_deadline: Utc::now(),
                approval_deadline: Utc::now(),
                description: Some("diseño de logo".to_string()),
                creator_world_id: "0xcreator".to_string(),
                counterpart_world_id: None,
                status: ContractStatus::Pendiente,
                linking_code: "A3F9".to_string(),
                creator_approved: true,
                counterpart_approved: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            creator_name: Some("Ana".to_string()),
            counterpart_name: None,
        };

        let encoded = serde_json::to_value(&view).unwrap();
        assert_eq!(encoded["status"], "pendiente");
        assert_eq!(encoded["linking_code"], "A3F9");
        assert_eq!(encoded["creator_name"], "Ana");
        assert!(encoded.get("contract").is_none());
    }

    #[test]
    fn decide_request_accepts_a_bare_decision() {
        let decoded: DecideContractRequest =
            serde_json::from_str(r#"{"approve":true,"counterpart_world_id":null}"#).unwrap();
        assert!(decoded.approve);
        assert!(decoded.counterpart_world_id.is_none());
    }

    #[test]
    fn decided_event_round_trips() {
        let event = ContractDecidedEvent {
            contract_id: Uuid::new_v4(),
            status: ContractStatus::Aprobado,
            decided_by_world_id: Some("0xcounterpart".to_string()),
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: ContractDecidedEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.status, ContractStatus::Aprobado);
        assert_eq!(decoded.contract_id, event.contract_id);
    }
}
