use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const MAX_VERIFICATIONS_REACHED: &str = "max_verifications_reached";

#[derive(Debug, Clone, Serialize)]
pub struct ProofRequest {
    pub nullifier_hash: String,
    pub merkle_root: String,
    pub proof: String,
    pub verification_level: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_hash: Option<String>,
}

// The Cloud API answers 200 with `success: true`, or an error body carrying
// `code` and `detail`. Both shapes decode into this struct.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProofVerdict {
    #[serde(default)]
    pub success: bool,
    pub code: Option<String>,
    pub detail: Option<String>,
}

impl ProofVerdict {
    pub fn max_verifications_reached(&self) -> bool {
        self.code.as_deref() == Some(MAX_VERIFICATIONS_REACHED)
    }
}

#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn verify(&self, proof: &ProofRequest) -> anyhow::Result<ProofVerdict>;
}

pub struct WorldcoinClient {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
}

impl WorldcoinClient {
    pub fn new(base_url: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            app_id: app_id.into(),
        }
    }
}

#[async_trait]
impl ProofVerifier for WorldcoinClient {
    async fn verify(&self, proof: &ProofRequest) -> anyhow::Result<ProofVerdict> {
        let url = format!("{}/api/v2/verify/{}", self.base_url, self.app_id);
        debug!(url = %url, nullifier_hash = %proof.nullifier_hash, "submitting proof to Worldcoin Cloud API");

        let response = self.client.post(&url).json(proof).send().await?;
        let verdict: ProofVerdict = response.json().await?;

        debug!(success = verdict.success, code = ?verdict.code, "Worldcoin Cloud API verdict");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_proof_decodes() {
        let body = r#"{"success":true,"action":"login","nullifier_hash":"0x1f2a","created_at":"2025-05-01T12:00:00Z"}"#;
        let verdict: ProofVerdict = serde_json::from_str(body).unwrap();
        assert!(verdict.success);
        assert!(verdict.code.is_none());
        assert!(!verdict.max_verifications_reached());
    }

    #[test]
    fn rejection_body_decodes_without_success_field() {
        let body = r#"{"code":"max_verifications_reached","detail":"This person has already verified for this action.","attribute":null}"#;
        let verdict: ProofVerdict = serde_json::from_str(body).unwrap();
        assert!(!verdict.success);
        assert!(verdict.max_verifications_reached());
        assert!(verdict.detail.unwrap().contains("already verified"));
    }

    #[test]
    fn invalid_proof_rejection_is_not_a_replay() {
        let body = r#"{"code":"invalid_proof","detail":"The provided proof is invalid."}"#;
        let verdict: ProofVerdict = serde_json::from_str(body).unwrap();
        assert!(!verdict.success);
        assert!(!verdict.max_verifications_reached());
    }

    #[test]
    fn request_omits_absent_signal_hash() {
        let proof = ProofRequest {
            nullifier_hash: "0x1f2a".to_string(),
            merkle_root: "0x9b3c".to_string(),
            proof: "0xdead".to_string(),
            verification_level: "orb".to_string(),
            action: "login".to_string(),
            signal_hash: None,
        };
        let encoded = serde_json::to_string(&proof).unwrap();
        assert!(!encoded.contains("signal_hash"));

        let with_signal = ProofRequest {
            signal_hash: Some("0x5e11".to_string()),
            ..proof
        };
        let encoded = serde_json::to_string(&with_signal).unwrap();
        assert!(encoded.contains("\"signal_hash\":\"0x5e11\""));
    }
}
