use anyhow::{Context, Result};
use chrono::Utc;
use contratos_core::{ContractStatus, Notification};
use contratos_platform::{
    ArbitrationStartedEvent, CONTRACTS_ARBITRATION_CHANNEL, CONTRACTS_CREATED_CHANNEL,
    CONTRACTS_DECIDED_CHANNEL, ContractCreatedEvent, ContractDecidedEvent, RedisBus,
    ServiceConfig, connect_database,
};
use futures_util::StreamExt;
use redis::Msg;
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

const KIND_CREATED: &str = "CREATED";
const KIND_LINKED: &str = "LINKED";
const KIND_DECIDED: &str = "DECIDED";
const KIND_ARBITRATION: &str = "ARBITRATION";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "contratos_notifier=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let mut pubsub = redis.client().get_async_pubsub().await?;
    pubsub.subscribe(CONTRACTS_CREATED_CHANNEL).await?;
    pubsub.subscribe(CONTRACTS_DECIDED_CHANNEL).await?;
    pubsub.subscribe(CONTRACTS_ARBITRATION_CHANNEL).await?;
    let mut messages = pubsub.on_message();

    info!("notifier subscribed to contract events");

    loop {
        let msg = messages
            .next()
            .await
            .context("contract event stream ended unexpectedly")?;
        if let Err(err) = handle_message(&pool, msg).await {
            error!("failed to process contract event: {err:#}");
        }
    }
}

async fn handle_message(pool: &PgPool, msg: Msg) -> Result<()> {
    let channel = msg.get_channel_name().to_string();
    let payload: String = msg.get_payload()?;

    match channel.as_str() {
        CONTRACTS_CREATED_CHANNEL => {
            let event: ContractCreatedEvent = serde_json::from_str(&payload)?;
            notify_created(pool, &event).await
        }
        CONTRACTS_DECIDED_CHANNEL => {
            let event: ContractDecidedEvent = serde_json::from_str(&payload)?;
            notify_decided(pool, &event).await
        }
        CONTRACTS_ARBITRATION_CHANNEL => {
            let event: ArbitrationStartedEvent = serde_json::from_str(&payload)?;
            notify_arbitration(pool, &event).await
        }
        other => {
            warn!("ignoring message on unexpected channel '{other}'");
            Ok(())
        }
    }
}

async fn notify_created(pool: &PgPool, event: &ContractCreatedEvent) -> Result<()> {
    insert_notification(
        pool,
        &event.creator_world_id,
        event.contract_id,
        KIND_CREATED,
        &format!(
            "Contrato creado. Comparte el código {} con tu contraparte.",
            event.linking_code
        ),
    )
    .await?;

    if let Some(counterpart) = event.counterpart_world_id.as_deref() {
        insert_notification(
            pool,
            counterpart,
            event.contract_id,
            KIND_LINKED,
            "Te han vinculado a un nuevo contrato.",
        )
        .await?;
    }

    info!(contract_id = %event.contract_id, "created notifications stored");
    Ok(())
}

async fn notify_decided(pool: &PgPool, event: &ContractDecidedEvent) -> Result<()> {
    let Some((creator, counterpart)) = fetch_parties(pool, event.contract_id).await? else {
        warn!(contract_id = %event.contract_id, "decided event for unknown contract");
        return Ok(());
    };

    let body = decision_body(event.status);
    for recipient in recipients(
        &creator,
        counterpart.as_deref(),
        event.decided_by_world_id.as_deref(),
    ) {
        insert_notification(pool, &recipient, event.contract_id, KIND_DECIDED, body).await?;
    }

    info!(contract_id = %event.contract_id, status = %event.status, "decision notifications stored");
    Ok(())
}

async fn notify_arbitration(pool: &PgPool, event: &ArbitrationStartedEvent) -> Result<()> {
    let Some((creator, counterpart)) = fetch_parties(pool, event.contract_id).await? else {
        warn!(contract_id = %event.contract_id, "arbitration event for unknown contract");
        return Ok(());
    };

    for recipient in recipients(&creator, counterpart.as_deref(), None) {
        insert_notification(
            pool,
            &recipient,
            event.contract_id,
            KIND_ARBITRATION,
            "El contrato entró en proceso de arbitraje.",
        )
        .await?;
    }

    info!(contract_id = %event.contract_id, "arbitration notifications stored");
    Ok(())
}

async fn fetch_parties(
    pool: &PgPool,
    contract_id: Uuid,
) -> Result<Option<(String, Option<String>)>> {
    let row = sqlx::query(
        "SELECT creator_world_id, counterpart_world_id FROM contracts WHERE id = $1",
    )
    .bind(contract_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some((
        row.try_get("creator_world_id")?,
        row.try_get("counterpart_world_id")?,
    )))
}

async fn insert_notification(
    pool: &PgPool,
    recipient_world_id: &str,
    contract_id: Uuid,
    kind: &str,
    body: &str,
) -> Result<()> {
    let notification = Notification {
        id: Uuid::new_v4(),
        recipient_world_id: recipient_world_id.to_string(),
        contract_id,
        kind: kind.to_string(),
        body: body.to_string(),
        created_at: Utc::now(),
        read_at: None,
    };

    sqlx::query(
        r#"
        INSERT INTO notifications (id, recipient_world_id, contract_id, kind, body, created_at, read_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(notification.id)
    .bind(&notification.recipient_world_id)
    .bind(notification.contract_id)
    .bind(&notification.kind)
    .bind(&notification.body)
    .bind(notification.created_at)
    .bind(notification.read_at)
    .execute(pool)
    .await?;

    Ok(())
}

fn recipients(creator: &str, counterpart: Option<&str>, actor: Option<&str>) -> Vec<String> {
    let mut out = Vec::with_capacity(2);
    if actor != Some(creator) {
        out.push(creator.to_string());
    }
    if let Some(counterpart) = counterpart {
        if counterpart != creator && actor != Some(counterpart) {
            out.push(counterpart.to_string());
        }
    }

    out
}

fn decision_body(status: ContractStatus) -> &'static str {
    match status {
        ContractStatus::Aprobado => "El contrato fue aprobado.",
        ContractStatus::Rechazado => "El contrato fue rechazado.",
        ContractStatus::Arbitraje => "El contrato entró en proceso de arbitraje.",
        ContractStatus::Pendiente => "El contrato está pendiente de aprobación.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_parties_hear_about_arbitration() {
        let out = recipients("0xcreator", Some("0xcounterpart"), None);
        assert_eq!(out, vec!["0xcreator", "0xcounterpart"]);
    }

    #[test]
    fn the_deciding_party_is_not_notified() {
        let out = recipients("0xcreator", Some("0xcounterpart"), Some("0xcounterpart"));
        assert_eq!(out, vec!["0xcreator"]);
    }

    #[test]
    fn unlinked_contracts_notify_the_creator_only() {
        let out = recipients("0xcreator", None, None);
        assert_eq!(out, vec!["0xcreator"]);
    }

    #[test]
    fn duplicate_parties_collapse() {
        let out = recipients("0xsame", Some("0xsame"), None);
        assert_eq!(out, vec!["0xsame"]);
    }

    #[test]
    fn decision_bodies_match_status() {
        assert!(decision_body(ContractStatus::Aprobado).contains("aprobado"));
        assert!(decision_body(ContractStatus::Rechazado).contains("rechazado"));
        assert!(decision_body(ContractStatus::Arbitraje).contains("arbitraje"));
    }
}
