use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
};
use chrono::{Duration, Utc};
use contratos_core::{
    APPROVAL_WINDOW_HOURS, Contract, ContractMessage, ContractStatus, User, WorldIdLink,
    is_valid_linking_code, random_linking_code, service_fee,
};
use contratos_platform::{
    ArbitrationStartedEvent, AuthRequest, CONTRACTS_ARBITRATION_CHANNEL,
    CONTRACTS_CREATED_CHANNEL, CONTRACTS_DECIDED_CHANNEL, ContractCreatedEvent,
    ContractDecidedEvent, ContractView, CreateContractRequest, DecideContractRequest,
    DeleteTestUsersResponse, HealthResponse, IsLinkedRequest, IsLinkedResponse,
    ListContractsResponse, ListLinksResponse, ListMessagesResponse, ListUsersResponse,
    PostMessageRequest, ProofRequest, ProofVerifier, RedisBus, ServiceConfig,
    UpdateStatusRequest, VerifyRequest, VerifyResponse, WorldcoinClient, connect_database,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{error, info};
use uuid::Uuid;

const MAX_LINKING_CODE_ATTEMPTS: usize = 32;
const FALLBACK_APP_ID: &str = "default-app-id";

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    redis: RedisBus,
    verifier: Arc<dyn ProofVerifier>,
    production: bool,
    worldid_configured: bool,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "contratos_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let redis = RedisBus::connect(&config.redis_url)?;

    let worldid_configured = config.world_app_id.is_some();
    let app_id = config
        .world_app_id
        .clone()
        .unwrap_or_else(|| FALLBACK_APP_ID.to_string());
    let verifier: Arc<dyn ProofVerifier> =
        Arc::new(WorldcoinClient::new(&config.worldid_api_url, app_id));

    let state = AppState {
        pool,
        redis,
        verifier,
        production: config.is_production(),
        worldid_configured,
    };
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/health", get(health))
        .route("/api/users", get(list_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/test-users", delete(delete_test_users))
        .route("/api/auth", post(auth_user))
        .route("/api/user", post(create_user))
        .route("/api/contracts", post(create_contract))
        .route("/api/contracts/code/{code}", get(get_contract_by_code))
        .route("/api/contracts/user/{world_id}", get(list_user_contracts))
        .route("/api/contracts/{id}", get(get_contract))
        .route("/api/contracts/{id}/approve", post(decide_contract))
        .route(
            "/api/contracts/{id}/start-arbitration",
            post(start_arbitration),
        )
        .route("/api/contracts/{id}/status", patch(update_contract_status))
        .route(
            "/api/contracts/{id}/messages",
            get(list_messages).post(post_message),
        )
        .route("/api/verify", post(verify_proof))
        .route("/api/is-linked", post(is_linked))
        .route("/api/worldid-links", get(list_links))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, String)> {
    let user_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(&state.pool)
        .await
        .map_err(internal_error)?;

    let worldid_status = if state.worldid_configured {
        "configured"
    } else {
        "not_configured"
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        user_count,
        worldid_status: worldid_status.to_string(),
    }))
}

async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<ListUsersResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT id, world_id, name, is_verified, created_at, updated_at
        FROM users
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(user_from_row(&row).map_err(internal_error)?);
    }

    Ok(Json(ListUsersResponse { users }))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT id, world_id, name, is_verified, created_at, updated_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "user not found".to_string()));
    };

    Ok(Json(user_from_row(&row).map_err(internal_error)?))
}

async fn delete_test_users(
    State(state): State<AppState>,
) -> Result<Json<DeleteTestUsersResponse>, (StatusCode, String)> {
    if state.production {
        return Err((
            StatusCode::FORBIDDEN,
            "test data cleanup is not allowed in production".to_string(),
        ));
    }

    let result = sqlx::query("DELETE FROM users WHERE world_id LIKE 'test_%'")
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;

    Ok(Json(DeleteTestUsersResponse {
        deleted: result.rows_affected() as i64,
    }))
}

async fn auth_user(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<Json<User>, (StatusCode, String)> {
    let world_id = payload.world_id.trim();
    if world_id.is_empty() {
        return Err(invalid_request(anyhow::anyhow!("world_id is required")));
    }

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_display_name(world_id));
    let now = Utc::now();

    // Existing rows come back untouched; only brand new identities get the
    // provided name and the verified flag.
    let row = sqlx::query(
        r#"
        INSERT INTO users (id, world_id, name, is_verified, created_at, updated_at)
        VALUES ($1, $2, $3, TRUE, $4, $4)
        ON CONFLICT (world_id) DO UPDATE SET world_id = EXCLUDED.world_id
        RETURNING id, world_id, name, is_verified, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(world_id)
    .bind(&name)
    .bind(now)
    .fetch_one(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(user_from_row(&row).map_err(internal_error)?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<AuthRequest>,
) -> Result<(StatusCode, Json<User>), (StatusCode, String)> {
    let world_id = payload.world_id.trim();
    if world_id.is_empty() {
        return Err(invalid_request(anyhow::anyhow!("world_id is required")));
    }

    let existing = sqlx::query(
        r#"
        SELECT id, world_id, name, is_verified, created_at, updated_at
        FROM users
        WHERE world_id = $1
        "#,
    )
    .bind(world_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    if let Some(row) = existing {
        return Ok((StatusCode::OK, Json(user_from_row(&row).map_err(internal_error)?)));
    }

    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_display_name(world_id));
    let now = Utc::now();

    let row = sqlx::query(
        r#"
        INSERT INTO users (id, world_id, name, is_verified, created_at, updated_at)
        VALUES ($1, $2, $3, TRUE, $4, $4)
        RETURNING id, world_id, name, is_verified, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(world_id)
    .bind(&name)
    .bind(now)
    .fetch_one(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(user_from_row(&row).map_err(internal_error)?),
    ))
}

async fn create_contract(
    State(state): State<AppState>,
    Json(payload): Json<CreateContractRequest>,
) -> Result<(StatusCode, Json<ContractView>), (StatusCode, String)> {
    validate_create_contract(&payload).map_err(invalid_request)?;

    let creator_world_id = payload.creator_world_id.trim().to_string();
    let counterpart_world_id = payload
        .counterpart_world_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let description = payload
        .description
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let fee = service_fee(payload.amount);
    let now = Utc::now();
    let approval_deadline = now + Duration::hours(APPROVAL_WINDOW_HOURS);
    let linking_code = allocate_linking_code(&state.pool).await?;

    let contract_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO contracts (
            id, kind, amount, fee, delivery_deadline, approval_deadline, description,
            creator_world_id, counterpart_world_id, status, linking_code,
            creator_approved, counterpart_approved, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE, FALSE, $12, $12)
        "#,
    )
    .bind(contract_id)
    .bind(payload.kind.trim())
    .bind(payload.amount)
    .bind(fee)
    .bind(payload.delivery_deadline)
    .bind(approval_deadline)
    .bind(description.as_deref())
    .bind(&creator_world_id)
    .bind(counterpart_world_id.as_deref())
    .bind(ContractStatus::Pendiente.as_str())
    .bind(&linking_code)
    .bind(now)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    publish_event(
        &state,
        CONTRACTS_CREATED_CHANNEL,
        &ContractCreatedEvent {
            contract_id,
            creator_world_id,
            counterpart_world_id,
            linking_code,
        },
    )
    .await;

    let view = require_contract_view(&state.pool, contract_id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContractView>, (StatusCode, String)> {
    let view = require_contract_view(&state.pool, id).await?;
    Ok(Json(view))
}

async fn get_contract_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<ContractView>, (StatusCode, String)> {
    let code = normalize_linking_code(&code).map_err(invalid_request)?;

    let row = sqlx::query(&contract_view_query("WHERE c.linking_code = $1"))
        .bind(&code)
        .fetch_optional(&state.pool)
        .await
        .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "unknown linking code".to_string()));
    };

    Ok(Json(contract_view_from_row(&row).map_err(internal_error)?))
}

async fn list_user_contracts(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
) -> Result<Json<ListContractsResponse>, (StatusCode, String)> {
    let rows = sqlx::query(&contract_view_query(
        "WHERE c.creator_world_id = $1 OR c.counterpart_world_id = $1 ORDER BY c.created_at DESC",
    ))
    .bind(world_id.trim())
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut contracts = Vec::with_capacity(rows.len());
    for row in rows {
        contracts.push(contract_view_from_row(&row).map_err(internal_error)?);
    }

    Ok(Json(ListContractsResponse { contracts }))
}

async fn decide_contract(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecideContractRequest>,
) -> Result<Json<ContractView>, (StatusCode, String)> {
    let target = decision_status(payload.approve);

    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let row = sqlx::query(
        r#"
        SELECT status, approval_deadline, creator_world_id, counterpart_world_id,
               counterpart_approved
        FROM contracts
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "contract not found".to_string()));
    };

    let current = parse_status_column(&row).map_err(internal_error)?;
    let approval_deadline: chrono::DateTime<Utc> =
        row.try_get("approval_deadline").map_err(internal_error)?;
    let creator_world_id: String = row.try_get("creator_world_id").map_err(internal_error)?;
    let linked_counterpart: Option<String> =
        row.try_get("counterpart_world_id").map_err(internal_error)?;
    let counterpart_approved: bool =
        row.try_get("counterpart_approved").map_err(internal_error)?;

    let requested_counterpart = payload
        .counterpart_world_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let counterpart = match (linked_counterpart.as_deref(), requested_counterpart) {
        (Some(linked), Some(requested)) if linked != requested => {
            return Err((
                StatusCode::FORBIDDEN,
                "contract is already linked to another counterpart".to_string(),
            ));
        }
        (Some(linked), _) => Some(linked.to_string()),
        (None, Some(requested)) => {
            if requested == creator_world_id {
                return Err(invalid_request(anyhow::anyhow!(
                    "the creator cannot act as the counterpart"
                )));
            }
            Some(requested.to_string())
        }
        (None, None) => None,
    };

    if current == target {
        drop(tx);
        let view = require_contract_view(&state.pool, id).await?;
        return Ok(Json(view));
    }

    current
        .transition_to(target)
        .map_err(|err| (StatusCode::CONFLICT, err.to_string()))?;

    if current == ContractStatus::Pendiente && Utc::now() > approval_deadline {
        return Err((
            StatusCode::CONFLICT,
            "the approval window for this contract has expired".to_string(),
        ));
    }

    let counterpart_approved = if current == ContractStatus::Pendiente {
        payload.approve
    } else {
        counterpart_approved
    };

    sqlx::query(
        r#"
        UPDATE contracts
        SET status = $2, counterpart_world_id = $3, counterpart_approved = $4, updated_at = $5
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(target.as_str())
    .bind(counterpart.as_deref())
    .bind(counterpart_approved)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await
    .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    publish_event(
        &state,
        CONTRACTS_DECIDED_CHANNEL,
        &ContractDecidedEvent {
            contract_id: id,
            status: target,
            decided_by_world_id: counterpart,
        },
    )
    .await;

    let view = require_contract_view(&state.pool, id).await?;
    Ok(Json(view))
}

async fn start_arbitration(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContractView>, (StatusCode, String)> {
    let (view, changed) = set_contract_status(&state, id, ContractStatus::Arbitraje).await?;

    if changed {
        publish_event(
            &state,
            CONTRACTS_ARBITRATION_CHANNEL,
            &ArbitrationStartedEvent { contract_id: id },
        )
        .await;
    }

    Ok(Json(view))
}

async fn update_contract_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<ContractView>, (StatusCode, String)> {
    let target = payload
        .status
        .trim()
        .parse::<ContractStatus>()
        .map_err(|err| invalid_request(err.into()))?;

    let (view, changed) = set_contract_status(&state, id, target).await?;

    if changed {
        match target {
            ContractStatus::Aprobado | ContractStatus::Rechazado => {
                publish_event(
                    &state,
                    CONTRACTS_DECIDED_CHANNEL,
                    &ContractDecidedEvent {
                        contract_id: id,
                        status: target,
                        decided_by_world_id: None,
                    },
                )
                .await;
            }
            ContractStatus::Arbitraje => {
                publish_event(
                    &state,
                    CONTRACTS_ARBITRATION_CHANNEL,
                    &ArbitrationStartedEvent { contract_id: id },
                )
                .await;
            }
            ContractStatus::Pendiente => {}
        }
    }

    Ok(Json(view))
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<ContractMessage>), (StatusCode, String)> {
    let sender = payload.sender_world_id.trim().to_string();
    let content = payload.content.trim().to_string();
    if sender.is_empty() {
        return Err(invalid_request(anyhow::anyhow!("sender_world_id is required")));
    }
    if content.is_empty() {
        return Err(invalid_request(anyhow::anyhow!("content is required")));
    }

    let row = sqlx::query(
        "SELECT creator_world_id, counterpart_world_id FROM contracts WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await
    .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "contract not found".to_string()));
    };

    let creator: String = row.try_get("creator_world_id").map_err(internal_error)?;
    let counterpart: Option<String> =
        row.try_get("counterpart_world_id").map_err(internal_error)?;
    if sender != creator && counterpart.as_deref() != Some(sender.as_str()) {
        return Err((
            StatusCode::FORBIDDEN,
            "sender is not a party to this contract".to_string(),
        ));
    }

    let message = ContractMessage {
        id: Uuid::new_v4(),
        contract_id: id,
        sender_world_id: sender,
        content,
        sent_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO contract_messages (id, contract_id, sender_world_id, content, sent_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(message.id)
    .bind(message.contract_id)
    .bind(&message.sender_world_id)
    .bind(&message.content)
    .bind(message.sent_at)
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((StatusCode::CREATED, Json(message)))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ListMessagesResponse>, (StatusCode, String)> {
    ensure_contract_exists(&state.pool, id).await?;

    let rows = sqlx::query(
        r#"
        SELECT id, contract_id, sender_world_id, content, sent_at
        FROM contract_messages
        WHERE contract_id = $1
        ORDER BY sent_at ASC
        "#,
    )
    .bind(id)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        messages.push(ContractMessage {
            id: row.try_get("id").map_err(internal_error)?,
            contract_id: row.try_get("contract_id").map_err(internal_error)?,
            sender_world_id: row.try_get("sender_world_id").map_err(internal_error)?,
            content: row.try_get("content").map_err(internal_error)?,
            sent_at: row.try_get("sent_at").map_err(internal_error)?,
        });
    }

    Ok(Json(ListMessagesResponse { messages }))
}

async fn verify_proof(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, (StatusCode, String)> {
    let proof_request = build_proof_request(&payload).map_err(invalid_request)?;

    let existing = fetch_link(&state.pool, &proof_request.nullifier_hash).await?;

    let verdict = state.verifier.verify(&proof_request).await.map_err(|err| {
        error!("World ID verification call failed: {err:#}");
        (
            StatusCode::BAD_GATEWAY,
            "failed to reach the World ID verifier".to_string(),
        )
    })?;

    if verdict.success {
        let link = match existing {
            Some(link) => link,
            None => {
                insert_link(
                    &state.pool,
                    &proof_request,
                    payload.signal.as_deref(),
                )
                .await?
            }
        };

        let user = verified_user(&state.pool, &proof_request.nullifier_hash).await?;
        info!(
            nullifier_hash = %proof_request.nullifier_hash,
            "World ID proof accepted and linked"
        );

        return Ok(Json(VerifyResponse {
            message: "verification accepted".to_string(),
            link,
            user: Some(user),
        }));
    }

    if verdict.max_verifications_reached() {
        if let Some(link) = existing {
            // The proof is spent upstream but the identity is already ours.
            return Ok(Json(VerifyResponse {
                message: "identity already linked".to_string(),
                link,
                user: fetch_user_by_world_id(&state.pool, &proof_request.nullifier_hash).await?,
            }));
        }

        return Err((
            StatusCode::BAD_REQUEST,
            "identity has exhausted its verifications and is not linked here".to_string(),
        ));
    }

    let reason = verdict
        .detail
        .or(verdict.code)
        .unwrap_or_else(|| "proof rejected".to_string());
    Err((StatusCode::BAD_REQUEST, format!("invalid proof: {reason}")))
}

async fn is_linked(
    State(state): State<AppState>,
    Json(payload): Json<IsLinkedRequest>,
) -> Result<Json<IsLinkedResponse>, (StatusCode, String)> {
    let nullifier_hash = payload.nullifier_hash.trim().to_string();
    if nullifier_hash.is_empty() {
        return Err(invalid_request(anyhow::anyhow!("nullifier_hash is required")));
    }

    let link = fetch_link(&state.pool, &nullifier_hash).await?;

    Ok(Json(IsLinkedResponse {
        nullifier_hash,
        linked: link.is_some(),
        link,
    }))
}

async fn list_links(
    State(state): State<AppState>,
) -> Result<Json<ListLinksResponse>, (StatusCode, String)> {
    let rows = sqlx::query(
        r#"
        SELECT id, nullifier_hash, action, signal, verification_level, linked_at
        FROM worldid_links
        ORDER BY linked_at DESC
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    let mut links = Vec::with_capacity(rows.len());
    for row in rows {
        links.push(link_from_row(&row).map_err(internal_error)?);
    }

    Ok(Json(ListLinksResponse { links }))
}

async fn set_contract_status(
    state: &AppState,
    id: Uuid,
    target: ContractStatus,
) -> Result<(ContractView, bool), (StatusCode, String)> {
    let mut tx = state.pool.begin().await.map_err(internal_error)?;

    let row = sqlx::query("SELECT status FROM contracts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "contract not found".to_string()));
    };

    let current = parse_status_column(&row).map_err(internal_error)?;
    if current == target {
        drop(tx);
        let view = require_contract_view(&state.pool, id).await?;
        return Ok((view, false));
    }

    current
        .transition_to(target)
        .map_err(|err| (StatusCode::CONFLICT, err.to_string()))?;

    sqlx::query("UPDATE contracts SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(id)
        .bind(target.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(internal_error)?;

    tx.commit().await.map_err(internal_error)?;

    let view = require_contract_view(&state.pool, id).await?;
    Ok((view, true))
}

async fn allocate_linking_code(pool: &PgPool) -> Result<String, (StatusCode, String)> {
    for _ in 0..MAX_LINKING_CODE_ATTEMPTS {
        let code = {
            let mut rng = rand::thread_rng();
            random_linking_code(&mut rng)
        };

        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM contracts WHERE linking_code = $1)",
        )
        .bind(&code)
        .fetch_one(pool)
        .await
        .map_err(internal_error)?;

        if !taken {
            return Ok(code);
        }
    }

    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        "could not allocate a unique linking code".to_string(),
    ))
}

async fn ensure_contract_exists(pool: &PgPool, id: Uuid) -> Result<(), (StatusCode, String)> {
    let exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM contracts WHERE id = $1)")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(internal_error)?;

    if !exists {
        return Err((StatusCode::NOT_FOUND, "contract not found".to_string()));
    }

    Ok(())
}

async fn require_contract_view(
    pool: &PgPool,
    id: Uuid,
) -> Result<ContractView, (StatusCode, String)> {
    let row = sqlx::query(&contract_view_query("WHERE c.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(internal_error)?;

    let Some(row) = row else {
        return Err((StatusCode::NOT_FOUND, "contract not found".to_string()));
    };

    contract_view_from_row(&row).map_err(internal_error)
}

async fn fetch_link(
    pool: &PgPool,
    nullifier_hash: &str,
) -> Result<Option<WorldIdLink>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT id, nullifier_hash, action, signal, verification_level, linked_at
        FROM worldid_links
        WHERE nullifier_hash = $1
        "#,
    )
    .bind(nullifier_hash)
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?;

    match row {
        Some(row) => Ok(Some(link_from_row(&row).map_err(internal_error)?)),
        None => Ok(None),
    }
}

async fn insert_link(
    pool: &PgPool,
    proof: &ProofRequest,
    signal: Option<&str>,
) -> Result<WorldIdLink, (StatusCode, String)> {
    let link = WorldIdLink {
        id: Uuid::new_v4(),
        nullifier_hash: proof.nullifier_hash.clone(),
        action: proof.action.clone(),
        signal: signal.map(str::to_string),
        verification_level: Some(proof.verification_level.clone()),
        linked_at: Utc::now(),
    };

    sqlx::query(
        r#"
        INSERT INTO worldid_links (id, nullifier_hash, action, signal, verification_level, linked_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (nullifier_hash) DO NOTHING
        "#,
    )
    .bind(link.id)
    .bind(&link.nullifier_hash)
    .bind(&link.action)
    .bind(link.signal.as_deref())
    .bind(link.verification_level.as_deref())
    .bind(link.linked_at)
    .execute(pool)
    .await
    .map_err(internal_error)?;

    Ok(link)
}

async fn verified_user(
    pool: &PgPool,
    world_id: &str,
) -> Result<User, (StatusCode, String)> {
    let now = Utc::now();
    let row = sqlx::query(
        r#"
        INSERT INTO users (id, world_id, name, is_verified, created_at, updated_at)
        VALUES ($1, $2, $3, TRUE, $4, $4)
        ON CONFLICT (world_id) DO UPDATE SET is_verified = TRUE, updated_at = EXCLUDED.updated_at
        RETURNING id, world_id, name, is_verified, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(world_id)
    .bind(default_display_name(world_id))
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(internal_error)?;

    user_from_row(&row).map_err(internal_error)
}

async fn fetch_user_by_world_id(
    pool: &PgPool,
    world_id: &str,
) -> Result<Option<User>, (StatusCode, String)> {
    let row = sqlx::query(
        r#"
        SELECT id, world_id, name, is_verified, created_at, updated_at
        FROM users
        WHERE world_id = $1
        "#,
    )
    .bind(world_id)
    .fetch_optional(pool)
    .await
    .map_err(internal_error)?;

    match row {
        Some(row) => Ok(Some(user_from_row(&row).map_err(internal_error)?)),
        None => Ok(None),
    }
}

async fn publish_event<T: Serialize>(state: &AppState, channel: &str, event: &T) {
    // Contract events only feed notifications, so a publish failure must not
    // fail the request that produced it.
    if let Err(err) = state.redis.publish_json(channel, event).await {
        error!("failed to publish {channel} event: {err}");
    }
}

fn build_proof_request(payload: &VerifyRequest) -> AnyResult<ProofRequest> {
    let Some(proof_payload) = payload.payload.as_ref() else {
        anyhow::bail!("payload is required");
    };

    let nullifier_hash = required_field(proof_payload.nullifier_hash.as_deref(), "nullifier_hash")?;
    let proof = required_field(proof_payload.proof.as_deref(), "proof")?;
    let merkle_root = required_field(proof_payload.merkle_root.as_deref(), "merkle_root")?;
    let verification_level = required_field(
        proof_payload.verification_level.as_deref(),
        "verification_level",
    )?;
    let action = required_field(payload.action.as_deref(), "action")?;

    Ok(ProofRequest {
        nullifier_hash,
        merkle_root,
        proof,
        verification_level,
        action,
        signal_hash: proof_payload
            .signal_hash
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
    })
}

fn required_field(value: Option<&str>, field: &str) -> AnyResult<String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v.to_string()),
        None => anyhow::bail!("{field} is missing from the payload"),
    }
}

fn validate_create_contract(payload: &CreateContractRequest) -> AnyResult<()> {
    if payload.kind.trim().is_empty() {
        anyhow::bail!("kind is required");
    }
    if payload.creator_world_id.trim().is_empty() {
        anyhow::bail!("creator_world_id is required");
    }
    if payload.amount <= Decimal::ZERO {
        anyhow::bail!("amount must be positive");
    }

    Ok(())
}

fn decision_status(approve: bool) -> ContractStatus {
    if approve {
        ContractStatus::Aprobado
    } else {
        ContractStatus::Rechazado
    }
}

fn normalize_linking_code(raw: &str) -> AnyResult<String> {
    let code = raw.trim().to_ascii_uppercase();
    if !is_valid_linking_code(&code) {
        anyhow::bail!("linking code must be 4 characters (A-Z, 0-9)");
    }

    Ok(code)
}

fn default_display_name(world_id: &str) -> String {
    let prefix: String = world_id.chars().take(8).collect();
    format!("Usuario_{prefix}")
}

fn parse_status_column(row: &PgRow) -> AnyResult<ContractStatus> {
    let raw: String = row.try_get("status")?;
    Ok(raw.parse::<ContractStatus>()?)
}

fn contract_view_query(tail: &str) -> String {
    format!(
        r#"
        SELECT c.id, c.kind, c.amount, c.fee, c.delivery_deadline, c.approval_deadline,
               c.description, c.creator_world_id, c.counterpart_world_id, c.status,
               c.linking_code, c.creator_approved, c.counterpart_approved,
               c.created_at, c.updated_at,
               u1.name AS creator_name, u2.name AS counterpart_name
        FROM contracts c
        LEFT JOIN users u1 ON c.creator_world_id = u1.world_id
        LEFT JOIN users u2 ON c.counterpart_world_id = u2.world_id
        {tail}
        "#
    )
}

fn contract_view_from_row(row: &PgRow) -> AnyResult<ContractView> {
    let status = parse_status_column(row)?;

    Ok(ContractView {
        contract: Contract {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            delivery_deadline: row.try_get("delivery_deadline")?,
            approval_deadline: row.try_get("approval_deadline")?,
            description: row.try_get("description")?,
            creator_world_id: row.try_get("creator_world_id")?,
            counterpart_world_id: row.try_get("counterpart_world_id")?,
            status,
            linking_code: row.try_get("linking_code")?,
            creator_approved: row.try_get("creator_approved")?,
            counterpart_approved: row.try_get("counterpart_approved")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        },
        creator_name: row.try_get("creator_name")?,
        counterpart_name: row.try_get("counterpart_name")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        world_id: row.try_get("world_id")?,
        name: row.try_get("name")?,
        is_verified: row.try_get("is_verified")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn link_from_row(row: &PgRow) -> Result<WorldIdLink, sqlx::Error> {
    Ok(WorldIdLink {
        id: row.try_get("id")?,
        nullifier_hash: row.try_get("nullifier_hash")?,
        action: row.try_get("action")?,
        signal: row.try_get("signal")?,
        verification_level: row.try_get("verification_level")?,
        linked_at: row.try_get("linked_at")?,
    })
}

fn invalid_request(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contratos_platform::ProofPayload;

    #[test]
    fn approval_maps_to_spanish_statuses() {
        assert_eq!(decision_status(true), ContractStatus::Aprobado);
        assert_eq!(decision_status(false), ContractStatus::Rechazado);
    }

    #[test]
    fn linking_code_lookup_is_case_insensitive() {
        assert_eq!(normalize_linking_code("a3f9").unwrap(), "A3F9");
        assert_eq!(normalize_linking_code("  A3F9 ").unwrap(), "A3F9");
        assert!(normalize_linking_code("a3f").is_err());
        assert!(normalize_linking_code("a3f99").is_err());
        assert!(normalize_linking_code("a3-9").is_err());
    }

    #[test]
    fn display_name_truncates_long_world_ids() {
        assert_eq!(default_display_name("0x1f2a3b4c5d"), "Usuario_0x1f2a3b");
        assert_eq!(default_display_name("abc"), "Usuario_abc");
    }

    #[test]
    fn create_contract_requires_positive_amount() {
        let mut payload = CreateContractRequest {
            kind: "servicio".to_string(),
            amount: Decimal::new(10000, 2),
            delivery_deadline: Utc::now(),
            description: None,
            creator_world_id: "0xcreator".to_string(),
            counterpart_world_id: None,
        };
        assert!(validate_create_contract(&payload).is_ok());

        payload.amount = Decimal::ZERO;
        assert!(validate_create_contract(&payload).is_err());

        payload.amount = Decimal::new(-100, 2);
        assert!(validate_create_contract(&payload).is_err());
    }

    #[test]
    fn create_contract_requires_kind_and_creator() {
        let payload = CreateContractRequest {
            kind: "  ".to_string(),
            amount: Decimal::new(10000, 2),
            delivery_deadline: Utc::now(),
            description: None,
            creator_world_id: "0xcreator".to_string(),
            counterpart_world_id: None,
        };
        assert!(validate_create_contract(&payload).is_err());
    }

    #[test]
    fn proof_request_requires_the_full_payload() {
        let request = VerifyRequest {
            payload: None,
            action: Some("login".to_string()),
            signal: None,
        };
        assert!(build_proof_request(&request).is_err());

        let request = VerifyRequest {
            payload: Some(ProofPayload {
                nullifier_hash: Some("0x1f2a".to_string()),
                merkle_root: Some("0x9b3c".to_string()),
                proof: Some("0xdead".to_string()),
                verification_level: Some("orb".to_string()),
                signal_hash: None,
            }),
            action: Some("login".to_string()),
            signal: None,
        };
        let proof = build_proof_request(&request).unwrap();
        assert_eq!(proof.nullifier_hash, "0x1f2a");
        assert_eq!(proof.action, "login");
        assert!(proof.signal_hash.is_none());
    }

    #[test]
    fn proof_request_rejects_missing_proof() {
        let request = VerifyRequest {
            payload: Some(ProofPayload {
                nullifier_hash: Some("0x1f2a".to_string()),
                merkle_root: Some("0x9b3c".to_string()),
                proof: None,
                verification_level: Some("orb".to_string()),
                signal_hash: None,
            }),
            action: Some("login".to_string()),
            signal: None,
        };
        let err = build_proof_request(&request).unwrap_err();
        assert!(err.to_string().contains("proof"));
    }

    #[test]
    fn blank_signal_hash_is_dropped() {
        let request = VerifyRequest {
            payload: Some(ProofPayload {
                nullifier_hash: Some("0x1f2a".to_string()),
                merkle_root: Some("0x9b3c".to_string()),
                proof: Some("0xdead".to_string()),
                verification_level: Some("orb".to_string()),
                signal_hash: Some("   ".to_string()),
            }),
            action: Some("login".to_string()),
            signal: None,
        };
        let proof = build_proof_request(&request).unwrap();
        assert!(proof.signal_hash.is_none());
    }
}
