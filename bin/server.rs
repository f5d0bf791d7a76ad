// Finledger Entitlements - Web Server
// REST API over the entitlement core with Axum

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use finledger_entitlements::{
    apply_tier_update, check_limit, consume_ai_analysis, get_active_grants, get_tier,
    insert_grant, limits_for, monthly_price_cents, resolve, revoke_grant, setup_database,
    shared_user_count, BillingBridge, CapabilitySet, EntitlementSet, Limit, ResourceKind,
    ShareGrant, SubscriptionTier, TierCommand,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    bridge: BillingBridge,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Request / Response shapes
// ============================================================================

#[derive(Serialize)]
struct EntitlementResponse {
    tier: SubscriptionTier,
    monthly_price_cents: u32,
    limits: EntitlementSet,
}

#[derive(Deserialize)]
struct ResolveRequest {
    grantee_id: String,
    owner_id: String,
    resource: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    capabilities: CapabilitySet,
    /// "ok" when any capability is held, "access_denied" otherwise
    outcome: &'static str,
}

#[derive(Deserialize)]
struct CreateGrantRequest {
    owner_id: String,
    grantee_id: String,
    resource: String,
    capabilities: CapabilitySet,
}

#[derive(Serialize)]
struct CreateGrantResponse {
    grant_id: Option<String>,
    outcome: &'static str,
    shared_user_limit: Limit,
}

#[derive(Deserialize)]
struct CheckLimitRequest {
    user_id: String,
    resource: String,
    current_count: u32,
}

#[derive(Serialize)]
struct CheckLimitResponse {
    allowed: bool,
    limit: Limit,
    /// "ok" or "upgrade_required"
    outcome: &'static str,
}

#[derive(Deserialize)]
struct AiUsageRequest {
    user_id: String,
}

#[derive(Serialize)]
struct AiUsageResponse {
    allowed: bool,
    used: u32,
    allowance: Limit,
    outcome: &'static str,
}

#[derive(Deserialize)]
struct CheckoutRequest {
    user_id: String,
    tier: String,
}

#[derive(Serialize)]
struct WebhookResponse {
    event_id: String,
    /// "applied", "replayed" or "noop"
    outcome: &'static str,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/entitlements/:tier - Catalog lookup
async fn get_entitlements(Path(tier): Path<String>) -> impl IntoResponse {
    // Hard stop on unknown tiers - no silent default to free
    match SubscriptionTier::parse(&tier) {
        Ok(tier) => (
            StatusCode::OK,
            Json(ApiResponse::ok(EntitlementResponse {
                tier,
                monthly_price_cents: monthly_price_cents(tier),
                limits: limits_for(tier),
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<EntitlementResponse>::err(e.to_string())),
        )
            .into_response(),
    }
}

/// POST /api/permissions/resolve - Effective capability set
async fn resolve_permissions(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> impl IntoResponse {
    let resource = match ResourceKind::parse(&request.resource) {
        Ok(resource) => resource,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<ResolveResponse>::err(e.to_string())),
            )
                .into_response()
        }
    };

    let conn = state.db.lock().unwrap();
    match get_active_grants(&conn, &request.owner_id) {
        Ok(grants) => {
            let capabilities = resolve(&request.grantee_id, &request.owner_id, resource, &grants);
            let outcome = if capabilities.is_empty() {
                "access_denied"
            } else {
                "ok"
            };

            (
                StatusCode::OK,
                Json(ApiResponse::ok(ResolveResponse {
                    capabilities,
                    outcome,
                })),
            )
                .into_response()
        }
        Err(e) => {
            eprintln!("Error resolving permissions: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<ResolveResponse>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// GET /api/grants/by-owner/:owner_id - Active grants issued by an owner
async fn list_grants(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> impl IntoResponse {
    // Owner ids may be emails; decode URL-encoded path segments
    let decoded_owner = urlencoding::decode(&owner_id)
        .unwrap_or_else(|_| owner_id.clone().into())
        .into_owned();

    let conn = state.db.lock().unwrap();
    match get_active_grants(&conn, &decoded_owner) {
        Ok(grants) => (StatusCode::OK, Json(ApiResponse::ok(grants))).into_response(),
        Err(e) => {
            eprintln!("Error listing grants for {}: {}", decoded_owner, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<ShareGrant>>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// POST /api/grants - Create a share grant (enforces the shared-user limit)
async fn create_grant(
    State(state): State<AppState>,
    Json(request): Json<CreateGrantRequest>,
) -> impl IntoResponse {
    let resource = match ResourceKind::parse(&request.resource) {
        Ok(resource) => resource,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<CreateGrantResponse>::err(e.to_string())),
            )
                .into_response()
        }
    };

    let conn = state.db.lock().unwrap();
    let result = get_tier(&conn, &request.owner_id).and_then(|tier| {
        let shared = shared_user_count(&conn, &request.owner_id)?;
        Ok((tier, shared))
    });

    match result {
        Ok((tier, shared)) => {
            let decision = check_limit(tier, ResourceKind::SharedUsers, shared);
            if !decision.allowed {
                return (
                    StatusCode::FORBIDDEN,
                    Json(ApiResponse::ok(CreateGrantResponse {
                        grant_id: None,
                        outcome: "upgrade_required",
                        shared_user_limit: decision.limit,
                    })),
                )
                    .into_response();
            }

            let grant = ShareGrant::new(
                request.owner_id.clone(),
                request.grantee_id.clone(),
                resource,
                request.capabilities,
            );

            match insert_grant(&conn, &grant) {
                Ok(()) => (
                    StatusCode::CREATED,
                    Json(ApiResponse::ok(CreateGrantResponse {
                        grant_id: Some(grant.id),
                        outcome: "ok",
                        shared_user_limit: decision.limit,
                    })),
                )
                    .into_response(),
                Err(e) => {
                    eprintln!("Error creating grant: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ApiResponse::<CreateGrantResponse>::err("internal error")),
                    )
                        .into_response()
                }
            }
        }
        Err(e) => {
            eprintln!("Error checking shared-user limit: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<CreateGrantResponse>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// DELETE /api/grants/:id - Revoke a grant
async fn delete_grant(
    State(state): State<AppState>,
    Path(grant_id): Path<String>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();
    match revoke_grant(&conn, &grant_id) {
        Ok(true) => (StatusCode::OK, Json(ApiResponse::ok("revoked"))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<&str>::err("no active grant with that id")),
        )
            .into_response(),
        Err(e) => {
            eprintln!("Error revoking grant {}: {}", grant_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<&str>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// POST /api/limits/check - Quota check for a new resource
async fn check_limits(
    State(state): State<AppState>,
    Json(request): Json<CheckLimitRequest>,
) -> impl IntoResponse {
    let resource = match ResourceKind::parse(&request.resource) {
        Ok(resource) => resource,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<CheckLimitResponse>::err(e.to_string())),
            )
                .into_response()
        }
    };

    let conn = state.db.lock().unwrap();
    match get_tier(&conn, &request.user_id) {
        Ok(tier) => {
            let decision = check_limit(tier, resource, request.current_count);
            (
                StatusCode::OK,
                Json(ApiResponse::ok(CheckLimitResponse {
                    allowed: decision.allowed,
                    limit: decision.limit,
                    outcome: if decision.allowed {
                        "ok"
                    } else {
                        "upgrade_required"
                    },
                })),
            )
                .into_response()
        }
        Err(e) => {
            // Corrupt tier rows included: a hard stop, never a free fallback
            eprintln!("Error reading tier for {}: {}", request.user_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<CheckLimitResponse>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// POST /api/usage/ai - Consume one AI analysis
async fn consume_ai(
    State(state): State<AppState>,
    Json(request): Json<AiUsageRequest>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();
    let result = get_tier(&conn, &request.user_id).and_then(|tier| {
        let outcome = consume_ai_analysis(&conn, &request.user_id, tier, Utc::now())?;
        Ok((tier, outcome))
    });

    match result {
        Ok((tier, (allowed, record))) => (
            if allowed {
                StatusCode::OK
            } else {
                StatusCode::FORBIDDEN
            },
            Json(ApiResponse::ok(AiUsageResponse {
                allowed,
                used: record.count,
                allowance: limits_for(tier).ai_analyses_per_period,
                outcome: if allowed { "ok" } else { "upgrade_required" },
            })),
        )
            .into_response(),
        Err(e) => {
            eprintln!("Error consuming AI analysis: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<AiUsageResponse>::err("internal error")),
            )
                .into_response()
        }
    }
}

/// POST /api/billing/checkout - Start a checkout session
async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> impl IntoResponse {
    let tier = match SubscriptionTier::parse(&request.tier) {
        Ok(tier) => tier,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<finledger_entitlements::CheckoutSession>::err(
                    e.to_string(),
                )),
            )
                .into_response()
        }
    };

    match state.bridge.start_session(&request.user_id, tier) {
        Ok(session) => (StatusCode::OK, Json(ApiResponse::ok(session))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<finledger_entitlements::CheckoutSession>::err(
                e.to_string(),
            )),
        )
            .into_response(),
    }
}

/// POST /api/billing/webhook - Verified provider event intake
async fn billing_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers
        .get("finledger-signature")
        .and_then(|value| value.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<WebhookResponse>::err(
                "missing signature header",
            )),
        )
            .into_response();
    };

    let event = match state.bridge.verify_and_parse(&body, signature, Utc::now()) {
        Ok(event) => event,
        Err(e) => {
            // Rejected whole: unverifiable events never touch tier state
            eprintln!("Webhook rejected: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<WebhookResponse>::err(e.to_string())),
            )
                .into_response();
        }
    };

    let mut conn = state.db.lock().unwrap();
    let result = get_tier(&conn, &event.user_id)
        .map_err(|e| e.to_string())
        .and_then(|current| {
            state
                .bridge
                .reconcile_tier_change(&event, current)
                .map_err(|e| e.to_string())
        });

    match result {
        Ok(command) => {
            let outcome = match command {
                TierCommand::Upgrade(update) | TierCommand::Downgrade(update) => {
                    match apply_tier_update(&mut conn, &update) {
                        Ok(true) => "applied",
                        Ok(false) => "replayed",
                        Err(e) => {
                            eprintln!("Error applying tier update: {}", e);
                            return (
                                StatusCode::INTERNAL_SERVER_ERROR,
                                Json(ApiResponse::<WebhookResponse>::err("internal error")),
                            )
                                .into_response();
                        }
                    }
                }
                TierCommand::Noop => "noop",
            };

            (
                StatusCode::OK,
                Json(ApiResponse::ok(WebhookResponse {
                    event_id: event.event_id,
                    outcome,
                })),
            )
                .into_response()
        }
        Err(e) => {
            eprintln!("Webhook reconciliation failed: {}", e);
            (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::<WebhookResponse>::err(e)),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🌐 Finledger Entitlements - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path =
        std::env::var("FINLEDGER_DB").unwrap_or_else(|_| "finledger.db".to_string());
    let signing_secret = std::env::var("BILLING_SIGNING_SECRET")
        .unwrap_or_else(|_| "whsec_dev_only".to_string());
    let checkout_base_url = std::env::var("CHECKOUT_BASE_URL")
        .unwrap_or_else(|_| "https://pay.example.com/checkout".to_string());

    let conn = Connection::open(&db_path).expect("Failed to open database");
    setup_database(&conn).expect("Failed to initialize database");
    println!("✓ Database opened: {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        bridge: BillingBridge::new(signing_secret, checkout_base_url),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/entitlements/:tier", get(get_entitlements))
        .route("/permissions/resolve", post(resolve_permissions))
        .route("/grants", post(create_grant))
        .route("/grants/by-owner/:owner_id", get(list_grants))
        .route("/grants/:id", delete(delete_grant))
        .route("/limits/check", post(check_limits))
        .route("/usage/ai", post(consume_ai))
        .route("/billing/checkout", post(start_checkout))
        .route("/billing/webhook", post(billing_webhook))
        .with_state(state);

    // Build main router
    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:3000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:3000");
    println!("   API: http://localhost:3000/api/entitlements/free");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
