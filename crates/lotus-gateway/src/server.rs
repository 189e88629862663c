//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode},
    routing::{get, post, put},
};
use lotus_channels::{SenderSet, build_senders};
use lotus_core::LotusConfig;
use lotus_db::CrmDb;
use lotus_scheduler::SchedulerEngine;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{routes, staff};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LotusConfig>,
    pub db: Arc<CrmDb>,
    pub senders: SenderSet,
    /// Runs the queue and lifecycle passes on demand and in the background.
    pub scheduler: Arc<SchedulerEngine>,
    pub api_key: Option<String>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: LotusConfig, db: Arc<CrmDb>) -> Self {
        let senders = build_senders(&config);
        Self::with_senders(config, db, senders)
    }

    /// Same as [`AppState::new`] with explicit senders.
    pub fn with_senders(config: LotusConfig, db: Arc<CrmDb>, senders: SenderSet) -> Self {
        let scheduler = Arc::new(SchedulerEngine::new(
            db.clone(),
            senders.clone(),
            config.scheduler.clone(),
        ));
        let api_key = config
            .gateway
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty());
        Self {
            config: Arc::new(config),
            db,
            senders,
            scheduler,
            api_key,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Routes reachable without an API key: health, the public lead form and
/// QR redirects.
fn is_public(method: &Method, path: &str) -> bool {
    path == "/health"
        || path.starts_with("/q/")
        || (method == Method::POST && path == "/api/v1/leads")
        || method == Method::OPTIONS
}

/// API key middleware: validates the X-Api-Key header or ?key= query.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // No key configured: everything is open.
    let Some(expected) = &state.api_key else {
        return next.run(req).await;
    };
    if is_public(req.method(), req.uri().path()) {
        return next.run(req).await;
    }

    let from_header = req
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    let from_query = axum::extract::Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|q| q.0.get("key") == Some(expected))
        .unwrap_or(false);
    if from_query {
        return next.run(req).await;
    }

    tracing::debug!("rejected {} {}: bad or missing api key", req.method(), req.uri().path());
    axum::response::IntoResponse::into_response((
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({"ok": false, "error": "Unauthorized: invalid or missing API key"})),
    ))
}

pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    Router::new()
        // Public
        .route("/health", get(routes::health_check))
        .route("/q/{id}", get(routes::qr_redirect))
        // Leads (POST is the public intake form)
        .route("/api/v1/leads", get(routes::list_leads).post(routes::capture_lead))
        .route("/api/v1/leads/stats", get(routes::lead_stats))
        .route(
            "/api/v1/leads/{id}",
            get(routes::get_lead).delete(routes::delete_lead),
        )
        .route("/api/v1/leads/{id}/status", put(routes::update_lead_status))
        .route("/api/v1/leads/{id}/notes", put(routes::update_lead_notes))
        .route("/api/v1/leads/{id}/trigger", post(routes::trigger_sequence))
        .route("/api/v1/leads/{id}/history", get(routes::lead_history))
        // Customers
        .route("/api/v1/customers", get(routes::list_customers))
        .route("/api/v1/customers/stats", get(routes::customer_stats))
        .route("/api/v1/customers/import", post(routes::import_customers))
        // Templates
        .route(
            "/api/v1/templates",
            get(routes::list_templates).post(routes::create_template),
        )
        .route(
            "/api/v1/templates/{id}",
            get(routes::get_template)
                .put(routes::update_template)
                .delete(routes::delete_template),
        )
        // Sequences
        .route(
            "/api/v1/sequences",
            get(routes::list_sequences).post(routes::create_sequence),
        )
        .route("/api/v1/sequences/match", get(routes::match_sequence))
        .route(
            "/api/v1/sequences/{id}",
            get(routes::get_sequence).delete(routes::delete_sequence),
        )
        .route("/api/v1/sequences/{id}/active", put(routes::set_sequence_active))
        // Messaging
        .route("/api/v1/communications", get(routes::list_communications))
        .route("/api/v1/queue/process", post(routes::process_queue))
        .route("/api/v1/scheduler/run", post(routes::run_scheduler))
        .route("/api/v1/analytics", get(routes::analytics))
        .route("/api/v1/info", get(routes::system_info))
        // QR
        .route("/api/v1/qr", get(routes::generate_qr))
        .route(
            "/api/v1/qr-codes",
            get(routes::list_qr_codes).post(routes::create_qr_code),
        )
        .route(
            "/api/v1/qr-codes/{id}",
            get(routes::get_qr_code).delete(routes::delete_qr_code),
        )
        .route("/api/v1/qr-codes/{id}/active", put(routes::set_qr_active))
        // Instructors & staffing
        .route(
            "/api/v1/instructors",
            get(staff::list_instructors).post(staff::create_instructor),
        )
        .route(
            "/api/v1/instructors/{id}",
            get(staff::get_instructor).put(staff::update_instructor),
        )
        .route("/api/v1/instructors/{id}/active", put(staff::set_instructor_active))
        .route("/api/v1/instructors/{id}/payment", get(staff::instructor_payment))
        .route("/api/v1/classes", get(staff::list_classes).post(staff::create_class))
        .route("/api/v1/classes/{id}", get(staff::get_class))
        .route("/api/v1/classes/{id}/complete", put(staff::complete_class))
        .route("/api/v1/classes/{id}/cancel", put(staff::cancel_class))
        .route("/api/v1/classes/{id}/substitute", post(staff::request_substitute))
        .route("/api/v1/classes/{id}/payroll", post(staff::generate_payroll))
        .route("/api/v1/substitutes", get(staff::list_substitutes))
        .route("/api/v1/substitutes/{id}/fill", put(staff::fill_substitute))
        .route("/api/v1/substitutes/{id}/escalate", put(staff::escalate_substitute))
        .route("/api/v1/substitutes/{id}/cancel", put(staff::cancel_substitute))
        .route("/api/v1/payroll", get(staff::list_payroll))
        .route("/api/v1/payroll/{id}/paid", put(staff::mark_payroll_paid))
        .layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_api_key,
        ))
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict origins in production, e.g.
            // LOTUS_CORS_ORIGINS=https://studio.example,https://book.studio.example
            if let Ok(origins_str) = std::env::var("LOTUS_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server, plus the background scheduler when enabled.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let shared = Arc::new(state);
    let gateway = &shared.config.gateway;

    if shared.config.scheduler.enabled {
        let engine = shared.scheduler.clone();
        let every = shared.config.scheduler.interval_secs;
        tokio::spawn(async move {
            lotus_scheduler::spawn_scheduler(engine, every).await;
        });
    } else {
        tracing::info!("⏸️ Background scheduler disabled");
    }

    if shared.api_key.is_none() {
        tracing::warn!("⚠️ No API key configured; the admin API is open to anyone who can reach it");
    }

    let addr = format!("{}:{}", gateway.host, gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 {} API listening on http://{}", shared.config.studio_name, addr);

    let app = build_router_from_arc(shared.clone());
    axum::serve(listener, app).await?;
    Ok(())
}
