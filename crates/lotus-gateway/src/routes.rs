//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use lotus_core::LotusError;
use lotus_core::types::{Channel, LeadStatus, NewSequence, NewTemplate, Segment, TriggerType};
use lotus_db::HistoryFilter;
use lotus_intake::LeadForm;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::server::AppState;

/// Status code plus the `{"ok": ...}` JSON body every route returns.
pub type ApiResponse = (StatusCode, Json<Value>);

pub(crate) fn ok(body: Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

pub(crate) fn created(body: Value) -> ApiResponse {
    (StatusCode::CREATED, Json(body))
}

/// Map a store or intake error onto a status code.
pub(crate) fn fail(e: LotusError) -> ApiResponse {
    let status = match &e {
        LotusError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => {
            tracing::error!("request failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({"ok": false, "error": e.to_string()})))
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "lotus-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    let channels: Vec<Value> = state
        .senders
        .status()
        .into_iter()
        .map(|(channel, configured)| json!({"channel": channel, "configured": configured}))
        .collect();
    Json(json!({
        "ok": true,
        "name": state.config.studio_name,
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "channels": channels,
        "scheduler": {
            "enabled": state.config.scheduler.enabled,
            "interval_secs": state.config.scheduler.interval_secs,
        },
        "public_form_url": state.config.gateway.public_form_url,
    }))
}

// ---- Leads ----

#[derive(Debug, Default, Deserialize)]
pub struct LeadQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<LeadStatus>,
}

/// Public intake form.
pub async fn capture_lead(
    State(state): State<Arc<AppState>>,
    Json(form): Json<LeadForm>,
) -> ApiResponse {
    match lotus_intake::capture_lead(&state.db, &form, Utc::now()) {
        Ok(out) => created(json!({
            "ok": true,
            "lead": out.lead,
            "welcome": out.welcome,
            "queued": out.queued,
        })),
        Err(e) => fail(e),
    }
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeadQuery>,
) -> ApiResponse {
    match state.db.search_leads(query.q.as_deref(), query.status) {
        Ok(leads) => ok(json!({"ok": true, "count": leads.len(), "leads": leads})),
        Err(e) => fail(e),
    }
}

pub async fn lead_stats(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.lead_stats(Utc::now()) {
        Ok(stats) => ok(json!({"ok": true, "stats": stats})),
        Err(e) => fail(e),
    }
}

pub async fn get_lead(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.get_lead(&id) {
        Ok(lead) => ok(json!({"ok": true, "lead": lead})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: LeadStatus,
}

pub async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<StatusUpdate>,
) -> ApiResponse {
    match state.db.update_lead_status(&id, body.status, Utc::now()) {
        Ok(lead) => {
            tracing::info!("📝 Lead {} → {}", lead.id, lead.status);
            ok(json!({"ok": true, "lead": lead}))
        }
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct NotesUpdate {
    #[serde(default)]
    pub notes: String,
}

pub async fn update_lead_notes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NotesUpdate>,
) -> ApiResponse {
    match state.db.update_lead_notes(&id, &body.notes, Utc::now()) {
        Ok(lead) => ok(json!({"ok": true, "lead": lead})),
        Err(e) => fail(e),
    }
}

pub async fn delete_lead(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.delete_lead(&id) {
        Ok(()) => ok(json!({"ok": true, "deleted": id})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub trigger: TriggerType,
    /// Defaults to the lead's own segment.
    #[serde(default)]
    pub segment: Option<Segment>,
}

pub async fn trigger_sequence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TriggerRequest>,
) -> ApiResponse {
    let segment = match body.segment {
        Some(s) => s,
        None => match state.db.get_lead(&id) {
            Ok(lead) => lead.segment.unwrap_or_default(),
            Err(e) => return fail(e),
        },
    };
    match state.db.trigger_sequence(&id, body.trigger, segment, Utc::now()) {
        Ok(queued) => {
            tracing::info!("▶️ {} sequence queued {} message(s) for {id}", body.trigger, queued.len());
            ok(json!({"ok": true, "queued": queued}))
        }
        Err(e) => fail(e),
    }
}

pub async fn lead_history(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let filter = HistoryFilter {
        lead_id: Some(id),
        ..HistoryFilter::default()
    };
    match state.db.list_communications(&filter) {
        Ok(rows) => ok(json!({"ok": true, "communications": rows})),
        Err(e) => fail(e),
    }
}

// ---- Customers ----

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResponse {
    match state.db.search_customers(query.q.as_deref()) {
        Ok(customers) => ok(json!({"ok": true, "count": customers.len(), "customers": customers})),
        Err(e) => fail(e),
    }
}

pub async fn customer_stats(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.customer_stats() {
        Ok(stats) => ok(json!({"ok": true, "stats": stats})),
        Err(e) => fail(e),
    }
}

/// Body is the raw CSV export.
pub async fn import_customers(State(state): State<Arc<AppState>>, body: String) -> ApiResponse {
    match lotus_intake::import_customers(&state.db, body.as_bytes(), Utc::now()) {
        Ok(report) => ok(json!({"ok": true, "report": report})),
        Err(e) => fail(e),
    }
}

// ---- Templates ----

#[derive(Debug, Default, Deserialize)]
pub struct TemplateQuery {
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TemplateQuery>,
) -> ApiResponse {
    match state.db.list_templates(query.active_only) {
        Ok(templates) => ok(json!({"ok": true, "templates": templates})),
        Err(e) => fail(e),
    }
}

pub async fn get_template(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.get_template(&id) {
        Ok(template) => ok(json!({"ok": true, "template": template})),
        Err(e) => fail(e),
    }
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTemplate>,
) -> ApiResponse {
    match state.db.create_template(&body, Utc::now()) {
        Ok(template) => created(json!({"ok": true, "template": template})),
        Err(e) => fail(e),
    }
}

pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NewTemplate>,
) -> ApiResponse {
    match state.db.update_template(&id, &body, Utc::now()) {
        Ok(template) => ok(json!({"ok": true, "template": template})),
        Err(e) => fail(e),
    }
}

pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.delete_template(&id) {
        Ok(()) => ok(json!({"ok": true, "deleted": id})),
        Err(e) => fail(e),
    }
}

// ---- Sequences ----

pub async fn list_sequences(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.list_sequences() {
        Ok(sequences) => ok(json!({"ok": true, "sequences": sequences})),
        Err(e) => fail(e),
    }
}

pub async fn get_sequence(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.get_sequence(&id) {
        Ok(sequence) => ok(json!({"ok": true, "sequence": sequence})),
        Err(e) => fail(e),
    }
}

pub async fn create_sequence(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewSequence>,
) -> ApiResponse {
    match state.db.create_sequence(&body, Utc::now()) {
        Ok(sequence) => created(json!({"ok": true, "sequence": sequence})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SequenceMatchQuery {
    pub trigger: TriggerType,
    #[serde(default)]
    pub segment: Option<Segment>,
}

/// Which sequence a trigger would start for a segment, without queuing.
pub async fn match_sequence(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SequenceMatchQuery>,
) -> ApiResponse {
    let segment = query.segment.unwrap_or_default();
    match state.db.find_sequence(query.trigger, segment) {
        Ok(Some(sequence)) => ok(json!({"ok": true, "sequence": sequence})),
        Ok(None) => fail(LotusError::NotFound(format!(
            "no active {} sequence for segment {segment}",
            query.trigger
        ))),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActiveToggle {
    pub active: bool,
}

pub async fn set_sequence_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveToggle>,
) -> ApiResponse {
    match state.db.set_sequence_active(&id, body.active, Utc::now()) {
        Ok(sequence) => ok(json!({"ok": true, "sequence": sequence})),
        Err(e) => fail(e),
    }
}

pub async fn delete_sequence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.delete_sequence(&id) {
        Ok(()) => ok(json!({"ok": true, "deleted": id})),
        Err(e) => fail(e),
    }
}

// ---- Messaging ----

pub async fn list_communications(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResponse {
    match state.db.list_communications(&filter) {
        Ok(rows) => ok(json!({"ok": true, "count": rows.len(), "communications": rows})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub channel: Option<Channel>,
}

/// Drain due messages now, optionally for a single channel.
pub async fn process_queue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
) -> ApiResponse {
    match state.scheduler.queue().process(query.channel, Utc::now()).await {
        Ok(report) => ok(json!({
            "ok": true,
            "processed": report.processed,
            "failed": report.failed,
        })),
        Err(e) => fail(e),
    }
}

pub async fn run_scheduler(State(state): State<Arc<AppState>>) -> ApiResponse {
    let report = state.scheduler.run_once(Utc::now()).await;
    ok(json!({"ok": report.success, "report": report}))
}

pub async fn analytics(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.analytics() {
        Ok(analytics) => ok(json!({"ok": true, "analytics": analytics})),
        Err(e) => fail(e),
    }
}

// ---- QR codes ----

#[derive(Debug, Default, Deserialize)]
pub struct QrQuery {
    /// Defaults to the public form URL.
    #[serde(default)]
    pub text: Option<String>,
}

pub async fn generate_qr(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QrQuery>,
) -> ApiResponse {
    let text = query
        .text
        .unwrap_or_else(|| state.config.gateway.public_form_url.clone());
    match lotus_intake::generate_qr_data_url(&text) {
        Ok(data_url) => ok(json!({"ok": true, "text": text, "data_url": data_url})),
        Err(e) => fail(e),
    }
}

pub async fn list_qr_codes(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.list_qr_codes() {
        Ok(codes) => ok(json!({"ok": true, "qr_codes": codes})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct NewQrCode {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create_qr_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewQrCode>,
) -> ApiResponse {
    // Render first so an unencodable URL never leaves a stored row behind.
    let data_url = match lotus_intake::generate_qr_data_url(&body.url) {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    match state.db.create_qr_code(
        &body.name,
        &body.url,
        body.description.as_deref(),
        Utc::now(),
    ) {
        Ok(record) => created(json!({"ok": true, "qr_code": record, "data_url": data_url})),
        Err(e) => fail(e),
    }
}

/// One stored code with its rendered image.
pub async fn get_qr_code(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    let record = match state.db.get_qr_code(&id) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };
    match lotus_intake::generate_qr_data_url(&record.url) {
        Ok(data_url) => ok(json!({"ok": true, "qr_code": record, "data_url": data_url})),
        Err(e) => fail(e),
    }
}

pub async fn set_qr_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveToggle>,
) -> ApiResponse {
    match state.db.set_qr_active(&id, body.active, Utc::now()) {
        Ok(record) => ok(json!({"ok": true, "qr_code": record})),
        Err(e) => fail(e),
    }
}

pub async fn delete_qr_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.delete_qr_code(&id) {
        Ok(()) => ok(json!({"ok": true, "deleted": id})),
        Err(e) => fail(e),
    }
}

/// Count the scan and send the visitor on to the target URL.
pub async fn qr_redirect(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.db.record_scan(&id, Utc::now()) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => fail(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use lotus_channels::SenderSet;
    use lotus_core::LotusConfig;
    use lotus_db::CrmDb;
    use tower::ServiceExt;

    fn test_state(api_key: Option<&str>) -> AppState {
        let mut config = LotusConfig::default();
        config.gateway.api_key = api_key.map(String::from);
        config.scheduler.enabled = false;
        let db = Arc::new(CrmDb::open_in_memory().unwrap());
        AppState::with_senders(config, db, SenderSet::new())
    }

    async fn call(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(key) = &state.api_key {
            req = req.header("X-Api-Key", key);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn lead_form() -> Value {
        json!({
            "name": "Maya Patel",
            "email": "maya@example.com",
            "phone": "+15551234567",
            "referralSource": "Instagram",
            "segment": "prenatal",
        })
    }

    // ---- Health & Info ----

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check().await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "lotus-gateway");
    }

    #[tokio::test]
    async fn test_system_info() {
        let state = test_state(None);
        let (status, json) = call(&state, "GET", "/api/v1/info", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Lotus Yoga Studio");
        assert!(json["uptime_secs"].is_number());
    }

    // ---- Auth ----

    #[tokio::test]
    async fn test_api_key_required_for_admin_routes() {
        let state = test_state(Some("s3cret"));
        let req = Request::builder()
            .uri("/api/v1/leads")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/leads?key=s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let (status, _) = call(&state, "GET", "/api/v1/leads", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_form_needs_no_key() {
        let state = test_state(Some("s3cret"));
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/leads")
            .header("content-type", "application/json")
            .body(Body::from(lead_form().to_string()))
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    // ---- Leads ----

    #[tokio::test]
    async fn test_capture_and_manage_lead() {
        let state = test_state(None);
        let (status, json) = call(&state, "POST", "/api/v1/leads", Some(lead_form())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["welcome"], "sequence");
        let id = json["lead"]["id"].as_str().unwrap().to_string();

        let (_, json) = call(&state, "GET", "/api/v1/leads?q=maya", None).await;
        assert_eq!(json["count"], 1);

        let (status, json) = call(
            &state,
            "PUT",
            &format!("/api/v1/leads/{id}/status"),
            Some(json!({"status": "contacted"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lead"]["status"], "contacted");
        assert!(json["lead"]["last_contacted_at"].is_string());

        let (_, json) = call(
            &state,
            "PUT",
            &format!("/api/v1/leads/{id}/notes"),
            Some(json!({"notes": "prefers evenings"})),
        )
        .await;
        assert_eq!(json["lead"]["notes"], "prefers evenings");

        let (_, json) = call(&state, "GET", &format!("/api/v1/leads/{id}/history"), None).await;
        assert_eq!(json["communications"].as_array().unwrap().len(), 1);

        let (status, _) = call(&state, "DELETE", &format!("/api/v1/leads/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, json) = call(&state, "GET", &format!("/api/v1/leads/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_invalid_form_is_bad_request() {
        let state = test_state(None);
        let (status, json) = call(
            &state,
            "POST",
            "/api/v1/leads",
            Some(json!({"name": "A", "email": "not-an-email", "phone": "1", "source": "Walk-in"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("invalid email"));
    }

    #[tokio::test]
    async fn test_trigger_uses_lead_segment() {
        let state = test_state(None);
        let (_, json) = call(&state, "POST", "/api/v1/leads", Some(lead_form())).await;
        let id = json["lead"]["id"].as_str().unwrap().to_string();

        let (status, json) = call(
            &state,
            "POST",
            &format!("/api/v1/leads/{id}/trigger"),
            Some(json!({"trigger": "new-lead"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!json["queued"].as_array().unwrap().is_empty());

        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/leads/missing/trigger",
            Some(json!({"trigger": "new-lead"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lead_stats() {
        let state = test_state(None);
        call(&state, "POST", "/api/v1/leads", Some(lead_form())).await;
        let (_, json) = call(&state, "GET", "/api/v1/leads/stats", None).await;
        assert_eq!(json["stats"]["total"], 1);
        assert_eq!(json["stats"]["today"], 1);
    }

    // ---- Customers ----

    #[tokio::test]
    async fn test_csv_import_and_search() {
        let state = test_state(None);
        let csv = "Client Name,First Name,Last Name,Client Email,Marketing Email Opt-in\n\
                   ,Ana,Lopez,ana@x.com,yes\n\
                   ,Ben,Ray,,no\n";
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/customers/import")
            .body(Body::from(csv))
            .unwrap();
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["report"]["imported"], 1);
        assert_eq!(json["report"]["errors"], 1);

        let (_, json) = call(&state, "GET", "/api/v1/customers?q=lopez", None).await;
        assert_eq!(json["count"], 1);
        let (_, json) = call(&state, "GET", "/api/v1/customers/stats", None).await;
        assert_eq!(json["stats"]["marketing_consent"], 1);
    }

    #[tokio::test]
    async fn test_empty_import_is_bad_request() {
        let state = test_state(None);
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/customers/import")
            .body(Body::from("First Name,Client Email\nNo,\n"))
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // ---- Templates & Sequences ----

    #[tokio::test]
    async fn test_template_crud() {
        let state = test_state(None);
        let (status, json) = call(
            &state,
            "POST",
            "/api/v1/templates",
            Some(json!({
                "name": "Workshop invite",
                "subject": "Join us",
                "content": "Hi {{name}}, join our workshop!",
                "kind": "follow-up",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["template"]["delay_hours"], 2);
        let id = json["template"]["id"].as_str().unwrap().to_string();

        let (_, json) = call(
            &state,
            "PUT",
            &format!("/api/v1/templates/{id}"),
            Some(json!({
                "name": "Workshop invite",
                "subject": "Join us Saturday",
                "content": "Hi {{name}}!",
                "kind": "follow-up",
                "is_active": false,
            })),
        )
        .await;
        assert_eq!(json["template"]["subject"], "Join us Saturday");

        let (status, _) = call(&state, "DELETE", &format!("/api/v1/templates/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&state, "GET", &format!("/api/v1/templates/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sequence_lifecycle() {
        let state = test_state(None);
        let (status, json) = call(
            &state,
            "POST",
            "/api/v1/sequences",
            Some(json!({
                "name": "Seniors welcome",
                "trigger_type": "new-lead",
                "segment": "seniors",
                "steps": [{"template_id": "welcome-general", "delay_hours": 0}],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["sequence"]["id"].as_str().unwrap().to_string();
        assert_eq!(json["sequence"]["steps"].as_array().unwrap().len(), 1);

        let (_, json) = call(
            &state,
            "PUT",
            &format!("/api/v1/sequences/{id}/active"),
            Some(json!({"active": false})),
        )
        .await;
        assert_eq!(json["sequence"]["is_active"], false);

        let (status, _) = call(&state, "DELETE", &format!("/api/v1/sequences/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &state,
            "POST",
            "/api/v1/sequences",
            Some(json!({"name": "Empty", "trigger_type": "new-lead", "steps": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // ---- Messaging ----

    #[tokio::test]
    async fn test_queue_without_senders_fails_due_messages() {
        let state = test_state(None);
        call(&state, "POST", "/api/v1/leads", Some(lead_form())).await;

        let (status, json) = call(&state, "POST", "/api/v1/queue/process?channel=whatsapp", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["processed"], 0);

        let (_, json) = call(&state, "GET", "/api/v1/communications?status=failed", None).await;
        for row in json["communications"].as_array().unwrap() {
            assert_eq!(row["error_message"], "no sender configured for whatsapp");
        }
    }

    #[tokio::test]
    async fn test_scheduler_run_and_analytics() {
        let state = test_state(None);
        call(&state, "POST", "/api/v1/leads", Some(lead_form())).await;

        let (status, json) = call(&state, "POST", "/api/v1/scheduler/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["report"]["timestamp"].is_string());

        let (_, json) = call(&state, "GET", "/api/v1/analytics", None).await;
        assert_eq!(json["analytics"]["total_leads"], 1);
        assert_eq!(json["analytics"]["lead_sources"][0]["key"], "Instagram");
    }

    // ---- QR ----

    #[tokio::test]
    async fn test_generate_qr_defaults_to_form_url() {
        let state = test_state(None);
        let (_, json) = call(&state, "GET", "/api/v1/qr", None).await;
        assert_eq!(json["text"], state.config.gateway.public_form_url.as_str());
        assert!(
            json["data_url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/svg+xml;base64,")
        );
    }

    #[tokio::test]
    async fn test_qr_redirect_counts_scans() {
        let state = test_state(Some("s3cret"));
        let (status, json) = call(
            &state,
            "POST",
            "/api/v1/qr-codes",
            Some(json!({"name": "Front desk", "url": "https://studio.example/join"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json["qr_code"]["id"].as_str().unwrap().to_string();

        // Scans are public.
        let req = Request::builder()
            .uri(format!("/q/{id}"))
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            resp.headers().get("location").unwrap(),
            "https://studio.example/join"
        );

        let (_, json) = call(&state, "GET", "/api/v1/qr-codes", None).await;
        assert_eq!(json["qr_codes"][0]["scan_count"], 1);

        call(
            &state,
            "PUT",
            &format!("/api/v1/qr-codes/{id}/active"),
            Some(json!({"active": false})),
        )
        .await;
        let req = Request::builder()
            .uri(format!("/q/{id}"))
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unusable_qr_target_stores_nothing() {
        let state = test_state(None);
        let too_long = format!("https://studio.example/{}", "x".repeat(5000));
        for url in [too_long.as_str(), "https://studio.example/\r\nX-Injected: 1"] {
            let (status, json) = call(
                &state,
                "POST",
                "/api/v1/qr-codes",
                Some(json!({"name": "Poster", "url": url})),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["ok"], false);
        }
        let (_, json) = call(&state, "GET", "/api/v1/qr-codes", None).await;
        assert_eq!(json["qr_codes"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_get_qr_code_renders_image() {
        let state = test_state(None);
        let (_, json) = call(
            &state,
            "POST",
            "/api/v1/qr-codes",
            Some(json!({"name": "Lobby", "url": "https://studio.example/join"})),
        )
        .await;
        let id = json["qr_code"]["id"].as_str().unwrap().to_string();

        let (status, json) = call(&state, "GET", &format!("/api/v1/qr-codes/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["qr_code"]["name"], "Lobby");
        assert!(
            json["data_url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/svg+xml;base64,")
        );

        let (status, _) = call(&state, "GET", "/api/v1/qr-codes/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_match_sequence_prefers_segment() {
        let state = test_state(None);
        let (status, json) = call(
            &state,
            "GET",
            "/api/v1/sequences/match?trigger=new-lead&segment=prenatal",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["sequence"]["id"], "seq-new-lead-prenatal");

        let (_, json) = call(&state, "GET", "/api/v1/sequences/match?trigger=new-lead", None).await;
        assert_eq!(json["sequence"]["id"], "seq-new-lead");

        call(
            &state,
            "PUT",
            "/api/v1/sequences/seq-reengagement/active",
            Some(json!({"active": false})),
        )
        .await;
        let (status, json) = call(
            &state,
            "GET",
            "/api/v1/sequences/match?trigger=inactive-90-days",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["ok"], false);
    }
}
