//! Instructor roster, class timetable, substitute cover and payroll routes.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use lotus_core::staff::{NewClass, NewInstructor, SubstituteStatus};
use lotus_db::{ClassFilter, PayrollFilter};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::routes::{ActiveToggle, ApiResponse, created, fail, ok};
use crate::server::AppState;

// ---- Instructors ----

#[derive(Debug, Default, Deserialize)]
pub struct InstructorQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub active: bool,
}

pub async fn list_instructors(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InstructorQuery>,
) -> ApiResponse {
    match state.db.list_instructors(query.q.as_deref(), query.active) {
        Ok(instructors) => ok(json!({"ok": true, "count": instructors.len(), "instructors": instructors})),
        Err(e) => fail(e),
    }
}

pub async fn create_instructor(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewInstructor>,
) -> ApiResponse {
    match state.db.create_instructor(&body, Utc::now()) {
        Ok(instructor) => created(json!({"ok": true, "instructor": instructor})),
        Err(e) => fail(e),
    }
}

pub async fn get_instructor(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.get_instructor(&id) {
        Ok(instructor) => ok(json!({"ok": true, "instructor": instructor})),
        Err(e) => fail(e),
    }
}

pub async fn update_instructor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NewInstructor>,
) -> ApiResponse {
    match state.db.update_instructor(&id, &body, Utc::now()) {
        Ok(instructor) => ok(json!({"ok": true, "instructor": instructor})),
        Err(e) => fail(e),
    }
}

pub async fn set_instructor_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveToggle>,
) -> ApiResponse {
    match state.db.set_instructor_active(&id, body.active, Utc::now()) {
        Ok(instructor) => ok(json!({"ok": true, "instructor": instructor})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentQuery {
    #[serde(default)]
    pub student_count: i64,
    #[serde(default)]
    pub substitute: bool,
}

/// Preview what a class would pay at the instructor's current rates.
pub async fn instructor_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<PaymentQuery>,
) -> ApiResponse {
    match state
        .db
        .calculate_instructor_payment(&id, query.student_count, query.substitute)
    {
        Ok(payment) => ok(json!({"ok": true, "payment": payment})),
        Err(e) => fail(e),
    }
}

// ---- Classes ----

pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ClassFilter>,
) -> ApiResponse {
    match state.db.list_classes(&filter) {
        Ok(classes) => ok(json!({"ok": true, "count": classes.len(), "classes": classes})),
        Err(e) => fail(e),
    }
}

pub async fn create_class(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewClass>,
) -> ApiResponse {
    match state.db.create_class(&body, Utc::now()) {
        Ok(class) => created(json!({"ok": true, "class": class})),
        Err(e) => fail(e),
    }
}

pub async fn get_class(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.get_class(&id) {
        Ok(class) => ok(json!({"ok": true, "class": class})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteClass {
    pub student_count: i64,
}

pub async fn complete_class(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CompleteClass>,
) -> ApiResponse {
    match state.db.complete_class(&id, body.student_count, Utc::now()) {
        Ok(class) => ok(json!({"ok": true, "class": class})),
        Err(e) => fail(e),
    }
}

pub async fn cancel_class(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.cancel_class(&id, Utc::now()) {
        Ok(class) => ok(json!({"ok": true, "class": class})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CoverRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn request_substitute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CoverRequest>,
) -> ApiResponse {
    match state.db.request_substitute(&id, body.reason.as_deref(), Utc::now()) {
        Ok(request) => created(json!({"ok": true, "request": request})),
        Err(e) => fail(e),
    }
}

pub async fn generate_payroll(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResponse {
    match state.db.generate_payroll(&id, Utc::now()) {
        Ok(record) => created(json!({"ok": true, "payroll": record})),
        Err(e) => fail(e),
    }
}

// ---- Substitute requests ----

#[derive(Debug, Default, Deserialize)]
pub struct SubstituteQuery {
    #[serde(default)]
    pub status: Option<SubstituteStatus>,
}

pub async fn list_substitutes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubstituteQuery>,
) -> ApiResponse {
    match state.db.list_substitute_requests(query.status) {
        Ok(requests) => ok(json!({"ok": true, "count": requests.len(), "requests": requests})),
        Err(e) => fail(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct FillRequest {
    pub instructor_id: String,
}

pub async fn fill_substitute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<FillRequest>,
) -> ApiResponse {
    match state.db.fill_substitute(&id, &body.instructor_id, Utc::now()) {
        Ok(request) => ok(json!({"ok": true, "request": request})),
        Err(e) => fail(e),
    }
}

pub async fn escalate_substitute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.escalate_substitute(&id, Utc::now()) {
        Ok(request) => ok(json!({"ok": true, "request": request})),
        Err(e) => fail(e),
    }
}

pub async fn cancel_substitute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.cancel_substitute(&id, Utc::now()) {
        Ok(request) => ok(json!({"ok": true, "request": request})),
        Err(e) => fail(e),
    }
}

// ---- Payroll ----

pub async fn list_payroll(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PayrollFilter>,
) -> ApiResponse {
    match state.db.list_payroll(&filter) {
        Ok(records) => {
            let total: f64 = records.iter().map(|r| r.total_payment).sum();
            ok(json!({
                "ok": true,
                "count": records.len(),
                "total_payment": (total * 100.0).round() / 100.0,
                "payroll": records,
            }))
        }
        Err(e) => fail(e),
    }
}

pub async fn mark_payroll_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.db.mark_payroll_paid(&id, Utc::now()) {
        Ok(record) => ok(json!({"ok": true, "payroll": record})),
        Err(e) => fail(e),
    }
}
