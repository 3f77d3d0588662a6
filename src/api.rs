use std::{sync::Arc, time::Duration};

use axum::{
    extract::{FromRequest, FromRequestParts, Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::completion::compute_completion;
use crate::config::Config;
use crate::db::{self, EspSessionInsert};
use crate::error::ApiError;
use crate::export;
use crate::forecast::{self, ForecastResult};
use crate::models::{
    validate_readings, CarbonBrushMeasurement, Equipment, EquipmentKind, EspReading, EspSession,
    EspSessionDetail, NewCarbonBrushMeasurement, NewEquipment, NewEspSession, NewThermography,
    NewWindingResistance, ThermographyView, UpdateEspSession, WindingResistanceView,
    ESP_MEANINGFUL_FIELDS,
};
use crate::report::{self, Dashboard};

type ApiResult<T> = Result<T, ApiError>;

/// JSON body whose rejections are reported as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
struct ApiPath<T>(T);

/// Handles shared by every request. The pool is the single record-store
/// handle for the process.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/api/dashboard", get(dashboard))
        .route("/api/equipment", get(list_equipment).post(create_equipment))
        .route("/api/equipment/{id}", get(get_equipment))
        .route("/api/equipment/{id}/qr", get(equipment_label))
        .route("/api/equipment/{id}/forecast", get(equipment_forecast))
        .route(
            "/api/equipment/{id}/carbon-brush",
            get(list_carbon_brush).post(create_carbon_brush),
        )
        .route("/api/equipment/{id}/carbon-brush/export", get(export_carbon_brush))
        .route(
            "/api/equipment/{id}/winding-resistance",
            get(list_winding_resistance).post(create_winding_resistance),
        )
        .route(
            "/api/equipment/{id}/thermography",
            get(list_thermography).post(create_thermography),
        )
        .route("/api/esp-sessions", get(list_esp_sessions).post(create_esp_session))
        .route(
            "/api/esp-sessions/{id}",
            get(get_esp_session).put(update_esp_session).delete(delete_esp_session),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<Json<Dashboard>> {
    let equipment = db::list_equipment(&state.pool).await?;
    let histories = db::all_wear_histories(&state.pool).await?;
    let sessions = db::list_esp_sessions(&state.pool).await?;

    Ok(Json(report::build_dashboard(equipment, &histories, sessions, Utc::now())))
}

async fn list_equipment(State(state): State<AppState>) -> ApiResult<Json<Vec<Equipment>>> {
    Ok(Json(db::list_equipment(&state.pool).await?))
}

async fn create_equipment(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<NewEquipment>,
) -> ApiResult<(StatusCode, Json<Equipment>)> {
    payload.validate().map_err(ApiError::BadRequest)?;
    let saved = db::upsert_equipment(&state.pool, &payload).await?;
    info!(tag = %saved.tag, id = %saved.id, "equipment saved");
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn get_equipment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Equipment>> {
    Ok(Json(db::get_equipment(&state.pool, id).await?))
}

#[derive(Serialize)]
struct EquipmentLabel {
    tag: String,
    url: String,
}

/// Payload to encode in the equipment's QR label.
async fn equipment_label(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<EquipmentLabel>> {
    let equipment = db::get_equipment(&state.pool, id).await?;
    Ok(Json(EquipmentLabel {
        url: format!("{}/equipment/{}", state.config.public_base_url, equipment.id),
        tag: equipment.tag,
    }))
}

#[derive(Serialize)]
struct ForecastResponse {
    equipment: Equipment,
    forecast: Option<ForecastResult>,
}

async fn equipment_forecast(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<ForecastResponse>> {
    let equipment = db::get_equipment(&state.pool, id).await?;
    let history = db::wear_history(&state.pool, id).await?;

    Ok(Json(ForecastResponse {
        equipment,
        forecast: forecast::forecast(&history),
    }))
}

async fn list_carbon_brush(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<CarbonBrushMeasurement>>> {
    db::get_equipment(&state.pool, id).await?;
    Ok(Json(db::list_carbon_brush(&state.pool, id).await?))
}

async fn create_carbon_brush(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<NewCarbonBrushMeasurement>,
) -> ApiResult<(StatusCode, Json<CarbonBrushMeasurement>)> {
    payload.validate().map_err(ApiError::BadRequest)?;
    db::get_equipment(&state.pool, id).await?;
    let saved = db::insert_carbon_brush(&state.pool, id, &payload).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

async fn export_carbon_brush(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let equipment = db::get_equipment(&state.pool, id).await?;
    let measurements = db::list_carbon_brush(&state.pool, id).await?;
    let sheet = export::carbon_brush_csv(&equipment, &measurements)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export::export_file_name(&equipment)),
            ),
        ],
        sheet,
    ))
}

async fn list_winding_resistance(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<WindingResistanceView>>> {
    db::get_equipment(&state.pool, id).await?;
    let records = db::list_winding_resistance(&state.pool, id).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

async fn create_winding_resistance(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<NewWindingResistance>,
) -> ApiResult<(StatusCode, Json<WindingResistanceView>)> {
    payload.validate().map_err(ApiError::BadRequest)?;
    db::get_equipment(&state.pool, id).await?;
    let saved = db::insert_winding_resistance(&state.pool, id, &payload).await?;
    Ok((StatusCode::CREATED, Json(saved.into())))
}

async fn list_thermography(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<ThermographyView>>> {
    db::get_equipment(&state.pool, id).await?;
    let records = db::list_thermography(&state.pool, id).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

async fn create_thermography(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<NewThermography>,
) -> ApiResult<(StatusCode, Json<ThermographyView>)> {
    payload.validate().map_err(ApiError::BadRequest)?;
    db::get_equipment(&state.pool, id).await?;
    let saved = db::insert_thermography(&state.pool, id, &payload).await?;
    Ok((StatusCode::CREATED, Json(saved.into())))
}

async fn list_esp_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<EspSession>>> {
    Ok(Json(db::list_esp_sessions(&state.pool).await?))
}

async fn create_esp_session(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<NewEspSession>,
) -> ApiResult<(StatusCode, Json<EspSessionDetail>)> {
    let total_steps = payload
        .total_steps
        .unwrap_or(state.config.esp_steps_per_session);
    if total_steps < 1 {
        return Err(ApiError::BadRequest("total_steps must be at least 1".to_string()));
    }
    let completion = session_completion(&payload.readings, total_steps)?;

    let equipment = db::get_equipment(&state.pool, payload.equipment_id).await?;
    ensure_precipitator(&equipment)?;
    let detail = db::create_esp_session(
        &state.pool,
        EspSessionInsert {
            equipment_id: payload.equipment_id,
            inspected_at: payload.inspected_at.unwrap_or_else(Utc::now),
            inspector: payload.inspector.as_deref(),
            total_steps,
            readings: &payload.readings,
            completion,
        },
    )
    .await?;

    info!(
        session = %detail.session.id,
        completed_steps = completion.completed_steps,
        is_complete = completion.is_complete,
        "ESP session created"
    );
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_esp_session(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<EspSessionDetail>> {
    Ok(Json(db::get_esp_session(&state.pool, id).await?))
}

async fn update_esp_session(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateEspSession>,
) -> ApiResult<Json<EspSessionDetail>> {
    let existing = db::get_esp_session(&state.pool, id).await?;
    let completion = session_completion(&payload.readings, existing.session.total_steps)?;

    let detail = db::replace_esp_readings(
        &state.pool,
        id,
        payload.inspector.as_deref(),
        &payload.readings,
        completion,
    )
    .await?;
    Ok(Json(detail))
}

async fn delete_esp_session(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    db::delete_esp_session(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn ensure_precipitator(equipment: &Equipment) -> ApiResult<()> {
    if equipment.kind != EquipmentKind::Esp {
        return Err(ApiError::BadRequest(format!(
            "{} is not an electrostatic precipitator",
            equipment.tag
        )));
    }
    Ok(())
}

fn session_completion(
    readings: &[EspReading],
    total_steps: i32,
) -> ApiResult<crate::completion::CompletionState> {
    validate_readings(readings, total_steps).map_err(ApiError::BadRequest)?;
    let steps: Vec<_> = readings.iter().map(EspReading::to_step).collect();
    Ok(compute_completion(&steps, total_steps, ESP_MEANINGFUL_FIELDS))
}
