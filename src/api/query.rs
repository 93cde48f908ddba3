use crate::mission::{MissionAttributes, MissionObject, ObjectId};
use crate::world::MissionRegistry;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state for the read-only mission inspection API
pub struct QueryAppState {
    pub registry: Arc<MissionRegistry>,
}

/// Mission response
#[derive(Serialize)]
pub struct MissionResponse {
    pub object_id: ObjectId,
    pub planet: String,
    pub template: String,
    pub sequence: u32,
    pub observers: usize,
    pub attributes: MissionAttributes,
}

impl From<&MissionObject> for MissionResponse {
    fn from(mission: &MissionObject) -> Self {
        Self {
            object_id: mission.object_id(),
            planet: mission.planet().to_string(),
            template: mission.template().to_string(),
            sequence: mission.sequence(),
            observers: mission.observer_count(),
            attributes: mission.attributes(),
        }
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create query API router
pub fn create_query_router(state: Arc<QueryAppState>) -> Router {
    Router::new()
        .route("/api/missions", get(list_missions))
        .route("/api/missions/:id", get(get_mission))
        .with_state(state)
}

/// GET /api/missions - List all live missions, ordered by object id
async fn list_missions(State(state): State<Arc<QueryAppState>>) -> Json<Vec<MissionResponse>> {
    let missions = state
        .registry
        .object_ids()
        .into_iter()
        .filter_map(|id| state.registry.get(id))
        .map(|mission| MissionResponse::from(mission.as_ref()))
        .collect();

    Json(missions)
}

/// GET /api/missions/:id - Get specific mission
async fn get_mission(
    State(state): State<Arc<QueryAppState>>,
    Path(id): Path<u64>,
) -> Result<Json<MissionResponse>, QueryError> {
    let mission = state
        .registry
        .get(ObjectId(id))
        .ok_or(QueryError::NotFound)?;

    Ok(Json(MissionResponse::from(mission.as_ref())))
}

/// Query error types
#[derive(Debug)]
enum QueryError {
    NotFound,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            QueryError::NotFound => (StatusCode::NOT_FOUND, "Mission not found"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
        });

        (status, body).into_response()
    }
}
