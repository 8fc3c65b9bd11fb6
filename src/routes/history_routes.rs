use actix_web::{get, web, HttpResponse, Responder};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::errors::AppError;
use crate::history;
use crate::routes::error_response;

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[get("/api/sessions")]
pub async fn list_sessions(
    pool: web::Data<SqlitePool>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    match history::recent(&pool, limit).await {
        Ok(sessions) => HttpResponse::Ok().json(serde_json::json!({
            "ok": true,
            "sessions": sessions
        })),
        Err(e) => error_response(&AppError::History(e)),
    }
}
