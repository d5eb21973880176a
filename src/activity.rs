use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::auth::verify_token;
use crate::roles::ensure_privileged;
use crate::AppState;

/// Fire-and-forget audit insert. Runs alongside the primary operation;
/// a failed write is logged and never fails the caller.
pub fn record(pool: &PgPool, actor: &str, action: &str, target: &str) {
    let pool = pool.clone();
    let actor = actor.to_string();
    let action = action.to_string();
    let target = target.to_string();

    actix_web::rt::spawn(async move {
        let result = sqlx::query(
            "INSERT INTO activity_log (actor, action, target) VALUES ($1, $2, $3)",
        )
        .bind(&actor)
        .bind(&action)
        .bind(&target)
        .execute(&pool)
        .await;

        if let Err(e) = result {
            error!("Failed to write activity log ({} {} {}): {}", actor, action, target, e);
        }
    });
}

#[derive(Debug, Serialize, FromRow)]
struct ActivityEntry {
    id: i32,
    actor: String,
    action: String,
    target: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ListActivityQuery {
    limit: Option<i64>,
}

#[get("")]
async fn list_activity(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListActivityQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let entries = sqlx::query_as::<_, ActivityEntry>(
        "SELECT id, actor, action, target, created_at
         FROM activity_log ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&app_state.db)
    .await;

    match entries {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => {
            error!("Failed to list activity log: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to list activity log"
            }))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/activity").service(list_activity));
}
