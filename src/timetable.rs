use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::NaiveTime;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct SlotRecord {
    id: i32,
    class_id: i32,
    teacher_id: Option<i32>,
    subject: String,
    weekday: i16,
    starts_at: NaiveTime,
    ends_at: NaiveTime,
}

#[derive(Debug, Deserialize)]
struct CreateSlotRequest {
    class_id: i32,
    teacher_id: Option<i32>,
    subject: String,
    weekday: i16,
    starts_at: NaiveTime,
    ends_at: NaiveTime,
}

#[post("")]
async fn create_slot(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateSlotRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.subject.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Subject is required".to_string(),
        });
    }
    if !(1..=7).contains(&body.weekday) {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Weekday must be between 1 (Monday) and 7 (Sunday)".to_string(),
        });
    }
    if body.ends_at <= body.starts_at {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "ends_at must be after starts_at".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO timetable_slots (class_id, teacher_id, subject, weekday, starts_at, ends_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (class_id, weekday, starts_at) DO NOTHING
         RETURNING id",
    )
    .bind(body.class_id)
    .bind(body.teacher_id)
    .bind(body.subject.trim())
    .bind(body.weekday)
    .bind(body.starts_at)
    .bind(body.ends_at)
    .fetch_optional(&app_state.db)
    .await;

    match inserted {
        Ok(Some(id)) => {
            activity::record(&app_state.db, &claims.sub, "create_slot", &format!("slot:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Ok(None) => HttpResponse::BadRequest().json(ErrorResponse {
            error: "The class already has a period at this time".to_string(),
        }),
        Err(e) => {
            error!("Failed to create timetable slot: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create timetable slot".to_string(),
            })
        }
    }
}

#[get("/class/{class_id}")]
async fn class_timetable(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let slots = sqlx::query_as::<_, SlotRecord>(
        "SELECT id, class_id, teacher_id, subject, weekday, starts_at, ends_at
         FROM timetable_slots
         WHERE class_id = $1
         ORDER BY weekday, starts_at",
    )
    .bind(path.into_inner())
    .fetch_all(&app_state.db)
    .await;

    match slots {
        Ok(slots) => HttpResponse::Ok().json(slots),
        Err(e) => {
            error!("Failed to list timetable: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list timetable".to_string(),
            })
        }
    }
}

#[get("/teacher/{teacher_id}")]
async fn teacher_timetable(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let slots = sqlx::query_as::<_, SlotRecord>(
        "SELECT id, class_id, teacher_id, subject, weekday, starts_at, ends_at
         FROM timetable_slots
         WHERE teacher_id = $1
         ORDER BY weekday, starts_at",
    )
    .bind(path.into_inner())
    .fetch_all(&app_state.db)
    .await;

    match slots {
        Ok(slots) => HttpResponse::Ok().json(slots),
        Err(e) => {
            error!("Failed to list timetable: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list timetable".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_slot(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let slot_id = path.into_inner();

    let result = sqlx::query("DELETE FROM timetable_slots WHERE id = $1")
        .bind(slot_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(&app_state.db, &claims.sub, "delete_slot", &format!("slot:{}", slot_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Slot deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Slot not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete slot: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete slot".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/timetable")
            .service(create_slot)
            .service(class_timetable)
            .service(teacher_timetable)
            .service(delete_slot),
    );
}
