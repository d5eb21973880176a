use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::fees::ledger::FeeSchedule;
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct ClassRecord {
    id: i32,
    name: String,
    level: Option<String>,
    teacher_id: Option<i32>,
    academic_year: Option<String>,
    registration_fee: Decimal,
    bus_fee: Decimal,
    internship_fee: Decimal,
    remedial_fee: Decimal,
    tuition_fee: Decimal,
    pta_fee: Decimal,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateClassRequest {
    name: String,
    level: Option<String>,
    teacher_id: Option<i32>,
    academic_year: Option<String>,
    #[serde(default)]
    registration_fee: Decimal,
    #[serde(default)]
    bus_fee: Decimal,
    #[serde(default)]
    internship_fee: Decimal,
    #[serde(default)]
    remedial_fee: Decimal,
    #[serde(default)]
    tuition_fee: Decimal,
    #[serde(default)]
    pta_fee: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpdateClassRequest {
    name: Option<String>,
    level: Option<String>,
    teacher_id: Option<i32>,
    academic_year: Option<String>,
    registration_fee: Option<Decimal>,
    bus_fee: Option<Decimal>,
    internship_fee: Option<Decimal>,
    remedial_fee: Option<Decimal>,
    tuition_fee: Option<Decimal>,
    pta_fee: Option<Decimal>,
}

fn validate_schedule(schedule: &FeeSchedule) -> Result<(), HttpResponse> {
    let amounts = [
        schedule.registration_fee,
        schedule.bus_fee,
        schedule.internship_fee,
        schedule.remedial_fee,
        schedule.tuition_fee,
        schedule.pta_fee,
    ];
    if amounts.iter().any(|a| *a < Decimal::ZERO) {
        return Err(HttpResponse::BadRequest().json(ErrorResponse {
            error: "Fee amounts must not be negative".to_string(),
        }));
    }
    Ok(())
}

#[post("")]
async fn create_class(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateClassRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Class name is required".to_string(),
        });
    }

    let schedule = FeeSchedule {
        registration_fee: body.registration_fee,
        bus_fee: body.bus_fee,
        internship_fee: body.internship_fee,
        remedial_fee: body.remedial_fee,
        tuition_fee: body.tuition_fee,
        pta_fee: body.pta_fee,
    };
    if let Err(response) = validate_schedule(&schedule) {
        return response;
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO classes (name, level, teacher_id, academic_year,
             registration_fee, bus_fee, internship_fee, remedial_fee, tuition_fee, pta_fee)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
         ON CONFLICT (name) DO NOTHING
         RETURNING id",
    )
    .bind(body.name.trim())
    .bind(&body.level)
    .bind(body.teacher_id)
    .bind(&body.academic_year)
    .bind(schedule.registration_fee)
    .bind(schedule.bus_fee)
    .bind(schedule.internship_fee)
    .bind(schedule.remedial_fee)
    .bind(schedule.tuition_fee)
    .bind(schedule.pta_fee)
    .fetch_optional(&app_state.db)
    .await;

    match inserted {
        Ok(Some(id)) => {
            activity::record(&app_state.db, &claims.sub, "create_class", &format!("class:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Ok(None) => HttpResponse::BadRequest().json(ErrorResponse {
            error: "A class with this name already exists".to_string(),
        }),
        Err(e) => {
            error!("Failed to create class: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create class".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_classes(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let classes = sqlx::query_as::<_, ClassRecord>(
        "SELECT id, name, level, teacher_id, academic_year,
                registration_fee, bus_fee, internship_fee, remedial_fee, tuition_fee, pta_fee,
                created_at
         FROM classes ORDER BY name",
    )
    .fetch_all(&app_state.db)
    .await;

    match classes {
        Ok(classes) => HttpResponse::Ok().json(classes),
        Err(e) => {
            error!("Failed to list classes: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list classes".to_string(),
            })
        }
    }
}

#[get("/{id}")]
async fn get_class(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let class = sqlx::query_as::<_, ClassRecord>(
        "SELECT id, name, level, teacher_id, academic_year,
                registration_fee, bus_fee, internship_fee, remedial_fee, tuition_fee, pta_fee,
                created_at
         FROM classes WHERE id = $1",
    )
    .bind(path.into_inner())
    .fetch_optional(&app_state.db)
    .await;

    match class {
        Ok(Some(class)) => HttpResponse::Ok().json(class),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Class not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to fetch class: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch class".to_string(),
            })
        }
    }
}

/// Class update is the only path that mutates the fee schedule.
#[put("/{id}")]
async fn update_class(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateClassRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let class_id = path.into_inner();

    let current = sqlx::query_as::<_, ClassRecord>(
        "SELECT id, name, level, teacher_id, academic_year,
                registration_fee, bus_fee, internship_fee, remedial_fee, tuition_fee, pta_fee,
                created_at
         FROM classes WHERE id = $1",
    )
    .bind(class_id)
    .fetch_optional(&app_state.db)
    .await;

    let current = match current {
        Ok(Some(current)) => current,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                error: "Class not found".to_string(),
            });
        }
        Err(e) => {
            error!("Failed to fetch class: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let schedule = FeeSchedule {
        registration_fee: body.registration_fee.unwrap_or(current.registration_fee),
        bus_fee: body.bus_fee.unwrap_or(current.bus_fee),
        internship_fee: body.internship_fee.unwrap_or(current.internship_fee),
        remedial_fee: body.remedial_fee.unwrap_or(current.remedial_fee),
        tuition_fee: body.tuition_fee.unwrap_or(current.tuition_fee),
        pta_fee: body.pta_fee.unwrap_or(current.pta_fee),
    };
    if let Err(response) = validate_schedule(&schedule) {
        return response;
    }

    let result = sqlx::query(
        "UPDATE classes SET
             name = $1, level = $2, teacher_id = $3, academic_year = $4,
             registration_fee = $5, bus_fee = $6, internship_fee = $7,
             remedial_fee = $8, tuition_fee = $9, pta_fee = $10
         WHERE id = $11",
    )
    .bind(body.name.as_deref().unwrap_or(&current.name))
    .bind(body.level.clone().or_else(|| current.level.clone()))
    .bind(body.teacher_id.or(current.teacher_id))
    .bind(body.academic_year.clone().or_else(|| current.academic_year.clone()))
    .bind(schedule.registration_fee)
    .bind(schedule.bus_fee)
    .bind(schedule.internship_fee)
    .bind(schedule.remedial_fee)
    .bind(schedule.tuition_fee)
    .bind(schedule.pta_fee)
    .bind(class_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(_) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "update_class",
                &format!("class:{}", class_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Class updated" }))
        }
        Err(e) => {
            error!("Failed to update class: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update class".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_class(
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

    let class_id = path.into_inner();

    let has_students = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM students WHERE class_id = $1)",
    )
    .bind(class_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(has_students) => has_students,
        Err(e) => {
            error!("Failed to check class {} for students: {}", class_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if has_students {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Cannot delete a class that still has students".to_string(),
        });
    }

    let result = sqlx::query("DELETE FROM classes WHERE id = $1")
        .bind(class_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "delete_class",
                &format!("class:{}", class_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Class deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Class not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete class: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete class".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/classes")
            .service(create_class)
            .service(list_classes)
            .service(get_class)
            .service(update_class)
            .service(delete_class),
    );
}
