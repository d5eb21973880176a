use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct TeacherRecord {
    id: i32,
    user_id: Option<i32>,
    first_name: String,
    last_name: String,
    subject: Option<String>,
    is_hod: bool,
    hired_on: Option<NaiveDate>,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateTeacherRequest {
    user_id: Option<i32>,
    first_name: String,
    last_name: String,
    subject: Option<String>,
    hired_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct UpdateTeacherRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    subject: Option<String>,
    hired_on: Option<NaiveDate>,
    status: Option<String>,
}

#[post("")]
async fn create_teacher(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateTeacherRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.first_name.trim().is_empty() || body.last_name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "First and last name are required".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO teachers (user_id, first_name, last_name, subject, hired_on)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(body.user_id)
    .bind(body.first_name.trim())
    .bind(body.last_name.trim())
    .bind(&body.subject)
    .bind(body.hired_on)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "create_teacher",
                &format!("teacher:{}", id),
            );
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create teacher: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create teacher".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_teachers(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let teachers = sqlx::query_as::<_, TeacherRecord>(
        "SELECT id, user_id, first_name, last_name, subject, is_hod, hired_on, status, created_at
         FROM teachers ORDER BY last_name, first_name",
    )
    .fetch_all(&app_state.db)
    .await;

    match teachers {
        Ok(teachers) => HttpResponse::Ok().json(teachers),
        Err(e) => {
            error!("Failed to list teachers: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list teachers".to_string(),
            })
        }
    }
}

#[get("/{id}")]
async fn get_teacher(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let teacher = sqlx::query_as::<_, TeacherRecord>(
        "SELECT id, user_id, first_name, last_name, subject, is_hod, hired_on, status, created_at
         FROM teachers WHERE id = $1",
    )
    .bind(path.into_inner())
    .fetch_optional(&app_state.db)
    .await;

    match teacher {
        Ok(Some(teacher)) => HttpResponse::Ok().json(teacher),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Teacher not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to fetch teacher: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch teacher".to_string(),
            })
        }
    }
}

#[put("/{id}")]
async fn update_teacher(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateTeacherRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if let Some(status) = &body.status {
        if !matches!(status.as_str(), "active" | "archived") {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Status must be 'active' or 'archived'".to_string(),
            });
        }
    }

    let teacher_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE teachers SET
             first_name = COALESCE($1, first_name),
             last_name = COALESCE($2, last_name),
             subject = COALESCE($3, subject),
             hired_on = COALESCE($4, hired_on),
             status = COALESCE($5, status)
         WHERE id = $6",
    )
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(&body.subject)
    .bind(body.hired_on)
    .bind(&body.status)
    .bind(teacher_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "update_teacher",
                &format!("teacher:{}", teacher_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Teacher updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Teacher not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update teacher: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update teacher".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_teacher(
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

    let teacher_id = path.into_inner();

    let result = sqlx::query("DELETE FROM teachers WHERE id = $1")
        .bind(teacher_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "delete_teacher",
                &format!("teacher:{}", teacher_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Teacher deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Teacher not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete teacher: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete teacher".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/teachers")
            .service(create_teacher)
            .service(list_teachers)
            .service(get_teacher)
            .service(update_teacher)
            .service(delete_teacher),
    );
}
