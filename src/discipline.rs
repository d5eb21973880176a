use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::{ensure_academic_staff, ensure_privileged};
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct CaseRecord {
    id: i32,
    student_id: i32,
    student_name: String,
    reported_by: Option<i32>,
    title: String,
    description: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateCaseRequest {
    student_id: i32,
    title: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListCasesQuery {
    student_id: Option<i32>,
    status: Option<String>,
}

const CASE_STATUSES: [&str; 3] = ["open", "resolved", "dismissed"];

#[post("")]
async fn create_case(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateCaseRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    if body.title.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Title is required".to_string(),
        });
    }

    let student_exists = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM students WHERE id = $1)",
    )
    .bind(body.student_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(exists) => exists,
        Err(e) => {
            error!("Failed to look up student {}: {}", body.student_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if !student_exists {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: "Student not found".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO discipline_cases (student_id, reported_by, title, description)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(body.student_id)
    .bind(if claims.uid > 0 { Some(claims.uid) } else { None })
    .bind(body.title.trim())
    .bind(&body.description)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(&app_state.db, &claims.sub, "create_case", &format!("case:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create discipline case: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create case".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_cases(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListCasesQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    if let Some(status) = &query.status {
        if !CASE_STATUSES.contains(&status.as_str()) {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Status must be open, resolved or dismissed".to_string(),
            });
        }
    }

    let cases = sqlx::query_as::<_, CaseRecord>(
        "SELECT dc.id, dc.student_id, s.first_name || ' ' || s.last_name AS student_name,
                dc.reported_by, dc.title, dc.description, dc.status,
                dc.created_at, dc.updated_at
         FROM discipline_cases dc
         JOIN students s ON s.id = dc.student_id
         WHERE ($1::int IS NULL OR dc.student_id = $1)
           AND ($2::text IS NULL OR dc.status = $2)
         ORDER BY dc.created_at DESC",
    )
    .bind(query.student_id)
    .bind(&query.status)
    .fetch_all(&app_state.db)
    .await;

    match cases {
        Ok(cases) => HttpResponse::Ok().json(cases),
        Err(e) => {
            error!("Failed to list discipline cases: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list cases".to_string(),
            })
        }
    }
}

/// Status transition. The row must exist and the new status must belong to
/// the fixed vocabulary; the check runs before the write.
#[put("/{id}/status")]
async fn update_status(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateStatusRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    if !CASE_STATUSES.contains(&body.status.as_str()) {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Status must be open, resolved or dismissed".to_string(),
        });
    }

    let case_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE discipline_cases SET status = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(&body.status)
    .bind(case_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "update_case_status",
                &format!("case:{} status:{}", case_id, body.status),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Case status updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Case not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update case status: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update case status".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_case(
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

    let case_id = path.into_inner();

    let result = sqlx::query("DELETE FROM discipline_cases WHERE id = $1")
        .bind(case_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(&app_state.db, &claims.sub, "delete_case", &format!("case:{}", case_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Case deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Case not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete case: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete case".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/discipline")
            .service(create_case)
            .service(list_cases)
            .service(update_status)
            .service(delete_case),
    );
}
