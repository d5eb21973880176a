use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct StaffRecord {
    id: i32,
    user_id: Option<i32>,
    full_name: String,
    position: Option<String>,
    employment_type: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateStaffRequest {
    user_id: Option<i32>,
    full_name: String,
    position: Option<String>,
    employment_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateStaffRequest {
    full_name: Option<String>,
    position: Option<String>,
    employment_type: Option<String>,
    status: Option<String>,
}

fn validate_employment_type(employment_type: &str) -> Result<(), HttpResponse> {
    if !matches!(employment_type, "full_time" | "part_time") {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "employment_type must be 'full_time' or 'part_time'"
        })));
    }
    Ok(())
}

#[post("")]
async fn create_staff(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateStaffRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.full_name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Full name is required".to_string(),
        });
    }

    let employment_type = body.employment_type.as_deref().unwrap_or("full_time");
    if let Err(response) = validate_employment_type(employment_type) {
        return response;
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO staff (user_id, full_name, position, employment_type)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(body.user_id)
    .bind(body.full_name.trim())
    .bind(&body.position)
    .bind(employment_type)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(&app_state.db, &claims.sub, "create_staff", &format!("staff:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create staff record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create staff record".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_staff(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let staff = sqlx::query_as::<_, StaffRecord>(
        "SELECT id, user_id, full_name, position, employment_type, status, created_at
         FROM staff ORDER BY full_name",
    )
    .fetch_all(&app_state.db)
    .await;

    match staff {
        Ok(staff) => HttpResponse::Ok().json(staff),
        Err(e) => {
            error!("Failed to list staff: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list staff".to_string(),
            })
        }
    }
}

#[put("/{id}")]
async fn update_staff(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateStaffRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if let Some(employment_type) = &body.employment_type {
        if let Err(response) = validate_employment_type(employment_type) {
            return response;
        }
    }
    if let Some(status) = &body.status {
        if !matches!(status.as_str(), "active" | "archived") {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Status must be 'active' or 'archived'".to_string(),
            });
        }
    }

    let staff_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE staff SET
             full_name = COALESCE($1, full_name),
             position = COALESCE($2, position),
             employment_type = COALESCE($3, employment_type),
             status = COALESCE($4, status)
         WHERE id = $5",
    )
    .bind(&body.full_name)
    .bind(&body.position)
    .bind(&body.employment_type)
    .bind(&body.status)
    .bind(staff_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(&app_state.db, &claims.sub, "update_staff", &format!("staff:{}", staff_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Staff record updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Staff record not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update staff record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update staff record".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_staff(
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

    let staff_id = path.into_inner();

    let result = sqlx::query("DELETE FROM staff WHERE id = $1")
        .bind(staff_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(&app_state.db, &claims.sub, "delete_staff", &format!("staff:{}", staff_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Staff record deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Staff record not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete staff record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete staff record".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/staff")
            .service(create_staff)
            .service(list_staff)
            .service(update_staff)
            .service(delete_staff),
    );
}
