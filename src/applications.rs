use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct ApplicationRecord {
    id: i32,
    applicant_name: String,
    birthday: Option<NaiveDate>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    class_applied: Option<String>,
    status: String,
    submitted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SubmitApplicationRequest {
    applicant_name: String,
    birthday: Option<NaiveDate>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    class_applied: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewRequest {
    status: String,
}

/// Public endpoint: prospective families submit without an account.
#[post("")]
async fn submit_application(
    app_state: web::Data<AppState>,
    body: web::Json<SubmitApplicationRequest>,
) -> impl Responder {
    if body.applicant_name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Applicant name is required".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO applications (applicant_name, birthday, guardian_name, guardian_phone, class_applied)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id",
    )
    .bind(body.applicant_name.trim())
    .bind(body.birthday)
    .bind(&body.guardian_name)
    .bind(&body.guardian_phone)
    .bind(&body.class_applied)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => HttpResponse::Created().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Failed to submit application: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to submit application".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_applications(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let applications = sqlx::query_as::<_, ApplicationRecord>(
        "SELECT id, applicant_name, birthday, guardian_name, guardian_phone,
                class_applied, status, submitted_at
         FROM applications ORDER BY submitted_at DESC",
    )
    .fetch_all(&app_state.db)
    .await;

    match applications {
        Ok(applications) => HttpResponse::Ok().json(applications),
        Err(e) => {
            error!("Failed to list applications: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list applications".to_string(),
            })
        }
    }
}

/// Approve or reject. A status change only; approval does not create a
/// student record.
#[put("/{id}/review")]
async fn review_application(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ReviewRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if !matches!(body.status.as_str(), "approved" | "rejected") {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Status must be 'approved' or 'rejected'".to_string(),
        });
    }

    let application_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE applications SET status = $1 WHERE id = $2 AND status = 'pending'",
    )
    .bind(&body.status)
    .bind(application_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "review_application",
                &format!("application:{} status:{}", application_id, body.status),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Application reviewed" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Application not found or already reviewed".to_string(),
        }),
        Err(e) => {
            error!("Failed to review application: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to review application".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/applications")
            .service(submit_application)
            .service(list_applications)
            .service(review_application),
    );
}
