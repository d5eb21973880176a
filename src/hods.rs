use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct HodRecord {
    id: i32,
    teacher_id: i32,
    teacher_name: String,
    department: String,
    appointed_on: Option<NaiveDate>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AppointHodRequest {
    teacher_id: i32,
    department: String,
    appointed_on: Option<NaiveDate>,
}

/// Appointment inserts the HOD row and flips the teacher's marker in one
/// transaction, so the two never disagree.
#[post("")]
async fn appoint_hod(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AppointHodRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.department.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Department is required".to_string(),
        });
    }

    let teacher_active = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM teachers WHERE id = $1 AND status = 'active')",
    )
    .bind(body.teacher_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(active) => active,
        Err(e) => {
            error!("Failed to look up teacher {}: {}", body.teacher_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if !teacher_active {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: "Teacher not found or archived".to_string(),
        });
    }

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let hod_id = match sqlx::query_scalar::<_, i32>(
        "INSERT INTO hods (teacher_id, department, appointed_on)
         VALUES ($1, $2, $3)
         ON CONFLICT DO NOTHING
         RETURNING id",
    )
    .bind(body.teacher_id)
    .bind(body.department.trim())
    .bind(body.appointed_on)
    .fetch_optional(&mut *tx)
    .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            let _ = tx.rollback().await;
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "The department already has a head, or the teacher already heads one"
                    .to_string(),
            });
        }
        Err(e) => {
            error!("Failed to appoint HOD: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to appoint HOD".to_string(),
            });
        }
    };

    if let Err(e) = sqlx::query("UPDATE teachers SET is_hod = TRUE WHERE id = $1")
        .bind(body.teacher_id)
        .execute(&mut *tx)
        .await
    {
        error!("Failed to flag teacher as HOD: {}", e);
        let _ = tx.rollback().await;
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to appoint HOD".to_string(),
        });
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit HOD appointment: {}", e);
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to appoint HOD".to_string(),
        });
    }

    activity::record(&app_state.db, &claims.sub, "appoint_hod", &format!("hod:{}", hod_id));

    HttpResponse::Created().json(serde_json::json!({ "id": hod_id }))
}

#[get("")]
async fn list_hods(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(response) = verify_token(&req, &app_state) {
        return response;
    }

    let hods = sqlx::query_as::<_, HodRecord>(
        "SELECT h.id, h.teacher_id, t.first_name || ' ' || t.last_name AS teacher_name,
                h.department, h.appointed_on, h.created_at
         FROM hods h
         JOIN teachers t ON t.id = h.teacher_id
         ORDER BY h.department",
    )
    .fetch_all(&app_state.db)
    .await;

    match hods {
        Ok(hods) => HttpResponse::Ok().json(hods),
        Err(e) => {
            error!("Failed to list HODs: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list HODs".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn remove_hod(
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

    let hod_id = path.into_inner();

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let teacher_id = match sqlx::query_scalar::<_, i32>(
        "DELETE FROM hods WHERE id = $1 RETURNING teacher_id",
    )
    .bind(hod_id)
    .fetch_optional(&mut *tx)
    .await
    {
        Ok(Some(teacher_id)) => teacher_id,
        Ok(None) => {
            let _ = tx.rollback().await;
            return HttpResponse::NotFound().json(ErrorResponse {
                error: "HOD record not found".to_string(),
            });
        }
        Err(e) => {
            error!("Failed to remove HOD: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to remove HOD".to_string(),
            });
        }
    };

    if let Err(e) = sqlx::query("UPDATE teachers SET is_hod = FALSE WHERE id = $1")
        .bind(teacher_id)
        .execute(&mut *tx)
        .await
    {
        error!("Failed to clear HOD flag: {}", e);
        let _ = tx.rollback().await;
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to remove HOD".to_string(),
        });
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit HOD removal: {}", e);
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to remove HOD".to_string(),
        });
    }

    activity::record(&app_state.db, &claims.sub, "remove_hod", &format!("hod:{}", hod_id));

    HttpResponse::Ok().json(serde_json::json!({ "message": "HOD removed" }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/hods")
            .service(appoint_hod)
            .service(list_hods)
            .service(remove_hod),
    );
}
