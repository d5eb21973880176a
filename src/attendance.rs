use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::NaiveDate;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_academic_staff;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct MarkEntry {
    student_id: i32,
    status: String,
}

#[derive(Debug, Deserialize)]
struct BulkMarkRequest {
    class_id: i32,
    day: NaiveDate,
    entries: Vec<MarkEntry>,
}

#[derive(Debug, Serialize, FromRow)]
struct AttendanceEntry {
    student_id: i32,
    first_name: String,
    last_name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct DayQuery {
    date: NaiveDate,
}

/// The sheet's student ids, sorted, or None when a student appears twice.
fn unique_student_ids(entries: &[MarkEntry]) -> Option<Vec<i32>> {
    let mut ids: Vec<i32> = entries.iter().map(|e| e.student_id).collect();
    ids.sort_unstable();
    ids.dedup();
    (ids.len() == entries.len()).then_some(ids)
}

/// Mark a whole class for one day. The upsert runs inside a transaction
/// so a partially applied sheet is never visible.
#[post("/mark")]
async fn bulk_mark(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<BulkMarkRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    if body.entries.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "At least one entry is required".to_string(),
        });
    }

    for entry in &body.entries {
        if !matches!(entry.status.as_str(), "Present" | "Absent" | "Late" | "Excused") {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!(
                    "Invalid status '{}'; must be Present, Absent, Late or Excused",
                    entry.status
                ),
            });
        }
    }

    let student_ids = match unique_student_ids(&body.entries) {
        Some(ids) => ids,
        None => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Each student may appear only once per sheet".to_string(),
            });
        }
    };

    let in_class = match sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM students WHERE class_id = $1 AND id = ANY($2) AND status = 'active'",
    )
    .bind(body.class_id)
    .bind(&student_ids)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(count) => count,
        Err(e) => {
            error!("Failed to check class membership: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if in_class as usize != body.entries.len() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "All students must be active members of the class".to_string(),
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

    for entry in &body.entries {
        if let Err(e) = sqlx::query(
            "INSERT INTO attendance_records (student_id, class_id, day, status, recorded_by)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (student_id, day)
             DO UPDATE SET status = $4, class_id = $2, recorded_by = $5",
        )
        .bind(entry.student_id)
        .bind(body.class_id)
        .bind(body.day)
        .bind(&entry.status)
        .bind(if claims.uid > 0 { Some(claims.uid) } else { None })
        .execute(&mut *tx)
        .await
        {
            error!("Failed to mark attendance: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to mark attendance".to_string(),
            });
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit attendance: {}", e);
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to mark attendance".to_string(),
        });
    }

    activity::record(
        &app_state.db,
        &claims.sub,
        "mark_attendance",
        &format!("class:{} day:{}", body.class_id, body.day),
    );

    HttpResponse::Ok().json(serde_json::json!({
        "message": "Attendance marked",
        "marked": body.entries.len(),
    }))
}

#[get("/class/{class_id}")]
async fn class_day(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    query: web::Query<DayQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    let class_id = path.into_inner();

    let entries = sqlx::query_as::<_, AttendanceEntry>(
        "SELECT ar.student_id, s.first_name, s.last_name, ar.status
         FROM attendance_records ar
         JOIN students s ON s.id = ar.student_id
         WHERE ar.class_id = $1 AND ar.day = $2
         ORDER BY s.last_name, s.first_name",
    )
    .bind(class_id)
    .bind(query.date)
    .fetch_all(&app_state.db)
    .await;

    match entries {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => {
            error!("Failed to list attendance: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list attendance".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/attendance")
            .service(bulk_mark)
            .service(class_day),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(student_id: i32) -> MarkEntry {
        MarkEntry {
            student_id,
            status: "Present".to_string(),
        }
    }

    #[test]
    fn duplicate_students_in_a_sheet_are_detected() {
        assert!(unique_student_ids(&[entry(1), entry(2), entry(1)]).is_none());
        assert_eq!(unique_student_ids(&[entry(2), entry(1)]), Some(vec![1, 2]));
        assert!(unique_student_ids(&[]).is_some());
    }
}
