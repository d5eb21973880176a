use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use actix_multipart::Multipart;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::StreamExt as _;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::{ensure_academic_staff, ensure_privileged};
use crate::storage::{StudentMedia, UploadError};
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct StudentRecord {
    id: i32,
    first_name: String,
    last_name: String,
    birthday: Option<NaiveDate>,
    gender: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    class_id: Option<i32>,
    photo: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateStudentRequest {
    first_name: String,
    last_name: String,
    birthday: Option<NaiveDate>,
    gender: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    class_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct UpdateStudentRequest {
    first_name: Option<String>,
    last_name: Option<String>,
    birthday: Option<NaiveDate>,
    gender: Option<String>,
    guardian_name: Option<String>,
    guardian_phone: Option<String>,
    class_id: Option<i32>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListStudentsQuery {
    class_id: Option<i32>,
    include_archived: Option<bool>,
}

async fn class_exists(app_state: &AppState, class_id: i32) -> Result<(), HttpResponse> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM classes WHERE id = $1)")
        .bind(class_id)
        .fetch_one(&app_state.db)
        .await
        .map_err(|e| {
            error!("Failed to validate class {}: {}", class_id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            }))
        })?;

    if !exists {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Class does not exist"
        })));
    }

    Ok(())
}

#[post("")]
async fn create_student(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateStudentRequest>,
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

    if let Some(class_id) = body.class_id {
        if let Err(response) = class_exists(&app_state, class_id).await {
            return response;
        }
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO students (first_name, last_name, birthday, gender, guardian_name, guardian_phone, class_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id",
    )
    .bind(body.first_name.trim())
    .bind(body.last_name.trim())
    .bind(body.birthday)
    .bind(&body.gender)
    .bind(&body.guardian_name)
    .bind(&body.guardian_phone)
    .bind(body.class_id)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "create_student",
                &format!("student:{}", id),
            );
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create student: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create student".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_students(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ListStudentsQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    let include_archived = query.include_archived.unwrap_or(false);

    let students = match query.class_id {
        Some(class_id) => {
            sqlx::query_as::<_, StudentRecord>(
                "SELECT id, first_name, last_name, birthday, gender, guardian_name, guardian_phone,
                        class_id, photo, status, created_at
                 FROM students
                 WHERE class_id = $1 AND (status = 'active' OR $2)
                 ORDER BY last_name, first_name, id",
            )
            .bind(class_id)
            .bind(include_archived)
            .fetch_all(&app_state.db)
            .await
        }
        None => {
            sqlx::query_as::<_, StudentRecord>(
                "SELECT id, first_name, last_name, birthday, gender, guardian_name, guardian_phone,
                        class_id, photo, status, created_at
                 FROM students
                 WHERE status = 'active' OR $1
                 ORDER BY last_name, first_name, id",
            )
            .bind(include_archived)
            .fetch_all(&app_state.db)
            .await
        }
    };

    match students {
        Ok(students) => HttpResponse::Ok().json(students),
        Err(e) => {
            error!("Failed to list students: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list students".to_string(),
            })
        }
    }
}

#[get("/{id}")]
async fn get_student(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_academic_staff(&claims) {
        return response;
    }

    let student = sqlx::query_as::<_, StudentRecord>(
        "SELECT id, first_name, last_name, birthday, gender, guardian_name, guardian_phone,
                class_id, photo, status, created_at
         FROM students WHERE id = $1",
    )
    .bind(path.into_inner())
    .fetch_optional(&app_state.db)
    .await;

    match student {
        Ok(Some(student)) => HttpResponse::Ok().json(student),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Student not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to fetch student: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch student".to_string(),
            })
        }
    }
}

#[put("/{id}")]
async fn update_student(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateStudentRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let student_id = path.into_inner();

    if let Some(status) = &body.status {
        if !matches!(status.as_str(), "active" | "archived") {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Status must be 'active' or 'archived'".to_string(),
            });
        }
    }

    if let Some(class_id) = body.class_id {
        if let Err(response) = class_exists(&app_state, class_id).await {
            return response;
        }
    }

    let result = sqlx::query(
        "UPDATE students SET
             first_name = COALESCE($1, first_name),
             last_name = COALESCE($2, last_name),
             birthday = COALESCE($3, birthday),
             gender = COALESCE($4, gender),
             guardian_name = COALESCE($5, guardian_name),
             guardian_phone = COALESCE($6, guardian_phone),
             class_id = COALESCE($7, class_id),
             status = COALESCE($8, status)
         WHERE id = $9",
    )
    .bind(&body.first_name)
    .bind(&body.last_name)
    .bind(body.birthday)
    .bind(&body.gender)
    .bind(&body.guardian_name)
    .bind(&body.guardian_phone)
    .bind(body.class_id)
    .bind(&body.status)
    .bind(student_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "update_student",
                &format!("student:{}", student_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Student updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Student not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update student: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update student".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_student(
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

    let student_id = path.into_inner();

    let result = sqlx::query("DELETE FROM students WHERE id = $1")
        .bind(student_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "delete_student",
                &format!("student:{}", student_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "Student deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Student not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete student: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete student".to_string(),
            })
        }
    }
}

/// Upload or replace a student photo.
#[post("/{id}/photo")]
async fn upload_photo(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    payload: Multipart,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let student_id = path.into_inner();

    let exists = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM students WHERE id = $1)",
    )
    .bind(student_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(exists) => exists,
        Err(e) => {
            error!("Failed to look up student {}: {}", student_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if !exists {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: "Student not found".to_string(),
        });
    }

    let mut payload = payload;

    while let Some(item) = payload.next().await {
        let field = match item {
            Ok(field) => field,
            Err(e) => {
                error!("Multipart error: {}", e);
                return HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Failed to read upload".to_string(),
                });
            }
        };

        let filename = {
            let content_disposition = field.content_disposition();
            if content_disposition.and_then(|cd| cd.get_name()) != Some("photo") {
                continue;
            }

            content_disposition
                .and_then(|cd| cd.get_filename())
                .unwrap_or("upload.jpg")
                .to_string()
        };

        let media = StudentMedia::new(app_state.storage.clone());
        let stream = field.map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        });

        let stored = match media.attach_photo(student_id, &filename, stream).await {
            Ok(stored) => stored,
            Err(UploadError::UnsupportedType) => {
                return HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Invalid file type. Only images are allowed.".to_string(),
                })
            }
            Err(UploadError::TooLarge) => {
                return HttpResponse::BadRequest().json(ErrorResponse {
                    error: "File too large. Maximum size is 5MB.".to_string(),
                })
            }
            Err(UploadError::Io(e)) => {
                error!("Failed to save file: {}", e);
                return HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to save file".to_string(),
                });
            }
        };

        let old_photo = sqlx::query_scalar::<_, Option<String>>(
            "SELECT photo FROM students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&app_state.db)
        .await;

        if let Ok(Some(Some(old_key))) = old_photo {
            if !old_key.is_empty() {
                if let Err(UploadError::Io(err)) = media.remove_photo(&old_key).await {
                    error!("Failed to delete old photo: {}", err);
                }
            }
        }

        let update_result = sqlx::query("UPDATE students SET photo = $1 WHERE id = $2")
            .bind(&stored.key)
            .bind(student_id)
            .execute(&app_state.db)
            .await;

        match update_result {
            Ok(_) => {
                activity::record(
                    &app_state.db,
                    &claims.sub,
                    "upload_student_photo",
                    &format!("student:{}", student_id),
                );
                return HttpResponse::Ok().json(serde_json::json!({
                    "filename": stored.key,
                    "url": stored.url
                }));
            }
            Err(e) => {
                error!("Database error: {}", e);
                let _ = media.remove_photo(&stored.key).await;
                return HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to update student".to_string(),
                });
            }
        }
    }

    HttpResponse::BadRequest().json(ErrorResponse {
        error: "No photo uploaded".to_string(),
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/students")
            .service(create_student)
            .service(list_students)
            .service(get_student)
            .service(update_student)
            .service(delete_student)
            .service(upload_photo),
    );
}
