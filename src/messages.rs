use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::auth::{verify_token, ErrorResponse};
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct MessageRecord {
    id: i32,
    sender_id: i32,
    recipient_id: i32,
    sender_name: String,
    recipient_name: String,
    subject: Option<String>,
    body: String,
    read_at: Option<DateTime<Utc>>,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    recipient_id: i32,
    subject: Option<String>,
    body: String,
}

#[post("")]
async fn send_message(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SendMessageRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if claims.uid == 0 {
        return HttpResponse::Forbidden().json(ErrorResponse {
            error: "Service accounts cannot send messages".to_string(),
        });
    }

    if body.body.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Message body is required".to_string(),
        });
    }

    let recipient_exists = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND status = 'active')",
    )
    .bind(body.recipient_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(exists) => exists,
        Err(e) => {
            error!("Failed to look up recipient {}: {}", body.recipient_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if !recipient_exists {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: "Recipient not found".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO messages (sender_id, recipient_id, subject, body)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(claims.uid)
    .bind(body.recipient_id)
    .bind(&body.subject)
    .bind(body.body.trim())
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => HttpResponse::Created().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Failed to send message: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to send message".to_string(),
            })
        }
    }
}

#[get("/inbox")]
async fn inbox(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let messages = sqlx::query_as::<_, MessageRecord>(
        "SELECT m.id, m.sender_id, m.recipient_id,
                su.full_name AS sender_name, ru.full_name AS recipient_name,
                m.subject, m.body, m.read_at, m.sent_at
         FROM messages m
         JOIN users su ON su.id = m.sender_id
         JOIN users ru ON ru.id = m.recipient_id
         WHERE m.recipient_id = $1
         ORDER BY m.sent_at DESC",
    )
    .bind(claims.uid)
    .fetch_all(&app_state.db)
    .await;

    match messages {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => {
            error!("Failed to list inbox: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list inbox".to_string(),
            })
        }
    }
}

#[get("/sent")]
async fn sent(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let messages = sqlx::query_as::<_, MessageRecord>(
        "SELECT m.id, m.sender_id, m.recipient_id,
                su.full_name AS sender_name, ru.full_name AS recipient_name,
                m.subject, m.body, m.read_at, m.sent_at
         FROM messages m
         JOIN users su ON su.id = m.sender_id
         JOIN users ru ON ru.id = m.recipient_id
         WHERE m.sender_id = $1
         ORDER BY m.sent_at DESC",
    )
    .bind(claims.uid)
    .fetch_all(&app_state.db)
    .await;

    match messages {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => {
            error!("Failed to list sent messages: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list sent messages".to_string(),
            })
        }
    }
}

#[post("/{id}/read")]
async fn mark_read(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let result = sqlx::query(
        "UPDATE messages SET read_at = NOW()
         WHERE id = $1 AND recipient_id = $2 AND read_at IS NULL",
    )
    .bind(path.into_inner())
    .bind(claims.uid)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "Marked as read" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Message not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to mark message read: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to mark message read".to_string(),
            })
        }
    }
}

/// Senders may retract their own messages; nobody else's.
#[delete("/{id}")]
async fn delete_message(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let result = sqlx::query("DELETE FROM messages WHERE id = $1 AND sender_id = $2")
        .bind(path.into_inner())
        .bind(claims.uid)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "Message deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Message not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete message: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete message".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/messages")
            .service(send_message)
            .service(inbox)
            .service(sent)
            .service(mark_read)
            .service(delete_message),
    );
}
