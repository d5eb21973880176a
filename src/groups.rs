use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, Claims, ErrorResponse};
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct GroupRecord {
    id: i32,
    name: String,
    created_by: i32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, FromRow)]
struct GroupMember {
    user_id: i32,
    username: String,
    full_name: String,
}

#[derive(Debug, Serialize)]
struct GroupResponse {
    id: i32,
    name: String,
    created_by: i32,
    created_at: DateTime<Utc>,
    members: Vec<GroupMember>,
}

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: String,
    member_ids: Vec<i32>,
}

#[derive(Debug, Deserialize)]
struct PostGroupMessageRequest {
    body: String,
}

#[derive(Debug, Serialize, FromRow)]
struct GroupMessageRecord {
    id: i32,
    sender_id: i32,
    sender_name: String,
    body: String,
    sent_at: DateTime<Utc>,
}

async fn validate_members(
    app_state: &AppState,
    member_ids: &[i32],
) -> Result<(), HttpResponse> {
    if member_ids.is_empty() {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Group must include at least one member"
        })));
    }

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE status = 'active' AND id = ANY($1)",
    )
    .bind(member_ids)
    .fetch_one(&app_state.db)
    .await
    .map_err(|e| {
        error!("Failed to validate group members: {}", e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error"
        }))
    })?;

    if count as usize != member_ids.len() {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "All group members must be active users"
        })));
    }

    Ok(())
}

async fn ensure_membership(
    app_state: &AppState,
    claims: &Claims,
    group_id: i32,
) -> Result<(), HttpResponse> {
    if claims.role.is_privileged() {
        return Ok(());
    }

    let is_member = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2)",
    )
    .bind(group_id)
    .bind(claims.uid)
    .fetch_one(&app_state.db)
    .await
    .map_err(|e| {
        error!("Failed to check group membership: {}", e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error"
        }))
    })?;

    if is_member {
        return Ok(());
    }

    Err(HttpResponse::Forbidden().json(serde_json::json!({
        "error": "Not a member of this group"
    })))
}

async fn load_members(app_state: &AppState, group_id: i32) -> Vec<GroupMember> {
    sqlx::query_as::<_, GroupMember>(
        "SELECT u.id AS user_id, u.username, u.full_name
         FROM group_members gm
         JOIN users u ON u.id = gm.user_id
         WHERE gm.group_id = $1
         ORDER BY u.full_name",
    )
    .bind(group_id)
    .fetch_all(&app_state.db)
    .await
    .unwrap_or_default()
}

/// Create the group row and its membership in one transaction so a group
/// never appears without its members.
#[post("")]
async fn create_group(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateGroupRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if claims.uid == 0 {
        return HttpResponse::Forbidden().json(ErrorResponse {
            error: "Service accounts cannot create groups".to_string(),
        });
    }

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Group name is required".to_string(),
        });
    }

    if let Err(response) = validate_members(&app_state, &body.member_ids).await {
        return response;
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

    let group_id = match sqlx::query_scalar::<_, i32>(
        "INSERT INTO message_groups (name, created_by) VALUES ($1, $2) RETURNING id",
    )
    .bind(body.name.trim())
    .bind(claims.uid)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to create group: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create group".to_string(),
            });
        }
    };

    // Creator is always a member.
    let mut member_ids = body.member_ids.clone();
    if !member_ids.contains(&claims.uid) {
        member_ids.push(claims.uid);
    }

    for user_id in &member_ids {
        if let Err(e) = sqlx::query(
            "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2)
             ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        {
            error!("Failed to add group member: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create group".to_string(),
            });
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit group creation: {}", e);
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to create group".to_string(),
        });
    }

    activity::record(&app_state.db, &claims.sub, "create_group", &format!("group:{}", group_id));

    HttpResponse::Created().json(serde_json::json!({ "id": group_id }))
}

#[get("")]
async fn list_groups(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let groups = if claims.role.is_privileged() {
        sqlx::query_as::<_, GroupRecord>(
            "SELECT id, name, created_by, created_at FROM message_groups ORDER BY name",
        )
        .fetch_all(&app_state.db)
        .await
    } else {
        sqlx::query_as::<_, GroupRecord>(
            "SELECT g.id, g.name, g.created_by, g.created_at
             FROM message_groups g
             JOIN group_members gm ON gm.group_id = g.id
             WHERE gm.user_id = $1
             ORDER BY g.name",
        )
        .bind(claims.uid)
        .fetch_all(&app_state.db)
        .await
    };

    match groups {
        Ok(groups) => HttpResponse::Ok().json(groups),
        Err(e) => {
            error!("Failed to list groups: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list groups".to_string(),
            })
        }
    }
}

#[get("/{id}")]
async fn get_group(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let group_id = path.into_inner();
    if let Err(response) = ensure_membership(&app_state, &claims, group_id).await {
        return response;
    }

    let group = sqlx::query_as::<_, GroupRecord>(
        "SELECT id, name, created_by, created_at FROM message_groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(&app_state.db)
    .await;

    match group {
        Ok(Some(group)) => {
            let members = load_members(&app_state, group_id).await;
            HttpResponse::Ok().json(GroupResponse {
                id: group.id,
                name: group.name,
                created_by: group.created_by,
                created_at: group.created_at,
                members,
            })
        }
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Group not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to fetch group: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to fetch group".to_string(),
            })
        }
    }
}

#[post("/{id}/messages")]
async fn post_group_message(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<PostGroupMessageRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let group_id = path.into_inner();
    if let Err(response) = ensure_membership(&app_state, &claims, group_id).await {
        return response;
    }

    if body.body.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Message body is required".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO group_messages (group_id, sender_id, body)
         VALUES ($1, $2, $3)
         RETURNING id",
    )
    .bind(group_id)
    .bind(claims.uid)
    .bind(body.body.trim())
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => HttpResponse::Created().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Failed to post group message: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to post message".to_string(),
            })
        }
    }
}

#[get("/{id}/messages")]
async fn list_group_messages(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let group_id = path.into_inner();
    if let Err(response) = ensure_membership(&app_state, &claims, group_id).await {
        return response;
    }

    let messages = sqlx::query_as::<_, GroupMessageRecord>(
        "SELECT gm.id, gm.sender_id, u.full_name AS sender_name, gm.body, gm.sent_at
         FROM group_messages gm
         JOIN users u ON u.id = gm.sender_id
         WHERE gm.group_id = $1
         ORDER BY gm.sent_at",
    )
    .bind(group_id)
    .fetch_all(&app_state.db)
    .await;

    match messages {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => {
            error!("Failed to list group messages: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list messages".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_group(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let group_id = path.into_inner();

    let created_by = sqlx::query_scalar::<_, i32>(
        "SELECT created_by FROM message_groups WHERE id = $1",
    )
    .bind(group_id)
    .fetch_optional(&app_state.db)
    .await;

    let created_by = match created_by {
        Ok(Some(created_by)) => created_by,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                error: "Group not found".to_string(),
            });
        }
        Err(e) => {
            error!("Failed to fetch group: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if created_by != claims.uid && !claims.role.is_privileged() {
        return HttpResponse::Forbidden().json(ErrorResponse {
            error: "Only the creator may delete this group".to_string(),
        });
    }

    let result = sqlx::query("DELETE FROM message_groups WHERE id = $1")
        .bind(group_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(_) => {
            activity::record(&app_state.db, &claims.sub, "delete_group", &format!("group:{}", group_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Group deleted" }))
        }
        Err(e) => {
            error!("Failed to delete group: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete group".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/groups")
            .service(create_group)
            .service(list_groups)
            .service(get_group)
            .service(post_group_message)
            .service(list_group_messages)
            .service(delete_group),
    );
}
