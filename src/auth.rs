use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::roles::{ensure_privileged, Role};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: i32,
    pub role: Role,
    pub exp: usize,
}

/// Extract and validate the bearer token from a request.
/// Returns Claims if valid, or an error HttpResponse.
pub fn verify_token(req: &HttpRequest, app_state: &AppState) -> Result<Claims, HttpResponse> {
    let auth_header = req.headers().get("Authorization");

    let token = match auth_header {
        Some(header) => {
            let header_str = header.to_str().unwrap_or("");
            if header_str.starts_with("Bearer ") {
                &header_str[7..]
            } else {
                return Err(HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "Invalid authorization header"
                })));
            }
        }
        None => {
            return Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Missing authorization header"
            })));
        }
    };

    // Configured service token acts as an admin credential for
    // machine-to-machine callers.
    if let Some(service_token) = &app_state.service_token {
        if token == service_token {
            return Ok(Claims {
                sub: "service".to_string(),
                uid: 0,
                role: Role::Admin,
                exp: usize::MAX,
            });
        }
    }

    let claims = match decode::<Claims>(
        token,
        &DecodingKey::from_secret(app_state.jwt_secret.as_ref()),
        &Validation::default(),
    ) {
        Ok(data) => data.claims,
        Err(_) => {
            return Err(HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Invalid token"
            })));
        }
    };

    Ok(claims)
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i32,
    username: String,
    password_hash: String,
    role: String,
    status: String,
}

#[post("/login")]
async fn login(
    app_state: web::Data<AppState>,
    credentials: web::Json<LoginRequest>,
) -> impl Responder {
    let account_result = sqlx::query_as::<_, AccountRow>(
        "SELECT id, username, password_hash, role, status FROM users WHERE username = $1",
    )
    .bind(&credentials.username)
    .fetch_optional(&app_state.db)
    .await;

    let account = match account_result {
        Ok(Some(account)) => account,
        Ok(None) => {
            return HttpResponse::Unauthorized().json(ErrorResponse {
                error: "Invalid credentials".to_string(),
            });
        }
        Err(e) => {
            error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Internal server error".to_string(),
            });
        }
    };

    let parsed_hash = match PasswordHash::new(&account.password_hash) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Failed to parse password hash: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Internal server error".to_string(),
            });
        }
    };

    let password_valid = Argon2::default()
        .verify_password(credentials.password.as_bytes(), &parsed_hash)
        .is_ok();

    if !password_valid {
        return HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Invalid credentials".to_string(),
        });
    }

    if account.status != "active" {
        return HttpResponse::Unauthorized().json(ErrorResponse {
            error: "Account is archived".to_string(),
        });
    }

    let role: Role = match account.role.parse() {
        Ok(role) => role,
        Err(_) => {
            error!("Account {} has unknown role '{}'", account.id, account.role);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Internal server error".to_string(),
            });
        }
    };

    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: account.username.clone(),
        uid: account.id,
        role,
        exp: expiration,
    };

    let token = match encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(app_state.jwt_secret.as_ref()),
    ) {
        Ok(t) => t,
        Err(e) => {
            error!("JWT encoding error: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Could not generate token".to_string(),
            });
        }
    };

    HttpResponse::Ok().json(LoginResponse { token })
}

#[get("/validate")]
async fn validate_token_endpoint(req: HttpRequest, app_state: web::Data<AppState>) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    if claims.uid == 0 {
        // Service token: no backing row to confirm.
        return HttpResponse::Ok().json(serde_json::json!({
            "valid": true,
            "username": claims.sub,
            "role": claims.role,
        }));
    }

    let user_exists = sqlx::query_scalar::<_, i32>("SELECT id FROM users WHERE id = $1")
        .bind(claims.uid)
        .fetch_optional(&app_state.db)
        .await;

    match user_exists {
        Ok(Some(_)) => HttpResponse::Ok().json(serde_json::json!({
            "valid": true,
            "username": claims.sub,
            "role": claims.role,
        })),
        Ok(None) => HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "User not found",
        })),
        Err(e) => {
            error!("Database error: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error",
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
struct UserSummary {
    id: i32,
    username: String,
    role: String,
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    status: String,
    created_at: chrono::DateTime<Utc>,
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

#[post("")]
async fn create_user(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateUserRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.username.trim().is_empty() || body.password.len() < 8 {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Username is required and password must be at least 8 characters".to_string(),
        });
    }

    let role: Role = match body.role.parse() {
        Ok(role) => role,
        Err(_) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Unknown role '{}'", body.role),
            });
        }
    };

    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Failed to hash password: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to hash password".to_string(),
            });
        }
    };

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO users (username, password_hash, role, full_name, email, phone)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (username) DO NOTHING
         RETURNING id",
    )
    .bind(body.username.trim())
    .bind(&password_hash)
    .bind(role.as_str())
    .bind(&body.full_name)
    .bind(&body.email)
    .bind(&body.phone)
    .fetch_optional(&app_state.db)
    .await;

    match inserted {
        Ok(Some(id)) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "create_user",
                &format!("user:{}", id),
            );
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Ok(None) => HttpResponse::BadRequest().json(ErrorResponse {
            error: "Username is already taken".to_string(),
        }),
        Err(e) => {
            error!("Failed to create user: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create user".to_string(),
            })
        }
    }
}

#[get("")]
async fn list_users(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let users = sqlx::query_as::<_, UserSummary>(
        "SELECT id, username, role, full_name, email, phone, status, created_at
         FROM users ORDER BY username",
    )
    .fetch_all(&app_state.db)
    .await;

    match users {
        Ok(users) => HttpResponse::Ok().json(users),
        Err(e) => {
            error!("Failed to list users: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list users".to_string(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub password: String,
}

#[put("/{id}/password")]
async fn change_password(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<ChangePasswordRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let target_id = path.into_inner();

    // Users may change their own password; anything else needs privilege.
    if claims.uid != target_id {
        if let Err(response) = ensure_privileged(&claims) {
            return response;
        }
    }

    if body.password.len() < 8 {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Password must be at least 8 characters".to_string(),
        });
    }

    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Failed to hash password: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to hash password".to_string(),
            });
        }
    };

    let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(&password_hash)
        .bind(target_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => HttpResponse::Ok().json(serde_json::json!({
            "message": "Password changed successfully"
        })),
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "User not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to change password: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to change password".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_user(
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

    let target_id = path.into_inner();
    if target_id == claims.uid {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Cannot delete your own account".to_string(),
        });
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(target_id)
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "delete_user",
                &format!("user:{}", target_id),
            );
            HttpResponse::Ok().json(serde_json::json!({ "message": "User deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "User not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete user: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete user".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .service(login)
            .service(validate_token_endpoint),
    );
    cfg.service(
        web::scope("/api/users")
            .service(create_user)
            .service(list_users)
            .service(change_password)
            .service(delete_user),
    );
}
