use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, NaiveDate, Utc};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct InventoryItem {
    id: i32,
    name: String,
    category: Option<String>,
    quantity: i32,
    unit_cost: Decimal,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateItemRequest {
    name: String,
    category: Option<String>,
    quantity: i32,
    #[serde(default)]
    unit_cost: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpdateItemRequest {
    name: Option<String>,
    category: Option<String>,
    quantity: Option<i32>,
    unit_cost: Option<Decimal>,
}

#[post("/items")]
async fn create_item(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateItemRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.name.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Item name is required".to_string(),
        });
    }
    if body.quantity < 0 || body.unit_cost < Decimal::ZERO {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Quantity and unit cost must not be negative".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO inventory_items (name, category, quantity, unit_cost)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(body.name.trim())
    .bind(&body.category)
    .bind(body.quantity)
    .bind(body.unit_cost)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(&app_state.db, &claims.sub, "create_item", &format!("item:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create inventory item: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create item".to_string(),
            })
        }
    }
}

#[get("/items")]
async fn list_items(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let items = sqlx::query_as::<_, InventoryItem>(
        "SELECT id, name, category, quantity, unit_cost, created_at
         FROM inventory_items ORDER BY name",
    )
    .fetch_all(&app_state.db)
    .await;

    match items {
        Ok(items) => HttpResponse::Ok().json(items),
        Err(e) => {
            error!("Failed to list inventory: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list inventory".to_string(),
            })
        }
    }
}

#[put("/items/{id}")]
async fn update_item(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateItemRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if body.quantity.map_or(false, |q| q < 0)
        || body.unit_cost.map_or(false, |c| c < Decimal::ZERO)
    {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Quantity and unit cost must not be negative".to_string(),
        });
    }

    let item_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE inventory_items SET
             name = COALESCE($1, name),
             category = COALESCE($2, category),
             quantity = COALESCE($3, quantity),
             unit_cost = COALESCE($4, unit_cost)
         WHERE id = $5",
    )
    .bind(&body.name)
    .bind(&body.category)
    .bind(body.quantity)
    .bind(body.unit_cost)
    .bind(item_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "Item updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Item not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update item: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update item".to_string(),
            })
        }
    }
}

#[delete("/items/{id}")]
async fn delete_item(
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

    let result = sqlx::query("DELETE FROM inventory_items WHERE id = $1")
        .bind(path.into_inner())
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "Item deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Item not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete item: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete item".to_string(),
            })
        }
    }
}

#[derive(Debug, Serialize, FromRow)]
struct LedgerEntry {
    id: i32,
    kind: String,
    category: Option<String>,
    amount: Decimal,
    description: Option<String>,
    entry_date: NaiveDate,
    recorded_by: Option<i32>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateEntryRequest {
    kind: String,
    category: Option<String>,
    amount: Decimal,
    description: Option<String>,
    entry_date: NaiveDate,
}

#[post("/ledger")]
async fn create_entry(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateEntryRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if !matches!(body.kind.as_str(), "income" | "expense") {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Kind must be 'income' or 'expense'".to_string(),
        });
    }
    if body.amount <= Decimal::ZERO {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Amount must be greater than zero".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO ledger_entries (kind, category, amount, description, entry_date, recorded_by)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(&body.kind)
    .bind(&body.category)
    .bind(body.amount)
    .bind(&body.description)
    .bind(body.entry_date)
    .bind(if claims.uid > 0 { Some(claims.uid) } else { None })
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(&app_state.db, &claims.sub, "create_ledger_entry", &format!("entry:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Err(e) => {
            error!("Failed to create ledger entry: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create ledger entry".to_string(),
            })
        }
    }
}

#[get("/ledger")]
async fn list_entries(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let entries = sqlx::query_as::<_, LedgerEntry>(
        "SELECT id, kind, category, amount, description, entry_date, recorded_by, created_at
         FROM ledger_entries ORDER BY entry_date DESC, id DESC",
    )
    .fetch_all(&app_state.db)
    .await;

    match entries {
        Ok(entries) => HttpResponse::Ok().json(entries),
        Err(e) => {
            error!("Failed to list ledger entries: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list ledger entries".to_string(),
            })
        }
    }
}

#[get("/ledger/summary")]
async fn ledger_summary(app_state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let totals: Result<(Decimal, Decimal), sqlx::Error> = sqlx::query_as(
        "SELECT
             COALESCE(SUM(amount) FILTER (WHERE kind = 'income'), 0),
             COALESCE(SUM(amount) FILTER (WHERE kind = 'expense'), 0)
         FROM ledger_entries",
    )
    .fetch_one(&app_state.db)
    .await;

    match totals {
        Ok((income, expense)) => HttpResponse::Ok().json(serde_json::json!({
            "total_income": income,
            "total_expense": expense,
            "net": income - expense,
        })),
        Err(e) => {
            error!("Failed to summarize ledger: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to summarize ledger".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/inventory")
            .service(create_item)
            .service(list_items)
            .service(update_item)
            .service(delete_item)
            .service(create_entry)
            .service(list_entries)
            .service(ledger_summary),
    );
}
