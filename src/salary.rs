use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{Datelike, NaiveDate};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

#[derive(Debug, Serialize, FromRow)]
struct SalaryRecord {
    id: i32,
    staff_id: i32,
    full_name: String,
    month: NaiveDate,
    base: Decimal,
    allowances: Decimal,
    deductions: Decimal,
    net: Decimal,
    paid_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct CreateSalaryRequest {
    staff_id: i32,
    month: NaiveDate,
    base: Decimal,
    #[serde(default)]
    allowances: Decimal,
    #[serde(default)]
    deductions: Decimal,
}

#[derive(Debug, Deserialize)]
struct UpdateSalaryRequest {
    base: Option<Decimal>,
    allowances: Option<Decimal>,
    deductions: Option<Decimal>,
    paid_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct PayrollQuery {
    month: u32,
    year: i32,
}

fn validate_amounts(base: Decimal, allowances: Decimal, deductions: Decimal) -> Result<(), HttpResponse> {
    if base < Decimal::ZERO || allowances < Decimal::ZERO || deductions < Decimal::ZERO {
        return Err(HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Salary amounts must not be negative"
        })));
    }
    Ok(())
}

#[post("")]
async fn create_salary(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateSalaryRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if let Err(response) = validate_amounts(body.base, body.allowances, body.deductions) {
        return response;
    }

    // Normalize to the first of the month so the uniqueness constraint
    // holds regardless of the submitted day.
    let month = body
        .month
        .with_day(1)
        .expect("first of month is always valid");

    let staff_exists = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM staff WHERE id = $1)",
    )
    .bind(body.staff_id)
    .fetch_one(&app_state.db)
    .await
    {
        Ok(exists) => exists,
        Err(e) => {
            error!("Failed to look up staff {}: {}", body.staff_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if !staff_exists {
        return HttpResponse::NotFound().json(ErrorResponse {
            error: "Staff member not found".to_string(),
        });
    }

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO salaries (staff_id, month, base, allowances, deductions)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (staff_id, month) DO NOTHING
         RETURNING id",
    )
    .bind(body.staff_id)
    .bind(month)
    .bind(body.base)
    .bind(body.allowances)
    .bind(body.deductions)
    .fetch_optional(&app_state.db)
    .await;

    match inserted {
        Ok(Some(id)) => {
            activity::record(&app_state.db, &claims.sub, "create_salary", &format!("salary:{}", id));
            HttpResponse::Created().json(serde_json::json!({ "id": id }))
        }
        Ok(None) => HttpResponse::BadRequest().json(ErrorResponse {
            error: "A salary record already exists for this staff member and month".to_string(),
        }),
        Err(e) => {
            error!("Failed to create salary record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to create salary record".to_string(),
            })
        }
    }
}

/// Monthly payroll: every record for the month with net pay computed
/// server-side (base + allowances - deductions).
#[get("/payroll")]
async fn payroll(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<PayrollQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if !(1..=12).contains(&query.month) {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Month must be between 1 and 12".to_string(),
        });
    }

    let records = sqlx::query_as::<_, SalaryRecord>(
        "SELECT sa.id, sa.staff_id, st.full_name, sa.month,
                sa.base, sa.allowances, sa.deductions,
                sa.base + sa.allowances - sa.deductions AS net,
                sa.paid_on
         FROM salaries sa
         JOIN staff st ON st.id = sa.staff_id
         WHERE date_part('year', sa.month)::int = $1
           AND date_part('month', sa.month)::int = $2
         ORDER BY st.full_name",
    )
    .bind(query.year)
    .bind(query.month as i32)
    .fetch_all(&app_state.db)
    .await;

    match records {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Failed to list payroll: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list payroll".to_string(),
            })
        }
    }
}

#[get("/staff/{staff_id}")]
async fn staff_history(
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

    let records = sqlx::query_as::<_, SalaryRecord>(
        "SELECT sa.id, sa.staff_id, st.full_name, sa.month,
                sa.base, sa.allowances, sa.deductions,
                sa.base + sa.allowances - sa.deductions AS net,
                sa.paid_on
         FROM salaries sa
         JOIN staff st ON st.id = sa.staff_id
         WHERE sa.staff_id = $1
         ORDER BY sa.month DESC",
    )
    .bind(path.into_inner())
    .fetch_all(&app_state.db)
    .await;

    match records {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => {
            error!("Failed to list salary history: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to list salary history".to_string(),
            })
        }
    }
}

#[put("/{id}")]
async fn update_salary(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    body: web::Json<UpdateSalaryRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    if let Err(response) = validate_amounts(
        body.base.unwrap_or(Decimal::ZERO),
        body.allowances.unwrap_or(Decimal::ZERO),
        body.deductions.unwrap_or(Decimal::ZERO),
    ) {
        return response;
    }

    let salary_id = path.into_inner();

    let result = sqlx::query(
        "UPDATE salaries SET
             base = COALESCE($1, base),
             allowances = COALESCE($2, allowances),
             deductions = COALESCE($3, deductions),
             paid_on = COALESCE($4, paid_on)
         WHERE id = $5",
    )
    .bind(body.base)
    .bind(body.allowances)
    .bind(body.deductions)
    .bind(body.paid_on)
    .bind(salary_id)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            activity::record(&app_state.db, &claims.sub, "update_salary", &format!("salary:{}", salary_id));
            HttpResponse::Ok().json(serde_json::json!({ "message": "Salary record updated" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Salary record not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to update salary record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to update salary record".to_string(),
            })
        }
    }
}

#[delete("/{id}")]
async fn delete_salary(
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

    let result = sqlx::query("DELETE FROM salaries WHERE id = $1")
        .bind(path.into_inner())
        .execute(&app_state.db)
        .await;

    match result {
        Ok(done) if done.rows_affected() > 0 => {
            HttpResponse::Ok().json(serde_json::json!({ "message": "Salary record deleted" }))
        }
        Ok(_) => HttpResponse::NotFound().json(ErrorResponse {
            error: "Salary record not found".to_string(),
        }),
        Err(e) => {
            error!("Failed to delete salary record: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to delete salary record".to_string(),
            })
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/salaries")
            .service(create_salary)
            .service(payroll)
            .service(staff_history)
            .service(update_salary)
            .service(delete_salary),
    );
}
