use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

pub mod ledger;

use ledger::{FeeSchedule, FeeType, TypeBalance};

/// Resolve a student's class and its fee schedule. A student without a
/// class has no schedule, so balances are undefined for them.
async fn load_schedule_for_student(
    app_state: &AppState,
    student_id: i32,
) -> Result<(i32, FeeSchedule), HttpResponse> {
    let class_id = match sqlx::query_scalar::<_, Option<i32>>(
        "SELECT class_id FROM students WHERE id = $1",
    )
    .bind(student_id)
    .fetch_optional(&app_state.db)
    .await
    {
        Ok(Some(Some(class_id))) => class_id,
        Ok(Some(None)) => {
            return Err(HttpResponse::Conflict().json(serde_json::json!({
                "error": "Student is not assigned to a class; fee schedule is undefined"
            })));
        }
        Ok(None) => {
            return Err(HttpResponse::NotFound().json(serde_json::json!({
                "error": "Student not found"
            })));
        }
        Err(e) => {
            error!("Failed to look up student {}: {}", student_id, e);
            return Err(HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Database error"
            })));
        }
    };

    let schedule = load_class_schedule(app_state, class_id).await?;
    Ok((class_id, schedule))
}

async fn load_class_schedule(
    app_state: &AppState,
    class_id: i32,
) -> Result<FeeSchedule, HttpResponse> {
    sqlx::query_as::<_, FeeSchedule>(
        "SELECT registration_fee, bus_fee, internship_fee, remedial_fee, tuition_fee, pta_fee
         FROM classes WHERE id = $1",
    )
    .bind(class_id)
    .fetch_optional(&app_state.db)
    .await
    .map_err(|e| {
        error!("Failed to load fee schedule for class {}: {}", class_id, e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error"
        }))
    })?
    .ok_or_else(|| {
        HttpResponse::NotFound().json(serde_json::json!({
            "error": "Class not found"
        }))
    })
}

/// Cumulative paid totals per fee type for one student, optionally
/// restricted to a calendar year.
async fn paid_totals(
    app_state: &AppState,
    student_id: i32,
    year: Option<i32>,
) -> Result<HashMap<FeeType, Decimal>, HttpResponse> {
    let rows: Vec<(String, Decimal)> = match year {
        Some(year) => {
            sqlx::query_as(
                "SELECT fee_type, COALESCE(SUM(amount), 0)
                 FROM fee_payments
                 WHERE student_id = $1 AND date_part('year', paid_at)::int = $2
                 GROUP BY fee_type",
            )
            .bind(student_id)
            .bind(year)
            .fetch_all(&app_state.db)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT fee_type, COALESCE(SUM(amount), 0)
                 FROM fee_payments
                 WHERE student_id = $1
                 GROUP BY fee_type",
            )
            .bind(student_id)
            .fetch_all(&app_state.db)
            .await
        }
    }
    .map_err(|e| {
        error!("Failed to sum payments for student {}: {}", student_id, e);
        HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Database error"
        }))
    })?;

    let mut totals = HashMap::new();
    for (label, sum) in rows {
        match label.parse::<FeeType>() {
            Ok(fee_type) => {
                *totals.entry(fee_type).or_insert(Decimal::ZERO) += sum;
            }
            Err(_) => {
                // Labels are normalized at insert time; anything else is
                // hand-edited data worth surfacing in the logs.
                error!(
                    "Ignoring unknown fee type '{}' for student {}",
                    label, student_id
                );
            }
        }
    }

    Ok(totals)
}

#[derive(Debug, Deserialize)]
pub struct SubmitPaymentRequest {
    pub student_id: i32,
    pub class_id: i32,
    pub fee_type: String,
    pub amount: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
    pub reference: Option<String>,
}

#[post("/payments")]
async fn submit_payment(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SubmitPaymentRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let fee_type: FeeType = match body.fee_type.parse() {
        Ok(fee_type) => fee_type,
        Err(_) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Unknown fee type '{}'", body.fee_type),
            });
        }
    };

    let (class_id, schedule) = match load_schedule_for_student(&app_state, body.student_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if body.class_id != class_id {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "class_id does not match the student's class".to_string(),
        });
    }

    let totals = match paid_totals(&app_state, body.student_id, None).await {
        Ok(totals) => totals,
        Err(response) => return response,
    };
    let already_paid = totals.get(&fee_type).copied().unwrap_or(Decimal::ZERO);

    if let Err(e) = ledger::check_payment(schedule.amount_for(fee_type), already_paid, body.amount)
    {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: e.to_string(),
        });
    }

    let paid_at = body.paid_at.unwrap_or_else(Utc::now);

    let inserted = sqlx::query_scalar::<_, i32>(
        "INSERT INTO fee_payments (student_id, class_id, fee_type, amount, paid_at, reference)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id",
    )
    .bind(body.student_id)
    .bind(class_id)
    .bind(fee_type.as_str())
    .bind(body.amount)
    .bind(paid_at)
    .bind(&body.reference)
    .fetch_one(&app_state.db)
    .await;

    match inserted {
        Ok(id) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "submit_payment",
                &format!("student:{} {}:{}", body.student_id, fee_type, body.amount),
            );
            HttpResponse::Created().json(serde_json::json!({
                "id": id,
                "fee_type": fee_type,
                "amount": body.amount,
            }))
        }
        Err(e) => {
            error!("Failed to insert payment: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to record payment".to_string(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct BalanceQuery {
    year: Option<i32>,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    student_id: i32,
    class_id: i32,
    balances: Vec<TypeBalance>,
    total_scheduled: Decimal,
    total_paid: Decimal,
    total_balance: Decimal,
}

fn summarize(student_id: i32, class_id: i32, balances: Vec<TypeBalance>) -> BalanceResponse {
    let total_scheduled = balances.iter().map(|b| b.scheduled).sum();
    let total_paid = balances.iter().map(|b| b.paid).sum();
    let total_balance = balances.iter().map(|b| b.balance).sum();
    BalanceResponse {
        student_id,
        class_id,
        balances,
        total_scheduled,
        total_paid,
        total_balance,
    }
}

#[get("/balance/{student_id}")]
async fn student_balance(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<i32>,
    query: web::Query<BalanceQuery>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let student_id = path.into_inner();

    let (class_id, schedule) = match load_schedule_for_student(&app_state, student_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let totals = match paid_totals(&app_state, student_id, query.year).await {
        Ok(totals) => totals,
        Err(response) => return response,
    };

    let balances = ledger::balances(&schedule, &totals);
    HttpResponse::Ok().json(summarize(student_id, class_id, balances))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub student_id: i32,
    pub fee_type: String,
    pub total_amount: Decimal,
}

/// Replace a student's payment history for one fee type with at most one
/// consolidated row. The only operation allowed to overwrite history.
#[put("/reconcile")]
async fn reconcile(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ReconcileRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let fee_type: FeeType = match body.fee_type.parse() {
        Ok(fee_type) => fee_type,
        Err(_) => {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Unknown fee type '{}'", body.fee_type),
            });
        }
    };

    let (class_id, schedule) = match load_schedule_for_student(&app_state, body.student_id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let replacement =
        match ledger::consolidated_row(schedule.amount_for(fee_type), body.total_amount) {
            Ok(replacement) => replacement,
            Err(e) => {
                return HttpResponse::BadRequest().json(ErrorResponse {
                    error: e.to_string(),
                });
            }
        };

    let mut tx = match app_state.db.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("Failed to start transaction: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    if let Err(e) = sqlx::query("DELETE FROM fee_payments WHERE student_id = $1 AND fee_type = $2")
        .bind(body.student_id)
        .bind(fee_type.as_str())
        .execute(&mut *tx)
        .await
    {
        error!("Failed to clear payments during reconciliation: {}", e);
        let _ = tx.rollback().await;
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to reconcile".to_string(),
        });
    }

    if let Some(amount) = replacement {
        if let Err(e) = sqlx::query(
            "INSERT INTO fee_payments (student_id, class_id, fee_type, amount, reference)
             VALUES ($1, $2, $3, $4, 'reconciliation')",
        )
        .bind(body.student_id)
        .bind(class_id)
        .bind(fee_type.as_str())
        .bind(amount)
        .execute(&mut *tx)
        .await
        {
            error!("Failed to insert consolidated payment: {}", e);
            let _ = tx.rollback().await;
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to reconcile".to_string(),
            });
        }
    }

    if let Err(e) = tx.commit().await {
        error!("Failed to commit reconciliation: {}", e);
        return HttpResponse::InternalServerError().json(ErrorResponse {
            error: "Failed to reconcile".to_string(),
        });
    }

    activity::record(
        &app_state.db,
        &claims.sub,
        "reconcile_fees",
        &format!("student:{} {}:{}", body.student_id, fee_type, body.total_amount),
    );

    HttpResponse::Ok().json(serde_json::json!({
        "student_id": body.student_id,
        "fee_type": fee_type,
        "total_paid": body.total_amount,
    }))
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RollupStudent {
    id: i32,
    first_name: String,
    last_name: String,
}

#[derive(Debug, Serialize)]
struct StudentRollup {
    student_id: i32,
    full_name: String,
    balances: Vec<TypeBalance>,
    total_scheduled: Decimal,
    total_paid: Decimal,
    total_balance: Decimal,
}

/// In-memory map/reduce for the class view. Classes are small (dozens of
/// students), so no pagination.
fn class_rollup(
    schedule: &FeeSchedule,
    students: &[RollupStudent],
    payments: &[(i32, String, Decimal)],
) -> Vec<StudentRollup> {
    let mut paid_by_student: HashMap<i32, HashMap<FeeType, Decimal>> = HashMap::new();
    for (student_id, label, amount) in payments {
        if let Ok(fee_type) = label.parse::<FeeType>() {
            *paid_by_student
                .entry(*student_id)
                .or_default()
                .entry(fee_type)
                .or_insert(Decimal::ZERO) += *amount;
        }
    }

    let empty = HashMap::new();
    students
        .iter()
        .map(|student| {
            let paid = paid_by_student.get(&student.id).unwrap_or(&empty);
            let balances = ledger::balances(schedule, paid);
            let total_scheduled = balances.iter().map(|b| b.scheduled).sum();
            let total_paid = balances.iter().map(|b| b.paid).sum();
            let total_balance = balances.iter().map(|b| b.balance).sum();
            StudentRollup {
                student_id: student.id,
                full_name: format!("{} {}", student.first_name, student.last_name),
                balances,
                total_scheduled,
                total_paid,
                total_balance,
            }
        })
        .collect()
}

#[get("/class/{class_id}")]
async fn class_balances(
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

    let class_id = path.into_inner();

    let schedule = match load_class_schedule(&app_state, class_id).await {
        Ok(schedule) => schedule,
        Err(response) => return response,
    };

    let students = match sqlx::query_as::<_, RollupStudent>(
        "SELECT id, first_name, last_name FROM students
         WHERE class_id = $1 AND status = 'active'
         ORDER BY last_name, first_name, id",
    )
    .bind(class_id)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(students) => students,
        Err(e) => {
            error!("Failed to list students for class {}: {}", class_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let student_ids: Vec<i32> = students.iter().map(|s| s.id).collect();

    let payments: Vec<(i32, String, Decimal)> = match sqlx::query_as(
        "SELECT student_id, fee_type, amount FROM fee_payments WHERE student_id = ANY($1)",
    )
    .bind(&student_ids)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(payments) => payments,
        Err(e) => {
            error!("Failed to load payments for class {}: {}", class_id, e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    HttpResponse::Ok().json(class_rollup(&schedule, &students, &payments))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/fees")
            .service(submit_payment)
            .service(student_balance)
            .service(reconcile)
            .service(class_balances),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn schedule() -> FeeSchedule {
        FeeSchedule {
            registration_fee: dec!(0),
            bus_fee: dec!(0),
            internship_fee: dec!(0),
            remedial_fee: dec!(0),
            tuition_fee: dec!(50000),
            pta_fee: dec!(0),
        }
    }

    #[test]
    fn rollup_returns_one_entry_per_student_in_query_order() {
        let students = vec![
            RollupStudent {
                id: 7,
                first_name: "Ama".into(),
                last_name: "Boateng".into(),
            },
            RollupStudent {
                id: 3,
                first_name: "Kofi".into(),
                last_name: "Mensah".into(),
            },
        ];
        let payments = vec![
            (7, "Tuition".to_string(), dec!(20000)),
            (7, "Tuition".to_string(), dec!(20000)),
            (3, "tuition".to_string(), dec!(50000)),
        ];

        let rollup = class_rollup(&schedule(), &students, &payments);

        assert_eq!(rollup.len(), 2);
        assert_eq!(rollup[0].student_id, 7);
        assert_eq!(rollup[1].student_id, 3);

        assert_eq!(rollup[0].total_paid, dec!(40000));
        assert_eq!(rollup[0].total_balance, dec!(10000));
        assert_eq!(rollup[1].total_paid, dec!(50000));
        assert_eq!(rollup[1].total_balance, dec!(0));

        // Each entry is internally consistent with the per-student view.
        for entry in &rollup {
            assert_eq!(
                entry.total_balance,
                (entry.total_scheduled - entry.total_paid).max(Decimal::ZERO)
            );
        }
    }

    #[test]
    fn rollup_student_with_no_payments_owes_full_schedule() {
        let students = vec![RollupStudent {
            id: 1,
            first_name: "Esi".into(),
            last_name: "Adjei".into(),
        }];

        let rollup = class_rollup(&schedule(), &students, &[]);
        assert_eq!(rollup[0].total_paid, dec!(0));
        assert_eq!(rollup[0].total_balance, dec!(50000));
    }

    // The row flow below mirrors the handlers: a payment row is appended
    // only when the gate accepts, and reconciliation swaps the whole
    // history for the consolidated row the ledger hands back.

    #[test]
    fn rejected_payment_appends_no_row() {
        let scheduled = schedule().tuition_fee;
        let mut rows = vec![dec!(20000), dec!(20000)];
        let paid: Decimal = rows.iter().copied().sum();

        if ledger::check_payment(scheduled, paid, dec!(15000)).is_ok() {
            rows.push(dec!(15000));
        }
        assert_eq!(rows, vec![dec!(20000), dec!(20000)]);

        if ledger::check_payment(scheduled, paid, dec!(10000)).is_ok() {
            rows.push(dec!(10000));
        }
        assert_eq!(rows, vec![dec!(20000), dec!(20000), dec!(10000)]);
    }

    #[test]
    fn reconcile_replaces_history_with_exactly_one_row() {
        let mut rows = vec![dec!(20000), dec!(15000)];

        let replacement = ledger::consolidated_row(dec!(50000), dec!(30000)).unwrap();
        rows.clear();
        rows.extend(replacement);

        assert_eq!(rows, vec![dec!(30000)]);
    }

    #[test]
    fn reconcile_to_zero_leaves_no_rows() {
        let mut rows = vec![dec!(20000), dec!(15000)];

        let replacement = ledger::consolidated_row(dec!(50000), dec!(0)).unwrap();
        rows.clear();
        rows.extend(replacement);

        assert!(rows.is_empty());
    }

    #[test]
    fn rejected_reconciliation_keeps_history_untouched() {
        let mut rows = vec![dec!(20000), dec!(15000)];

        if let Ok(replacement) = ledger::consolidated_row(dec!(50000), dec!(60000)) {
            rows.clear();
            rows.extend(replacement);
        }

        assert_eq!(rows, vec![dec!(20000), dec!(15000)]);
    }
}
