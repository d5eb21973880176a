use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::activity;
use crate::auth::{verify_token, ErrorResponse};
use crate::roles::ensure_privileged;
use crate::AppState;

/// Expected workday window, read from env at startup. The monthly report
/// measures worked/missed minutes against this window.
#[derive(Debug, Clone, Copy)]
pub struct AttendancePolicy {
    pub workday_start: NaiveTime,
    pub workday_end: NaiveTime,
}

impl AttendancePolicy {
    pub fn from_env() -> Self {
        let parse = |var: &str, default: (u32, u32)| {
            std::env::var(var)
                .ok()
                .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
                .unwrap_or_else(|| NaiveTime::from_hms_opt(default.0, default.1, 0).unwrap())
        };
        Self {
            workday_start: parse("WORKDAY_START", (8, 0)),
            workday_end: parse("WORKDAY_END", (16, 0)),
        }
    }

    pub fn expected_minutes(&self) -> i64 {
        (self.workday_end - self.workday_start).num_minutes().max(0)
    }
}

fn expected_weekdays(employment_type: &str) -> &'static [Weekday] {
    match employment_type {
        "part_time" => &[Weekday::Mon, Weekday::Wed, Weekday::Fri],
        _ => &[
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ],
    }
}

fn days_in_month(year: i32, month: u32) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(day) => day,
        None => return days,
    };
    while day.month() == month {
        days.push(day);
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    days
}

#[derive(Debug, Clone, FromRow)]
pub struct AttendanceRow {
    pub day: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct DayEntry {
    pub day: NaiveDate,
    pub status: String,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub worked_minutes: i64,
    pub missed_minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct MonthlyStaffReport {
    pub staff_id: i32,
    pub full_name: String,
    pub employment_type: String,
    pub days: Vec<DayEntry>,
    pub expected_days: u32,
    pub present_days: u32,
    pub worked_minutes: i64,
    pub missed_minutes: i64,
    pub attendance_rate: f64,
}

/// Map/reduce over one month's records; nothing is carried across months.
/// Every calendar day appears: expected working days default to "Absent"
/// until a record overlays them, non-working days are reported as "Off".
pub fn build_monthly_report(
    year: i32,
    month: u32,
    policy: &AttendancePolicy,
    staff_id: i32,
    full_name: &str,
    employment_type: &str,
    records: &[AttendanceRow],
) -> MonthlyStaffReport {
    let working_days = expected_weekdays(employment_type);
    let expected_per_day = policy.expected_minutes();

    let mut days = Vec::new();
    let mut expected_days = 0u32;
    let mut present_days = 0u32;
    let mut worked_total = 0i64;
    let mut missed_total = 0i64;

    for day in days_in_month(year, month) {
        let is_working_day = working_days.contains(&day.weekday());
        let record = records.iter().find(|r| r.day == day);

        if !is_working_day {
            days.push(DayEntry {
                day,
                status: "Off".to_string(),
                check_in: record.and_then(|r| r.check_in),
                check_out: record.and_then(|r| r.check_out),
                worked_minutes: 0,
                missed_minutes: 0,
            });
            continue;
        }

        expected_days += 1;

        match record {
            Some(record) => {
                let worked = match (record.check_in, record.check_out) {
                    (Some(check_in), Some(check_out)) => {
                        (check_out - check_in).num_minutes().max(0)
                    }
                    _ => 0,
                };
                let missed = (expected_per_day - worked).max(0);
                if record.status == "Present" {
                    present_days += 1;
                }
                worked_total += worked;
                missed_total += missed;
                days.push(DayEntry {
                    day,
                    status: record.status.clone(),
                    check_in: record.check_in,
                    check_out: record.check_out,
                    worked_minutes: worked,
                    missed_minutes: missed,
                });
            }
            None => {
                missed_total += expected_per_day;
                days.push(DayEntry {
                    day,
                    status: "Absent".to_string(),
                    check_in: None,
                    check_out: None,
                    worked_minutes: 0,
                    missed_minutes: expected_per_day,
                });
            }
        }
    }

    let attendance_rate = if expected_days == 0 {
        0.0
    } else {
        (present_days as f64 / expected_days as f64) * 100.0
    };

    MonthlyStaffReport {
        staff_id,
        full_name: full_name.to_string(),
        employment_type: employment_type.to_string(),
        days,
        expected_days,
        present_days,
        worked_minutes: worked_total,
        missed_minutes: missed_total,
        attendance_rate,
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordAttendanceRequest {
    pub staff_id: i32,
    pub day: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: Option<String>,
}

#[post("")]
async fn record_attendance(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<RecordAttendanceRequest>,
) -> impl Responder {
    let claims = match verify_token(&req, &app_state) {
        Ok(claims) => claims,
        Err(response) => return response,
    };
    if let Err(response) = ensure_privileged(&claims) {
        return response;
    }

    let status = body.status.as_deref().unwrap_or("Present");
    if !matches!(status, "Present" | "Absent" | "Leave" | "Sick") {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Status must be one of Present, Absent, Leave, Sick".to_string(),
        });
    }

    if let (Some(check_in), Some(check_out)) = (body.check_in, body.check_out) {
        if check_out < check_in {
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "check_out must not be before check_in".to_string(),
            });
        }
    }

    let staff_exists = match sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM staff WHERE id = $1 AND status = 'active')",
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

    let result = sqlx::query(
        "INSERT INTO staff_attendance (staff_id, day, check_in, check_out, status)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (staff_id, day)
         DO UPDATE SET check_in = $3, check_out = $4, status = $5",
    )
    .bind(body.staff_id)
    .bind(body.day)
    .bind(body.check_in)
    .bind(body.check_out)
    .bind(status)
    .execute(&app_state.db)
    .await;

    match result {
        Ok(_) => {
            activity::record(
                &app_state.db,
                &claims.sub,
                "record_staff_attendance",
                &format!("staff:{} day:{}", body.staff_id, body.day),
            );
            HttpResponse::Created().json(serde_json::json!({ "message": "Attendance recorded" }))
        }
        Err(e) => {
            error!("Failed to record staff attendance: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to record attendance".to_string(),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportQuery {
    month: u32,
    year: i32,
}

#[derive(Debug, FromRow)]
struct StaffRow {
    id: i32,
    full_name: String,
    employment_type: String,
}

#[get("/report")]
async fn monthly_report(
    app_state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ReportQuery>,
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

    let staff = match sqlx::query_as::<_, StaffRow>(
        "SELECT id, full_name, employment_type FROM staff
         WHERE status = 'active' ORDER BY full_name",
    )
    .fetch_all(&app_state.db)
    .await
    {
        Ok(staff) => staff,
        Err(e) => {
            error!("Failed to list staff: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let records: Vec<(i32, AttendanceRow)> = match sqlx::query_as::<
        _,
        (i32, NaiveDate, Option<NaiveTime>, Option<NaiveTime>, String),
    >(
        "SELECT staff_id, day, check_in, check_out, status
         FROM staff_attendance
         WHERE date_part('year', day)::int = $1 AND date_part('month', day)::int = $2",
    )
    .bind(query.year)
    .bind(query.month as i32)
    .fetch_all(&app_state.db)
    .await
    {
        Ok(rows) => rows
            .into_iter()
            .map(|(staff_id, day, check_in, check_out, status)| {
                (
                    staff_id,
                    AttendanceRow {
                        day,
                        check_in,
                        check_out,
                        status,
                    },
                )
            })
            .collect(),
        Err(e) => {
            error!("Failed to load staff attendance: {}", e);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Database error".to_string(),
            });
        }
    };

    let reports: Vec<MonthlyStaffReport> = staff
        .iter()
        .map(|member| {
            let own_records: Vec<AttendanceRow> = records
                .iter()
                .filter(|(staff_id, _)| *staff_id == member.id)
                .map(|(_, row)| row.clone())
                .collect();
            build_monthly_report(
                query.year,
                query.month,
                &app_state.attendance_policy,
                member.id,
                &member.full_name,
                &member.employment_type,
                &own_records,
            )
        })
        .collect();

    HttpResponse::Ok().json(reports)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/staff-attendance")
            .service(record_attendance)
            .service(monthly_report),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AttendancePolicy {
        AttendancePolicy {
            workday_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            workday_end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    #[test]
    fn no_records_means_all_absent_and_zero_rate() {
        // June 2025 has 21 weekdays.
        let report = build_monthly_report(2025, 6, &policy(), 1, "A. Mensah", "full_time", &[]);

        assert_eq!(report.expected_days, 21);
        assert_eq!(report.present_days, 0);
        assert_eq!(report.attendance_rate, 0.0);
        assert_eq!(report.worked_minutes, 0);
        assert_eq!(report.missed_minutes, 21 * 480);
        assert_eq!(report.days.len(), 30);
        assert!(report
            .days
            .iter()
            .filter(|d| d.status != "Off")
            .all(|d| d.status == "Absent"));
    }

    #[test]
    fn present_every_working_day_scores_hundred() {
        let check_in = NaiveTime::from_hms_opt(8, 0, 0);
        let check_out = NaiveTime::from_hms_opt(16, 0, 0);
        let records: Vec<AttendanceRow> = days_in_month(2025, 6)
            .into_iter()
            .filter(|d| expected_weekdays("full_time").contains(&d.weekday()))
            .map(|day| AttendanceRow {
                day,
                check_in,
                check_out,
                status: "Present".to_string(),
            })
            .collect();

        let report =
            build_monthly_report(2025, 6, &policy(), 1, "A. Mensah", "full_time", &records);

        assert_eq!(report.present_days, report.expected_days);
        assert_eq!(report.attendance_rate, 100.0);
        assert_eq!(report.missed_minutes, 0);
        assert_eq!(report.worked_minutes, 21 * 480);
    }

    #[test]
    fn short_day_accrues_missed_minutes() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(); // a Monday
        let records = vec![AttendanceRow {
            day,
            check_in: NaiveTime::from_hms_opt(9, 0, 0),
            check_out: NaiveTime::from_hms_opt(15, 0, 0),
            status: "Present".to_string(),
        }];

        let report =
            build_monthly_report(2025, 6, &policy(), 1, "A. Mensah", "full_time", &records);
        let entry = report.days.iter().find(|d| d.day == day).unwrap();

        assert_eq!(entry.worked_minutes, 360);
        assert_eq!(entry.missed_minutes, 120);
    }

    #[test]
    fn part_time_expects_three_days_a_week() {
        let report = build_monthly_report(2025, 6, &policy(), 1, "K. Owusu", "part_time", &[]);
        // June 2025: 5 Mondays, 4 Wednesdays, 4 Fridays.
        assert_eq!(report.expected_days, 13);
    }
}
