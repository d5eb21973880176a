pub mod activity;
pub mod applications;
pub mod attendance;
pub mod auth;
pub mod classes;
pub mod discipline;
pub mod fees;
pub mod groups;
pub mod hods;
pub mod inventory;
pub mod messages;
pub mod roles;
pub mod salary;
pub mod staff;
pub mod staff_attendance;
pub mod storage;
pub mod students;
pub mod teachers;
pub mod timetable;

use actix_cors::Cors;
use actix_files as fs;
use actix_web::{middleware, web, App, HttpResponse};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::sync::Arc;

use staff_attendance::AttendancePolicy;
use storage::BlobStore;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_secret: String,
    pub service_token: Option<String>,
    pub storage: Arc<dyn BlobStore>,
    pub upload_dir: PathBuf,
    pub attendance_policy: AttendancePolicy,
}

async fn route_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "error": "Route not found"
    }))
}

pub fn create_app(app_state: web::Data<AppState>) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let upload_dir = app_state.upload_dir.clone();

    App::new()
        .app_data(app_state)
        .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB max payload
        .wrap(
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600),
        )
        .wrap(middleware::Logger::default())
        .configure(auth::configure)
        .configure(activity::configure)
        .configure(students::configure)
        .configure(teachers::configure)
        .configure(staff::configure)
        .configure(classes::configure)
        .configure(fees::configure)
        .configure(attendance::configure)
        .configure(staff_attendance::configure)
        .configure(messages::configure)
        .configure(groups::configure)
        .configure(timetable::configure)
        .configure(inventory::configure)
        .configure(salary::configure)
        .configure(discipline::configure)
        .configure(hods::configure)
        .configure(applications::configure)
        .service(fs::Files::new("/uploads", upload_dir))
        .default_service(web::route().to(route_not_found))
}

pub async fn init_db(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
