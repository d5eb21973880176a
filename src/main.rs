use actix_web::{web, HttpServer};
use academe_backend::staff_attendance::AttendancePolicy;
use academe_backend::storage::DiskStore;
use academe_backend::{create_app, init_db, AppState};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    // Optional .env in the working directory; real deployments set the
    // environment directly.
    let _ = dotenv::dotenv();

    let database_url = env::var("DATABASE_URL").map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "DATABASE_URL environment variable is required",
        )
    })?;

    let jwt_secret = env::var("JWT_SECRET").map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "JWT_SECRET environment variable is required",
        )
    })?;

    let service_token = env::var("SERVICE_TOKEN").ok();

    let db_pool = init_db(&database_url).await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to initialize database: {}", e),
        )
    })?;

    println!("Database initialized successfully");

    let upload_dir = env::var("UPLOAD_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("uploads"));

    std::fs::create_dir_all(&upload_dir).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to create upload directory: {}", e),
        )
    })?;

    let public_base = env::var("UPLOAD_PUBLIC_BASE").unwrap_or_else(|_| "/uploads".to_string());
    let storage = Arc::new(DiskStore::new(upload_dir.clone(), public_base));

    let attendance_policy = AttendancePolicy::from_env();

    let app_state = web::Data::new(AppState {
        db: db_pool,
        jwt_secret,
        service_token,
        storage,
        upload_dir,
        attendance_policy,
    });

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    println!("Starting server on {}", bind_addr);

    HttpServer::new(move || create_app(app_state.clone()))
        .bind(&bind_addr)?
        .run()
        .await
}
