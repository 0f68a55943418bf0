use crate::cli::Args;
use crate::notification::{GradeNotifier, LogNotifier, SmtpNotifier};
use crate::session::FileSessionStore;
use anyhow::{Context, ensure};
use axum::Router;
use axum::extract::FromRef;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum_extra::extract::cookie::Key;
use deadpool_diesel::Runtime;
use deadpool_diesel::postgres::{Manager, Pool};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub mod auth;
pub mod cli;
pub mod domain;
pub mod errors;
pub mod model;
pub mod notification;
pub mod payloads;
pub mod presentation;
pub mod response;
pub mod schema;
pub mod session;

mod api;

const MIN_SECRET_LEN: usize = 32;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub sessions: Arc<FileSessionStore>,
    pub notifier: Arc<dyn GradeNotifier>,
    pub cookie_key: Key,
    pub public_dir: PathBuf,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

pub async fn init_router(args: &Args) -> anyhow::Result<Router> {
    info!("Initializing database pool...");
    let pool = init_pool(&args.connection_str, args.db_pool_max_size)
        .context("Failed to initialize database pool")?;

    info!("Initializing session store in {:?}...", args.session_dir);
    let session_ttl = chrono::Duration::try_hours(args.session_ttl_hours)
        .context("Session TTL is out of range")?;
    let sessions = FileSessionStore::open(&args.session_dir, session_ttl)
        .context("Failed to open session directory")?;
    if let Err(e) = sessions.purge_expired().await {
        warn!("Could not purge expired sessions: {}", e);
    }

    ensure!(
        args.session_secret.len() >= MIN_SECRET_LEN,
        "SESSION_SECRET must be at least {} bytes long",
        MIN_SECRET_LEN
    );
    let cookie_key = Key::derive_from(args.session_secret.as_bytes());

    info!("Initializing grade notifier...");
    let notifier: Arc<dyn GradeNotifier> = match &args.smtp_host {
        Some(host) => Arc::new(
            SmtpNotifier::new(host, args.smtp_port, &args.mail_from)
                .context("Failed to initialize SMTP notifier")?,
        ),
        None => {
            warn!("No SMTP host configured, grade notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    info!("Initializing router...");
    Ok(init_router_internal(AppState {
        pool,
        sessions: Arc::new(sessions),
        notifier,
        cookie_key,
        public_dir: args.public_dir.clone(),
    }))
}

/// Router over a caller-provided pool and notifier. Sessions are stored in
/// `data_dir/sessions` and assets are looked up in `data_dir/public`.
pub fn init_test_router(
    pool: Pool,
    data_dir: &Path,
    notifier: Arc<dyn GradeNotifier>,
) -> anyhow::Result<Router> {
    let sessions = FileSessionStore::open(data_dir.join("sessions"), chrono::Duration::hours(24))
        .context("Failed to open test session directory")?;

    Ok(init_router_internal(AppState {
        pool,
        sessions: Arc::new(sessions),
        notifier,
        cookie_key: Key::generate(),
        public_dir: data_dir.join("public"),
    }))
}

fn init_router_internal(state: AppState) -> Router {
    Router::new()
        .route("/", get(api::user::home))
        .nest("/user", user_routes())
        .nest("/admin", admin_routes())
        .nest("/teacher", teacher_routes())
        .nest("/student", student_routes())
        .fallback(page_not_found)
        .with_state(state)
}

fn init_pool(conn_str: &str, max_size: u32) -> anyhow::Result<Pool> {
    let manager = Manager::new(conn_str, Runtime::Tokio1);
    let pool = Pool::builder(manager).max_size(max_size as usize).build()?;
    Ok(pool)
}

async fn page_not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        format!("Page \"{}\" does not exist!", uri.path()),
    )
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/login",
            get(api::user::login_page).post(api::user::login),
        )
        .route("/logout", get(api::user::logout))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api::admin::list_users))
        .route(
            "/user/create",
            get(api::admin::create_user_page).post(api::admin::create_user),
        )
        .route(
            "/user/{id}/edit",
            get(api::admin::edit_user_page).post(api::admin::edit_user),
        )
        .route("/user/{id}/delete", post(api::admin::delete_user))
        .route("/classes", get(api::admin::list_classes))
        .route(
            "/classes/create",
            get(api::admin::create_class_page).post(api::admin::create_class),
        )
        .route(
            "/classes/{id}/edit",
            get(api::admin::edit_class_page).post(api::admin::edit_class),
        )
        .route("/classes/{id}/delete", post(api::admin::delete_class))
        .route("/subjects", get(api::admin::list_subjects))
        .route(
            "/subjects/create",
            get(api::admin::create_subject_page).post(api::admin::create_subject),
        )
        .route(
            "/subjects/{id}/edit",
            get(api::admin::edit_subject_page).post(api::admin::edit_subject),
        )
        .route("/subjects/{id}/delete", post(api::admin::delete_subject))
        .route("/subjects/{id}/details", get(api::admin::subject_details))
        .route(
            "/subjects/{id}/clear-assignments",
            post(api::admin::clear_subject_assignments),
        )
        .route(
            "/subjects/{id}/clear-enrollments",
            post(api::admin::clear_subject_enrollments),
        )
        .route(
            "/class-subjects",
            get(api::admin::list_assignments).post(api::admin::upsert_assignment),
        )
        .route(
            "/class-subjects/{id}/edit",
            get(api::admin::edit_assignment_page).post(api::admin::edit_assignment),
        )
        .route(
            "/class-subjects/{id}/delete",
            post(api::admin::delete_assignment),
        )
        .route(
            "/class-subjects/{id}/enroll",
            post(api::admin::enroll_student),
        )
        .route(
            "/class-subjects/{id}/enroll-class",
            post(api::admin::enroll_class),
        )
        .route("/enrollments/{id}/delete", post(api::admin::delete_enrollment))
}

fn teacher_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(api::teacher::list_class_subjects))
        .route(
            "/class-subject/{id}",
            get(api::teacher::class_subject_students),
        )
        .route(
            "/enrollment/{id}/grades",
            get(api::teacher::enrollment_grades),
        )
        .route("/grade/add", post(api::teacher::add_grade))
}

fn student_routes() -> Router<AppState> {
    Router::new().route("/", get(api::student::list_grades))
}
