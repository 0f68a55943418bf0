use super::helper::{self, PageResult, RedirectResult};
use crate::AppState;
use crate::auth;
use crate::errors::{AppError, LOGIN_PATH};
use crate::payloads::user::LoginForm;
use crate::session::CurrentSession;
use axum::Form;
use axum::extract::State;
use axum::response::Redirect;
use axum_extra::extract::cookie::SignedCookieJar;
use tracing::{info, instrument, warn};

/// Entry point: sends a signed-in user to their role's home page and
/// everybody else to the login page.
pub async fn home(session: CurrentSession) -> Redirect {
    match session.principal() {
        Some(principal) => Redirect::to(principal.role.home()),
        None => Redirect::to(LOGIN_PATH),
    }
}

/// Login page. Carries the notices queued by a failed attempt or a logout.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<()>`: The signed-in user, if any, and pending notices (200 OK).
#[instrument(skip(state, session))]
pub async fn login_page(State(state): State<AppState>, session: CurrentSession) -> PageResult<()> {
    helper::page(&state, session, ()).await
}

/// Checks the submitted credentials and starts a new session.
///
/// Form Body:
/// * `username`, `password`
///
/// Returns
/// * `303 See Other` to the role's home page on success.
/// * `303 See Other` back to the login page with an error notice otherwise.
/// * `500 Internal Server Error`: If the database or session store fails.
#[instrument(skip(state, session, form))]
pub async fn login(
    State(state): State<AppState>,
    mut session: CurrentSession,
    Form(form): Form<LoginForm>,
) -> RedirectResult {
    let username = form.username.trim().to_string();
    if username.is_empty() || form.password.is_empty() {
        return helper::redirect_with(
            &state,
            session,
            LOGIN_PATH,
            Err(AppError::AuthenticationFailed),
        )
        .await;
    }

    let result = helper::run_transaction(&state.pool, move |conn| {
        auth::authenticate(conn, &username, &form.password)
    })
    .await;

    match result {
        Ok(principal) => {
            info!(
                "User {} ({}) signed in as {}",
                principal.username, principal.id, principal.role
            );
            let home = principal.role.home();
            session.sign_in(&state.sessions, principal).await?;
            Ok((session.into_jar(), Redirect::to(home)))
        }
        Err(e) => {
            warn!("Failed login attempt: {}", e);
            helper::redirect_with(&state, session, LOGIN_PATH, Err(e)).await
        }
    }
}

/// Destroys the session and clears the session cookie.
#[instrument(skip(state, session))]
pub async fn logout(
    State(state): State<AppState>,
    session: CurrentSession,
) -> Result<(SignedCookieJar, Redirect), AppError> {
    if let Some(principal) = session.principal() {
        info!("User {} signed out", principal.username);
    }
    let jar = session.sign_out(&state.sessions).await?;
    Ok((jar, Redirect::to(LOGIN_PATH)))
}
