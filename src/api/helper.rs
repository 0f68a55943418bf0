use crate::AppState;
use crate::errors::AppError;
use crate::presentation::Notice;
use crate::response::{ApiResponse, PageView};
use crate::session::CurrentSession;
use axum::response::Redirect;
use axum_extra::extract::cookie::SignedCookieJar;
use diesel::{Connection, PgConnection};
use serde::Serialize;
use tracing::{debug, error};

pub(super) type PageResult<T> = Result<(SignedCookieJar, ApiResponse<PageView<T>>), AppError>;
pub(super) type RedirectResult = Result<(SignedCookieJar, Redirect), AppError>;

/// Runs a plain Diesel query on a pooled connection.
pub(super) async fn run_query<T, F>(
    pool: &deadpool_diesel::postgres::Pool,
    query: F,
) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, diesel::result::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await.map_err(|pool_err| {
        error!(
            "Failed to get DB connection object from pool: {:?}",
            pool_err
        );
        AppError::PoolError(pool_err)
    })?;
    debug!("DB connection object obtained from pool for interaction");

    let res = conn.interact(query).await;

    match res {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(diesel_err)) => {
            error!("Diesel query failed within interaction: {:?}", diesel_err);
            Err(AppError::DieselError(diesel_err))
        }
        Err(interact_err) => {
            error!("Deadpool interact error: {:?}", interact_err);
            Err(AppError::InteractError(interact_err))
        }
    }
}

/// Runs `action` inside one transaction on a pooled connection. Any error
/// rolls the transaction back.
pub(super) async fn run_transaction<T, F>(
    pool: &deadpool_diesel::postgres::Pool,
    action: F,
) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool.get().await.map_err(|pool_err| {
        error!(
            "Failed to get DB connection object from pool: {:?}",
            pool_err
        );
        AppError::PoolError(pool_err)
    })?;

    let res = conn
        .interact(|c| c.transaction::<T, AppError, _>(action))
        .await;

    match res {
        Ok(result) => {
            if let Err(e) = &result {
                if e.is_user_facing() {
                    debug!("Transaction rejected: {}", e);
                } else {
                    error!("Transaction failed within interaction: {:?}", e);
                }
            }
            result
        }
        Err(interact_err) => {
            error!("Deadpool interact error: {:?}", interact_err);
            Err(AppError::InteractError(interact_err))
        }
    }
}

/// Wraps page content with the signed-in user and the notices queued for it.
pub(super) async fn page<T: Serialize>(
    state: &AppState,
    mut session: CurrentSession,
    content: T,
) -> PageResult<T> {
    let notices = session.take_notices(&state.sessions).await?;
    let user = session.principal().cloned();
    Ok((
        session.into_jar(),
        ApiResponse::ok(PageView {
            user,
            notices,
            content,
        }),
    ))
}

/// Ends a form post: queues the outcome as a notice and redirects to `target`.
///
/// Failures the user can act on become error notices; infrastructure
/// failures and missing logins are returned as errors.
pub(super) async fn redirect_with(
    state: &AppState,
    mut session: CurrentSession,
    target: &str,
    outcome: Result<Notice, AppError>,
) -> RedirectResult {
    let notice = match outcome {
        Ok(notice) => notice,
        Err(e) if e.is_user_facing() => Notice::error(e.user_message()),
        Err(e) => return Err(e),
    };
    session.flash(&state.sessions, notice).await?;
    Ok((session.into_jar(), Redirect::to(target)))
}
