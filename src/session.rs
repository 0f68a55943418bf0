use crate::AppState;
use crate::auth::{self, Principal, Role};
use crate::errors::AppError;
use crate::presentation::Notice;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "gradebook.session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Contents of one session file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub principal: Option<Principal>,
    #[serde(default)]
    pub notices: Vec<Notice>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Server-side session storage: one JSON file per session id.
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FileSessionStore {
    pub fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, SessionError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn new_record(&self) -> SessionRecord {
        SessionRecord {
            principal: None,
            notices: Vec::new(),
            expires_at: Utc::now() + self.ttl,
        }
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Loads a live session. Expired or unreadable records are removed and
    /// reported as absent.
    pub async fn load(&self, id: &Uuid) -> Result<Option<SessionRecord>, SessionError> {
        let bytes = match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record = match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding unreadable session {}: {}", id, e);
                self.destroy(id).await?;
                return Ok(None);
            }
        };

        if record.is_expired(Utc::now()) {
            debug!("Session {} expired at {}", id, record.expires_at);
            self.destroy(id).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    pub async fn save(&self, id: &Uuid, record: &SessionRecord) -> Result<(), SessionError> {
        let bytes = serde_json::to_vec(record)?;
        let target = self.path_for(id);
        let staging = self.dir.join(format!("{}.json.tmp", id));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &target).await?;
        Ok(())
    }

    pub async fn destroy(&self, id: &Uuid) -> Result<(), SessionError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every expired session file. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize, SessionError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| Uuid::parse_str(stem).ok())
            else {
                continue;
            };
            if self.load(&id).await?.is_none() {
                removed += 1;
            }
        }
        info!("Purged {} expired sessions from {:?}", removed, self.dir);
        Ok(removed)
    }
}

/// The session attached to the current request, loaded from the signed cookie.
///
/// A request without a valid cookie gets an empty, unsaved session; it is
/// only written to disk once something is stored in it.
pub struct CurrentSession {
    id: Option<Uuid>,
    record: SessionRecord,
    jar: SignedCookieJar,
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());

        let id = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| Uuid::parse_str(cookie.value()).ok());

        let loaded = match id {
            Some(id) => state.sessions.load(&id).await?.map(|record| (id, record)),
            None => None,
        };

        Ok(match loaded {
            Some((id, record)) => Self {
                id: Some(id),
                record,
                jar,
            },
            None => Self {
                id: None,
                record: state.sessions.new_record(),
                jar,
            },
        })
    }
}

impl CurrentSession {
    pub fn principal(&self) -> Option<&Principal> {
        self.record.principal.as_ref()
    }

    /// Authorization guard: the session must carry a principal with `role`.
    /// Anything else is treated as unauthenticated.
    pub fn require(&self, role: Role) -> Result<Principal, AppError> {
        let principal = self.principal();
        if auth::is_granted(principal, role) {
            return principal.cloned().ok_or(AppError::LoginRequired);
        }
        if let Some(principal) = principal {
            warn!(
                "User {} with role {} denied access to a {} area",
                principal.id, principal.role, role
            );
        }
        Err(AppError::LoginRequired)
    }

    async fn persist(&mut self, store: &FileSessionStore) -> Result<(), SessionError> {
        let id = *self.id.get_or_insert_with(Uuid::new_v4);
        store.save(&id, &self.record).await
    }

    pub async fn flash(&mut self, store: &FileSessionStore, notice: Notice) -> Result<(), AppError> {
        self.record.notices.push(notice);
        self.persist(store).await?;
        Ok(())
    }

    /// Drains queued notices so each one is shown exactly once.
    pub async fn take_notices(&mut self, store: &FileSessionStore) -> Result<Vec<Notice>, AppError> {
        if self.record.notices.is_empty() {
            return Ok(Vec::new());
        }
        let notices = std::mem::take(&mut self.record.notices);
        if self.id.is_some() {
            self.persist(store).await?;
        }
        Ok(notices)
    }

    /// Stores `principal` under a fresh session id, discarding the old one.
    pub async fn sign_in(&mut self, store: &FileSessionStore, principal: Principal) -> Result<(), AppError> {
        if let Some(old) = self.id.take() {
            store.destroy(&old).await?;
        }
        let notices = std::mem::take(&mut self.record.notices);
        self.record = store.new_record();
        self.record.notices = notices;
        self.record.principal = Some(principal);
        self.persist(store).await?;
        Ok(())
    }

    pub async fn sign_out(mut self, store: &FileSessionStore) -> Result<SignedCookieJar, AppError> {
        if let Some(id) = self.id.take() {
            store.destroy(&id).await?;
        }
        Ok(self.jar.remove(Cookie::build(SESSION_COOKIE).path("/")))
    }

    /// The cookie jar to send back; carries the session cookie when the
    /// session has been stored.
    pub fn into_jar(self) -> SignedCookieJar {
        match self.id {
            Some(id) => self.jar.add(
                Cookie::build((SESSION_COOKIE, id.to_string()))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax),
            ),
            None => self.jar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::NoticeLevel;

    fn temp_store(ttl: Duration) -> FileSessionStore {
        let dir = std::env::temp_dir().join(format!("gradebook-sessions-{}", Uuid::new_v4()));
        FileSessionStore::open(dir, ttl).unwrap()
    }

    fn admin() -> Principal {
        Principal {
            id: 1,
            username: "admin".to_string(),
            role: Role::Admin,
        }
    }

    #[tokio::test]
    async fn saved_record_loads_back() {
        let store = temp_store(Duration::hours(24));
        let id = Uuid::new_v4();
        let mut record = store.new_record();
        record.principal = Some(admin());
        record.notices.push(Notice::success("Saved."));

        store.save(&id, &record).await.unwrap();
        let loaded = store.load(&id).await.unwrap().expect("record present");

        assert_eq!(loaded.principal, Some(admin()));
        assert_eq!(loaded.notices.len(), 1);
        assert_eq!(loaded.notices[0].level, NoticeLevel::Success);
        std::fs::remove_dir_all(store.dir()).unwrap();
    }

    #[tokio::test]
    async fn expired_record_is_removed_on_load() {
        let store = temp_store(Duration::seconds(-1));
        let id = Uuid::new_v4();
        store.save(&id, &store.new_record()).await.unwrap();

        assert!(store.load(&id).await.unwrap().is_none());
        assert!(!store.dir().join(format!("{}.json", id)).exists());
        std::fs::remove_dir_all(store.dir()).unwrap();
    }

    #[tokio::test]
    async fn purge_counts_only_expired_sessions() {
        let store = temp_store(Duration::hours(1));
        let live = Uuid::new_v4();
        store.save(&live, &store.new_record()).await.unwrap();

        let stale = Uuid::new_v4();
        let mut record = store.new_record();
        record.expires_at = Utc::now() - Duration::minutes(5);
        store.save(&stale, &record).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.load(&live).await.unwrap().is_some());
        std::fs::remove_dir_all(store.dir()).unwrap();
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_absent() {
        let store = temp_store(Duration::hours(1));
        let id = Uuid::new_v4();
        std::fs::write(store.dir().join(format!("{}.json", id)), b"{not json").unwrap();

        assert!(store.load(&id).await.unwrap().is_none());
        std::fs::remove_dir_all(store.dir()).unwrap();
    }

    #[tokio::test]
    async fn destroying_a_missing_session_is_not_an_error() {
        let store = temp_store(Duration::hours(1));
        store.destroy(&Uuid::new_v4()).await.unwrap();
        std::fs::remove_dir_all(store.dir()).unwrap();
    }
}
