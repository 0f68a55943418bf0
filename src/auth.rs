use crate::errors::AppError;
use crate::schema::{roles::dsl as roles_dsl, users::dsl as users_dsl};
use anyhow::anyhow;
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// One of the three fixed role codes stored in the `roles` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

#[derive(Debug, Error)]
#[error("Unknown role code '{0}'")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn code(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
        }
    }

    /// Landing page after a successful login.
    pub fn home(self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Teacher => "/teacher",
            Role::Student => "/student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code {
            "ADMIN" => Ok(Role::Admin),
            "TEACHER" => Ok(Role::Teacher),
            "STUDENT" => Ok(Role::Student),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// The authenticated actor. Stored in the session and handed explicitly to
/// every domain operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn is_granted(&self, role: Role) -> bool {
        self.role == role
    }
}

/// Role check for callers that may have no principal at all.
pub fn is_granted(principal: Option<&Principal>, role: Role) -> bool {
    principal.is_some_and(|p| p.is_granted(role))
}

/// Guard for domain operations: the actor must hold `role`.
pub fn ensure_role(principal: &Principal, role: Role) -> Result<(), AppError> {
    if principal.is_granted(role) {
        Ok(())
    } else {
        warn!(
            "Permission denied: user {} ({}) requires role {}",
            principal.id, principal.role, role
        );
        Err(AppError::Forbidden(format!("This action requires the {} role.", role)))
    }
}

#[derive(Queryable, Debug)]
pub(crate) struct CredentialsRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role_code: String,
}

/// Loads the stored credentials for `username`, if the user exists.
pub(crate) fn find_credentials(
    conn: &mut PgConnection,
    username: &str,
) -> QueryResult<Option<CredentialsRow>> {
    users_dsl::users
        .inner_join(roles_dsl::roles.on(roles_dsl::id.eq(users_dsl::role_id)))
        .filter(users_dsl::username.eq(username))
        .select((
            users_dsl::id,
            users_dsl::username,
            users_dsl::password_hash,
            roles_dsl::code,
        ))
        .first::<CredentialsRow>(conn)
        .optional()
}

/// Checks a username/password pair and returns the principal on success.
///
/// Unknown usernames and wrong passwords both yield `AuthenticationFailed`,
/// so callers cannot tell which part was wrong.
pub fn authenticate(
    conn: &mut PgConnection,
    username: &str,
    password: &str,
) -> Result<Principal, AppError> {
    let Some(row) = find_credentials(conn, username)? else {
        debug!("Login attempt for unknown username '{}'", username);
        return Err(AppError::AuthenticationFailed);
    };

    if !verify_password(password, &row.password_hash) {
        debug!("Password mismatch for username '{}'", username);
        return Err(AppError::AuthenticationFailed);
    }

    let role = row
        .role_code
        .parse::<Role>()
        .map_err(|e| AppError::InternalServerError(anyhow!(e)))?;

    Ok(Principal {
        id: row.id,
        username: row.username,
        role,
    })
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalServerError(anyhow!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash could not be parsed: {}", e);
            false
        }
    }
}

/// Resolves a role code to its row id.
pub fn role_id(conn: &mut PgConnection, role: Role) -> QueryResult<i64> {
    roles_dsl::roles
        .filter(roles_dsl::code.eq(role.code()))
        .select(roles_dsl::id)
        .first::<i64>(conn)
}

/// Returns the role of `user_id`, or `None` when the user does not exist.
pub fn role_of(conn: &mut PgConnection, user_id: i64) -> Result<Option<Role>, AppError> {
    let code = users_dsl::users
        .inner_join(roles_dsl::roles.on(roles_dsl::id.eq(users_dsl::role_id)))
        .filter(users_dsl::id.eq(user_id))
        .select(roles_dsl::code)
        .first::<String>(conn)
        .optional()?;

    code.map(|c| {
        c.parse::<Role>()
            .map_err(|e| AppError::InternalServerError(anyhow!(e)))
    })
    .transpose()
}

/// Fails unless `user_id` exists and holds `role`.
pub fn ensure_user_role(conn: &mut PgConnection, user_id: i64, role: Role) -> Result<(), AppError> {
    match role_of(conn, user_id)? {
        Some(found) if found == role => Ok(()),
        Some(found) => {
            warn!("User {} has role {}, expected {}", user_id, found, role);
            Err(AppError::Validation(format!(
                "User with ID {} is not a {}.",
                user_id,
                role.code().to_lowercase()
            )))
        }
        None => Err(AppError::NotFound(format!(
            "User with ID {} not found.",
            user_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            id: 7,
            username: "someone".to_string(),
            role,
        }
    }

    #[test]
    fn role_codes_round_trip_through_from_str() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            assert_eq!(role.code().parse::<Role>().unwrap(), role);
        }
        assert!("JANITOR".parse::<Role>().is_err());
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn role_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"TEACHER\"");
    }

    #[test]
    fn is_granted_requires_matching_role() {
        let teacher = principal(Role::Teacher);
        assert!(is_granted(Some(&teacher), Role::Teacher));
        assert!(!is_granted(Some(&teacher), Role::Admin));
        assert!(!is_granted(None, Role::Student));
    }

    #[test]
    fn ensure_role_rejects_other_roles() {
        assert!(ensure_role(&principal(Role::Admin), Role::Admin).is_ok());
        let err = ensure_role(&principal(Role::Student), Role::Admin).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn password_hash_verifies_only_the_original_password() {
        let hash = hash_password("secret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("secret-pass", &hash));
        assert!(!verify_password("other-pass", &hash));
        assert!(!verify_password("secret-pass", "not-a-phc-string"));
    }

    #[test]
    fn homes_differ_per_role() {
        assert_eq!(Role::Admin.home(), "/admin");
        assert_eq!(Role::Teacher.home(), "/teacher");
        assert_eq!(Role::Student.home(), "/student");
    }
}
