use ck_db::UserDirectory;
use ck_types::api::RegisterRequest;
use ck_types::models::{DEFAULT_FOUNDERS, STATUS_FOUNDER, is_singleton_status, normalize_status};

use crate::error::ApiError;

const MAX_USERNAME_CHARS: usize = 64;
const MIN_PASSWORD_CHARS: usize = 4;

/// Why an otherwise well-formed registration was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("only listed founders may register with the founder status")]
    FounderNotAllowed,
    #[error("this status is already held by another member")]
    StatusTaken,
    #[error("username is already taken")]
    UsernameTaken,
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::FounderNotAllowed => "founder_not_allowed",
            Self::StatusTaken => "status_taken",
            Self::UsernameTaken => "username_taken",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationRules {
    /// Exact usernames allowed to claim the founder status.
    pub founders: Vec<String>,
}

impl Default for RegistrationRules {
    fn default() -> Self {
        Self {
            founders: DEFAULT_FOUNDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A registration request that passed field validation.
#[derive(Debug)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    pub status: Option<String>,
}

impl NewAccount {
    pub fn parse(req: RegisterRequest) -> Result<Self, ApiError> {
        let username = req.username.trim().to_string();
        validate_username(&username)?;

        if req.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ApiError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_CHARS
            )));
        }

        let status = normalize_status(req.status.as_deref())
            .map_err(|s| ApiError::Validation(format!("unknown status '{}'", s)))?;

        Ok(Self {
            username,
            password: req.password,
            status,
        })
    }
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if len == 0 || len > MAX_USERNAME_CHARS {
        return Err(ApiError::Validation(format!(
            "username must be 1-{} characters",
            MAX_USERNAME_CHARS
        )));
    }
    if username.chars().any(char::is_control) {
        return Err(ApiError::Validation("username contains control characters".into()));
    }
    Ok(())
}

/// Checks the registration rules in order; the first failure wins.
///
/// 1. The founder status is reserved for the configured allow-list.
/// 2. A singleton status may have only one holder.
/// 3. Usernames are unique (case-sensitive).
///
/// Run this inside the same transaction as the insert. The store's unique
/// indexes still back up rules 2 and 3.
pub fn validate_registration<D>(
    dir: &D,
    rules: &RegistrationRules,
    username: &str,
    status: Option<&str>,
) -> Result<(), ApiError>
where
    D: UserDirectory + ?Sized,
{
    if let Some(status) = status {
        let status = status.trim();

        if status == STATUS_FOUNDER && !rules.founders.iter().any(|f| f == username) {
            return Err(Rejection::FounderNotAllowed.into());
        }

        if is_singleton_status(status) && dir.status_holder(status)?.is_some() {
            return Err(Rejection::StatusTaken.into());
        }
    }

    if dir.username_exists(username)? {
        return Err(Rejection::UsernameTaken.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_db::Database;
    use ck_db::queries::insert_user;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn rejection(result: Result<(), ApiError>) -> Rejection {
        match result {
            Err(ApiError::Rejected(r)) => r,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn founder_allow_list() {
        let db = db();
        let rules = RegistrationRules::default();

        assert!(validate_registration(&db, &rules, "Simon Gábor", Some("Alapító")).is_ok());
        assert_eq!(
            rejection(validate_registration(&db, &rules, "Someone Else", Some("Alapító"))),
            Rejection::FounderNotAllowed
        );
        // Exact match only.
        assert_eq!(
            rejection(validate_registration(&db, &rules, "simon gábor", Some("Alapító"))),
            Rejection::FounderNotAllowed
        );
    }

    #[test]
    fn singleton_status_conflict_keeps_holder() {
        let db = db();
        let rules = RegistrationRules::default();
        db.with_tx(|conn| insert_user(conn, "alice", "h", Some("Elnök"))).unwrap();

        assert_eq!(
            rejection(validate_registration(&db, &rules, "bob", Some("Elnök"))),
            Rejection::StatusTaken
        );
        let alice = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(alice.status.as_deref(), Some("Elnök"));

        // The other singleton is still free.
        assert!(validate_registration(&db, &rules, "bob", Some("Alelnök")).is_ok());
    }

    #[test]
    fn held_status_with_padding_still_counts() {
        let db = db();
        db.with_tx(|conn| insert_user(conn, "old", "h", Some(" Alelnök "))).unwrap();
        assert_eq!(
            rejection(validate_registration(&db, &RegistrationRules::default(), "new", Some("Alelnök"))),
            Rejection::StatusTaken
        );
    }

    #[test]
    fn rules_apply_in_order() {
        let db = db();
        let rules = RegistrationRules::default();
        db.with_tx(|conn| insert_user(conn, "Someone Else", "h", Some("Elnök"))).unwrap();

        // Founder rule fires before the duplicate-username rule.
        assert_eq!(
            rejection(validate_registration(&db, &rules, "Someone Else", Some("Alapító"))),
            Rejection::FounderNotAllowed
        );
        // Singleton rule fires before the duplicate-username rule.
        assert_eq!(
            rejection(validate_registration(&db, &rules, "Someone Else", Some("Elnök"))),
            Rejection::StatusTaken
        );
        assert_eq!(
            rejection(validate_registration(&db, &rules, "Someone Else", None)),
            Rejection::UsernameTaken
        );
    }

    #[test]
    fn field_validation() {
        let parse = |username: &str, password: &str, status: Option<&str>| {
            NewAccount::parse(RegisterRequest {
                username: username.into(),
                password: password.into(),
                status: status.map(Into::into),
            })
        };

        let ok = parse("  alice  ", "pw123", Some(" Titkár ")).unwrap();
        assert_eq!(ok.username, "alice");
        assert_eq!(ok.status.as_deref(), Some("Titkár"));

        assert!(matches!(parse("   ", "pw123", None), Err(ApiError::Validation(_))));
        assert!(matches!(parse("alice", "pw", None), Err(ApiError::Validation(_))));
        assert!(matches!(parse("alice", "pw123", Some("Király")), Err(ApiError::Validation(_))));
        assert!(parse("alice", "pw123", Some("")).unwrap().status.is_none());
    }
}
