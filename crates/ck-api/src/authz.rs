use std::collections::BTreeSet;

use ck_db::RoleDirectory;
use ck_types::models::{ROLE_MEMBER, ROLE_MODERATOR, ROLE_SUPERADMIN, status_implied_role};

use crate::auth::{AppState, run_db};
use crate::error::ApiError;
use crate::middleware::SessionUser;

/// May create posts.
pub const POST_WRITERS: &[&str] = &[ROLE_MEMBER, ROLE_MODERATOR];
/// May moderate other members' posts and read officer posts.
pub const MODERATORS: &[&str] = &[ROLE_MODERATOR];
/// Admin panel. Only the hidden role satisfies it.
pub const ADMINS: &[&str] = &[ROLE_SUPERADMIN];

/// Whether a holder of `held` satisfies `required`.
///
/// An empty requirement is never satisfied. The super-admin role satisfies
/// everything else; otherwise one shared role is enough.
pub fn grants(held: &[String], required: &[&str]) -> bool {
    if required.is_empty() {
        return false;
    }
    if held.iter().any(|r| r == ROLE_SUPERADMIN) {
        return true;
    }
    held.iter().any(|r| required.contains(&r.as_str()))
}

/// Capability check against the explicit role table only. Anonymous callers
/// and unknown users fail closed.
pub fn has_capability<D>(dir: &D, username: Option<&str>, required: &[&str]) -> anyhow::Result<bool>
where
    D: RoleDirectory + ?Sized,
{
    let Some(username) = username else {
        return Ok(false);
    };
    if required.is_empty() {
        return Ok(false);
    }
    let held = dir.roles_of(username)?;
    Ok(grants(&held, required))
}

/// What the profile read path reports about a user's roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleView {
    /// Explicit plus status-implied roles, sorted, without the hidden role.
    pub roles: Vec<String>,
    pub is_super_admin: bool,
}

pub fn role_view(explicit: &[String], status: Option<&str>) -> RoleView {
    let mut roles: BTreeSet<String> = explicit.iter().cloned().collect();
    if let Some(implied) = status.and_then(status_implied_role) {
        roles.insert(implied.to_string());
    }
    let is_super_admin = roles.remove(ROLE_SUPERADMIN);
    RoleView {
        roles: roles.into_iter().collect(),
        is_super_admin,
    }
}

/// Explicit roles with the hidden role filtered out, for listings.
pub fn visible_roles(explicit: &[String]) -> (Vec<String>, bool) {
    let is_super_admin = explicit.iter().any(|r| r == ROLE_SUPERADMIN);
    let roles = explicit
        .iter()
        .filter(|r| r.as_str() != ROLE_SUPERADMIN)
        .cloned()
        .collect();
    (roles, is_super_admin)
}

/// Gate for handlers: `Forbidden` when the session's user lacks `required`.
pub async fn require_capability(
    state: &AppState,
    user: &SessionUser,
    required: &'static [&'static str],
) -> Result<(), ApiError> {
    let username = user.username.clone();
    let allowed = run_db(state, move |db| Ok(has_capability(db, Some(username.as_str()), required)?)).await?;
    if allowed {
        Ok(())
    } else {
        tracing::warn!("{} denied, needs one of {:?}", user.username, required);
        Err(ApiError::Forbidden)
    }
}

/// Boolean form of the gate, for read paths that only widen what is shown.
pub async fn capability_of(
    state: &AppState,
    username: Option<&str>,
    required: &'static [&'static str],
) -> Result<bool, ApiError> {
    let username = username.map(str::to_string);
    run_db(state, move |db| Ok(has_capability(db, username.as_deref(), required)?)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_db::Database;
    use ck_db::queries::insert_user;

    fn add_user(db: &Database, name: &str, roles: &[&str]) {
        let id = db.with_tx(|conn| insert_user(conn, name, "h", None)).unwrap();
        for role in roles {
            db.grant_role(id, role).unwrap();
        }
    }

    #[test]
    fn explicit_membership() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "alice", &[ROLE_MEMBER]);
        add_user(&db, "bob", &[]);
        assert!(has_capability(&db, Some("alice"), POST_WRITERS).unwrap());
        assert!(!has_capability(&db, Some("alice"), MODERATORS).unwrap());
        assert!(!has_capability(&db, Some("bob"), POST_WRITERS).unwrap());
    }

    #[test]
    fn super_admin_passes_any_non_empty_set() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "root", &[ROLE_SUPERADMIN]);
        assert!(has_capability(&db, Some("root"), MODERATORS).unwrap());
        assert!(has_capability(&db, Some("root"), &["made-up-role"]).unwrap());
        assert!(has_capability(&db, Some("root"), ADMINS).unwrap());
    }

    #[test]
    fn fails_closed() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "root", &[ROLE_SUPERADMIN]);
        add_user(&db, "alice", &[ROLE_MEMBER]);
        assert!(!has_capability(&db, Some("root"), &[]).unwrap());
        assert!(!has_capability(&db, Some("alice"), &[]).unwrap());
        assert!(!has_capability(&db, None, POST_WRITERS).unwrap());
        assert!(!has_capability(&db, Some("nobody"), POST_WRITERS).unwrap());
        assert!(!has_capability(&db, Some("alice"), ADMINS).unwrap());
    }

    #[test]
    fn status_does_not_open_the_write_gate() {
        let db = Database::open_in_memory().unwrap();
        db.with_tx(|conn| insert_user(conn, "pres", "h", Some("Elnök"))).unwrap();
        assert!(!has_capability(&db, Some("pres"), MODERATORS).unwrap());
    }

    #[test]
    fn role_view_unions_status_and_hides_super_admin() {
        let view = role_view(&["superadmin".into(), "member".into()], Some("Elnök"));
        assert_eq!(view.roles, vec!["member".to_string(), "moderator".to_string()]);
        assert!(view.is_super_admin);

        let view = role_view(&["moderator".into()], Some("Alelnök"));
        assert_eq!(view.roles, vec!["moderator".to_string()]);
        assert!(!view.is_super_admin);

        let view = role_view(&[], None);
        assert!(view.roles.is_empty());
    }

    #[test]
    fn listings_hide_super_admin() {
        let (roles, flag) = visible_roles(&["member".into(), "superadmin".into()]);
        assert_eq!(roles, vec!["member".to_string()]);
        assert!(flag);
    }
}
