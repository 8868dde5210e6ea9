use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// -- Roles --

pub const ROLE_MEMBER: &str = "member";
pub const ROLE_MODERATOR: &str = "moderator";

/// Bypasses every capability check. Never listed to callers; surfaced only as
/// an `is_super_admin` flag.
pub const ROLE_SUPERADMIN: &str = "superadmin";

/// Role catalog seeded at startup.
pub const SEEDED_ROLES: [&str; 3] = [ROLE_MEMBER, ROLE_MODERATOR, ROLE_SUPERADMIN];

// -- Statuses --

pub const STATUS_FOUNDER: &str = "Alapító";
pub const STATUS_PRESIDENT: &str = "Elnök";
pub const STATUS_VICE_PRESIDENT: &str = "Alelnök";
pub const STATUS_SECRETARY: &str = "Titkár";

/// Statuses at most one account may hold at a time.
pub const SINGLETON_STATUSES: [&str; 2] = [STATUS_PRESIDENT, STATUS_VICE_PRESIDENT];

pub const KNOWN_STATUSES: [&str; 4] = [
    STATUS_FOUNDER,
    STATUS_PRESIDENT,
    STATUS_VICE_PRESIDENT,
    STATUS_SECRETARY,
];

/// Founders allowed to register with [`STATUS_FOUNDER`] when no list is configured.
pub const DEFAULT_FOUNDERS: [&str; 2] = ["Simon Gábor", "Nagy Márk a. Burschazam"];

pub fn is_singleton_status(status: &str) -> bool {
    SINGLETON_STATUSES.contains(&status.trim())
}

/// Trims a raw status value and checks it against the catalog.
///
/// Blank input means "no status". Returns `Err` with the offending value when
/// the status is not one of [`KNOWN_STATUSES`].
pub fn normalize_status(raw: Option<&str>) -> Result<Option<String>, String> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if KNOWN_STATUSES.contains(&s) => Ok(Some(s.to_string())),
        Some(s) => Err(s.to_string()),
    }
}

/// Implicit role carried by an account status.
///
/// Older accounts predate the explicit role table; their status string still
/// implies a role on the profile read path.
pub fn status_implied_role(status: &str) -> Option<&'static str> {
    match status.trim() {
        STATUS_PRESIDENT | STATUS_VICE_PRESIDENT => Some(ROLE_MODERATOR),
        STATUS_FOUNDER | STATUS_SECRETARY => Some(ROLE_MEMBER),
        _ => None,
    }
}

// -- Posts --

/// Audience tier of a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Members,
    Officers,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Members => "members",
            Self::Officers => "officers",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "members" => Ok(Self::Members),
            "officers" => Ok(Self::Officers),
            other => Err(format!("unknown visibility '{}'", other)),
        }
    }
}
