//! Role definitions and conversions

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two console roles, in increasing order of privilege
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Day-to-day operations; admin-only operations are denied
    Operator,
    /// Unrestricted
    Admin,
}

impl Role {
    /// Parse the exact lowercase role name. The role file is written only by
    /// this crate, so any other spelling marks it as untrusted.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("operator"), Some(Role::Operator));
        assert_eq!(Role::parse("ADMIN"), None);
        assert_eq!(Role::parse(" admin "), None);
        assert_eq!(Role::parse("Operator"), None);
        assert_eq!(Role::parse("superadmin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Operator < Role::Admin);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(format!("{}", Role::Admin), "admin");
        assert_eq!(format!("{}", Role::Operator), "operator");
    }
}
