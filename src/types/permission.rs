use std::fmt;

use serde::{Deserialize, Serialize};

/// A permission level on a bag or recipe.
///
/// Levels are totally ordered: a role granted ADMIN satisfies a WRITE check,
/// and WRITE satisfies READ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Permission {
    /// Returns true if a grant of `self` satisfies a check for `required`.
    #[must_use]
    pub const fn satisfies(self, required: Permission) -> bool {
        self as u8 >= required as u8
    }

    pub fn parse(s: &str) -> Option<Permission> {
        match s {
            "READ" => Some(Self::Read),
            "WRITE" => Some(Self::Write),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_ordering() {
        assert!(Permission::Admin.satisfies(Permission::Write));
        assert!(Permission::Admin.satisfies(Permission::Read));
        assert!(Permission::Write.satisfies(Permission::Read));
        assert!(!Permission::Read.satisfies(Permission::Write));
        assert!(!Permission::Write.satisfies(Permission::Admin));
        assert!(Permission::Read.satisfies(Permission::Read));
    }

    #[test]
    fn test_parse_roundtrip() {
        for p in [Permission::Read, Permission::Write, Permission::Admin] {
            assert_eq!(Permission::parse(p.as_str()), Some(p));
        }
        assert_eq!(Permission::parse("read"), None);
        assert_eq!(Permission::parse("invalid"), None);
    }
}
