use std::fmt;

/// The level of access a user holds on a repository, and the level a git
/// command requires. Levels are totally ordered; a session proceeds iff the
/// granted level is at least the requested level.
///
/// `None` is the default so that anything which forgets to set an access
/// level denies rather than allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum AccessLevel {
    #[default]
    None,
    Read,
    Write,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::None => "none",
            AccessLevel::Read => "read",
            AccessLevel::Write => "write",
            AccessLevel::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::None < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::Write);
        assert!(AccessLevel::Write < AccessLevel::Admin);
    }

    #[test]
    fn test_access_level_default_denies() {
        assert_eq!(AccessLevel::default(), AccessLevel::None);
    }
}
