use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

use super::Options;

/// The classified form of a repo path presented by a git client.
///
/// Classification is purely syntactic; whether the repo actually exists for
/// a given caller is decided against the loaded config (and the
/// `implicit_repos` option) afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoKind {
    /// The admin repo itself, `admin`.
    Admin,
    /// An org's config repo, `@org`.
    OrgConfig(String),
    /// A repo under an org, `@org/name`.
    OrgRepo(String, String),
    /// A user's config repo, `~user`.
    UserConfig(String),
    /// A repo under a user, `~user/name`.
    UserRepo(String, String),
    /// A single-segment repo outside any scope, `name`.
    TopLevel(String),
}

impl RepoKind {
    /// Parse the repo string from a `git-upload-pack '…'` invocation.
    ///
    /// The name is lowercased and a trailing `.git` is dropped before
    /// classification. Anything that cannot be a repo path (`..` segments,
    /// absolute paths, control characters, too many segments) is rejected
    /// with `InvalidRepoFormat`.
    pub fn parse(raw: &str, options: &Options) -> Result<Self> {
        if raw.starts_with('/') {
            return Err(Error::InvalidRepoFormat);
        }

        let path = raw.trim_matches('/').to_lowercase();
        let path = path.strip_suffix(".git").unwrap_or(&path);

        if path.is_empty()
            || path.split('/').any(|seg| seg.is_empty() || seg == "..")
            || path.chars().any(char::is_control)
        {
            return Err(Error::InvalidRepoFormat);
        }

        if path == "admin" {
            return Ok(RepoKind::Admin);
        }

        if let Some(rest) = path.strip_prefix(options.org_prefix.as_str()) {
            return Self::parse_scoped(rest, RepoKind::OrgConfig, RepoKind::OrgRepo);
        }

        if let Some(rest) = path.strip_prefix(options.user_prefix.as_str()) {
            return Self::parse_scoped(rest, RepoKind::UserConfig, RepoKind::UserRepo);
        }

        if path.contains('/') {
            return Err(Error::InvalidRepoFormat);
        }

        Ok(RepoKind::TopLevel(path.to_string()))
    }

    fn parse_scoped(
        rest: &str,
        config: fn(String) -> RepoKind,
        repo: fn(String, String) -> RepoKind,
    ) -> Result<Self> {
        let mut parts = rest.split('/');

        let scope = parts.next().filter(|s| !s.is_empty());

        match (scope, parts.next(), parts.next()) {
            (Some(scope), None, _) => Ok(config(scope.to_string())),
            (Some(scope), Some(name), None) => Ok(repo(scope.to_string(), name.to_string())),
            _ => Err(Error::InvalidRepoFormat),
        }
    }

    /// The on-disk location of this repo, relative to the base directory and
    /// without the `.git` suffix the store appends.
    pub fn disk_path(&self) -> PathBuf {
        match self {
            RepoKind::Admin => PathBuf::from("admin/admin"),
            RepoKind::OrgConfig(org) => PathBuf::from(format!("admin/org-{org}")),
            RepoKind::OrgRepo(org, name) => ["orgs", org, name].iter().collect(),
            RepoKind::UserConfig(user) => PathBuf::from(format!("admin/user-{user}")),
            RepoKind::UserRepo(user, name) => ["users", user, name].iter().collect(),
            RepoKind::TopLevel(name) => ["top-level", name].iter().collect(),
        }
    }

    /// The path a client would use to name this repo, the inverse of
    /// [`RepoKind::parse`].
    pub fn client_path(&self, options: &Options) -> String {
        match self {
            RepoKind::Admin => "admin".to_string(),
            RepoKind::OrgConfig(org) => format!("{}{org}", options.org_prefix),
            RepoKind::OrgRepo(org, name) => format!("{}{org}/{name}", options.org_prefix),
            RepoKind::UserConfig(user) => format!("{}{user}", options.user_prefix),
            RepoKind::UserRepo(user, name) => format!("{}{user}/{name}", options.user_prefix),
            RepoKind::TopLevel(name) => name.clone(),
        }
    }

    /// Whether a write to this repo reconfigures the server.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RepoKind::Admin | RepoKind::OrgConfig(_) | RepoKind::UserConfig(_)
        )
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.client_path(&Options::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<RepoKind> {
        RepoKind::parse(raw, &Options::default())
    }

    #[test]
    fn test_parse_table() {
        let cases = [
            ("admin", RepoKind::Admin, "admin/admin"),
            ("@an-org", RepoKind::OrgConfig("an-org".into()), "admin/org-an-org"),
            (
                "@an-org/project",
                RepoKind::OrgRepo("an-org".into(), "project".into()),
                "orgs/an-org/project",
            ),
            ("~alice", RepoKind::UserConfig("alice".into()), "admin/user-alice"),
            (
                "~alice/notes",
                RepoKind::UserRepo("alice".into(), "notes".into()),
                "users/alice/notes",
            ),
            ("tools", RepoKind::TopLevel("tools".into()), "top-level/tools"),
        ];

        for (raw, kind, disk) in cases {
            let parsed = parse(raw).unwrap();
            assert_eq!(parsed, kind, "{raw}");
            assert_eq!(parsed.disk_path(), PathBuf::from(disk), "{raw}");
        }
    }

    #[test]
    fn test_parse_strips_git_suffix_and_case() {
        assert_eq!(parse("Tools.git").unwrap(), RepoKind::TopLevel("tools".into()));
        assert_eq!(
            parse("~Alice/Notes.git").unwrap(),
            RepoKind::UserRepo("alice".into(), "notes".into())
        );
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        for raw in [
            "",
            "/tools",
            "a/b",
            "../tools",
            "~alice/../admin",
            "@org/repo/extra",
            "~user/repo/extra",
            "@",
            "~",
            "tools\u{1}",
        ] {
            assert!(
                matches!(parse(raw), Err(Error::InvalidRepoFormat)),
                "expected InvalidRepoFormat for {raw:?}"
            );
        }
    }

    #[test]
    fn test_client_path_round_trip() {
        let options = Options::default();
        let kinds = [
            RepoKind::Admin,
            RepoKind::OrgConfig("an-org".into()),
            RepoKind::OrgRepo("an-org".into(), "project".into()),
            RepoKind::UserConfig("alice".into()),
            RepoKind::UserRepo("alice".into(), "notes".into()),
            RepoKind::TopLevel("tools".into()),
        ];

        for kind in kinds {
            let rendered = kind.client_path(&options);
            assert_eq!(RepoKind::parse(&rendered, &options).unwrap(), kind);
        }
    }

    #[test]
    fn test_config_repos() {
        assert!(RepoKind::Admin.is_config());
        assert!(RepoKind::OrgConfig("o".into()).is_config());
        assert!(RepoKind::UserConfig("u".into()).is_config());
        assert!(!RepoKind::OrgRepo("o".into(), "r".into()).is_config());
        assert!(!RepoKind::UserRepo("u".into(), "r".into()).is_config());
        assert!(!RepoKind::TopLevel("r".into()).is_config());
    }
}
