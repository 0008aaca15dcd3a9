//! The shapes of the YAML documents the server is configured by: the admin
//! repo's `config.yml` plus the optional per-user and per-org config repos.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::PublicKey;

/// Access lists for a single repository. List entries are usernames or
/// `$group` references; after the loader's flatten pass they are bare
/// usernames only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoAcl {
    /// Anyone, authenticated or not as far as the evaluator cares, may read.
    pub public: bool,
    pub write: Vec<String>,
    pub read: Vec<String>,
}

/// An org as declared in the admin config, or the contents of an org config
/// repo's `config.yml` (same shape in both places).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrgDef {
    pub admin: Vec<String>,
    pub write: Vec<String>,
    pub read: Vec<String>,
    pub repos: BTreeMap<String, RepoAcl>,
}

/// A user as declared in the admin config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserDef {
    /// Only honored when it comes from the admin repo.
    pub is_admin: bool,
    /// A disabled user is indistinguishable from an absent one.
    pub disabled: bool,
    pub keys: Vec<PublicKey>,
    pub repos: BTreeMap<String, RepoAcl>,
}

/// The contents of a user config repo's `config.yml`. Users may add keys and
/// repos here (gated by options), never the admin bit.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserFile {
    pub keys: Vec<PublicKey>,
    pub repos: BTreeMap<String, RepoAcl>,
}

/// Runtime-tunable switches from the `options` block of the admin config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Shared SSH login name any authenticated user may connect as.
    pub git_user: String,

    /// Path prefix marking an org-scoped repo.
    pub org_prefix: String,

    /// Path prefix marking a user-scoped repo.
    pub user_prefix: String,

    /// SSH login prefix that triggers invite redemption.
    pub invite_prefix: String,

    /// Allow users with admin authority over an area to create repos there
    /// by simply pushing to them.
    pub implicit_repos: bool,

    /// Honor `keys` from user config repos.
    pub user_config_keys: bool,

    /// Honor `repos` from user config repos.
    pub user_config_repos: bool,

    /// Load per-org config repos at all.
    pub org_config: bool,

    /// Honor `repos` from org config repos.
    pub org_config_repos: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            git_user: "git".to_string(),
            org_prefix: "@".to_string(),
            user_prefix: "~".to_string(),
            invite_prefix: "invite:".to_string(),
            implicit_repos: false,
            user_config_keys: false,
            user_config_repos: false,
            org_config: false,
            org_config_repos: false,
        }
    }
}

/// The root document of the admin repo's `config.yml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdminFile {
    pub invites: BTreeMap<String, String>,
    pub users: BTreeMap<String, UserDef>,
    pub groups: BTreeMap<String, Vec<String>>,
    pub orgs: BTreeMap<String, OrgDef>,
    pub repos: BTreeMap<String, RepoAcl>,
    pub options: Options,
}

/// An empty or comment-only document deserializes to the default value, the
/// same way an absent file would.
fn parse_yaml<T: serde::de::DeserializeOwned + Default>(data: &[u8]) -> crate::error::Result<T> {
    match serde_yaml::from_slice::<Option<T>>(data)? {
        Some(value) => Ok(value),
        None => Ok(T::default()),
    }
}

impl AdminFile {
    pub fn parse(data: &[u8]) -> crate::error::Result<Self> {
        parse_yaml(data)
    }
}

impl OrgDef {
    pub fn parse(data: &[u8]) -> crate::error::Result<Self> {
        parse_yaml(data)
    }
}

impl UserFile {
    pub fn parse(data: &[u8]) -> crate::error::Result<Self> {
        parse_yaml(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_file() {
        let data = br#"
users:
  alice:
    is_admin: true
    keys:
      - ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2 alice
groups:
  admins:
    - alice
repos:
  shared:
    public: true
    write:
      - $admins
options:
  implicit_repos: true
"#;

        let file = AdminFile::parse(data).unwrap();
        assert!(file.users["alice"].is_admin);
        assert_eq!(file.groups["admins"], vec!["alice"]);
        assert!(file.repos["shared"].public);
        assert!(file.options.implicit_repos);

        // Unset options keep their defaults.
        assert_eq!(file.options.git_user, "git");
        assert_eq!(file.options.user_prefix, "~");
        assert_eq!(file.options.org_prefix, "@");
        assert_eq!(file.options.invite_prefix, "invite:");
    }

    #[test]
    fn test_parse_empty_document() {
        let file = AdminFile::parse(b"").unwrap();
        assert!(file.users.is_empty());
        assert!(file.invites.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(AdminFile::parse(b"userz: {}").is_err());
    }
}
