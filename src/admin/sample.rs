//! First-run seeding of the admin repo: the sample `config.yml` and the two
//! host keys. Everything here stages files on the handle; committing is the
//! loader's job so a half-seeded repo is never committed.

use crate::error::Result;
use crate::store::Repository;
use crate::types::{HostKey, PublicKey};

use super::yamledit;

pub const CONFIG_FILE: &str = "config.yml";
pub const ED25519_KEY_FILE: &str = "keys/id_ed25519";
pub const RSA_KEY_FILE: &str = "keys/id_rsa";

/// The config written on first run. Seeding the full literal text keeps the
/// commentary in the repo for whoever clones `admin` next.
const SAMPLE_CONFIG: &str = r#"# Invites are temporary codes that let a user in before any of their keys
# are known. Connecting as invite:<code>@<host> binds the presented key to
# the named user and deletes the code.
#
# invites:
#   orai7quaipoocungah1vee6ieh8ien: some-user
invites: {}

# Users who have access to this server. A user needs at least one key (or a
# pending invite) before they can connect.
#
# users:
#   some-user:
#     is_admin: true
#     disabled: false
#     keys:
#       - ssh-ed25519 AAAA... some-user@laptop
users: {}

# Groups can stand in for a user anywhere by prefixing their name with $,
# so the admins group is written $admins. Groups may reference other groups
# but must not form loops.
#
# groups:
#   admins:
#     - some-user
groups: {}

# Org repos are cloned as @org-name/repo. Org members get access from the
# admin/write/read lists; per-repo lists add to them.
#
# orgs:
#   some-org:
#     admin:
#       - some-user
#     repos:
#       project:
#         public: false
orgs: {}

# Top-level repos, cloned by bare name.
#
# repos:
#   tools:
#     public: true
#     write:
#       - $admins
repos: {}

options:
  # which username to use as the shared git login
  git_user: git
  # the prefix that marks an org repo path
  org_prefix: "@"
  # the prefix that marks a user repo path
  user_prefix: "~"
  # the login prefix that redeems an invite
  invite_prefix: "invite:"
  # let users with admin access to an area create repos there by pushing
  implicit_repos: false
  # honor keys declared in per-user config repos
  user_config_keys: false
  # honor repos declared in per-user config repos
  user_config_repos: false
  # load per-org config repos at all
  org_config: false
  # honor repos declared in per-org config repos
  org_config_repos: false
"#;

/// Stage the sample config and host keys for any of the three files that are
/// missing. Returns without staging anything when all are present.
pub fn ensure_admin_files(repo: &mut Repository) -> Result<()> {
    if !repo.file_exists(CONFIG_FILE) {
        repo.stage(CONFIG_FILE, SAMPLE_CONFIG.as_bytes().to_vec());
    }

    if !repo.file_exists(ED25519_KEY_FILE) {
        tracing::warn!("generating new ed25519 host key");
        repo.stage(ED25519_KEY_FILE, HostKey::generate_ed25519()?.to_pem()?);
    }

    if !repo.file_exists(RSA_KEY_FILE) {
        tracing::warn!("generating new rsa host key");
        repo.stage(RSA_KEY_FILE, HostKey::generate_rsa()?.to_pem()?);
    }

    Ok(())
}

/// Stage an edit making `username` an admin with the given key, for the
/// `GITDIR_ADMIN_USER` bootstrap path. Safe to run when the user already
/// exists; the key is appended only if missing.
pub fn ensure_admin_user(repo: &mut Repository, username: &str, key: &PublicKey) -> Result<()> {
    let mut doc = yamledit::parse_document(&repo.file(CONFIG_FILE)?)?;
    let username = username.to_lowercase();

    let users = yamledit::ensure_mapping(&mut doc, "users");
    let user = yamledit::ensure_mapping(users, &username);

    let mut changed = false;

    if user.get("is_admin").and_then(serde_yaml::Value::as_bool) != Some(true) {
        yamledit::set_bool(user, "is_admin", true);
        changed = true;
    }

    let keys = yamledit::ensure_sequence(user, "keys");
    changed |= yamledit::append_unique(keys, &key.authorized());

    let groups = yamledit::ensure_mapping(&mut doc, "groups");
    let admins = yamledit::ensure_sequence(groups, "admins");
    changed |= yamledit::append_unique(admins, &username);

    // Re-encode only when something actually changed so a boot with the
    // bootstrap env vars still set does not rewrite (and reformat) the
    // config on every start.
    if changed {
        repo.stage(CONFIG_FILE, yamledit::encode(&doc)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AdminFile;

    #[test]
    fn test_sample_config_parses_to_defaults() {
        let file = AdminFile::parse(SAMPLE_CONFIG.as_bytes()).unwrap();

        assert!(file.users.is_empty());
        assert!(file.invites.is_empty());
        assert_eq!(file.options.git_user, "git");
        assert_eq!(file.options.org_prefix, "@");
        assert_eq!(file.options.user_prefix, "~");
        assert_eq!(file.options.invite_prefix, "invite:");
        assert!(!file.options.implicit_repos);
    }
}
