//! The permission evaluator: given an authenticated user and a classified
//! repo path, what access level do they hold?

use crate::types::{AccessLevel, RepoKind};

use super::{Config, User};

impl Config {
    /// Evaluate the access `user` holds on `kind`.
    ///
    /// Global admins pass everything. Everyone else is decided by the per-
    /// kind rules below; anything not explicitly granted is `None`.
    pub fn check_access(&self, user: &User, kind: &RepoKind) -> AccessLevel {
        if user.is_admin {
            return AccessLevel::Admin;
        }

        match kind {
            RepoKind::Admin => AccessLevel::None,

            RepoKind::OrgConfig(org) => match self.orgs.get(org) {
                Some(org) if self.lists_contain(&user.username, &[&org.admin]) => {
                    AccessLevel::Admin
                }
                _ => AccessLevel::None,
            },

            RepoKind::OrgRepo(org, name) => {
                let Some(org) = self.orgs.get(org) else {
                    return AccessLevel::None;
                };

                // An org admin is admin on every repo under the org,
                // declared or not.
                if self.lists_contain(&user.username, &[&org.admin]) {
                    return AccessLevel::Admin;
                }

                match org.repos.get(name) {
                    Some(repo) => {
                        if self.lists_contain(&user.username, &[&org.write, &repo.write]) {
                            AccessLevel::Write
                        } else if repo.public
                            || self.lists_contain(&user.username, &[&org.read, &repo.read])
                        {
                            AccessLevel::Read
                        } else {
                            AccessLevel::None
                        }
                    }
                    // An implicit repo can only be reached through the org
                    // level lists.
                    None if self.options.implicit_repos => {
                        if self.lists_contain(&user.username, &[&org.write]) {
                            AccessLevel::Write
                        } else if self.lists_contain(&user.username, &[&org.read]) {
                            AccessLevel::Read
                        } else {
                            AccessLevel::None
                        }
                    }
                    None => AccessLevel::None,
                }
            }

            RepoKind::UserConfig(owner) => {
                if *owner == user.username {
                    AccessLevel::Admin
                } else {
                    AccessLevel::None
                }
            }

            RepoKind::UserRepo(owner, name) => {
                if *owner == user.username {
                    return AccessLevel::Admin;
                }

                // Implicit user repos belong to their owner alone.
                let Some(repo) = self.users.get(owner).and_then(|u| u.repos.get(name)) else {
                    return AccessLevel::None;
                };

                if self.lists_contain(&user.username, &[&repo.write]) {
                    AccessLevel::Write
                } else if repo.public || self.lists_contain(&user.username, &[&repo.read]) {
                    AccessLevel::Read
                } else {
                    AccessLevel::None
                }
            }

            RepoKind::TopLevel(name) => {
                // Implicit top-level repos are admin-only, and admins were
                // handled above.
                let Some(repo) = self.repos.get(name) else {
                    return AccessLevel::None;
                };

                if self.lists_contain(&user.username, &[&repo.write]) {
                    AccessLevel::Write
                } else if repo.public || self.lists_contain(&user.username, &[&repo.read]) {
                    AccessLevel::Read
                } else {
                    AccessLevel::None
                }
            }
        }
    }

    /// Whether any of the given access lists names the user, directly or via
    /// a `$group` reference.
    ///
    /// Groups were flattened at load, so a reference resolves with a single
    /// lookup and membership never recurses; a reference to a group that no
    /// longer exists simply does not match.
    fn lists_contain(&self, username: &str, lists: &[&[String]]) -> bool {
        lists.iter().any(|list| {
            list.iter().any(|entry| match entry.strip_prefix('$') {
                Some(group) => self
                    .groups
                    .get(group)
                    .is_some_and(|members| members.iter().any(|m| m == username)),
                None => entry == username,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_config;
    use super::*;

    /// Expected access per repo kind for one user, mirroring the evaluator's
    /// rule table. Unlisted cells default to `None`.
    #[derive(Default)]
    struct Expected {
        admin: AccessLevel,
        org_config: AccessLevel,
        org_repo: AccessLevel,
        user_config: AccessLevel,
        user_repo: AccessLevel,
        top_level: AccessLevel,
        implicit_org: AccessLevel,
        implicit_user: AccessLevel,
        implicit_top: AccessLevel,
    }

    fn check(config: &Config, username: &str, expected: &Expected) {
        let user = config.lookup_user_by_name(username).unwrap();

        let explicit = [
            (RepoKind::Admin, expected.admin),
            (RepoKind::OrgConfig("an-org".into()), expected.org_config),
            (
                RepoKind::OrgRepo("an-org".into(), "test-repo".into()),
                expected.org_repo,
            ),
            (
                RepoKind::UserConfig("non-admin".into()),
                expected.user_config,
            ),
            (
                RepoKind::UserRepo("non-admin".into(), "test-repo".into()),
                expected.user_repo,
            ),
            (RepoKind::TopLevel("test-repo".into()), expected.top_level),
        ];

        for (kind, want) in explicit {
            assert_eq!(
                config.check_access(&user, &kind),
                want,
                "{username} on {kind:?}"
            );
        }

        let mut implicit = config.clone();
        implicit.options.implicit_repos = true;

        let cases = [
            (
                RepoKind::OrgRepo("an-org".into(), "implicit".into()),
                expected.implicit_org,
            ),
            (
                RepoKind::UserRepo("non-admin".into(), "implicit".into()),
                expected.implicit_user,
            ),
            (RepoKind::TopLevel("implicit".into()), expected.implicit_top),
        ];

        for (kind, want) in cases {
            assert_eq!(
                implicit.check_access(&user, &kind),
                want,
                "{username} on implicit {kind:?}"
            );
        }
    }

    #[test]
    fn test_global_admin_passes_everything() {
        let config = test_config();

        check(
            &config,
            "an-admin",
            &Expected {
                admin: AccessLevel::Admin,
                org_config: AccessLevel::Admin,
                org_repo: AccessLevel::Admin,
                user_config: AccessLevel::Admin,
                user_repo: AccessLevel::Admin,
                top_level: AccessLevel::Admin,
                implicit_org: AccessLevel::Admin,
                implicit_user: AccessLevel::Admin,
                implicit_top: AccessLevel::Admin,
            },
        );
    }

    #[test]
    fn test_org_roles() {
        let config = test_config();

        check(
            &config,
            "org-admin",
            &Expected {
                org_config: AccessLevel::Admin,
                org_repo: AccessLevel::Admin,
                implicit_org: AccessLevel::Admin,
                ..Default::default()
            },
        );

        check(
            &config,
            "org-write",
            &Expected {
                org_repo: AccessLevel::Write,
                implicit_org: AccessLevel::Write,
                ..Default::default()
            },
        );

        check(
            &config,
            "org-read",
            &Expected {
                org_repo: AccessLevel::Read,
                implicit_org: AccessLevel::Read,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_owner_is_admin_of_own_scope() {
        let config = test_config();

        check(
            &config,
            "non-admin",
            &Expected {
                user_config: AccessLevel::Admin,
                user_repo: AccessLevel::Admin,
                implicit_user: AccessLevel::Admin,
                ..Default::default()
            },
        );
    }

    #[test]
    fn test_explicit_repo_grants() {
        let config = test_config();

        check(
            &config,
            "write-user",
            &Expected {
                org_repo: AccessLevel::Write,
                user_repo: AccessLevel::Write,
                top_level: AccessLevel::Write,
                ..Default::default()
            },
        );

        check(
            &config,
            "read-user",
            &Expected {
                org_repo: AccessLevel::Read,
                user_repo: AccessLevel::Read,
                top_level: AccessLevel::Read,
                ..Default::default()
            },
        );

        check(&config, "nothing-user", &Expected::default());
    }

    #[test]
    fn test_public_repo_grants_read_to_anyone() {
        let mut config = test_config();
        config
            .repos
            .get_mut("test-repo")
            .unwrap()
            .public = true;

        let user = config.lookup_user_by_name("nothing-user").unwrap();
        assert_eq!(
            config.check_access(&user, &RepoKind::TopLevel("test-repo".into())),
            AccessLevel::Read
        );
    }

    #[test]
    fn test_group_reference_in_acl() {
        let config = test_config();

        // write access on test-repo comes through $writers for this user.
        let user = config.lookup_user_by_name("grouped-user").unwrap();
        assert_eq!(
            config.check_access(&user, &RepoKind::TopLevel("test-repo".into())),
            AccessLevel::Write
        );
    }

    #[test]
    fn test_unknown_group_reference_denies() {
        let mut config = test_config();
        config
            .repos
            .get_mut("test-repo")
            .unwrap()
            .write
            .push("$no-such-group".to_string());

        let user = config.lookup_user_by_name("nothing-user").unwrap();
        assert_eq!(
            config.check_access(&user, &RepoKind::TopLevel("test-repo".into())),
            AccessLevel::None
        );
    }
}
