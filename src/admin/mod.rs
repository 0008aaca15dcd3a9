//! The authorization core: an immutable config snapshot assembled from the
//! admin repo plus any per-user and per-org config repos.
//!
//! A snapshot is built in one shot by [`Config::load`] and never mutated
//! afterwards; the server publishes it behind an `RwLock<Arc<Config>>` and
//! swaps in a fresh snapshot on reload. A load that fails leaves the
//! previously published snapshot in place.

mod perms;
mod sample;
pub mod yamledit;

pub use sample::{CONFIG_FILE, ED25519_KEY_FILE, RSA_KEY_FILE};

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::store::RepoStore;
use crate::types::{AdminFile, HostKey, Options, OrgDef, PublicKey, RepoAcl, RepoKind, UserDef};

/// The resolved identity of an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub is_admin: bool,
}

/// Commits to read configuration repos at instead of `HEAD`. The update hook
/// uses this to evaluate a pushed-but-not-yet-accepted config.
#[derive(Debug, Clone, Default)]
pub struct RevisionPins {
    pub admin: Option<String>,
    pub orgs: BTreeMap<String, String>,
    pub users: BTreeMap<String, String>,
}

impl RevisionPins {
    /// Pin the config repo named by `kind` to `rev`. Non-config kinds pin
    /// nothing.
    pub fn for_kind(kind: &RepoKind, rev: &str) -> Self {
        let mut pins = Self::default();

        match kind {
            RepoKind::Admin => pins.admin = Some(rev.to_string()),
            RepoKind::OrgConfig(org) => {
                pins.orgs.insert(org.clone(), rev.to_string());
            }
            RepoKind::UserConfig(user) => {
                pins.users.insert(user.clone(), rev.to_string());
            }
            _ => {}
        }

        pins
    }
}

/// What a load is allowed to write before reading.
#[derive(Clone, Copy)]
enum Seed<'a> {
    /// Nothing; the load is read-only.
    None,
    /// The sample config and any missing host keys.
    Files,
    /// `Files`, plus making this user an admin holding this key.
    AdminUser(&'a str, &'a PublicKey),
}

/// One immutable configuration snapshot.
#[derive(Clone)]
pub struct Config {
    pub invites: BTreeMap<String, String>,
    /// Flattened: every group's member list holds bare usernames only.
    pub groups: BTreeMap<String, Vec<String>>,
    pub orgs: BTreeMap<String, OrgDef>,
    pub users: BTreeMap<String, UserDef>,
    pub repos: BTreeMap<String, RepoAcl>,
    pub options: Options,
    pub host_keys: Vec<HostKey>,

    /// canonical key text -> username. Derived; rebuilt on every load.
    fingerprints: BTreeMap<String, String>,
}

impl Config {
    /// Load the published configuration from `HEAD` of every config repo,
    /// seeding missing well-known admin files first.
    pub fn load(store: &RepoStore) -> Result<Self> {
        Self::load_with(store, &RevisionPins::default(), Seed::Files)
    }

    /// Load a configuration without seeding, with some config repos
    /// optionally pinned to proposed commits. Never writes; this is what
    /// hook re-entry uses.
    pub fn load_at(store: &RepoStore, pins: &RevisionPins) -> Result<Self> {
        Self::load_with(store, pins, Seed::None)
    }

    /// First-run load: in addition to seeding, make sure `username` exists
    /// as an admin holding `key`.
    pub fn bootstrap(store: &RepoStore, username: &str, key: &PublicKey) -> Result<Self> {
        Self::load_with(store, &RevisionPins::default(), Seed::AdminUser(username, key))
    }

    fn load_with(store: &RepoStore, pins: &RevisionPins, seed: Seed<'_>) -> Result<Self> {
        let mut admin_repo = store.ensure(Path::new("admin/admin"))?;
        admin_repo.checkout(pins.admin.as_deref())?;

        match seed {
            Seed::None => {}
            Seed::Files | Seed::AdminUser(..) => {
                sample::ensure_admin_files(&mut admin_repo)?;

                if let Seed::AdminUser(username, key) = seed {
                    sample::ensure_admin_user(&mut admin_repo, username, key)?;
                }

                if admin_repo.is_dirty() {
                    admin_repo.commit("Updated config")?;
                }
            }
        }

        let file = AdminFile::parse(&admin_repo.file(sample::CONFIG_FILE)?)?;

        let host_keys = vec![
            HostKey::parse_pem(&admin_repo.file(sample::ED25519_KEY_FILE)?)?,
            HostKey::parse_pem(&admin_repo.file(sample::RSA_KEY_FILE)?)?,
        ];

        let mut config = Self::from_file(file, host_keys)?;

        config.load_org_configs(store, pins)?;
        config.load_user_configs(store, pins)?;
        config.index_fingerprints();
        config.ensure_declared_repos(store)?;
        config.validate_admins()?;

        Ok(config)
    }

    /// Build the snapshot core from the parsed admin document: case-fold
    /// names, flatten groups, and expand group references in every ACL.
    fn from_file(file: AdminFile, host_keys: Vec<HostKey>) -> Result<Self> {
        let groups = flatten_groups(&file.groups)?;

        let users = file
            .users
            .into_iter()
            .map(|(name, mut user)| {
                expand_repo_acls(&groups, &mut user.repos);
                (name.to_lowercase(), user)
            })
            .collect();

        let orgs = file
            .orgs
            .into_iter()
            .map(|(name, mut org)| {
                org.admin = expand_list(&groups, &org.admin);
                org.write = expand_list(&groups, &org.write);
                org.read = expand_list(&groups, &org.read);
                expand_repo_acls(&groups, &mut org.repos);
                (name.to_lowercase(), org)
            })
            .collect();

        let mut repos = file.repos;
        expand_repo_acls(&groups, &mut repos);

        Ok(Self {
            invites: file.invites,
            groups,
            orgs,
            users,
            repos,
            options: file.options,
            host_keys,
            fingerprints: BTreeMap::new(),
        })
    }

    fn load_org_configs(&mut self, store: &RepoStore, pins: &RevisionPins) -> Result<()> {
        if !self.options.org_config {
            return Ok(());
        }

        let names: Vec<String> = self.orgs.keys().cloned().collect();

        for name in names {
            if let Err(err) = self.load_org_config(store, pins, &name) {
                match err {
                    // A broken org config only loses that org's additions.
                    Error::Yaml(_) => warn!(org = %name, error = %err, "skipping org config"),
                    other => return Err(other),
                }
            }
        }

        Ok(())
    }

    fn load_org_config(&mut self, store: &RepoStore, pins: &RevisionPins, name: &str) -> Result<()> {
        let mut repo = store.ensure(&RepoKind::OrgConfig(name.to_string()).disk_path())?;
        repo.checkout(pins.orgs.get(name).map(String::as_str))?;

        if !repo.file_exists(sample::CONFIG_FILE) {
            return Ok(());
        }

        let mut file = OrgDef::parse(&repo.file(sample::CONFIG_FILE)?)?;

        file.admin = expand_list(&self.groups, &file.admin);
        file.write = expand_list(&self.groups, &file.write);
        file.read = expand_list(&self.groups, &file.read);
        expand_repo_acls(&self.groups, &mut file.repos);

        let org_config_repos = self.options.org_config_repos;

        let Some(org) = self.orgs.get_mut(name) else {
            return Ok(());
        };

        merge_unique(&mut org.admin, file.admin);
        merge_unique(&mut org.write, file.write);
        merge_unique(&mut org.read, file.read);

        if org_config_repos {
            for (repo_name, acl) in file.repos {
                // The admin repo wins when both declare the same repo, so an
                // org cannot loosen an externally sanctioned ACL.
                org.repos.entry(repo_name).or_insert(acl);
            }
        }

        Ok(())
    }

    fn load_user_configs(&mut self, store: &RepoStore, pins: &RevisionPins) -> Result<()> {
        if !self.options.user_config_keys && !self.options.user_config_repos {
            return Ok(());
        }

        let names: Vec<String> = self.users.keys().cloned().collect();

        for name in names {
            if let Err(err) = self.load_user_config(store, pins, &name) {
                match err {
                    Error::Yaml(_) => warn!(user = %name, error = %err, "skipping user config"),
                    other => return Err(other),
                }
            }
        }

        Ok(())
    }

    fn load_user_config(
        &mut self,
        store: &RepoStore,
        pins: &RevisionPins,
        name: &str,
    ) -> Result<()> {
        let mut repo = store.ensure(&RepoKind::UserConfig(name.to_string()).disk_path())?;
        repo.checkout(pins.users.get(name).map(String::as_str))?;

        if !repo.file_exists(sample::CONFIG_FILE) {
            return Ok(());
        }

        let mut file = crate::types::UserFile::parse(&repo.file(sample::CONFIG_FILE)?)?;

        expand_repo_acls(&self.groups, &mut file.repos);

        let user_config_keys = self.options.user_config_keys;
        let user_config_repos = self.options.user_config_repos;

        let Some(user) = self.users.get_mut(name) else {
            return Ok(());
        };

        if user_config_keys {
            for key in file.keys {
                if !user.keys.contains(&key) {
                    user.keys.push(key);
                }
            }
        }

        if user_config_repos {
            for (repo_name, acl) in file.repos {
                user.repos.entry(repo_name).or_insert(acl);
            }
        }

        Ok(())
    }

    /// Rebuild the derived key index. Disabled users contribute nothing, so
    /// their keys stop authenticating the moment the flag lands.
    fn index_fingerprints(&mut self) {
        self.fingerprints.clear();

        for (username, user) in &self.users {
            if user.disabled {
                continue;
            }

            for key in &user.keys {
                let canonical = key.canonical();

                match self.fingerprints.get(&canonical) {
                    Some(existing) if existing != username => {
                        warn!(
                            key = %canonical,
                            first = %existing,
                            second = %username,
                            "key claimed by two users, keeping first"
                        );
                    }
                    Some(_) => {}
                    None => {
                        self.fingerprints.insert(canonical, username.clone());
                    }
                }
            }
        }
    }

    /// Make sure every declared repo has a bare directory on disk so later
    /// path resolution cannot depend on who asked first.
    fn ensure_declared_repos(&self, store: &RepoStore) -> Result<()> {
        for name in self.repos.keys() {
            store.ensure(&RepoKind::TopLevel(name.clone()).disk_path())?;
        }

        for (org, def) in &self.orgs {
            for name in def.repos.keys() {
                store.ensure(&RepoKind::OrgRepo(org.clone(), name.clone()).disk_path())?;
            }
        }

        for (user, def) in &self.users {
            for name in def.repos.keys() {
                store.ensure(&RepoKind::UserRepo(user.clone(), name.clone()).disk_path())?;
            }
        }

        Ok(())
    }

    fn validate_admins(&self) -> Result<()> {
        let has_admin = self
            .users
            .values()
            .any(|user| user.is_admin && !user.disabled);

        if has_admin {
            Ok(())
        } else {
            Err(Error::NoAdmins)
        }
    }

    /// Hook-time check that the caller pushing a config change has not
    /// locked themselves out of it.
    pub fn validate_caller(&self, username: &str, key: &PublicKey) -> Result<()> {
        if !self.users.contains_key(username) {
            return Err(Error::UserRemoved(username.to_string()));
        }

        if !self.fingerprints.contains_key(&key.canonical()) {
            return Err(Error::KeyRemoved(key.authorized()));
        }

        Ok(())
    }

    /// Resolve the user a public key belongs to.
    pub fn lookup_user(&self, key: &PublicKey) -> Result<User> {
        let username = self
            .fingerprints
            .get(&key.canonical())
            .ok_or(Error::UserNotFound)?;

        self.lookup_user_by_name(username)
    }

    pub fn lookup_user_by_name(&self, username: &str) -> Result<User> {
        let username = username.to_lowercase();
        let user = self.users.get(&username).ok_or(Error::UserNotFound)?;

        if user.disabled {
            return Err(Error::UserNotFound);
        }

        Ok(User {
            username,
            is_admin: user.is_admin,
        })
    }

    /// Classify a client-supplied repo path and decide whether that repo
    /// exists for anyone at all.
    ///
    /// "Declared nowhere" and "scope owner missing" both come back as
    /// `RepoDoesNotExist`; callers fold `InvalidRepoFormat` and permission
    /// denials into the same client-visible message so path probing reveals
    /// nothing.
    pub fn resolve(&self, raw: &str) -> Result<RepoKind> {
        let kind = RepoKind::parse(raw, &self.options)?;

        let exists = match &kind {
            RepoKind::Admin => true,
            RepoKind::OrgConfig(org) => self.orgs.contains_key(org),
            RepoKind::OrgRepo(org, name) => self.orgs.get(org).is_some_and(|def| {
                self.options.implicit_repos || def.repos.contains_key(name)
            }),
            RepoKind::UserConfig(user) => self.user_active(user),
            RepoKind::UserRepo(user, name) => {
                self.user_active(user)
                    && (self.options.implicit_repos
                        || self.users[user].repos.contains_key(name))
            }
            RepoKind::TopLevel(name) => {
                self.options.implicit_repos || self.repos.contains_key(name)
            }
        };

        if exists { Ok(kind) } else { Err(Error::RepoDoesNotExist) }
    }

    fn user_active(&self, username: &str) -> bool {
        self.users.get(username).is_some_and(|user| !user.disabled)
    }
}

/// Transitively expand every group to a deduplicated list of bare usernames,
/// failing on reference cycles.
fn flatten_groups(groups: &BTreeMap<String, Vec<String>>) -> Result<BTreeMap<String, Vec<String>>> {
    let mut flattened = BTreeMap::new();

    for name in groups.keys() {
        let mut members = Vec::new();
        expand_group(groups, name, &mut Vec::new(), &mut members)?;
        flattened.insert(name.clone(), members);
    }

    Ok(flattened)
}

fn expand_group(
    groups: &BTreeMap<String, Vec<String>>,
    name: &str,
    path: &mut Vec<String>,
    out: &mut Vec<String>,
) -> Result<()> {
    if path.iter().any(|seen| seen == name) {
        path.push(name.to_string());
        return Err(Error::GroupLoop(path.join(" -> ")));
    }

    path.push(name.to_string());

    for entry in groups.get(name).map(Vec::as_slice).unwrap_or_default() {
        match entry.strip_prefix('$') {
            Some(inner) => expand_group(groups, inner, path, out)?,
            None => {
                if !out.iter().any(|existing| existing == entry) {
                    out.push(entry.clone());
                }
            }
        }
    }

    path.pop();

    Ok(())
}

/// Replace `$group` tokens with the group's flattened membership and drop
/// duplicates. Tokens naming unknown groups are kept; they can never match a
/// user, and keeping them makes the dangling reference visible in the
/// evaluator's inputs.
fn expand_list(groups: &BTreeMap<String, Vec<String>>, list: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(list.len());

    for entry in list {
        match entry.strip_prefix('$').and_then(|name| groups.get(name)) {
            Some(members) => {
                for member in members {
                    if !out.contains(member) {
                        out.push(member.clone());
                    }
                }
            }
            None => {
                if !out.contains(entry) {
                    out.push(entry.clone());
                }
            }
        }
    }

    out
}

fn expand_repo_acls(groups: &BTreeMap<String, Vec<String>>, repos: &mut BTreeMap<String, RepoAcl>) {
    for acl in repos.values_mut() {
        acl.write = expand_list(groups, &acl.write);
        acl.read = expand_list(groups, &acl.read);
    }
}

fn merge_unique(into: &mut Vec<String>, extra: Vec<String>) {
    for entry in extra {
        if !into.contains(&entry) {
            into.push(entry);
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    const ADMIN_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAILQGpcX2owFW6hdTWHa/CzbTwhUJlmI8gKAgnp/c0NK2 an-admin";
    const DISABLED_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBx4DYr9m+EnG0tgFsUIZqrDP7pa+vpVXJJ6/PE9J7Ll disabled";

    fn acl(write: &[&str], read: &[&str]) -> RepoAcl {
        RepoAcl {
            public: false,
            write: write.iter().map(|s| s.to_string()).collect(),
            read: read.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// A config with one of every kind of principal, mirroring the access
    /// table the evaluator tests walk.
    pub fn test_config() -> Config {
        let mut users = BTreeMap::new();

        let mut admin = UserDef::default();
        admin.is_admin = true;
        admin.keys = vec![PublicKey::parse(ADMIN_KEY).unwrap()];
        users.insert("an-admin".to_string(), admin);

        let mut non_admin = UserDef::default();
        non_admin.repos.insert(
            "test-repo".to_string(),
            acl(&["write-user"], &["read-user"]),
        );
        users.insert("non-admin".to_string(), non_admin);

        for name in [
            "org-admin",
            "org-write",
            "org-read",
            "write-user",
            "read-user",
            "nothing-user",
            "grouped-user",
        ] {
            users.insert(name.to_string(), UserDef::default());
        }

        let mut disabled = UserDef::default();
        disabled.disabled = true;
        disabled.keys = vec![PublicKey::parse(DISABLED_KEY).unwrap()];
        users.insert("disabled".to_string(), disabled);

        let mut org = OrgDef::default();
        org.admin = vec!["org-admin".to_string()];
        org.write = vec!["org-write".to_string()];
        org.read = vec!["org-read".to_string()];
        org.repos.insert(
            "test-repo".to_string(),
            acl(&["write-user"], &["read-user"]),
        );

        let mut orgs = BTreeMap::new();
        orgs.insert("an-org".to_string(), org);

        let mut groups = BTreeMap::new();
        groups.insert("admins".to_string(), vec!["an-admin".to_string()]);
        groups.insert("writers".to_string(), vec!["grouped-user".to_string()]);

        let mut repos = BTreeMap::new();
        repos.insert(
            "test-repo".to_string(),
            acl(&["write-user", "$writers"], &["read-user"]),
        );

        let mut invites = BTreeMap::new();
        invites.insert("valid-invite".to_string(), "nothing-user".to_string());

        let mut config = Config {
            invites,
            groups,
            orgs,
            users,
            repos,
            options: Options::default(),
            host_keys: Vec::new(),
            fingerprints: BTreeMap::new(),
        };

        config.index_fingerprints();
        config
    }
}
