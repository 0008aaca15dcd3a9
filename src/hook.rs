//! Hook re-entry: git invokes the installed hook scripts during a
//! `receive-pack`, and those scripts run this binary again in `hook` mode
//! with the pushing user's identity carried in the environment.
//!
//! For a push to a configuration repo, the update hook loads a candidate
//! config with that repo pinned at the proposed commit and validates it
//! before git is allowed to move the ref. Returning an error rejects the
//! push; the running server never publishes the rejected state.

use crate::admin::{Config, RevisionPins};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::store::RepoStore;
use crate::types::{AccessLevel, PublicKey, RepoKind};

pub fn run(settings: &ServerConfig, hook: &str, args: &[String]) -> Result<()> {
    match hook {
        // Kept as installed placeholders; nothing to enforce yet.
        "pre-receive" | "post-receive" => Ok(()),
        "update" => run_update(settings, args),
        other => Err(Error::UnknownHook(other.to_string())),
    }
}

fn run_update(settings: &ServerConfig, args: &[String]) -> Result<()> {
    if args.len() < 3 {
        return Err(Error::Config(
            "update hook expects <ref> <old-sha> <new-sha>".to_string(),
        ));
    }

    let new_sha = &args[2];

    let repo_path = settings
        .hook_repo_path
        .as_deref()
        .ok_or_else(|| Error::Config("GITDIR_HOOK_REPO_PATH: not set".to_string()))?;

    let raw_key = settings
        .hook_public_key
        .as_deref()
        .ok_or_else(|| Error::Config("GITDIR_HOOK_PUBLIC_KEY: not set".to_string()))?;

    let key = PublicKey::parse(raw_key)?;

    let store = RepoStore::new(settings.base_dir.clone());
    let current = Config::load_at(&store, &RevisionPins::default())?;

    let kind = RepoKind::parse(repo_path, &current.options)?;

    // Pushes to plain repos carry no configuration; accept them.
    if !kind.is_config() {
        return Ok(());
    }

    let user = current.lookup_user(&key)?;

    let pins = RevisionPins::for_kind(&kind, new_sha);
    let candidate = Config::load_at(&store, &pins)?;

    // The pushed config must not lock the pusher out: their key must still
    // map to their user, and they must keep admin on this config repo. Group
    // loops and admin-less configs already failed the candidate load.
    candidate.validate_caller(&user.username, &key)?;

    let candidate_user = candidate.lookup_user(&key)?;

    if candidate.check_access(&candidate_user, &kind) < AccessLevel::Admin {
        return Err(Error::Config(format!(
            "cannot drop your own admin access to {kind}"
        )));
    }

    Ok(())
}
