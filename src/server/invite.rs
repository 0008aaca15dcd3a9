//! Invite redemption: a connection as `invite:<token>` binds the presented
//! key to the invited user in a single commit to the admin repo.

use std::path::Path;

use tracing::info;

use crate::admin::{yamledit, Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::types::PublicKey;

use super::ServerState;

/// Consume `token`, appending `key` to the invited user and clearing their
/// `disabled` flag. All invites pointing at the same user are removed in the
/// same commit, so a redeemed invite cannot be replayed under another token.
///
/// Runs entirely under the config write lock; the new snapshot is published
/// before the connection proceeds, so the just-added key authenticates
/// immediately.
pub(super) fn redeem(state: &ServerState, token: &str, key: &PublicKey) -> Result<String> {
    let mut guard = state.config.write().expect("config lock poisoned");

    let username = guard
        .invites
        .get(token)
        .cloned()
        .ok_or(Error::InviteNotFound)?;

    let mut repo = state.store.ensure(Path::new("admin/admin"))?;
    let mut doc = yamledit::parse_document(&repo.file(CONFIG_FILE)?)?;

    let users = yamledit::ensure_mapping(&mut doc, "users");
    let user = yamledit::ensure_mapping(users, &username);
    yamledit::remove_key(user, "disabled");

    let keys = yamledit::ensure_sequence(user, "keys");
    yamledit::append_unique(keys, &key.authorized());

    let invites = yamledit::ensure_mapping(&mut doc, "invites");
    let stale: Vec<String> = yamledit::string_entries(invites)
        .filter(|(_, target)| *target == username)
        .map(|(tok, _)| tok.to_string())
        .collect();

    for tok in &stale {
        yamledit::remove_key(invites, tok);
    }

    repo.stage(CONFIG_FILE, yamledit::encode(&doc)?);
    repo.commit(&format!("Added {username} from invite {token}"))?;

    let fresh = Config::load(&state.store)?;
    *guard = std::sync::Arc::new(fresh);

    info!(user = %username, fingerprint = %key.fingerprint(), "invite redeemed");

    Ok(username)
}
