//! Per-connection SSH session handling: public-key auth (including invite
//! redemption), command dispatch, and wiring git child processes to the
//! channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;

use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::admin::{Config, User};
use crate::error::Result;
use crate::types::{AccessLevel, PublicKey, RepoKind};

use super::ServerState;

/// The two git transport commands served over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GitService {
    UploadPack,
    ReceivePack,
}

impl GitService {
    fn command_name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    fn required_access(self) -> AccessLevel {
        match self {
            Self::UploadPack => AccessLevel::Read,
            Self::ReceivePack => AccessLevel::Write,
        }
    }

    fn is_write(self) -> bool {
        matches!(self, Self::ReceivePack)
    }
}

/// Split an exec request like `git-upload-pack '~alice/notes.git'` into the
/// command name and its unquoted argument.
fn parse_command(raw: &str) -> (String, Option<String>) {
    let raw = raw.trim();

    match raw.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let arg = rest.trim().trim_matches(|c| c == '\'' || c == '"');
            (name.to_string(), Some(arg.to_string()))
        }
        None => (raw.to_string(), None),
    }
}

/// Per-connection state. Auth pins the session to the snapshot current at
/// connect time; a reload mid-session only affects later connections.
pub struct SshSession {
    state: Arc<ServerState>,
    peer_addr: Option<SocketAddr>,
    snapshot: Option<Arc<Config>>,
    user: Option<User>,
    key: Option<PublicKey>,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl SshSession {
    pub fn new(state: Arc<ServerState>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer_addr,
            snapshot: None,
            user: None,
            key: None,
            channels: HashMap::new(),
        }
    }

    fn whoami(&self, channel_id: ChannelId, session: &mut Session) {
        let username = self
            .user
            .as_ref()
            .map(|user| user.username.as_str())
            .unwrap_or("<anonymous>");

        session.data(
            channel_id,
            CryptoVec::from_slice(format!("logged in as {username}\r\n").as_bytes()),
        );
        session.exit_status_request(channel_id, 0);
        session.close(channel_id);
    }

    fn reject_command(&self, channel_id: ChannelId, session: &mut Session, message: &str) {
        session.extended_data(channel_id, 1, CryptoVec::from_slice(message.as_bytes()));
        session.exit_status_request(channel_id, 1);
        session.close(channel_id);
    }

    fn repo_action(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
        service: GitService,
        arg: Option<String>,
    ) {
        let Some(repo_arg) = arg else {
            self.reject_command(channel_id, session, "Missing repo name argument\r\n");
            return;
        };

        let (Some(snapshot), Some(user), Some(key)) =
            (self.snapshot.clone(), self.user.clone(), self.key.clone())
        else {
            self.reject_command(channel_id, session, "Not authenticated\r\n");
            return;
        };

        // Missing repos, malformed paths, and denied access all produce the
        // same message so nothing can be learned by probing paths.
        let kind = match snapshot.resolve(&repo_arg) {
            Ok(kind) => kind,
            Err(err) => {
                info!(repo = %repo_arg, error = %err, "repo lookup failed");
                self.reject_command(channel_id, session, "Repo does not exist\r\n");
                return;
            }
        };

        let access = snapshot.check_access(&user, &kind);

        if access < service.required_access() {
            info!(
                repo = %repo_arg,
                user = %user.username,
                granted = %access,
                "access denied"
            );
            self.reject_command(channel_id, session, "Repo does not exist\r\n");
            return;
        }

        // Admin authority over the area makes implicit creation safe; the
        // resolver already vetted existence for everyone else.
        if access >= AccessLevel::Admin {
            if let Err(err) = self.state.store.ensure(&kind.disk_path()) {
                warn!(repo = %repo_arg, error = %err, "failed to ensure repo");
                self.reject_command(channel_id, session, "Repo does not exist\r\n");
                return;
            }
        }

        let Some(channel) = self.channels.remove(&channel_id) else {
            self.reject_command(channel_id, session, "No session channel\r\n");
            return;
        };

        // The hook re-entry gets the canonical parsed name, not whatever
        // spelling the client used.
        let hook_path = kind.client_path(&snapshot.options);

        let state = self.state.clone();
        let handle = session.handle();

        tokio::spawn(async move {
            run_git(state, handle, channel, channel_id, service, kind, hook_path, key).await;
        });
    }
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = crate::error::Error;

    async fn auth_publickey(
        &mut self,
        login: &str,
        key: &russh_keys::key::PublicKey,
    ) -> Result<Auth> {
        let presented = PublicKey::from_session_key(key);

        let mut snapshot = self.state.snapshot();
        let mut redeemed = false;

        if let Some(token) = login.strip_prefix(snapshot.options.invite_prefix.as_str()) {
            match self.state.redeem_invite(token, &presented) {
                Ok(username) => {
                    info!(peer = ?self.peer_addr, user = %username, "invite accepted");
                    // The redeemed key only exists in the snapshot published
                    // by the redemption itself.
                    snapshot = self.state.snapshot();
                    redeemed = true;
                }
                Err(err) => {
                    warn!(peer = ?self.peer_addr, error = %err, "invite rejected");
                    return Ok(Auth::Reject {
                        proceed_with_methods: None,
                    });
                }
            }
        }

        let user = match snapshot.lookup_user(&presented) {
            Ok(user) => user,
            Err(err) => {
                warn!(
                    peer = ?self.peer_addr,
                    login = %login,
                    fingerprint = %presented.fingerprint(),
                    error = %err,
                    "auth failed"
                );
                return Ok(Auth::Reject {
                    proceed_with_methods: None,
                });
            }
        };

        // A key may only be used under its owner's login name or the shared
        // git login. Invite logins already proved ownership by redeeming.
        if !redeemed && login != user.username && login != snapshot.options.git_user {
            warn!(
                peer = ?self.peer_addr,
                login = %login,
                user = %user.username,
                "key belongs to a different user"
            );
            return Ok(Auth::Reject {
                proceed_with_methods: None,
            });
        }

        info!(peer = ?self.peer_addr, user = %user.username, "authenticated");

        self.snapshot = Some(snapshot);
        self.user = Some(user);
        self.key = Some(presented);

        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    /// A plain `ssh` with no command gets the whoami output.
    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<()> {
        session.channel_success(channel_id);
        self.whoami(channel_id, session);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        session.channel_success(channel_id);

        let raw = String::from_utf8_lossy(data).to_string();
        let (name, arg) = parse_command(&raw);

        info!(peer = ?self.peer_addr, command = %name, "exec request");

        match name.as_str() {
            "" | "whoami" => self.whoami(channel_id, session),
            "git-upload-pack" => {
                self.repo_action(channel_id, session, GitService::UploadPack, arg);
            }
            "git-receive-pack" => {
                self.repo_action(channel_id, session, GitService::ReceivePack, arg);
            }
            _ => {
                self.reject_command(
                    channel_id,
                    session,
                    &format!("command {name:?} not found\r\n"),
                );
            }
        }

        Ok(())
    }
}

/// Run a git transport command with its stdio stitched to the SSH channel,
/// then report the exit code and trigger a reload for config-repo writes.
#[allow(clippy::too_many_arguments)]
async fn run_git(
    state: Arc<ServerState>,
    handle: russh::server::Handle,
    channel: Channel<Msg>,
    channel_id: ChannelId,
    service: GitService,
    kind: RepoKind,
    repo_name: String,
    key: PublicKey,
) {
    let repo_path = state.store.disk_path(&kind.disk_path());

    let mut cmd = Command::new(service.command_name());
    cmd.arg(&repo_path);
    cmd.current_dir(state.store.base());
    cmd.env_clear();

    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }

    cmd.env("GITDIR_BASE_DIR", state.store.base());
    cmd.env("GITDIR_HOOK_REPO_PATH", &repo_name);
    cmd.env("GITDIR_HOOK_PUBLIC_KEY", key.authorized());
    cmd.env("GITDIR_LOG_FORMAT", "console");

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(command = %service.command_name(), error = %err, "failed to spawn git");
            let _ = handle
                .extended_data(
                    channel_id,
                    1,
                    CryptoVec::from_slice(b"Failed to start git\r\n"),
                )
                .await;
            let _ = handle.exit_status_request(channel_id, 1).await;
            let _ = handle.close(channel_id).await;
            return;
        }
    };

    let mut stdin = child.stdin.take();
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let (mut chan_read, mut chan_write) = tokio::io::split(channel.into_stream());

    // Client data keeps flowing into the child until the client is done;
    // the task is dropped once the child has exited.
    let stdin_task = tokio::spawn(async move {
        if let Some(stdin) = stdin.as_mut() {
            let _ = tokio::io::copy(&mut chan_read, stdin).await;
            let _ = stdin.shutdown().await;
        }
    });

    let stderr_handle = handle.clone();
    let stderr_task = tokio::spawn(async move {
        let Some(stderr) = stderr.as_mut() else {
            return;
        };

        let mut buf = [0u8; 4096];

        while let Ok(n) = stderr.read(&mut buf).await {
            if n == 0 {
                break;
            }

            if stderr_handle
                .extended_data(channel_id, 1, CryptoVec::from_slice(&buf[..n]))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    if let Some(stdout) = stdout.as_mut() {
        let _ = tokio::io::copy(stdout, &mut chan_write).await;
    }

    let code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(1),
        Err(err) => {
            warn!(error = %err, "failed to wait for git");
            1
        }
    };

    stdin_task.abort();
    let _ = stderr_task.await;

    // A successful push to a config repo is the reconfiguration signal.
    if service.is_write() && kind.is_config() && code == 0 {
        if let Err(err) = state.reload() {
            warn!(error = %err, "reload after config push failed");
            let _ = handle
                .extended_data(
                    channel_id,
                    1,
                    CryptoVec::from_slice(
                        format!("Error when reloading config: {err}\r\n").as_bytes(),
                    ),
                )
                .await;
        }
    }

    info!(command = %service.command_name(), repo = %repo_name, code, "git exited");

    let _ = handle.exit_status_request(channel_id, code as u32).await;
    let _ = handle.close(channel_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_quoted() {
        let (name, arg) = parse_command("git-upload-pack '~alice/notes.git'");
        assert_eq!(name, "git-upload-pack");
        assert_eq!(arg.as_deref(), Some("~alice/notes.git"));
    }

    #[test]
    fn test_parse_command_double_quoted() {
        let (name, arg) = parse_command("git-receive-pack \"@an-org/project\"");
        assert_eq!(name, "git-receive-pack");
        assert_eq!(arg.as_deref(), Some("@an-org/project"));
    }

    #[test]
    fn test_parse_command_bare() {
        let (name, arg) = parse_command("whoami");
        assert_eq!(name, "whoami");
        assert!(arg.is_none());

        let (name, arg) = parse_command("");
        assert_eq!(name, "");
        assert!(arg.is_none());
    }
}
