use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("malformed public key")]
    MalformedKey,

    #[error("malformed private key: {0}")]
    MalformedPrivateKey(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("nothing to commit")]
    NothingToCommit,

    #[error("invalid repo format")]
    InvalidRepoFormat,

    #[error("repo does not exist")]
    RepoDoesNotExist,

    #[error("group loop found: {0}")]
    GroupLoop(String),

    #[error("no admins defined")]
    NoAdmins,

    #[error("user not found")]
    UserNotFound,

    #[error("cannot remove current user: {0}")]
    UserRemoved(String),

    #[error("cannot remove current key: {0}")]
    KeyRemoved(String),

    #[error("invite does not exist")]
    InviteNotFound,

    #[error("hook {0} is not implemented")]
    UnknownHook(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
