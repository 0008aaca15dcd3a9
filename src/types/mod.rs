mod access;
mod keys;
mod models;
mod repo_path;

pub use access::AccessLevel;
pub use keys::{HostKey, PublicKey};
pub use models::{AdminFile, Options, OrgDef, RepoAcl, UserDef, UserFile};
pub use repo_path::RepoKind;
