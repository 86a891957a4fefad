//! Authentication subsystem
//!
//! Components:
//! - `types`: identities, per-attempt context and method kinds.
//! - `auth_chain`: ordered validator lists with OR semantics.
//! - `public_key`: OpenSSH `authorized_keys` backed validator.
//! - `password`: argon2 password file backed validator.
//! - `user_store`: user name to OS identity resolution.

pub mod auth_chain;
pub mod password;
pub mod public_key;
pub mod types;
pub mod user_store;

pub use auth_chain::{AuthChain, PasswordAuth, PublicKeyAuth};
pub use password::PasswordFileAuth;
pub use public_key::AuthorizedKeysAuth;
pub use types::{AuthContext, AuthMethod, Identity};
pub use user_store::{PasswdUserStore, UserStore};
