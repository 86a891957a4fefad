pub mod controller_handler;

pub use controller_handler::{build_auth_chain, Controller};
