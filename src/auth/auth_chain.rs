use std::sync::Arc;

use log::{debug, info};
use russh::keys::PublicKey;

use super::types::{AuthContext, AuthMethod};

/// Validates a public key offered by a client.
pub trait PublicKeyAuth: Send + Sync {
    fn authenticate(&self, context: &AuthContext, key: &PublicKey) -> bool;
}

/// Validates a password offered by a client.
pub trait PasswordAuth: Send + Sync {
    fn authenticate(&self, context: &AuthContext, password: &str) -> bool;
}

/// Ordered validators of both kinds.
///
/// Validators of the same kind are tried in registration order and the first
/// success wins. Validators are shared read-only between connections.
#[derive(Clone, Default)]
pub struct AuthChain {
    public_key: Vec<Arc<dyn PublicKeyAuth>>,
    password: Vec<Arc<dyn PasswordAuth>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_public_key(&mut self, validator: Arc<dyn PublicKeyAuth>) {
        self.public_key.push(validator);
    }

    pub fn add_password(&mut self, validator: Arc<dyn PasswordAuth>) {
        self.password.push(validator);
    }

    pub fn with_public_key(mut self, validator: Arc<dyn PublicKeyAuth>) -> Self {
        self.add_public_key(validator);
        self
    }

    pub fn with_password(mut self, validator: Arc<dyn PasswordAuth>) -> Self {
        self.add_password(validator);
        self
    }

    /// Methods with at least one registered validator.
    pub fn methods(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::new();
        if !self.public_key.is_empty() {
            methods.push(AuthMethod::PublicKey);
        }
        if !self.password.is_empty() {
            methods.push(AuthMethod::Password);
        }
        methods
    }

    pub fn is_empty(&self) -> bool {
        self.public_key.is_empty() && self.password.is_empty()
    }

    pub fn authenticate_public_key(&self, context: &AuthContext, key: &PublicKey) -> bool {
        let accepted = self
            .public_key
            .iter()
            .position(|v| v.authenticate(context, key));
        log_outcome(context, "publickey", accepted);
        accepted.is_some()
    }

    pub fn authenticate_password(&self, context: &AuthContext, password: &str) -> bool {
        let accepted = self
            .password
            .iter()
            .position(|v| v.authenticate(context, password));
        log_outcome(context, "password", accepted);
        accepted.is_some()
    }
}

fn log_outcome(context: &AuthContext, method: &str, accepted: Option<usize>) {
    match accepted {
        Some(index) => {
            info!(
                "[{}] {} authentication accepted for {} from {} (validator {})",
                context.session_id, method, context.user, context.remote_addr, index
            );
        }
        None => {
            debug!(
                "[{}] {} authentication rejected for {} from {}",
                context.session_id, method, context.user, context.remote_addr
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const TEST_KEY: &str =
        "AAAAC3NzaC1lZDI1NTE5AAAAIIJW338rZ3YBUhVT8B67Cz1ZQzgs11T2uonIfwvus/+2";

    struct Fixed {
        answer: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl PasswordAuth for Fixed {
        fn authenticate(&self, _context: &AuthContext, _password: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    impl PublicKeyAuth for Fixed {
        fn authenticate(&self, _context: &AuthContext, _key: &PublicKey) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn context() -> AuthContext {
        AuthContext::new(Uuid::new_v4(), "alice", "127.0.0.1:50000".parse().unwrap())
    }

    #[test]
    fn test_one_success_is_enough() {
        let failing = Fixed::new(false);
        let passing = Fixed::new(true);
        let chain = AuthChain::new()
            .with_password(failing.clone())
            .with_password(passing.clone());

        assert!(chain.authenticate_password(&context(), "pw"));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(passing.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_success_short_circuits() {
        let first = Fixed::new(true);
        let second = Fixed::new(true);
        let chain = AuthChain::new()
            .with_password(first.clone())
            .with_password(second.clone());

        assert!(chain.authenticate_password(&context(), "pw"));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_all_failing_rejects() {
        let chain = AuthChain::new()
            .with_password(Fixed::new(false))
            .with_password(Fixed::new(false));
        assert!(!chain.authenticate_password(&context(), "pw"));

        let key = russh::keys::parse_public_key_base64(TEST_KEY).unwrap();
        let chain = AuthChain::new().with_public_key(Fixed::new(false));
        assert!(!chain.authenticate_public_key(&context(), &key));
    }

    #[test]
    fn test_kinds_are_independent() {
        let key = russh::keys::parse_public_key_base64(TEST_KEY).unwrap();
        let chain = AuthChain::new().with_password(Fixed::new(true));

        assert!(!chain.authenticate_public_key(&context(), &key));
        assert_eq!(chain.methods(), vec![AuthMethod::Password]);
    }

    #[test]
    fn test_methods_reflect_registration() {
        let chain = AuthChain::new();
        assert!(chain.is_empty());
        assert!(chain.methods().is_empty());

        let chain = chain
            .with_password(Fixed::new(false))
            .with_public_key(Fixed::new(false));
        assert_eq!(
            chain.methods(),
            vec![AuthMethod::PublicKey, AuthMethod::Password]
        );
    }
}
