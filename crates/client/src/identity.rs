//! Shared, rotatable session identity.

use std::sync::Arc;

use arc_swap::ArcSwap;
use kikx_protocol::Identity;

/// Identity cell shared by a session and every gateway built next to it.
///
/// Reads are lock-free; the session swaps in a new value when the host
/// rotates the id on `connected`.
#[derive(Clone)]
pub struct SharedIdentity {
    inner: Arc<ArcSwap<Identity>>,
}

impl SharedIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(identity)),
        }
    }

    pub fn load(&self) -> Arc<Identity> {
        self.inner.load_full()
    }

    pub fn store(&self, identity: Identity) {
        self.inner.store(Arc::new(identity));
    }

    /// Adopt a host-assigned id. Returns true when it differs from the current one.
    pub fn adopt(&self, id: &str) -> bool {
        let current = self.load();
        if current.id() == Some(id) {
            return false;
        }
        self.store(current.rotated(id.to_string()));
        true
    }

    /// Current client id, if this is a shell client that has been assigned one
    pub fn client_id(&self) -> Option<String> {
        match self.load().as_ref() {
            Identity::Client { id } => id.clone(),
            Identity::App { .. } => None,
        }
    }
}

impl std::fmt::Debug for SharedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedIdentity").field(&self.load()).finish()
    }
}
