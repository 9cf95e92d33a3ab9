//! Open clients and which build version controls them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::tier::VersionTag;

pub type ClientId = u64;

#[derive(Default)]
struct Registry {
    clients: BTreeMap<ClientId, Option<VersionTag>>,
    active: Option<VersionTag>,
}

/// Tracks open clients (tabs, windows, embedded views) so activation can take
/// them over without waiting for them to reconnect.
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    inner: RwLock<Registry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. It is controlled by the active version, if any.
    pub fn open(&self) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut reg) = self.inner.write() {
            let controller = reg.active.clone();
            reg.clients.insert(id, controller);
        }
        id
    }

    pub fn close(&self, id: ClientId) {
        if let Ok(mut reg) = self.inner.write() {
            reg.clients.remove(&id);
        }
    }

    pub fn controller(&self, id: ClientId) -> Option<VersionTag> {
        self.inner
            .read()
            .ok()
            .and_then(|reg| reg.clients.get(&id).cloned().flatten())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|reg| reg.clients.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make `version` the controller of every open client and of clients
    /// opened later. Returns how many clients changed controller.
    pub fn claim(&self, version: &VersionTag) -> usize {
        let Ok(mut reg) = self.inner.write() else {
            return 0;
        };
        reg.active = Some(version.clone());
        let mut changed = 0;
        for controller in reg.clients.values_mut() {
            if controller.as_ref() != Some(version) {
                *controller = Some(version.clone());
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_takes_over_open_clients() {
        let registry = ClientRegistry::new();
        let a = registry.open();
        let b = registry.open();
        assert_eq!(registry.controller(a), None);

        let v2 = VersionTag::new("v2").unwrap();
        assert_eq!(registry.claim(&v2), 2);
        assert_eq!(registry.controller(a), Some(v2.clone()));
        assert_eq!(registry.controller(b), Some(v2.clone()));

        // Claiming again changes nothing
        assert_eq!(registry.claim(&v2), 0);

        // Later clients start under the active version
        let c = registry.open();
        assert_eq!(registry.controller(c), Some(v2));
    }

    #[test]
    fn test_close_removes_client() {
        let registry = ClientRegistry::new();
        let a = registry.open();
        assert_eq!(registry.len(), 1);
        registry.close(a);
        assert!(registry.is_empty());
        assert_eq!(registry.controller(a), None);
    }
}
