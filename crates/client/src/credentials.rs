/// Persisted resume state: read once at session start, written after a
/// welcome and whenever the acknowledged tick advances.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub player_id: Option<String>,
    pub resume_token: Option<String>,
    pub last_ack_tick: Option<i64>,
}

/// Key-value backing store for credentials; the host platform supplies the
/// real implementation (preferences, keychain, file).
pub trait CredentialStore: Send {
    fn load(&self) -> StoredCredentials;
    fn store_identity(&mut self, player_id: &str, resume_token: &str);
    fn store_ack_tick(&mut self, tick: i64);
    fn clear(&mut self);
}

/// Volatile store for tests and the demo.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credentials: StoredCredentials,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(credentials: StoredCredentials) -> Self {
        Self { credentials }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> StoredCredentials {
        self.credentials.clone()
    }

    fn store_identity(&mut self, player_id: &str, resume_token: &str) {
        self.credentials.player_id = Some(player_id.to_string());
        self.credentials.resume_token = Some(resume_token.to_string());
    }

    fn store_ack_tick(&mut self, tick: i64) {
        self.credentials.last_ack_tick = Some(tick);
    }

    fn clear(&mut self) {
        self.credentials = StoredCredentials::default();
    }
}

/// Clonable handle over one underlying store, for the controller and the
/// session repository to share.
#[derive(Clone)]
pub struct SharedCredentialStore {
    inner: std::sync::Arc<std::sync::Mutex<Box<dyn CredentialStore>>>,
}

impl SharedCredentialStore {
    pub fn new(store: impl CredentialStore + 'static) -> Self {
        Self {
            inner: std::sync::Arc::new(std::sync::Mutex::new(Box::new(store))),
        }
    }
}

impl CredentialStore for SharedCredentialStore {
    fn load(&self) -> StoredCredentials {
        self.inner.lock().unwrap().load()
    }

    fn store_identity(&mut self, player_id: &str, resume_token: &str) {
        self.inner.lock().unwrap().store_identity(player_id, resume_token);
    }

    fn store_ack_tick(&mut self, tick: i64) {
        self.inner.lock().unwrap().store_ack_tick(tick);
    }

    fn clear(&mut self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_store_views_one_backing_store() {
        let mut a = SharedCredentialStore::new(MemoryCredentialStore::new());
        let b = a.clone();
        a.store_identity("p9", "tok9");
        assert_eq!(b.load().player_id.as_deref(), Some("p9"));
    }

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryCredentialStore::new();
        store.store_identity("p1", "tok");
        store.store_ack_tick(42);
        let loaded = store.load();
        assert_eq!(loaded.player_id.as_deref(), Some("p1"));
        assert_eq!(loaded.resume_token.as_deref(), Some("tok"));
        assert_eq!(loaded.last_ack_tick, Some(42));
        store.clear();
        assert_eq!(store.load(), StoredCredentials::default());
    }
}
