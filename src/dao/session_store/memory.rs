use std::{sync::Arc, time::SystemTime};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::SessionEntity,
    session_store::SessionStore,
    storage::{StorageError, StorageResult, WriteOutcome},
};

/// Process-local store used for development and tests.
///
/// Each operation holds the affected map shard while it runs, which makes
/// `replace_session` a true compare-and-swap.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    codes: DashMap<String, Uuid>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, session: SessionEntity) -> StorageResult<()> {
        let now = SystemTime::now();
        match self.inner.codes.entry(session.code.clone()) {
            Entry::Occupied(mut slot) => {
                let holder = *slot.get();
                let active = self
                    .inner
                    .sessions
                    .get(&holder)
                    .is_some_and(|existing| existing.expires_at > now);
                if active {
                    return Err(StorageError::DuplicateCode { code: session.code });
                }
                self.inner.sessions.remove(&holder);
                slot.insert(session.id);
                self.inner.sessions.insert(session.id, session);
            }
            Entry::Vacant(slot) => {
                slot.insert(session.id);
                self.inner.sessions.insert(session.id, session);
            }
        }
        Ok(())
    }

    fn find(&self, id: Uuid) -> Option<SessionEntity> {
        self.inner.sessions.get(&id).map(|entry| entry.clone())
    }

    fn find_by_code(&self, code: &str) -> Option<SessionEntity> {
        let id = self.inner.codes.get(code).map(|entry| *entry.value())?;
        self.find(id)
    }

    fn replace(&self, session: SessionEntity, expected_version: u64) -> WriteOutcome {
        match self.inner.sessions.get_mut(&session.id) {
            Some(mut current) if current.version == expected_version => {
                *current = session;
                WriteOutcome::Applied
            }
            _ => WriteOutcome::Stale,
        }
    }

    fn delete(&self, id: Uuid) -> bool {
        match self.inner.sessions.remove(&id) {
            Some((_, removed)) => {
                self.inner
                    .codes
                    .remove_if(&removed.code, |_, holder| *holder == id);
                true
            }
            None => false,
        }
    }

    fn purge(&self, now: SystemTime) -> u64 {
        let expired: Vec<Uuid> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| *entry.key())
            .collect();

        expired.into_iter().filter(|id| self.delete(*id)).count() as u64
    }
}

impl SessionStore for MemorySessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert(session) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find(id)) })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.find_by_code(&code)) })
    }

    fn replace_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.replace(session, expected_version)) })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.delete(id)) })
    }

    fn purge_expired(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.purge(now)) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::state::{session::Session, state_machine::SessionState};

    fn entity(code: &str, ttl: Duration) -> SessionEntity {
        SessionState::new(Session::new(
            code.to_string(),
            "Animal that represents you".into(),
            "host".into(),
            ttl,
        ))
        .into()
    }

    #[tokio::test]
    async fn duplicate_active_code_is_rejected() {
        let store = MemorySessionStore::new();
        store
            .insert_session(entity("ABCDEF", Duration::from_secs(60)))
            .await
            .unwrap();

        let err = store
            .insert_session(entity("ABCDEF", Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateCode { code } if code == "ABCDEF"));
    }

    #[tokio::test]
    async fn expired_holder_releases_its_code() {
        let store = MemorySessionStore::new();
        let stale = entity("QWERTY", Duration::ZERO);
        let stale_id = stale.id;
        store.insert_session(stale).await.unwrap();

        let fresh = entity("QWERTY", Duration::from_secs(60));
        let fresh_id = fresh.id;
        store.insert_session(fresh).await.unwrap();

        assert!(store.find_session(stale_id).await.unwrap().is_none());
        let found = store
            .find_session_by_code("QWERTY".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, fresh_id);
    }

    #[tokio::test]
    async fn replace_applies_only_on_matching_version() {
        let store = MemorySessionStore::new();
        let original = entity("ZXCVBN", Duration::from_secs(60));
        store.insert_session(original.clone()).await.unwrap();

        let mut first = original.clone();
        first.version = 1;
        first.host_ready = true;
        let mut second = original.clone();
        second.version = 1;
        second.guest_ready = true;

        assert_eq!(
            store.replace_session(first, 0).await.unwrap(),
            WriteOutcome::Applied
        );
        assert_eq!(
            store.replace_session(second, 0).await.unwrap(),
            WriteOutcome::Stale
        );

        let stored = store.find_session(original.id).await.unwrap().unwrap();
        assert!(stored.host_ready);
        assert!(!stored.guest_ready);
    }

    #[tokio::test]
    async fn delete_frees_code_and_purge_drops_expired() {
        let store = MemorySessionStore::new();
        let live = entity("HJKLMN", Duration::from_secs(60));
        let live_id = live.id;
        store.insert_session(live).await.unwrap();
        store
            .insert_session(entity("PQRSTU", Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(SystemTime::now()).await.unwrap(), 1);
        assert!(store.delete_session(live_id).await.unwrap());
        assert!(!store.delete_session(live_id).await.unwrap());
        assert!(
            store
                .find_session_by_code("HJKLMN".into())
                .await
                .unwrap()
                .is_none()
        );
    }
}
