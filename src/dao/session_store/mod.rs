pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use crate::dao::models::SessionEntity;
use crate::dao::storage::{StorageResult, WriteOutcome};
use futures::future::BoxFuture;
use uuid::Uuid;

pub use self::memory::MemorySessionStore;

/// Abstraction over the shared store both participants' requests mutate.
///
/// Every mutation goes through [`SessionStore::replace_session`], a conditional
/// write keyed on the document version read beforehand.
pub trait SessionStore: Send + Sync {
    /// Insert a brand-new session, failing with `DuplicateCode` when an active
    /// session already holds the same room code.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Replace the stored document only if its version still equals `expected_version`.
    fn replace_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>>;
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove every session whose expiry is at or before `now`, returning how many went away.
    fn purge_expired(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
