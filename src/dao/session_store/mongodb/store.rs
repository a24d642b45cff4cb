use std::{sync::Arc, time::Duration, time::SystemTime};

use futures::future::BoxFuture;
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoSessionDocument, doc_id},
};
use crate::dao::{
    models::SessionEntity,
    session_store::SessionStore,
    storage::{StorageResult, WriteOutcome},
};

const SESSION_COLLECTION_NAME: &str = "sessions";

#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Room codes are unique among stored sessions; expired documents are
    /// additionally reaped by the server through a TTL index.
    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;

        let code_index = IndexModel::builder()
            .keys(doc! {"code": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_code_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        collection
            .create_index(code_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "code",
                source,
            })?;

        let expiry_index = IndexModel::builder()
            .keys(doc! {"expires_at": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_expiry_ttl_idx".to_owned()))
                    .expire_after(Some(Duration::ZERO))
                    .build(),
            )
            .build();
        collection
            .create_index(expiry_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "expires_at",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let code = session.code.clone();
        let document: MongoSessionDocument = session.into();

        self.collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::DuplicateCode { code }
                } else {
                    MongoDaoError::InsertSession { id, source }
                }
            })?;
        Ok(())
    }

    async fn find_one(
        &self,
        filter: mongodb::bson::Document,
        key: String,
    ) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .collection()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::LoadSession { key, source })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn replace_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> MongoResult<WriteOutcome> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        let mut filter = doc_id(id);
        filter.insert("version", expected_version as i64);

        let result = self
            .collection()
            .await
            .replace_one(filter, &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;

        Ok(if result.matched_count == 1 {
            WriteOutcome::Applied
        } else {
            WriteOutcome::Stale
        })
    }

    async fn delete_session(&self, id: Uuid) -> MongoResult<bool> {
        let result = self
            .collection()
            .await
            .delete_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        Ok(result.deleted_count > 0)
    }

    async fn purge_expired(&self, now: SystemTime) -> MongoResult<u64> {
        let result = self
            .collection()
            .await
            .delete_many(doc! {"expires_at": {"$lte": DateTime::from_system_time(now)}})
            .await
            .map_err(|source| MongoDaoError::PurgeExpired { source })?;
        Ok(result.deleted_count)
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(doc_id(id), id.to_string())
                .await
                .map_err(Into::into)
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_one(doc! {"code": code.as_str()}, code)
                .await
                .map_err(Into::into)
        })
    }

    fn replace_session(
        &self,
        session: SessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<WriteOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_session(id).await.map_err(Into::into) })
    }

    fn purge_expired(&self, now: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.purge_expired(now).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
