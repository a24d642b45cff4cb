/// Database model definitions.
pub mod models;
/// Session persistence and retrieval operations.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
