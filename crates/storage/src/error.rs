use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bundle collision: {bundle_id}")]
    BundleCollision { bundle_id: String },

    #[error("tenant already registered: {tenant}")]
    TenantAlreadyRegistered { tenant: String },

    #[error("core error: {0}")]
    Core(#[from] hookchain_core::CoreError),
}
