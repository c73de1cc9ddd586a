//! `SQLite` database for the registry engine.

use registry_core::db::DatabaseError;
use tracing::debug;

use super::txn::StoreTxn;

registry_core::define_database!(RegistryDatabase, "Registry database migrations complete");

impl RegistryDatabase {
    /// Begin the single transaction a command runs in.
    pub async fn begin(&self) -> Result<StoreTxn, DatabaseError> {
        let tx = self.pool().begin().await?;
        debug!("Store transaction started");
        Ok(StoreTxn::new(tx))
    }
}
