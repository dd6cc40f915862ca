pub mod config;
pub mod datastore;
mod db;
mod entities;
mod evolver;
mod ingest;
pub mod migration;
mod registry;
mod series;
pub mod store;

pub mod api {
    pub use sensa_core::api::*;
}

pub use config::{DatabaseConfig, LimitsConfig, PoolConfig, SensaConfig, ValidationMode};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use ingest::IngestStage;
pub use registry::type_table_name;
pub use sensa_core::*;
pub use store::SensaStore;
