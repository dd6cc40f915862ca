use sea_orm::sea_query;
use sea_orm_migration::prelude::Iden;

pub const TYPE_TABLE_PREFIX: &str = "ts_";

#[derive(Iden, Clone, Copy)]
pub enum SensaEntities {
    Table,
    EntityType,
    EntityId,
    LastUpdate,
    Revision,
    Snapshot,
}

/// Implicit columns carried by every type table.
#[derive(Iden, Clone, Copy)]
pub enum TypeTableColumns {
    Id,
    EntityId,
    Timestamp,
}
