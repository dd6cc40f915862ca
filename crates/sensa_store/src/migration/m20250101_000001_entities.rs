use sea_orm_migration::prelude::*;

use crate::db::SensaEntities;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SensaEntities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SensaEntities::EntityType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SensaEntities::EntityId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SensaEntities::LastUpdate)
                            .date_time()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SensaEntities::Revision)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(SensaEntities::Snapshot).text().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_sensa_entities")
                            .col(SensaEntities::EntityType)
                            .col(SensaEntities::EntityId),
                    )
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(SensaEntities::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await
    }
}
