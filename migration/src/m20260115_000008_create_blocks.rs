use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per (contract, block) in every synced range, including
        // event-less blocks (NULL timestamp).
        manager
            .create_table(
                Table::create()
                    .table(Blocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Blocks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Blocks::ContractId).uuid().not_null())
                    .col(ColumnDef::new(Blocks::BlockNumber).big_integer().not_null())
                    .col(
                        ColumnDef::new(Blocks::Timestamp)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Blocks::Minted)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Blocks::Burned)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Blocks::TxCount).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Blocks::TotalTransferred)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Blocks::TotalFeesNative)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Blocks::TotalSupply).decimal_len(78, 0).null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_blocks_contract")
                            .from(Blocks::Table, Blocks::ContractId)
                            .to(Contracts::Table, Contracts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_blocks_contract_number")
                    .table(Blocks::Table)
                    .col(Blocks::ContractId)
                    .col(Blocks::BlockNumber)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Blocks::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Blocks {
    Table,
    Id,
    ContractId,
    BlockNumber,
    Timestamp,
    Minted,
    Burned,
    TxCount,
    TotalTransferred,
    TotalFeesNative,
    TotalSupply,
}

#[derive(Iden)]
enum Contracts {
    Table,
    Id,
}
