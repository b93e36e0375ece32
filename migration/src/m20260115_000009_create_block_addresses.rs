use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BlockAddresses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BlockAddresses::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BlockAddresses::ContractId).uuid().not_null())
                    .col(ColumnDef::new(BlockAddresses::BlockId).big_integer().not_null())
                    .col(
                        ColumnDef::new(BlockAddresses::Address)
                            .string_len(128)
                            .not_null(),
                    )
                    // 'sender' | 'receiver' | 'both'
                    .col(
                        ColumnDef::new(BlockAddresses::AddressType)
                            .string_len(8)
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_block_addresses_block")
                            .from(BlockAddresses::Table, BlockAddresses::BlockId)
                            .to(Blocks::Table, Blocks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_block_addresses_block_address")
                    .table(BlockAddresses::Table)
                    .col(BlockAddresses::BlockId)
                    .col(BlockAddresses::Address)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_block_addresses_contract")
                    .table(BlockAddresses::Table)
                    .col(BlockAddresses::ContractId)
                    .col(BlockAddresses::Address)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BlockAddresses::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum BlockAddresses {
    Table,
    Id,
    ContractId,
    BlockId,
    Address,
    AddressType,
}

#[derive(Iden)]
enum Blocks {
    Table,
    Id,
}
