use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contracts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contracts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Contracts::StablecoinId).integer().not_null())
                    .col(ColumnDef::new(Contracts::NetworkId).integer().not_null())
                    .col(ColumnDef::new(Contracts::Address).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Contracts::Decimals)
                            .integer()
                            .not_null()
                            .default(18),
                    )
                    .col(ColumnDef::new(Contracts::RpcEndpointId).integer().not_null())
                    .col(ColumnDef::new(Contracts::CreationBlock).big_integer().null())
                    .col(
                        ColumnDef::new(Contracts::CreationTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Contracts::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Contracts::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .col(
                        ColumnDef::new(Contracts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contracts_stablecoin")
                            .from(Contracts::Table, Contracts::StablecoinId)
                            .to(Stablecoins::Table, Stablecoins::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contracts_network")
                            .from(Contracts::Table, Contracts::NetworkId)
                            .to(Networks::Table, Networks::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contracts_rpc_endpoint")
                            .from(Contracts::Table, Contracts::RpcEndpointId)
                            .to(RpcEndpoints::Table, RpcEndpoints::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contracts_network_address")
                    .table(Contracts::Table)
                    .col(Contracts::NetworkId)
                    .col(Contracts::Address)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Contracts::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Contracts {
    Table,
    Id,
    StablecoinId,
    NetworkId,
    Address,
    Decimals,
    RpcEndpointId,
    CreationBlock,
    CreationTime,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Stablecoins {
    Table,
    Id,
}

#[derive(Iden)]
enum Networks {
    Table,
    Id,
}

#[derive(Iden)]
enum RpcEndpoints {
    Table,
    Id,
}
