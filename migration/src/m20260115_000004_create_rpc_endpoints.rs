use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RpcEndpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RpcEndpoints::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RpcEndpoints::Url)
                            .string_len(512)
                            .not_null()
                            .unique_key(),
                    )
                    // Fractional rates are allowed (0.167/s = 10/min)
                    .col(
                        ColumnDef::new(RpcEndpoints::MaxRequestsPerSecond)
                            .double()
                            .not_null()
                            .default(10.0),
                    )
                    .col(
                        ColumnDef::new(RpcEndpoints::MaxBlocksPerQuery)
                            .integer()
                            .not_null()
                            .default(2000),
                    )
                    .col(
                        ColumnDef::new(RpcEndpoints::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(RpcEndpoints::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RpcEndpoints::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum RpcEndpoints {
    Table,
    Id,
    Url,
    MaxRequestsPerSecond,
    MaxBlocksPerQuery,
    Active,
    CreatedAt,
}
