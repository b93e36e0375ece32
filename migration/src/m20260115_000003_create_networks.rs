use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Networks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Networks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Networks::Name)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    // 'evm' | 'tron' | 'solana'
                    .col(ColumnDef::new(Networks::ChainType).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Networks::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Networks::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Networks {
    Table,
    Id,
    Name,
    ChainType,
    CreatedAt,
}
