use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Stablecoins::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Stablecoins::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Stablecoins::CompanyId).integer().not_null())
                    .col(ColumnDef::new(Stablecoins::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Stablecoins::Ticker)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Stablecoins::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stablecoins_company")
                            .from(Stablecoins::Table, Stablecoins::CompanyId)
                            .to(Companies::Table, Companies::Id),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Stablecoins::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Stablecoins {
    Table,
    Id,
    CompanyId,
    Name,
    Ticker,
    CreatedAt,
}

#[derive(Iden)]
enum Companies {
    Table,
    Id,
}
