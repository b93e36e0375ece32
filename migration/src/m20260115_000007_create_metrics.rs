use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Time-series rollups: resolution 86400 (daily) plus 864000 /
        // 8640000 / 86400000 derived buckets. Supply and volume columns
        // hold integer token base units at full precision.
        manager
            .create_table(
                Table::create()
                    .table(Metrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Metrics::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Metrics::ContractId).uuid().not_null())
                    .col(
                        ColumnDef::new(Metrics::PeriodStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Metrics::Resolution).integer().not_null())
                    .col(ColumnDef::new(Metrics::TotalSupply).decimal_len(78, 0).null())
                    .col(
                        ColumnDef::new(Metrics::Minted)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::Burned)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::TxCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::UniqueSenders)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::UniqueReceivers)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::TotalTransferred)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Metrics::TotalFeesNative)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    // Reserved for a future price oracle, always 0
                    .col(
                        ColumnDef::new(Metrics::TotalFeesUsd)
                            .decimal_len(78, 0)
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Metrics::StartBlock).big_integer().null())
                    .col(ColumnDef::new(Metrics::EndBlock).big_integer().null())
                    .col(
                        ColumnDef::new(Metrics::CreatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .col(
                        ColumnDef::new(Metrics::UpdatedAt)
                            .timestamp_with_time_zone()
                            .default(SimpleExpr::Keyword(Keyword::CurrentTimestamp)),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_metrics_contract")
                            .from(Metrics::Table, Metrics::ContractId)
                            .to(Contracts::Table, Contracts::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_metrics_contract_period_resolution")
                    .table(Metrics::Table)
                    .col(Metrics::ContractId)
                    .col(Metrics::PeriodStart)
                    .col(Metrics::Resolution)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Read path: (contract, resolution, period range)
        manager
            .create_index(
                Index::create()
                    .name("idx_metrics_resolution_period")
                    .table(Metrics::Table)
                    .col(Metrics::Resolution)
                    .col(Metrics::PeriodStart)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Metrics::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Metrics {
    Table,
    Id,
    ContractId,
    PeriodStart,
    Resolution,
    TotalSupply,
    Minted,
    Burned,
    TxCount,
    UniqueSenders,
    UniqueReceivers,
    TotalTransferred,
    TotalFeesNative,
    TotalFeesUsd,
    StartBlock,
    EndBlock,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Contracts {
    Table,
    Id,
}
