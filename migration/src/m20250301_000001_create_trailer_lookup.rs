use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TrailerLookup::Table)
                    .if_not_exists()
                    .col(string(TrailerLookup::QueryKey).primary_key())
                    .col(string(TrailerLookup::Title))
                    .col(integer_null(TrailerLookup::Year))
                    .col(integer_null(TrailerLookup::TmdbId))
                    .col(string_null(TrailerLookup::YoutubeKey))
                    .col(string_null(TrailerLookup::Source))
                    .col(big_integer(TrailerLookup::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trailer_lookup_updated_at")
                    .table(TrailerLookup::Table)
                    .col(TrailerLookup::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(TrailerLookup::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum TrailerLookup {
    Table,
    QueryKey,
    Title,
    Year,
    TmdbId,
    YoutubeKey,
    Source,
    UpdatedAt,
}
