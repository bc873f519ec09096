//! Initial migration to create the roster cache schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_member_records(manager).await?;
        self.create_engagement_records(manager).await?;
        self.create_history_events(manager).await?;
        self.create_sync_meta(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncMeta::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(HistoryEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EngagementRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MemberRecords::Table).to_owned())
            .await?;
        Ok(())
    }
}

/// Append the nullable profile columns shared by member and engagement rows.
fn profile_columns(table: &mut TableCreateStatement) -> &mut TableCreateStatement {
    table
        .col(ColumnDef::new(Profile::FirstName).string().null())
        .col(ColumnDef::new(Profile::LastName).string().null())
        .col(ColumnDef::new(Profile::Sex).integer().null())
        .col(ColumnDef::new(Profile::City).string().null())
        .col(ColumnDef::new(Profile::Country).string().null())
        .col(ColumnDef::new(Profile::Birthdate).string().null())
        .col(ColumnDef::new(Profile::Platform).integer().null())
        .col(
            ColumnDef::new(Profile::LastSeen)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(ColumnDef::new(Profile::Deactivated).string().null())
        .col(ColumnDef::new(Profile::IsClosed).boolean().null())
        .col(ColumnDef::new(Profile::CanMessage).boolean().null())
}

/// Append provenance and tracking timestamps.
fn tracking_columns(table: &mut TableCreateStatement) -> &mut TableCreateStatement {
    table
        .col(
            ColumnDef::new(Tracking::Provenance)
                .string()
                .not_null()
                .default("member_list"),
        )
        .col(
            ColumnDef::new(Tracking::FirstSeenAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Tracking::LastActivityAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
}

impl Migration {
    async fn create_member_records(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        let mut table = Table::create();
        table
            .table(MemberRecords::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(MemberRecords::Id)
                    .string()
                    .not_null()
                    .primary_key(),
            )
            .col(ColumnDef::new(MemberRecords::Project).string().not_null())
            .col(ColumnDef::new(MemberRecords::Kind).string().not_null())
            .col(
                ColumnDef::new(MemberRecords::RemoteId)
                    .big_integer()
                    .not_null(),
            );
        profile_columns(&mut table);
        tracking_columns(&mut table);
        manager.create_table(table.to_owned()).await?;

        // Unique constraint on (project, kind, remote_id)
        manager
            .create_index(
                Index::create()
                    .name("idx_member_records_scope_remote")
                    .table(MemberRecords::Table)
                    .col(MemberRecords::Project)
                    .col(MemberRecords::Kind)
                    .col(MemberRecords::RemoteId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_member_records_last_activity")
                    .table(MemberRecords::Table)
                    .col(Tracking::LastActivityAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_engagement_records(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        let mut table = Table::create();
        table
            .table(EngagementRecords::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(EngagementRecords::Id)
                    .string()
                    .not_null()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(EngagementRecords::Project)
                    .string()
                    .not_null(),
            )
            .col(ColumnDef::new(EngagementRecords::Kind).string().not_null())
            .col(
                ColumnDef::new(EngagementRecords::RemoteId)
                    .big_integer()
                    .not_null(),
            );
        profile_columns(&mut table);
        table
            .col(
                ColumnDef::new(EngagementRecords::ItemIds)
                    .json()
                    .not_null()
                    .default(Expr::cust("'[]'")),
            )
            .col(
                ColumnDef::new(EngagementRecords::InteractionCount)
                    .integer()
                    .not_null()
                    .default(0),
            )
            .col(
                ColumnDef::new(EngagementRecords::LastInteractionAt)
                    .timestamp_with_time_zone()
                    .null(),
            );
        tracking_columns(&mut table);
        manager.create_table(table.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_engagement_records_scope_remote")
                    .table(EngagementRecords::Table)
                    .col(EngagementRecords::Project)
                    .col(EngagementRecords::Kind)
                    .col(EngagementRecords::RemoteId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index on interaction_count (descending) for top-engager queries
        manager
            .create_index(
                Index::create()
                    .name("idx_engagement_records_count")
                    .table(EngagementRecords::Table)
                    .col((EngagementRecords::InteractionCount, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_history_events(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(HistoryEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(HistoryEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(HistoryEvents::Project).string().not_null())
                    .col(ColumnDef::new(HistoryEvents::Event).string().not_null())
                    .col(ColumnDef::new(HistoryEvents::Source).string().not_null())
                    .col(
                        ColumnDef::new(HistoryEvents::RemoteId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(HistoryEvents::FirstName).string().null())
                    .col(ColumnDef::new(HistoryEvents::LastName).string().null())
                    .col(
                        ColumnDef::new(HistoryEvents::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Composite index on (project, event, occurred_at)
        manager
            .create_index(
                Index::create()
                    .name("idx_history_events_project_event")
                    .table(HistoryEvents::Table)
                    .col(HistoryEvents::Project)
                    .col(HistoryEvents::Event)
                    .col(HistoryEvents::OccurredAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_history_events_remote")
                    .table(HistoryEvents::Table)
                    .col(HistoryEvents::RemoteId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_meta(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncMeta::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncMeta::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncMeta::Project).string().not_null())
                    .col(ColumnDef::new(SyncMeta::Kind).string().not_null())
                    .col(
                        ColumnDef::new(SyncMeta::Count)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncMeta::LastUpdated)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_meta_project")
                    .table(SyncMeta::Table)
                    .col(SyncMeta::Project)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
#[sea_orm(iden = "member_records")]
enum MemberRecords {
    Table,
    Id,
    Project,
    Kind,
    RemoteId,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "engagement_records")]
enum EngagementRecords {
    Table,
    Id,
    Project,
    Kind,
    RemoteId,
    ItemIds,
    InteractionCount,
    LastInteractionAt,
}

#[derive(DeriveIden)]
enum Profile {
    FirstName,
    LastName,
    Sex,
    City,
    Country,
    Birthdate,
    Platform,
    LastSeen,
    Deactivated,
    IsClosed,
    CanMessage,
}

#[derive(DeriveIden)]
enum Tracking {
    Provenance,
    FirstSeenAt,
    LastActivityAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "history_events")]
enum HistoryEvents {
    Table,
    Id,
    Project,
    Event,
    Source,
    RemoteId,
    FirstName,
    LastName,
    OccurredAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "sync_meta")]
enum SyncMeta {
    Table,
    Id,
    Project,
    Kind,
    Count,
    LastUpdated,
}
