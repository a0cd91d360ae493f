//! Integration tests for MetadataStore implementations.
//!
//! Each test runs against SQLite and, when Docker is available, PostgreSQL.

mod common;

use common::fixtures::sha256_hash;
use common::{TestMetadata, run_metadata_test_both};
use hodie_core::{
    ClientId, ContentHash, CounterKind, PeriodKind, UploadCategory, UploadRecord, UploadStatus,
};
use hodie_metadata::repos::{ClientRepo, UploadRecordRepo, UsageRepo};
use hodie_metadata::{ClientRow, MetadataError, MetadataStore, UploadRecordRow, UsageKey};
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::datetime;
use uuid::Uuid;

const NOW: OffsetDateTime = datetime!(2025-05-14 12:00 UTC);

async fn insert_client(store: &Arc<dyn MetadataStore>, subject: &str) -> ClientId {
    let seq = store.next_client_sequence("HDL").await.unwrap();
    let id = ClientId::from_sequence("HDL", seq as u64).unwrap();
    store
        .insert_client(&ClientRow::new_client(&id, subject, None, NOW))
        .await
        .unwrap();
    id
}

fn record(client_id: &ClientId, data: &[u8], at: OffsetDateTime) -> UploadRecord {
    let content_hash = ContentHash::compute(data);
    UploadRecord {
        upload_id: Uuid::new_v4(),
        client_id: client_id.clone(),
        object_key: UploadRecord::object_key_for(client_id, &content_hash),
        content_hash,
        file_name: "labs.txt".to_string(),
        content_type: "text/plain".to_string(),
        category: UploadCategory::LabResults,
        size_bytes: data.len() as u64,
        status: UploadStatus::Processing,
        error_detail: None,
        uploaded_at: at,
        updated_at: at,
    }
}

#[tokio::test]
async fn test_client_sequence_and_uniqueness() {
    run_metadata_test_both(|store| async move {
        let a = insert_client(&store, "auth0|a").await;
        let b = insert_client(&store, "auth0|b").await;
        assert_eq!(a.as_str(), "HDL-00001");
        assert_eq!(b.as_str(), "HDL-00002");

        // A second client for the same subject is refused.
        let seq = store.next_client_sequence("HDL").await.unwrap();
        let c = ClientId::from_sequence("HDL", seq as u64).unwrap();
        let err = store
            .insert_client(&ClientRow::new_client(&c, "auth0|a", None, NOW))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));

        // The burned sequence value is not reused.
        let d = insert_client(&store, "auth0|d").await;
        assert_eq!(d.as_str(), "HDL-00004");

        // Prefixes have independent sequences.
        assert_eq!(store.next_client_sequence("TST").await.unwrap(), 1);

        let row = store.get_client_by_subject("auth0|b").await.unwrap().unwrap();
        assert_eq!(row.client_id, b.as_str());
        assert!(store.get_client_by_subject("auth0|z").await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_client_updates() {
    run_metadata_test_both(|store| async move {
        let id = insert_client(&store, "auth0|u").await;
        let later = NOW + time::Duration::hours(1);

        let row = store.update_client_tier(id.as_str(), "premium", later).await.unwrap();
        assert_eq!(row.tier, "premium");
        assert_eq!(row.updated_at, later);

        let row = store
            .update_client_email(id.as_str(), Some("u@example.com"), later)
            .await
            .unwrap();
        assert_eq!(row.email.as_deref(), Some("u@example.com"));

        assert_eq!(store.increment_uploads_made(id.as_str(), later).await.unwrap(), 1);
        assert_eq!(store.increment_uploads_made(id.as_str(), later).await.unwrap(), 2);

        let first = store.deactivate_client(id.as_str(), later).await.unwrap();
        let second = store
            .deactivate_client(id.as_str(), later + time::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(first.deactivated_at, Some(later));
        assert_eq!(second.deactivated_at, Some(later));

        let err = store
            .update_client_tier("HDL-09999", "pro", later)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_usage_counters_upsert_per_period() {
    run_metadata_test_both(|store| async move {
        let id = insert_client(&store, "auth0|usage").await;
        let today = UsageKey::new(
            &id,
            CounterKind::AiMessages,
            PeriodKind::Daily,
            datetime!(2025-05-14 00:00 UTC),
        );
        let tomorrow = UsageKey::new(
            &id,
            CounterKind::AiMessages,
            PeriodKind::Daily,
            datetime!(2025-05-15 00:00 UTC),
        );

        assert!(store.get_usage(&today).await.unwrap().is_none());

        let row = store.increment_usage(&today, 1, 100, NOW).await.unwrap();
        assert_eq!((row.count, row.tokens_used), (1, 100));
        let row = store.increment_usage(&today, 1, 50, NOW).await.unwrap();
        assert_eq!((row.count, row.tokens_used), (2, 150));

        store.increment_usage(&tomorrow, 1, 0, NOW).await.unwrap();
        assert_eq!(store.get_usage(&today).await.unwrap().unwrap().count, 2);
        assert_eq!(store.get_usage(&tomorrow).await.unwrap().unwrap().count, 1);

        let all = store.list_usage(id.as_str()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].period_start, tomorrow.period_start);
    })
    .await;
}

#[tokio::test]
async fn test_upload_record_lifecycle() {
    run_metadata_test_both(|store| async move {
        let id = insert_client(&store, "auth0|up").await;
        let first = record(&id, b"glucose 95", NOW);
        store
            .create_upload_record(&UploadRecordRow::from_record(&first))
            .await
            .unwrap();

        // Same content while the first is active.
        let dup = record(&id, b"glucose 95", NOW);
        let err = store
            .create_upload_record(&UploadRecordRow::from_record(&dup))
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::AlreadyExists(_)));

        let hash = sha256_hash(b"glucose 95");
        let found = store
            .find_active_upload_by_hash(id.as_str(), &hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.upload_id, first.upload_id);

        // Exactly one transition out of processing wins.
        assert!(
            store
                .update_upload_status(first.upload_id, "processing", "failed", Some("boom"), NOW)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_upload_status(first.upload_id, "processing", "completed", None, NOW)
                .await
                .unwrap()
        );
        let row = store.get_upload_record(first.upload_id).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.error_detail.as_deref(), Some("boom"));

        // A failed record no longer blocks the same content.
        assert!(
            store
                .find_active_upload_by_hash(id.as_str(), &hash)
                .await
                .unwrap()
                .is_none()
        );
        store
            .create_upload_record(&UploadRecordRow::from_record(&dup))
            .await
            .unwrap();

        let later = record(&id, b"hba1c 5.4", NOW + time::Duration::minutes(1));
        store
            .create_upload_record(&UploadRecordRow::from_record(&later))
            .await
            .unwrap();
        let listed = store.list_upload_records(id.as_str(), 10).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].upload_id, later.upload_id);
        assert_eq!(store.list_upload_records(id.as_str(), 1).await.unwrap().len(), 1);

        let restored = listed[0].clone().into_record().unwrap();
        assert_eq!(restored.category, UploadCategory::LabResults);
        assert_eq!(restored.content_hash, later.content_hash);
    })
    .await;
}

#[tokio::test]
async fn test_sqlite_health_check_and_pool() {
    let metadata = TestMetadata::new().await.expect("Failed to create metadata");
    metadata.store().health_check().await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clients")
        .fetch_one(metadata.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}
