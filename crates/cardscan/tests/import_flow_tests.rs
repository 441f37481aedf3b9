//! End-to-end import flows: submit scans, process them, review and confirm.

mod common;

use std::sync::Arc;

use cardscan::worker::{ItemSelection, ItemStatus, JobStatus, ProcessorConfig};
use cardscan::{CardscanError, ErrorCode, Language};

use common::*;

fn charizard_catalog() -> Arc<MemoryCatalog> {
    Arc::new(MemoryCatalog::new(vec![
        card("swsh4-25", "Charizard", "swsh4", "25"),
        card("sv3-6", "Slowpoke", "sv3", "6"),
    ]))
}

#[tokio::test]
async fn confident_scan_is_identified_and_confirmed_into_collection() {
    let harness = TestHarness::new();
    let catalog = charizard_catalog();
    let service = harness.service_with_catalog(catalog.clone());

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![confident_english_scan()],
        )
        .await
        .unwrap();
    assert_eq!(detail.job.status, JobStatus::Pending);
    assert_eq!(detail.items.len(), 1);

    let summary = harness
        .processor(None, ProcessorConfig::default())
        .with_catalog(catalog)
        .process_pending()
        .await
        .unwrap();
    assert_eq!(summary.identified, 1);
    assert!(summary.job_completed);

    let detail = service.get_job(&detail.job.id).unwrap();
    assert_eq!(detail.job.status, JobStatus::Completed);
    let item = &detail.items[0];
    assert_eq!(item.status, ItemStatus::Identified);
    assert_eq!(item.card_id.as_deref(), Some("swsh4-25"));
    assert_eq!(item.source.as_deref(), Some("catalog"));

    let outcome = service.confirm_items(&detail.job.id, &[]).await.unwrap();
    assert_eq!(outcome.confirmed, vec![item.id.clone()]);
    assert!(outcome.skipped.is_empty());

    let cards = harness.sink.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].card_id, "swsh4-25");

    let detail = service.get_job(&detail.job.id).unwrap();
    assert_eq!(detail.items[0].status, ItemStatus::Confirmed);
}

#[tokio::test]
async fn confident_scan_skips_the_chain_without_any_service() {
    let harness = TestHarness::new();
    let service = harness.service();

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![confident_english_scan()],
        )
        .await
        .unwrap();
    harness
        .processor(None, ProcessorConfig::default())
        .process_pending()
        .await
        .unwrap();

    let item = &service.get_job(&detail.job.id).unwrap().items[0];
    assert_eq!(item.status, ItemStatus::Identified);
    assert_eq!(item.source.as_deref(), Some("skipped"));
    assert_eq!(item.card_name.as_deref(), Some("Charizard"));
    assert_eq!(item.card_number.as_deref(), Some("25"));
    assert!(item.card_id.is_none());

    // Nothing to add to the collection without a card id.
    let outcome = service.confirm_items(&detail.job.id, &[]).await.unwrap();
    assert!(outcome.confirmed.is_empty());
    assert_eq!(outcome.skipped, vec![item.id.clone()]);
    assert!(harness.sink.cards().is_empty());
}

#[tokio::test]
async fn user_selection_is_reused_for_the_same_text() {
    let harness = TestHarness::new();
    let catalog = charizard_catalog();
    let service = harness.service_with_catalog(catalog.clone());

    let first = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::Ja,
            vec![japanese_scan("ヤドン")],
        )
        .await
        .unwrap();
    harness
        .processor(None, ProcessorConfig::default())
        .with_catalog(catalog.clone())
        .process_pending()
        .await
        .unwrap();

    let failed = &service.get_job(&first.job.id).unwrap().items[0];
    assert_eq!(failed.status, ItemStatus::Failed);
    assert_eq!(failed.error_code, Some(ErrorCode::ConfigurationError));

    let selected = service
        .update_item_selection(
            &failed.id,
            ItemSelection {
                card_id: "sv3-6".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(selected.status, ItemStatus::Identified);
    assert_eq!(selected.card_name.as_deref(), Some("Slowpoke"));
    assert_eq!(selected.source.as_deref(), Some("user"));

    let second = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::Ja,
            vec![japanese_scan("ヤドン")],
        )
        .await
        .unwrap();
    harness
        .processor(None, ProcessorConfig::default())
        .with_catalog(catalog)
        .process_pending()
        .await
        .unwrap();

    let item = &service.get_job(&second.job.id).unwrap().items[0];
    assert_eq!(item.status, ItemStatus::Identified);
    assert_eq!(item.card_id.as_deref(), Some("sv3-6"));
    assert_eq!(item.source.as_deref(), Some("cache"));
}

/// Runs one job with a single Japanese scan and returns its item.
async fn import_one(
    harness: &TestHarness,
    service: &cardscan::ImportService,
    catalog: Arc<MemoryCatalog>,
    text: &str,
) -> cardscan::worker::ImportItem {
    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::Ja,
            vec![japanese_scan(text)],
        )
        .await
        .unwrap();
    harness
        .processor(None, ProcessorConfig::default())
        .with_catalog(catalog)
        .process_pending()
        .await
        .unwrap();
    service.get_job(&detail.job.id).unwrap().items.remove(0)
}

#[tokio::test]
async fn user_selection_overrides_dictionary_text() {
    let harness = TestHarness::new();
    let catalog = Arc::new(MemoryCatalog::new(vec![
        card("swsh4-25", "Charizard", "swsh4", "25"),
        card("sv3-125", "Charizard ex", "sv3", "125"),
    ]));
    let service = harness.service_with_catalog(catalog.clone());

    let first = import_one(&harness, &service, catalog.clone(), "リザードン").await;
    assert_eq!(first.status, ItemStatus::Identified);
    assert_eq!(first.card_id.as_deref(), Some("swsh4-25"));
    assert_eq!(first.source.as_deref(), Some("static"));

    service
        .update_item_selection(
            &first.id,
            ItemSelection {
                card_id: "sv3-125".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let second = import_one(&harness, &service, catalog, "リザードン").await;
    assert_eq!(second.status, ItemStatus::Identified);
    assert_eq!(second.card_id.as_deref(), Some("sv3-125"));
    assert_eq!(second.card_name.as_deref(), Some("Charizard ex"));
    assert_eq!(second.source.as_deref(), Some("cache"));
}

#[tokio::test]
async fn selection_on_letterless_text_is_not_reused() {
    let harness = TestHarness::new();
    let catalog = charizard_catalog();
    let service = harness.service_with_catalog(catalog.clone());

    let first = import_one(&harness, &service, catalog.clone(), "025/185").await;
    service
        .update_item_selection(
            &first.id,
            ItemSelection {
                card_id: "swsh4-25".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(harness.cache.get_identity("025/185").unwrap().is_none());

    let second = import_one(&harness, &service, catalog, "999/999\n---").await;
    assert!(second.card_id.is_none());
    assert_ne!(second.source.as_deref(), Some("cache"));
}

#[tokio::test]
async fn rejected_scans_fail_alone_and_images_are_removed_with_the_job() {
    let harness = TestHarness::new();
    let service = harness.service();

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![
                ScanBuilder::new()
                    .language(Language::En)
                    .text("Charizard\nHP 170\n025/185\nSWSH4")
                    .image(&[0xFF, 0xD8, 0xFF, 0xE0], "jpg")
                    .build(),
                ScanBuilder::new().language(Language::En).build(),
                ScanBuilder::new().image(&[1, 2, 3], "exe").build(),
            ],
        )
        .await
        .unwrap();

    assert_eq!(detail.job.status, JobStatus::Pending);
    assert_eq!(detail.items.len(), 3);
    let statuses: Vec<ItemStatus> = detail.items.iter().map(|i| i.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Pending, ItemStatus::Failed, ItemStatus::Failed]
    );
    assert!(detail.items[1..]
        .iter()
        .all(|i| i.error_code == Some(ErrorCode::InvalidInput)));
    assert_eq!(harness.stored_image_count(), 1);

    service.delete_job(&detail.job.id).await.unwrap();
    assert_eq!(harness.stored_image_count(), 0);
    assert!(matches!(
        service.get_job(&detail.job.id),
        Err(CardscanError::NotFound { .. })
    ));
}

#[tokio::test]
async fn job_with_only_rejected_scans_is_failed() {
    let harness = TestHarness::new();
    let service = harness.service();

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::Ja,
            vec![ScanBuilder::new().text("   ").build()],
        )
        .await
        .unwrap();

    assert_eq!(detail.job.status, JobStatus::Failed);
    assert!(detail.job.error.is_some());

    // A failed job does not block the next submission.
    service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![confident_english_scan()],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn items_can_be_added_until_the_job_completes() {
    let harness = TestHarness::new();
    let service = harness.service();

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![confident_english_scan()],
        )
        .await
        .unwrap();
    service
        .add_item(&detail.job.id, confident_english_scan())
        .await
        .unwrap();
    assert_eq!(service.get_job(&detail.job.id).unwrap().job.item_count, 2);

    let summary = harness
        .processor(None, ProcessorConfig::default())
        .process_pending()
        .await
        .unwrap();
    assert_eq!(summary.identified, 2);

    let err = service
        .add_item(&detail.job.id, confident_english_scan())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn foil_hint_reaches_the_confirmed_card() {
    let harness = TestHarness::new();
    let catalog = charizard_catalog();
    let service = harness.service_with_catalog(catalog.clone());

    let detail = service
        .create_job(
            cardscan::Game::Pokemon,
            Language::En,
            vec![ScanBuilder::new()
                .language(Language::En)
                .text("Charizard\nHP 170\n025/185\nSWSH4")
                .foil_hint(true, 0.9)
                .build()],
        )
        .await
        .unwrap();
    harness
        .processor(None, ProcessorConfig::default())
        .with_catalog(catalog)
        .process_pending()
        .await
        .unwrap();

    let item = &service.get_job(&detail.job.id).unwrap().items[0];
    assert!(item.is_foil);
    assert!(item.image_hints.is_some());

    service.confirm_items(&detail.job.id, &[]).await.unwrap();
    assert!(harness.sink.cards()[0].is_foil);
}
