use audiotag_core::app::AudioTag;
use audiotag_core::config::AppConfig;
use audiotag_core::models::{ScanOrigin, TagContent};
use audiotag_core::playback::LogPlayback;
use audiotag_core::routing::RoutingDecision;
use audiotag_core::store::TagStore;
use audiotag_core::writer::{PendingContent, WriteResult};
use cli::commands;
use nfc::ImageTag;
use std::fs;
use tempfile::tempdir;

async fn open_app(root: &std::path::Path) -> AudioTag {
    let mut cfg = AppConfig::default();
    cfg.database.path = root.join("tags.db").to_string_lossy().into_owned();
    cfg.storage.root = root.join("data");
    cfg.settings.path = root.join("settings.toml");
    cfg.playback.settle_delay_ms = 0;
    AudioTag::open(cfg).await.unwrap()
}

#[tokio::test]
async fn blank_tag_provision_scan_and_reopen() {
    let temp = tempdir().unwrap();
    let app = open_app(temp.path()).await;
    let image = temp.path().join("tags/kitchen.json");

    let blank = commands::new_tag(&image, Some("04a1b2c3")).await.unwrap();
    assert_eq!(blank.serial, "04A1B2C3");
    assert!(commands::new_tag(&image, None).await.is_err());

    let first = commands::scan(&app, &image, ScanOrigin::ForegroundScan, &LogPlayback)
        .await
        .unwrap();
    assert_eq!(
        first,
        RoutingDecision::PromptUnknownTag {
            provisional_id: "04A1B2C3".into()
        }
    );

    let written = commands::write(
        &app,
        &image,
        PendingContent::text("Milk and eggs")
            .with_title("Shopping List")
            .with_groups(vec!["kitchen".into()]),
    )
    .await
    .unwrap();
    assert_eq!(
        written,
        WriteResult::Success {
            tag_id: "04A1B2C3".into()
        }
    );
    let stored = ImageTag::open(&image).await.unwrap().image().await;
    assert!(stored.formatted);
    assert!(stored.message.is_some());

    match commands::scan(&app, &image, ScanOrigin::ColdLaunch, &LogPlayback)
        .await
        .unwrap()
    {
        RoutingDecision::PlayKnownTag { record, auto_play } => {
            assert!(auto_play);
            assert_eq!(record.title, "Shopping List");
        }
        other => panic!("unexpected {:?}", other),
    }
    match commands::open(&app, "04A1B2C3", &LogPlayback).await.unwrap() {
        RoutingDecision::PlayKnownTag { auto_play, .. } => assert!(!auto_play),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn read_only_tag_keeps_content_until_retry() {
    let temp = tempdir().unwrap();
    let app = open_app(temp.path()).await;
    let image = temp.path().join("locked.json");
    commands::new_tag(&image, Some("0411223344")).await.unwrap();

    commands::write(&app, &image, PendingContent::text("first"))
        .await
        .unwrap();
    let mut raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&image).unwrap()).unwrap();
    raw["writable"] = serde_json::Value::Bool(false);
    fs::write(&image, serde_json::to_string(&raw).unwrap()).unwrap();

    let result = commands::write(&app, &image, PendingContent::text("second"))
        .await
        .unwrap();
    assert!(matches!(
        &result,
        WriteResult::ContentSavedButTagWriteFailed { tag_id, .. } if tag_id == "0411223344"
    ));
    let saved = app.store().get("0411223344").await.unwrap().map(|r| r.content);
    assert_eq!(
        saved,
        Some(TagContent::SpokenText {
            text: "second".into()
        })
    );

    raw["writable"] = serde_json::Value::Bool(true);
    fs::write(&image, serde_json::to_string(&raw).unwrap()).unwrap();
    let retried = commands::retry(&app, &image, "0411223344").await.unwrap();
    assert!(retried.is_success());
    assert_eq!(commands::list(&app, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn audio_tags_are_tiered_and_editable() {
    let temp = tempdir().unwrap();
    let app = open_app(temp.path()).await;
    let recording = temp.path().join("data/temp/memo.m4a");
    fs::write(&recording, vec![7u8; 4096]).unwrap();
    let image = temp.path().join("door.json");
    commands::new_tag(&image, Some("04BEEF")).await.unwrap();

    let result = commands::write(&app, &image, PendingContent::audio(&recording))
        .await
        .unwrap();
    assert!(result.is_success());

    let status = app.backup().status().await.unwrap();
    assert_eq!(status.total_files, 1);
    assert_eq!(status.backed_up_files, 1);
    assert_eq!(status.manual_export_required, 0);
    assert_eq!(status.percentage, 100);
    assert!(temp.path().join("data/audio_small/memo.m4a").exists());

    let edited = commands::edit(
        &app,
        "04BEEF",
        "Front door",
        Some("Reminder for keys"),
        &["hall".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(edited.title, "Front door");
    assert_eq!(commands::groups(&app).await.unwrap(), vec!["hall"]);
    assert_eq!(commands::list(&app, Some("hall")).await.unwrap().len(), 1);
    assert!(commands::list(&app, Some("kitchen")).await.unwrap().is_empty());

    assert!(commands::delete(&app, "04BEEF").await.unwrap());
    assert!(!commands::delete(&app, "04BEEF").await.unwrap());
    assert!(commands::edit(&app, "04BEEF", "x", None, &[]).await.is_err());
}
