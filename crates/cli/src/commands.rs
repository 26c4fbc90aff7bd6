use anyhow::{Context, Result};
use audiotag_core::app::AudioTag;
use audiotag_core::models::{ScanEvent, ScanOrigin, TagRecord};
use audiotag_core::playback::PlaybackSink;
use audiotag_core::routing::RoutingDecision;
use audiotag_core::store::{self, TagStore};
use audiotag_core::writer::{PendingContent, WriteResult};
use nfc::{ImageTag, TagImage};
use std::path::Path;
use tracing::info;

/// Creates a factory-fresh tag image. Without `serial` one is generated.
pub async fn new_tag(path: &Path, serial: Option<&str>) -> Result<TagImage> {
    if path.exists() {
        anyhow::bail!("tag image {} already exists", path.display());
    }
    let serial = match serial {
        Some(s) => s.to_string(),
        None => generate_serial(),
    };
    let image = TagImage::blank(&serial)?;
    ImageTag::create(path, image.clone())
        .await
        .with_context(|| format!("creating tag image {}", path.display()))?;
    info!(path = %path.display(), serial = %image.serial, "blank tag created");
    Ok(image)
}

/// 7-byte serial with the NXP manufacturer byte, taken from the clock.
fn generate_serial() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .to_be_bytes();
    let mut serial = vec![0x04];
    serial.extend_from_slice(&nanos[2..]);
    nfc::codec::hardware_id_of(&serial)
}

async fn open_image(path: &Path) -> Result<ImageTag> {
    ImageTag::open(path)
        .await
        .with_context(|| format!("opening tag image {}", path.display()))
}

pub async fn scan(
    app: &AudioTag,
    image: &Path,
    origin: ScanOrigin,
    playback: &dyn PlaybackSink,
) -> Result<RoutingDecision> {
    let tag = open_image(image).await?;
    let event = app.scan_event(&tag, origin).await;
    route(app, event, playback).await
}

/// Opens a known tag the way the tag list does.
pub async fn open(
    app: &AudioTag,
    tag_id: &str,
    playback: &dyn PlaybackSink,
) -> Result<RoutingDecision> {
    route(app, ScanEvent::navigate(tag_id), playback).await
}

async fn route(
    app: &AudioTag,
    event: ScanEvent,
    playback: &dyn PlaybackSink,
) -> Result<RoutingDecision> {
    let mut machine = app.routing_machine();
    let decision = machine.route(&event).await;
    if let RoutingDecision::PlayKnownTag {
        record,
        auto_play: true,
    } = &decision
    {
        tokio::time::sleep(app.config().playback.settle_delay()).await;
        machine.play(playback, record).await?;
    }
    Ok(decision)
}

pub async fn write(app: &AudioTag, image: &Path, pending: PendingContent) -> Result<WriteResult> {
    let tag = open_image(image).await?;
    Ok(app.writer().write(&tag, pending).await)
}

pub async fn retry(app: &AudioTag, image: &Path, tag_id: &str) -> Result<WriteResult> {
    let tag = open_image(image).await?;
    Ok(app.writer().retry(&tag, tag_id).await)
}

pub async fn list(app: &AudioTag, group: Option<&str>) -> Result<Vec<TagRecord>> {
    Ok(store::list_in_group(app.store(), group).await?)
}

pub async fn groups(app: &AudioTag) -> Result<Vec<String>> {
    Ok(store::distinct_groups(app.store()).await?)
}

pub async fn edit(
    app: &AudioTag,
    tag_id: &str,
    title: &str,
    description: Option<&str>,
    groups: &[String],
) -> Result<TagRecord> {
    store::update_metadata(app.store(), tag_id, title, description, groups)
        .await?
        .with_context(|| format!("no tag with id {}", tag_id))
}

pub async fn delete(app: &AudioTag, tag_id: &str) -> Result<bool> {
    let removed = app.store().delete(tag_id).await?;
    if removed {
        info!(tag_id, "tag deleted");
    }
    Ok(removed)
}
