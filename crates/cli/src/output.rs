//! Plain-text and JSON rendering of command results.

use anyhow::Result;
use audiotag_core::backup::{BackupStatus, RecategorizeSummary};
use audiotag_core::models::{TagContent, TagRecord};
use audiotag_core::routing::RoutingDecision;
use audiotag_core::settings::Settings;
use audiotag_core::writer::WriteResult;
use serde::Serialize;

/// Prints `value` as pretty JSON, or as the text `render` produces.
pub fn emit<T: Serialize>(value: &T, json: bool, render: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", render(value));
    }
    Ok(())
}

pub fn record_line(record: &TagRecord) -> String {
    let body = match &record.content {
        TagContent::Audio { path } => format!("audio {}", path.display()),
        TagContent::SpokenText { text } => format!("text {:?}", text),
    };
    let mut line = format!("{}  {}  {}", record.tag_id, record.title, body);
    if !record.groups.is_empty() {
        line.push_str(&format!("  [{}]", record.groups.join(", ")));
    }
    line
}

pub fn records(records: &[TagRecord]) -> String {
    if records.is_empty() {
        return "no tags".to_string();
    }
    records
        .iter()
        .map(record_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decision(decision: &RoutingDecision) -> String {
    match decision {
        RoutingDecision::PlayKnownTag { record, auto_play } => {
            let mut out = record_line(record);
            if let Some(description) = &record.description {
                out.push_str(&format!("\n{}", description));
            }
            if !auto_play {
                out.push_str("\n(not played automatically)");
            }
            out
        }
        RoutingDecision::PromptUnknownTag { provisional_id } => format!(
            "unknown tag {}; provision it with `audiotag write`",
            provisional_id
        ),
        RoutingDecision::Ignore => "no tag id found, nothing to do".to_string(),
        RoutingDecision::Error { reason } => format!("error: {}", reason),
    }
}

pub fn write_result(result: &WriteResult) -> String {
    match result {
        WriteResult::Success { tag_id } => format!("tag {} written", tag_id),
        WriteResult::ContentSavedButTagWriteFailed { tag_id, reason } => format!(
            "content saved as {} but the tag write failed: {}\n\
             retry with `audiotag retry <image> {}`",
            tag_id, reason, tag_id
        ),
        WriteResult::Failure { reason } => format!("nothing saved: {}", reason),
    }
}

pub fn backup_status(status: &BackupStatus) -> String {
    format!(
        "{}% backed up ({} of {} files, {} of {} KB)\n{} audio file(s) need manual export",
        status.percentage,
        status.backed_up_files,
        status.total_files,
        status.backed_up_bytes / 1024,
        status.total_bytes / 1024,
        status.manual_export_required
    )
}

pub fn recategorize(summary: &RecategorizeSummary) -> String {
    format!(
        "examined {}, moved {}, missing {}, failed {}; small tier holds {} KB",
        summary.examined,
        summary.moved,
        summary.missing,
        summary.failed,
        summary.small_tier_bytes / 1024
    )
}

pub fn settings(settings: &Settings) -> String {
    format!(
        "theme: {:?}\ntext-to-speech feedback: {}",
        settings.theme,
        if settings.tts_enabled { "on" } else { "off" }
    )
}
