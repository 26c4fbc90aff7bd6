use anyhow::Result;
use audiotag_core::app::AudioTag;
use audiotag_core::config;
use audiotag_core::models::ScanOrigin;
use audiotag_core::playback::LogPlayback;
use audiotag_core::routing::RoutingDecision;
use audiotag_core::settings::ThemeOption;
use audiotag_core::writer::{PendingContent, WriteResult};
use clap::{ArgGroup, Parser, Subcommand};
use cli::commands;
use cli::output::{self, emit};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;
    let json = cli.json;

    let command = match cli.command {
        // Blank tags need no database.
        Commands::Tag {
            command: TagCommands::New { path, serial },
        } => {
            let image = commands::new_tag(&path, serial.as_deref()).await?;
            return emit(&image, json, |i| {
                format!("blank tag {} at {}", i.serial, path.display())
            });
        }
        Commands::App(command) => command,
    };

    let app = AudioTag::open(cfg).await?;
    match command {
        AppCommands::Scan { image, cold } => {
            let origin = if cold {
                ScanOrigin::ColdLaunch
            } else {
                ScanOrigin::ForegroundScan
            };
            let decision = commands::scan(&app, &image, origin, &LogPlayback).await?;
            emit(&decision, json, output::decision)?;
            fail_on_error(&decision)
        }
        AppCommands::Open { tag_id } => {
            let decision = commands::open(&app, &tag_id, &LogPlayback).await?;
            emit(&decision, json, output::decision)?;
            fail_on_error(&decision)
        }
        AppCommands::Write {
            image,
            audio,
            text,
            title,
            description,
            groups,
        } => {
            let mut pending = match (audio, text) {
                (Some(path), _) => PendingContent::audio(path),
                (None, Some(text)) => PendingContent::text(text),
                (None, None) => anyhow::bail!("either --audio or --text is required"),
            };
            if let Some(title) = title {
                pending = pending.with_title(title);
            }
            if let Some(description) = description {
                pending = pending.with_description(description);
            }
            if !groups.is_empty() {
                pending = pending.with_groups(groups);
            }
            let result = commands::write(&app, &image, pending).await?;
            emit(&result, json, output::write_result)?;
            fail_unless_written(&result)
        }
        AppCommands::Retry { image, tag_id } => {
            let result = commands::retry(&app, &image, &tag_id).await?;
            emit(&result, json, output::write_result)?;
            fail_unless_written(&result)
        }
        AppCommands::List { group, groups } => {
            if groups {
                let names = commands::groups(&app).await?;
                emit(&names, json, |n| n.join("\n"))
            } else {
                let records = commands::list(&app, group.as_deref()).await?;
                emit(&records, json, |r| output::records(r))
            }
        }
        AppCommands::Edit {
            tag_id,
            title,
            description,
            groups,
        } => {
            let record =
                commands::edit(&app, &tag_id, &title, description.as_deref(), &groups).await?;
            emit(&record, json, output::record_line)
        }
        AppCommands::Delete { tag_id } => {
            let removed = commands::delete(&app, &tag_id).await?;
            if !removed {
                anyhow::bail!("no tag with id {}", tag_id);
            }
            emit(&serde_json::json!({ "deleted": tag_id }), json, |_| {
                format!("deleted {}", tag_id)
            })
        }
        AppCommands::Backup { command } => match command {
            BackupCommands::Status => {
                let status = app.backup().status().await?;
                emit(&status, json, output::backup_status)
            }
            BackupCommands::Recategorize => {
                let summary = app.backup().recategorize_all().await?;
                emit(&summary, json, output::recategorize)
            }
        },
        AppCommands::Settings { command } => {
            match command {
                SettingsCommands::Show => {}
                SettingsCommands::Theme { theme } => {
                    let theme: ThemeOption = theme.parse().map_err(anyhow::Error::msg)?;
                    app.settings().set_theme(theme).await?;
                }
                SettingsCommands::Tts { enabled } => {
                    app.settings().set_tts_enabled(enabled.into()).await?;
                }
            }
            emit(&app.settings().current(), json, output::settings)
        }
    }
}

fn fail_on_error(decision: &RoutingDecision) -> Result<()> {
    match decision {
        RoutingDecision::Error { reason } => anyhow::bail!("{}", reason),
        _ => Ok(()),
    }
}

fn fail_unless_written(result: &WriteResult) -> Result<()> {
    if result.is_success() {
        Ok(())
    } else {
        anyhow::bail!("tag was not written")
    }
}

#[derive(Parser)]
#[command(name = "audiotag")]
#[command(about = "Attach spoken messages to NFC tags", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    /// Output JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage simulated tag images
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    #[command(flatten)]
    App(AppCommands),
}

/// Commands that work against the tag database.
#[derive(Subcommand)]
enum AppCommands {
    /// Scan a tag image as if it was tapped on the reader
    Scan {
        image: PathBuf,
        /// Treat the scan as the one that launched the app
        #[arg(long, default_value_t = false)]
        cold: bool,
    },
    /// Open a known tag from the tag list (never auto-plays)
    Open { tag_id: String },
    /// Save content and write its id to a tag image
    #[command(group(ArgGroup::new("content").required(true).args(["audio", "text"])))]
    Write {
        image: PathBuf,
        /// Recorded audio file to attach
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Text to speak when the tag is scanned
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Group names (comma-separated)
        #[arg(
            long = "group",
            value_delimiter = ',',
            num_args = 1..,
            default_values_t = Vec::<String>::new()
        )]
        groups: Vec<String>,
    },
    /// Repeat only the tag write for content that is already saved
    Retry { image: PathBuf, tag_id: String },
    /// List tags, newest first
    List {
        /// Only tags in this group
        #[arg(long)]
        group: Option<String>,
        /// List group names instead of tags
        #[arg(long, default_value_t = false)]
        groups: bool,
    },
    /// Change a tag's title, description and groups
    Edit {
        tag_id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Group names (comma-separated)
        #[arg(
            long = "group",
            value_delimiter = ',',
            num_args = 1..,
            default_values_t = Vec::<String>::new()
        )]
        groups: Vec<String>,
    },
    /// Delete a tag record
    Delete { tag_id: String },
    /// Automatic backup tiering
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Show or change preferences
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a blank, unformatted tag image
    New {
        path: PathBuf,
        /// Hardware serial as hex; generated when omitted
        #[arg(long)]
        serial: Option<String>,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Show how much content is covered by automatic backup
    Status,
    /// Re-sort every audio file into its tier, oldest first
    Recategorize,
}

#[derive(Subcommand)]
enum SettingsCommands {
    Show,
    /// light|dark|system|high-contrast-light|high-contrast-dark
    Theme { theme: String },
    /// Turn spoken feedback on or off
    Tts { enabled: Toggle },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl From<Toggle> for bool {
    fn from(t: Toggle) -> bool {
        matches!(t, Toggle::On)
    }
}
