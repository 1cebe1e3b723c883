use std::{
    path::PathBuf,
    process,
};

use clap::Parser;
use log::error;

use mdanki::{
    config::Settings,
    persistence,
    sync,
};

#[derive(Parser)]
#[command(name = "mdanki")]
#[command(author, version, about = "Sync flashcard notes embedded in markdown files to Anki", long_about = None)]
struct Cli {
    /// Vault directory (or a single document) to sync
    path: PathBuf,

    /// Recursively scan subfolders
    #[arg(short = 'R', long)]
    recurse: bool,

    /// Vault name used for deep links back into the vault
    #[arg(long)]
    vault: Option<String>,

    /// Settings file to use instead of the one in the app data directory
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings_path = cli.settings.unwrap_or_else(persistence::settings_path);
    let mut settings: Settings = persistence::load_json_or_default(&settings_path);
    if !settings_path.exists() {
        // First run: write the defaults out so they can be edited.
        if let Err(err) = persistence::save_json(&Settings::new(), &settings_path) {
            error!("Could not write default settings to {}: {}", settings_path.display(), err);
        }
        settings = Settings::new();
    }
    if let Some(vault) = cli.vault {
        settings.vault_name = vault;
    }

    match sync::run_sync(&cli.path, cli.recurse, settings, &persistence::cache_path()).await {
        Ok(report) => {
            println!(
                "Synced {} documents ({} unchanged): {} added, {} edited, {} deleted, {} media files uploaded",
                report.documents_scanned,
                report.documents_skipped,
                report.notes_added,
                report.notes_edited,
                report.notes_deleted,
                report.media_uploaded
            );
            if report.failed_adds > 0 {
                println!("{} notes could not be added; see the log for details", report.failed_adds);
            }
        }
        Err(err) => {
            error!("Sync failed: {}", err);
            process::exit(1);
        }
    }
}
