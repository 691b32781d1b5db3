use std::collections::HashMap;

use justicia_core::FileStatus;
use uuid::Uuid;

/// Truncate a string to `max_chars` characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// MIME type sent with an uploaded file, guessed from its extension.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = std::path::Path::new(file_name)
        .extension()?
        .to_str()?
        .to_lowercase();
    let mime = match extension.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "html" => "text/html",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        _ => return None,
    };
    Some(mime)
}

/// One line of ingestion progress, e.g. `demanda.pdf [uploading 40%] Extrayendo texto`.
pub fn status_line(name: &str, status: FileStatus, progress: u8, message: &str) -> String {
    let mut line = match status {
        FileStatus::Uploading => format!("{} [{} {}%]", name, status, progress),
        _ => format!("{} [{}]", name, status),
    };
    if !message.is_empty() {
        line.push(' ');
        line.push_str(&truncate_string(message, 80));
    }
    line
}

/// Last status seen for each file, kept because finished files are purged
/// from the controller.
#[derive(Debug, Default)]
pub struct StatusTally {
    latest: HashMap<Uuid, FileStatus>,
}

impl StatusTally {
    pub fn record(&mut self, id: Uuid, status: FileStatus) {
        self.latest.insert(id, status);
    }

    /// Files whose most recent status is `Error`.
    pub fn failed_count(&self) -> usize {
        self.latest
            .values()
            .filter(|status| **status == FileStatus::Error)
            .count()
    }
}


/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    #[test]
    fn tally_counts_files_ending_in_error() {
        let (ok, failed, retried) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut tally = StatusTally::default();

        tally.record(ok, FileStatus::Uploading);
        tally.record(ok, FileStatus::Success);
        tally.record(failed, FileStatus::Uploading);
        tally.record(failed, FileStatus::Error);
        tally.record(retried, FileStatus::Error);
        tally.record(retried, FileStatus::Pending);

        assert_eq!(tally.failed_count(), 1);
    }
}
