//! Small shared helpers: filename generation, text truncation, formatting.

use crate::core::config;
use std::path::PathBuf;
use uuid::Uuid;

/// Generates a unique path inside the scratch directory.
///
/// Each request writes UUID-prefixed filenames, so concurrent requests never
/// need to coordinate over the shared directory.
pub fn unique_download_path(ext: &str) -> PathBuf {
    let id = Uuid::new_v4().simple().to_string();
    PathBuf::from(&*config::DOWNLOAD_DIR).join(format!("{}.{}", &id[..12], ext))
}

/// Truncates a string to at most `max` characters, appending an ellipsis
/// when something was cut. Always cuts on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

/// Formats a duration in seconds as `H:MM:SS` (or `M:SS` under an hour).
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Quality label from frame height: 1080 -> "1080p".
pub fn quality_label(height: u32) -> String {
    format!("{}p", height)
}

/// Cleans a media title for use as a filename: alphanumerics, spaces,
/// dashes and underscores only, capped at 50 chars.
pub fn sanitize_filename(title: &str, ext: &str) -> String {
    let safe: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect();
    let safe = safe.trim();
    let base: String = if safe.is_empty() {
        "video".to_string()
    } else {
        safe.chars().take(50).collect::<String>().trim_end().to_string()
    };
    format!("{}.{}", base, ext)
}

/// Removes files, ignoring missing ones. Logs the rest.
pub fn cleanup_files<I, P>(paths: I)
where
    I: IntoIterator<Item = P>,
    P: AsRef<std::path::Path>,
{
    for path in paths {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("Removed: {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_untouched() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        let long = "a".repeat(300);
        let cut = truncate_chars(&long, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let s = "привет мир ".repeat(40);
        let cut = truncate_chars(&s, 200);
        assert_eq!(cut.chars().count(), 200);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(15), "0:15");
        assert_eq!(format_duration(75), "1:15");
        assert_eq!(format_duration(3800), "1:03:20");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Some / Title!", "mp4"), "Some  Title.mp4");
        assert_eq!(sanitize_filename("", "mp4"), "video.mp4");
        let long = "x".repeat(80);
        assert_eq!(sanitize_filename(&long, "mp3").len(), 50 + 4);
    }

    #[test]
    fn test_quality_label() {
        assert_eq!(quality_label(720), "720p");
    }
}
