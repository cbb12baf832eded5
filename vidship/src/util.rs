//! Small shared helpers.

use std::path::Path;

/// MIME type for a delivered file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        _ => "video/mp4",
    }
}

/// Format a byte count for humans (binary ladder).
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, ['K', 'M', 'G', 'T', 'P', 'E'][exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for(Path::new("a.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.WEBM")), "video/webm");
        assert_eq!(content_type_for(Path::new("a.mkv")), "video/x-matroska");
        assert_eq!(content_type_for(Path::new("a.mov")), "video/quicktime");
        assert_eq!(content_type_for(Path::new("a.avi")), "video/x-msvideo");
        assert_eq!(content_type_for(Path::new("noext")), "video/mp4");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(1900 * 1024 * 1024), "1.9 GB");
    }
}
