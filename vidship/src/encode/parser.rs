//! Elapsed-time parsing for the encoder's stderr progress lines.

/// Parse a `HH:MM:SS.cs` time string into seconds.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Extract the elapsed-seconds marker from an encoder progress line
/// (`... time=00:01:23.45 ...`), if present.
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let start = line.find("time=")?;
    let rest = &line[start + 5..];
    let end = rest.find(' ').unwrap_or(rest.len());
    parse_time(&rest[..end])
}

/// Convert an elapsed position into a percent of the known duration,
/// clamped into [0, 100]. The reported duration may be imprecise, so a
/// slight overshoot is clamped rather than treated as an error; an unknown
/// duration yields 0.
pub fn percent_of(elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    (elapsed / duration * 100.0).clamp(0.0, 100.0)
}
