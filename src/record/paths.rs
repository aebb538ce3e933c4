//! Path Conventions
//!
//! Relative, forward-slash paths joined to the configured data root.
//! Active records live under `records/<type>/[<year>/]<id>.md`; archived
//! records move to `archive/<type>/<year>/<id>.<ext>`, keeping the year
//! carried by the original path when one is present, otherwise deriving
//! it from the created timestamp.

use regex::Regex;
use std::sync::OnceLock;

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(19|20)\d\d$").unwrap())
}

/// Year prefix of an ISO-8601 timestamp, when it looks like one.
pub fn year_of(timestamp: &str) -> Option<&str> {
    let year = timestamp.get(..4)?;
    year_re().is_match(year).then_some(year)
}

/// Path for an active record. A `year` metadata value groups the file
/// under a year directory; otherwise the file sits directly under its
/// type.
pub fn active_path(record_type: &str, id: &str, year: Option<&str>) -> String {
    match year {
        Some(year) => format!("records/{record_type}/{year}/{id}.md"),
        None => format!("records/{record_type}/{id}.md"),
    }
}

/// Archive path for a record currently at `current_path`. When the
/// current path carries a year component for this type, the archive
/// mirrors it; otherwise the year derives from `created`.
pub fn archive_path(current_path: &str, record_type: &str, id: &str, created: &str) -> String {
    let segments: Vec<&str> = current_path.split('/').collect();
    // records/<type>/<year>/<file>
    if segments.len() == 4
        && segments[0] == "records"
        && segments[1] == record_type
        && year_re().is_match(segments[2])
    {
        return format!("archive/{record_type}/{}/{}", segments[2], segments[3]);
    }

    let year = year_of(created).unwrap_or("undated");
    let file = segments
        .last()
        .filter(|f| !f.is_empty())
        .map(|f| (*f).to_string())
        .unwrap_or_else(|| format!("{id}.md"));
    format!("archive/{record_type}/{year}/{file}")
}

/// Reject absolute paths and parent traversal; keep forward slashes.
pub fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.split('/').any(|seg| seg == ".." || seg.is_empty())
}
