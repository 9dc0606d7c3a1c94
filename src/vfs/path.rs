//! Archive-internal path handling. Paths are POSIX-style and relative;
//! absolute inputs map by stripping the leading slash.

/// Normalize a path: strip the leading slash, drop `.` segments, resolve
/// `..` against preceding segments, collapse repeated separators.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

pub fn dirname(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[..i],
        None => "",
    }
}

/// Resolve a link target against the directory of the entry that holds it.
/// Absolute targets restart from the archive root.
pub fn join_link(entry_path: &str, target: &str) -> String {
    if target.starts_with('/') {
        return normalize(target);
    }
    let dir = dirname(entry_path);
    if dir.is_empty() {
        normalize(target)
    } else {
        normalize(&format!("{dir}/{target}"))
    }
}
