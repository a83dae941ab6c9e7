use std::cmp::Ordering;

/// What to do when a current or candidate version is not a semantic version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnparsableVersionPolicy {
    /// Treat the release as up to date.
    #[default]
    Skip,
    /// Report the release as failed.
    Fail,
}

/// Parse a chart version the way chart repositories write them.
///
/// Accepts a leading `v` and zero-fills missing minor/patch components, so
/// `v1.2` parses as `1.2.0`. Pre-release and build metadata follow semver.
pub fn parse_chart_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(version) = semver::Version::parse(trimmed) {
        return Some(version);
    }

    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|part| part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);
    semver::Version::parse(&padded).ok()
}

/// Newest-first ordering used to sort index entries; unparsable versions go last.
pub fn newest_first(a: &str, b: &str) -> Ordering {
    match (parse_chart_version(a), parse_chart_version(b)) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_prefixed_versions() {
        assert_eq!(
            parse_chart_version("1.2.3"),
            Some(semver::Version::new(1, 2, 3))
        );
        assert_eq!(
            parse_chart_version("v1.2.3"),
            Some(semver::Version::new(1, 2, 3))
        );
        assert_eq!(parse_chart_version("1.2"), Some(semver::Version::new(1, 2, 0)));
        assert_eq!(parse_chart_version("3"), Some(semver::Version::new(3, 0, 0)));
    }

    #[test]
    fn keeps_prerelease_on_short_versions() {
        let version = parse_chart_version("1.2-rc.1").unwrap();
        assert_eq!(version.to_string(), "1.2.0-rc.1");
        assert!(version < semver::Version::new(1, 2, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_chart_version("").is_none());
        assert!(parse_chart_version("latest").is_none());
        assert!(parse_chart_version("1.x").is_none());
        assert!(parse_chart_version("1.2.3.4").is_none());
        assert!(parse_chart_version(">=1.0.0").is_none());
    }

    #[test]
    fn sorts_newest_first_with_garbage_last() {
        let mut versions = vec!["1.0.0", "nightly", "2.0.0-beta.1", "1.10.0", "2.0.0"];
        versions.sort_by(|a, b| newest_first(a, b));
        assert_eq!(
            versions,
            vec!["2.0.0", "2.0.0-beta.1", "1.10.0", "1.0.0", "nightly"]
        );
    }
}
