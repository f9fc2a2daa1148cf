//! Version comparison for `semver_*` matchers.
//!
//! Versions are `MAJOR[.MINOR[.PATCH]][-PRERELEASE][+BUILD]`. Only the numeric components present
//! in the target version take part in the comparison, so a target of `2.0` equals any `2.0.x`.
//! Pre-release identifiers are ordered per SemVer 2.0 and build metadata is ignored.
use std::cmp::Ordering;

use semver::{BuildMetadata, Prerelease};

#[derive(Debug, PartialEq)]
struct ParsedVersion {
    components: Vec<u64>,
    prerelease: Option<Prerelease>,
}

fn parse(version: &str) -> Option<ParsedVersion> {
    if version.is_empty() || version.chars().any(char::is_whitespace) {
        return None;
    }

    let (version, build) = match version.split_once('+') {
        Some((version, build)) => (version, Some(build)),
        None => (version, None),
    };
    if let Some(build) = build {
        BuildMetadata::new(build).ok()?;
    }

    let (core, prerelease) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(Prerelease::new(pre).ok()?)),
        None => (version, None),
    };
    if matches!(&prerelease, Some(pre) if pre.is_empty()) {
        return None;
    }

    let components = core
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                part.parse::<u64>().ok()
            }
        })
        .collect::<Option<Vec<_>>>()?;
    if components.is_empty() || components.len() > 3 {
        return None;
    }

    Some(ParsedVersion {
        components,
        prerelease,
    })
}

/// Compare `version` (the user's) against `target`, returning how `version` orders relative to
/// `target`. Returns `None` if either side is not a valid version.
pub(super) fn compare_versions(target: &str, version: &str) -> Option<Ordering> {
    let target = parse(target)?;
    let version = parse(version)?;

    for (i, target_part) in target.components.iter().enumerate() {
        let Some(part) = version.components.get(i) else {
            // The user's version is less specific than the target.
            return Some(Ordering::Less);
        };
        match part.cmp(target_part) {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }

    Some(match (&version.prerelease, &target.prerelease) {
        (None, None) => Ordering::Equal,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(version), Some(target)) => version.cmp(target),
    })
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::compare_versions;

    #[test]
    fn compares_numeric_components() {
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.10.0", "1.2.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("1.5.0", "1.13.0"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.0.0", "0.9.9"), Some(Ordering::Less));
    }

    #[test]
    fn partial_target_matches_more_specific_versions() {
        assert_eq!(compare_versions("2", "2.9.1"), Some(Ordering::Equal));
        assert_eq!(compare_versions("2.1", "2.1.7"), Some(Ordering::Equal));
        assert_eq!(compare_versions("2.1.1", "2.1"), Some(Ordering::Less));
    }

    #[test]
    fn prerelease_ordering() {
        assert_eq!(compare_versions("1.0.0", "1.0.0-beta"), Some(Ordering::Less));
        assert_eq!(compare_versions("1.0.0-beta", "1.0.0"), Some(Ordering::Greater));
        assert_eq!(
            compare_versions("1.0.0-beta", "1.0.0-alpha"),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_versions("1.0.0-alpha.1", "1.0.0-alpha.beta"),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_versions("1.0.0-beta.2", "1.0.0-beta.11"),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn build_metadata_is_ignored() {
        assert_eq!(
            compare_versions("1.0.0", "1.0.0+build.5"),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn invalid_versions() {
        assert_eq!(compare_versions("1.0.0", ""), None);
        assert_eq!(compare_versions("1.0.0", "1.0.0.0"), None);
        assert_eq!(compare_versions("1.0.0", "1..0"), None);
        assert_eq!(compare_versions("1.0.0", "1.0 .0"), None);
        assert_eq!(compare_versions("1.0.0", "a.b.c"), None);
        assert_eq!(compare_versions("1.0.0", "1.0.0-"), None);
        assert_eq!(compare_versions("x", "1.0.0"), None);
    }
}
