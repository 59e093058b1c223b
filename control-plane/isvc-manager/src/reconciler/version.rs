use semver::Version;

use crate::crd::service_instance::ServiceInstance;
use crate::errors::IntegratedServiceError;

#[derive(Debug, Clone, PartialEq)]
pub struct VersionSelection {
    /// Highest candidate, exactly as the controller spelled it.
    pub latest: String,
    /// Candidates that are not versions even after normalising, with the
    /// parse error.
    pub invalid: Vec<String>,
}

/// Highest version among the available versions and the installed one.
pub fn latest_version(
    instance: &ServiceInstance,
) -> Result<VersionSelection, IntegratedServiceError> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(status) = &instance.status {
        if let Some(available) = &status.available_versions {
            candidates.extend(available.keys().map(String::as_str));
        }
        if let Some(current) = status.version.as_deref().filter(|v| !v.is_empty()) {
            candidates.push(current);
        }
    }

    let mut valid: Vec<(Version, &str)> = Vec::with_capacity(candidates.len());
    let mut invalid = Vec::new();
    for candidate in candidates {
        match parse_version(candidate) {
            Ok(version) => valid.push((version, candidate)),
            Err(e) => invalid.push(format!("{candidate}: {e}")),
        }
    }

    valid.sort_by(|a, b| a.0.cmp(&b.0));
    match valid.pop() {
        Some((_, latest)) => Ok(VersionSelection {
            latest: latest.to_string(),
            invalid,
        }),
        None if invalid.is_empty() => Err(IntegratedServiceError::NoValidVersions(
            "no versions offered".to_string(),
        )),
        None => Err(IntegratedServiceError::NoValidVersions(invalid.join("; "))),
    }
}

/// Semver with the usual chart-repo spellings accepted: a leading `v` and
/// missing minor or patch components (`v1.2` reads as `1.2.0`).
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let trimmed = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let strict = match Version::parse(trimmed) {
        Ok(version) => return Ok(version),
        Err(e) => e,
    };
    let (core, suffix) = trimmed.split_at(trimmed.find(['-', '+']).unwrap_or(trimmed.len()));
    let parts = core.split('.').count();
    let numeric = core
        .split('.')
        .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    if parts < 3 && numeric {
        let padded = format!("{core}{}{suffix}", ".0".repeat(3 - parts));
        Version::parse(&padded).map_err(|_| strict)
    } else {
        Err(strict)
    }
}
