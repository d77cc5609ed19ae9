//! Module and release slug validation.
//!
//! A module slug is `<owner><sep><name>` where the owner is alphanumeric, the
//! separator is `-` or `/`, and the name starts with a lowercase letter
//! followed by lowercase letters, digits, or underscores. A release slug is a
//! module slug followed by another separator and a semantic version with an
//! optional pre-release or build suffix.

use regex::Regex;
use std::sync::OnceLock;

static MODULE_SLUG_REGEX: OnceLock<Regex> = OnceLock::new();
static RELEASE_SLUG_REGEX: OnceLock<Regex> = OnceLock::new();

fn module_slug_regex() -> &'static Regex {
    MODULE_SLUG_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]+[-/][a-z][a-z0-9_]*$").unwrap_or_else(|e| {
            panic!("Failed to compile module slug regex: {}. This is a bug in the code - the regex pattern should be valid.", e)
        })
    })
}

fn release_slug_regex() -> &'static Regex {
    RELEASE_SLUG_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]+[-/][a-z][a-z0-9_]*[-/][0-9]+\.[0-9]+\.[0-9]+(?:[-+].+)?$")
            .unwrap_or_else(|e| {
                panic!("Failed to compile release slug regex: {}. This is a bug in the code - the regex pattern should be valid.", e)
            })
    })
}

/// Check whether a module slug is well-formed (e.g. `acme-widget`).
pub fn is_valid_module_slug(slug: &str) -> bool {
    module_slug_regex().is_match(slug)
}

/// Check whether a release slug is well-formed (e.g. `acme-widget-1.2.3`).
pub fn is_valid_release_slug(slug: &str) -> bool {
    release_slug_regex().is_match(slug)
}

/// Build the release slug for a module name and version.
pub fn release_slug(module_slug: &str, version: &str) -> String {
    format!("{}-{}", module_slug, version)
}

/// Derive the owning module slug from a release slug by stripping the
/// trailing `<sep><version>` segment.
///
/// The version may itself contain separators (`2.0.0-beta.1`), so the split
/// point is the rightmost separator whose prefix is a well-formed module slug
/// and whose suffix starts a version number.
pub fn module_slug_of_release(release_slug: &str) -> &str {
    for (idx, _) in release_slug.rmatch_indices(['-', '/']) {
        let (prefix, rest) = release_slug.split_at(idx);
        if rest[1..].starts_with(|c: char| c.is_ascii_digit()) && is_valid_module_slug(prefix) {
            return prefix;
        }
    }
    release_slug
}

/// The module's own name: the part of the slug after the first separator.
pub fn module_name(module_slug: &str) -> &str {
    module_slug
        .split_once(['-', '/'])
        .map(|(_, name)| name)
        .unwrap_or(module_slug)
}

/// The owner part of a module slug: everything before the first separator.
pub fn module_owner(module_slug: &str) -> &str {
    module_slug
        .split_once(['-', '/'])
        .map(|(owner, _)| owner)
        .unwrap_or(module_slug)
}
