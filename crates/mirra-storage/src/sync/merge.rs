//! Merging uplink documents into local metadata
//!
//! The version set is a union. For versions known on both sides the
//! uplink's `dist` block replaces the local one and every other local field
//! is kept. Distribution tags move forward only, and the `created`/`modified`
//! timestamps keep their earliest/latest values respectively.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::DateTime;
use mirra_core::types::PackageMetadata;

const CREATED: &str = "created";
const MODIFIED: &str = "modified";

/// Merge a document fetched from an uplink into `local`.
///
/// Merging the same document twice leaves `local` unchanged the second
/// time. Use [`merge_uplink_documents`] when several uplinks answered, so
/// that a tag from one uplink can point at a version another one supplied.
pub fn merge_uplink_metadata(local: &mut PackageMetadata, upstream: &PackageMetadata) {
    merge_uplink_documents(local, [upstream]);
}

/// Merge the documents of every uplink that answered into `local`.
///
/// Versions of all documents are united before any tag is considered, so a
/// tag survives whenever some document provides its target. Neither the
/// version set nor the tags depend on the order of `upstreams`.
pub fn merge_uplink_documents<'a, I>(local: &mut PackageMetadata, upstreams: I)
where
    I: IntoIterator<Item = &'a PackageMetadata>,
{
    let upstreams: Vec<&PackageMetadata> = upstreams.into_iter().collect();
    for upstream in &upstreams {
        merge_versions(local, upstream);
    }
    local.prune_dangling_tags();
    merge_dist_tags(local, &upstreams);
    for upstream in &upstreams {
        merge_time(local, upstream);
    }
}

fn merge_versions(local: &mut PackageMetadata, upstream: &PackageMetadata) {
    for (version, manifest) in &upstream.versions {
        match local.versions.entry(version.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.dist != manifest.dist {
                    existing.dist = manifest.dist.clone();
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(manifest.clone());
            },
        }
    }
}

fn merge_dist_tags(local: &mut PackageMetadata, upstreams: &[&PackageMetadata]) {
    let mut offered: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for upstream in upstreams {
        for (tag, version) in &upstream.dist_tags {
            if local.versions.contains_key(version) {
                offered.entry(tag.as_str()).or_default().push(version.as_str());
            }
        }
    }

    for (tag, candidates) in offered {
        let chosen = match local.dist_tags.get(tag) {
            Some(current) => candidates
                .into_iter()
                .filter(|candidate| is_newer(candidate, current))
                .max_by(|a, b| rank(a).cmp(&rank(b))),
            None => candidates.into_iter().max_by(|a, b| rank(a).cmp(&rank(b))),
        };
        if let Some(version) = chosen {
            local.dist_tags.insert(tag.to_string(), version.to_string());
        }
    }
}

/// Whether `candidate` should replace `current` as a tag target
fn is_newer(candidate: &str, current: &str) -> bool {
    match (semver::Version::parse(candidate), semver::Version::parse(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        _ => false,
    }
}

/// Preference among tag targets offered for a tag unknown locally:
/// semver versions beat anything else, ties break on the raw string
fn rank(version: &str) -> (Option<semver::Version>, &str) {
    (semver::Version::parse(version).ok(), version)
}

fn merge_time(local: &mut PackageMetadata, upstream: &PackageMetadata) {
    for (key, value) in &upstream.time {
        match local.time.entry(key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
            },
            Entry::Occupied(mut entry) => {
                let order = compare_timestamps(value, entry.get());
                let replace = match key.as_str() {
                    MODIFIED => order == Ordering::Greater,
                    CREATED => order == Ordering::Less,
                    _ => false,
                };
                if replace {
                    entry.insert(value.clone());
                }
            },
        }
    }
}

fn compare_timestamps(a: &str, b: &str) -> Ordering {
    match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
