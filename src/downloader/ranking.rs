// Catalog ordering and per-resolution deduplication

use std::collections::HashSet;

use super::models::FormatDescriptor;

/// Order descriptors by rank and keep one entry per display resolution.
///
/// The sort is stable, so equal ranks keep their input order. Intermediate
/// video-only / audio-only descriptors are dropped.
pub fn rank(descriptors: Vec<FormatDescriptor>) -> Vec<FormatDescriptor> {
    let mut ordered: Vec<FormatDescriptor> = descriptors
        .into_iter()
        .filter(|d| !d.kind().is_intermediate())
        .collect();
    ordered.sort_by(|a, b| b.rank().cmp(&a.rank()));

    let mut seen = HashSet::new();
    ordered.retain(|d| seen.insert(d.display_resolution().to_string()));
    ordered
}
