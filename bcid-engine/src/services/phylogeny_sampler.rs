//! Size-bounded, representative hit subsets for tree building
//!
//! Sampling is systematic, not random: picks are spread evenly along the
//! identity-sorted hits, so the lowest and highest identity are always kept.

use crate::models::Hit;
use std::collections::HashMap;

/// Indices of `n` picks spaced evenly through `len` sorted items.
///
/// Picks `round(i * (len - 1) / (n - 1))` for `i in 0..n-1` plus `len - 1`.
/// Rounding is half-to-even.
pub fn systematic_indices(len: usize, n: usize) -> Vec<usize> {
    if n == 0 || len == 0 {
        return Vec::new();
    }
    if n >= len {
        return (0..len).collect();
    }
    if n == 1 {
        return vec![(len - 1) / 2];
    }
    let step = (len - 1) as f64 / (n - 1) as f64;
    let mut indices: Vec<usize> = (0..n - 1)
        .map(|i| (i as f64 * step).round_ties_even() as usize)
        .collect();
    indices.push(len - 1);
    indices
}

/// `n` items sampled from `items` after sorting by `key`
pub fn systematic_sample<T, F>(items: &[T], n: usize, key: F) -> Vec<&T>
where
    F: Fn(&T) -> f64,
{
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by(|a, b| key(a).total_cmp(&key(b)));
    systematic_indices(sorted.len(), n)
        .into_iter()
        .map(|i| sorted[i])
        .collect()
}

/// Sequence ids for the phylogeny FASTA.
///
/// Hits are grouped per species in first-occurrence order; groups larger
/// than `max_per_species` are sampled by identity. Hits without a species
/// are skipped.
pub fn phylogeny_ids<'h, F>(hits: &'h [Hit], max_per_species: usize, id_of: F) -> Vec<&'h str>
where
    F: Fn(&'h Hit) -> &'h str,
{
    let mut order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<&'h Hit>> = HashMap::new();
    for hit in hits {
        let Some(species) = hit.species_name() else {
            continue;
        };
        if !members.contains_key(species) {
            order.push(species);
        }
        members.entry(species).or_default().push(hit);
    }

    let mut ids = Vec::new();
    for species in order {
        let group = &members[species];
        if group.len() > max_per_species {
            let sampled = systematic_sample(group, max_per_species, |h| h.identity);
            ids.extend(sampled.into_iter().map(|h| id_of(*h)));
        } else {
            ids.extend(group.iter().map(|h| id_of(*h)));
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, species: &str, identity: f64) -> Hit {
        serde_json::from_value(json!({
            "hit_id": id,
            "accession": id,
            "species": species,
            "identity": identity,
        }))
        .unwrap()
    }

    #[test]
    fn test_thirteen_into_five() {
        assert_eq!(systematic_indices(13, 5), vec![0, 3, 6, 9, 12]);
    }

    #[test]
    fn test_half_rounds_to_even() {
        // step 2.75: 0, 2.75, 5.5, 8.25 -> 0, 3, 6, 8
        assert_eq!(systematic_indices(12, 5), vec![0, 3, 6, 8, 11]);
    }

    #[test]
    fn test_edge_sizes() {
        assert_eq!(systematic_indices(4, 10), vec![0, 1, 2, 3]);
        assert_eq!(systematic_indices(7, 1), vec![3]);
        assert_eq!(systematic_indices(8, 1), vec![3]);
        assert!(systematic_indices(5, 0).is_empty());
        assert_eq!(systematic_indices(5, 2), vec![0, 4]);
    }

    #[test]
    fn test_sample_keeps_extremes_and_is_deterministic() {
        let hits: Vec<Hit> = (0..13)
            .rev()
            .map(|i| hit(&format!("H{}", i), "Aedes aegypti", 0.80 + i as f64 * 0.015))
            .collect();
        let first = systematic_sample(&hits, 5, |h| h.identity);
        let second = systematic_sample(&hits, 5, |h| h.identity);
        let ids: Vec<&str> = first.iter().map(|h| h.hit_id.as_str()).collect();
        assert_eq!(ids, vec!["H0", "H3", "H6", "H9", "H12"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_phylogeny_ids_groups_by_species() {
        let mut hits: Vec<Hit> = (0..6)
            .map(|i| hit(&format!("A{}", i), "Aedes aegypti", 0.9 + i as f64 * 0.01))
            .collect();
        hits.insert(1, hit("C0", "Culex pipiens", 0.95));
        let ids = phylogeny_ids(&hits, 3, |h| h.accession.as_str());
        // step 2.5: 0, 2.5 -> 2, then the last
        assert_eq!(ids, vec!["A0", "A2", "A5", "C0"]);
    }
}
