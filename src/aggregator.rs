//! Hit aggregation and ranking across engines.

use std::collections::HashMap;

use crate::model::{Hit, Hits};

/// Merges hits from several engines into one ranked list.
#[derive(Debug, Default)]
pub struct Aggregator {
    /// Engine weights for scoring.
    engine_weights: HashMap<String, f64>,
}

impl Aggregator {
    /// Creates a new aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the weight for an engine.
    pub fn set_engine_weight(&mut self, engine: impl Into<String>, weight: f64) {
        self.engine_weights.insert(engine.into(), weight);
    }

    /// Aggregates hits from multiple engines.
    ///
    /// This performs:
    /// 1. Deduplication based on normalized URL
    /// 2. Merging of duplicates (engines, positions, best similarity)
    /// 3. Score calculation
    /// 4. Sorting by score, then similarity
    pub fn aggregate(&self, engine_hits: Vec<(String, Vec<Hit>)>) -> Hits {
        let mut order: Vec<String> = Vec::new();
        let mut url_map: HashMap<String, Hit> = HashMap::new();

        for (engine_name, hits) in engine_hits {
            for (position, mut hit) in hits.into_iter().enumerate() {
                let normalized = hit.normalized_url();
                let position = (position + 1) as u32;

                if let Some(existing) = url_map.get_mut(&normalized) {
                    merge_hits(existing, hit, &engine_name, position);
                } else {
                    hit.engines.clear();
                    hit.positions.clear();
                    hit.engines.insert(engine_name.clone());
                    hit.positions.push(position);
                    order.push(normalized.clone());
                    url_map.insert(normalized, hit);
                }
            }
        }

        let mut hits: Vec<Hit> = order
            .into_iter()
            .filter_map(|key| url_map.remove(&key))
            .collect();

        for hit in &mut hits {
            hit.score = self.calculate_score(hit);
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let mut aggregated = Hits::new();
        for hit in hits {
            aggregated.add_hit(hit);
        }
        aggregated
    }

    /// Calculates the score for a hit.
    ///
    /// Engine weights multiply together and by the number of engines that
    /// found the hit; the score sums `weight / position` over all positions.
    /// Similarity, when reported, scales the result.
    fn calculate_score(&self, hit: &Hit) -> f64 {
        let mut weight = 1.0;

        for engine in &hit.engines {
            weight *= self.engine_weights.get(engine).copied().unwrap_or(1.0);
        }

        weight *= hit.engines.len() as f64;

        let score: f64 = hit
            .positions
            .iter()
            .map(|&position| weight / position as f64)
            .sum();

        if hit.similarity > 0.0 {
            score * (1.0 + hit.similarity / 100.0)
        } else {
            score
        }
    }
}

/// Merges a new hit into an existing one.
fn merge_hits(existing: &mut Hit, new: Hit, engine: &str, position: u32) {
    existing.engines.insert(engine.to_string());
    existing.positions.push(position);

    if new.title.len() > existing.title.len() {
        existing.title = new.title;
    }
    if existing.thumbnail.is_none() && new.thumbnail.is_some() {
        existing.thumbnail = new.thumbnail;
    }
    if new.similarity > existing.similarity {
        existing.similarity = new.similarity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregator_new() {
        let aggregator = Aggregator::new();
        assert!(aggregator.engine_weights.is_empty());
    }

    #[test]
    fn test_aggregator_set_engine_weight() {
        let mut aggregator = Aggregator::new();
        aggregator.set_engine_weight("SauceNAO", 1.5);
        assert_eq!(aggregator.engine_weights.get("SauceNAO"), Some(&1.5));
    }

    #[test]
    fn test_aggregate_empty() {
        let aggregated = Aggregator::new().aggregate(vec![]);
        assert_eq!(aggregated.count, 0);
    }

    #[test]
    fn test_aggregate_deduplicates_by_url() {
        let aggregator = Aggregator::new();
        let from_iqdb = vec![
            Hit::new("https://danbooru.donmai.us/posts/1", "Short").with_similarity(92.0),
            Hit::new("https://other.com", "Other"),
        ];
        let from_snao = vec![Hit::new("http://www.danbooru.donmai.us/posts/1/", "Longer title")
            .with_similarity(95.5)
            .with_thumbnail("https://img/t.jpg")];

        let aggregated = aggregator.aggregate(vec![
            ("IQDB".to_string(), from_iqdb),
            ("SauceNAO".to_string(), from_snao),
        ]);

        assert_eq!(aggregated.count, 2);
        let top = &aggregated.items()[0];
        assert_eq!(top.title, "Longer title");
        assert_eq!(top.similarity, 95.5);
        assert_eq!(top.thumbnail.as_deref(), Some("https://img/t.jpg"));
        assert!(top.engines.contains("IQDB") && top.engines.contains("SauceNAO"));
        assert_eq!(top.positions, vec![1, 1]);
    }

    #[test]
    fn test_aggregate_sorted_by_score() {
        let aggregator = Aggregator::new();
        let hits = vec![Hit::new("https://a", "A"), Hit::new("https://b", "B"), Hit::new("https://c", "C")];
        let aggregated = aggregator.aggregate(vec![("Yandex".to_string(), hits)]);
        let urls: Vec<_> = aggregated.items().iter().map(|h| h.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(aggregated.items()[0].score, 1.0);
        assert_eq!(aggregated.items()[1].score, 0.5);
    }

    #[test]
    fn test_aggregate_similarity_breaks_ties() {
        let aggregator = Aggregator::new();
        let aggregated = aggregator.aggregate(vec![
            ("A".to_string(), vec![Hit::new("https://low", "")]),
            ("B".to_string(), vec![Hit::new("https://high", "").with_similarity(80.0)]),
        ]);
        assert_eq!(aggregated.items()[0].url, "https://high");
    }

    #[test]
    fn test_aggregate_engine_weight() {
        let mut aggregator = Aggregator::new();
        aggregator.set_engine_weight("Google", 3.0);
        let aggregated = aggregator.aggregate(vec![
            ("Bing".to_string(), vec![Hit::new("https://b", "")]),
            ("Google".to_string(), vec![Hit::new("https://g", "")]),
        ]);
        assert_eq!(aggregated.items()[0].url, "https://g");
        assert_eq!(aggregated.items()[0].score, 3.0);
    }
}
