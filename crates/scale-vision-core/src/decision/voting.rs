// crates/scale-vision-core/src/decision/voting.rs
//
// Weighted vote over an observation window: per-class probability sums,
// normalized winner share and winner-vs-runner-up margin.

use crate::types::ClassProb;

/// Returns `(top_class, top_prob, margin)`.
///
/// `top_prob = top_score / total`, `margin = (top_score - second_score) / total`
/// where scores are per-class probability sums. Empty input yields
/// `("", 0, 0)`. Accumulation preserves first-seen order and the sort is
/// stable, so exact-score ties go to the class that entered the window
/// first.
pub fn weighted_vote(items: &[ClassProb]) -> (String, f32, f32) {
    if items.is_empty() {
        return (String::new(), 0.0, 0.0);
    }
    let mut scores: Vec<(&str, f32)> = Vec::new();
    for item in items {
        match scores.iter_mut().find(|(class, _)| *class == item.class_id) {
            Some((_, score)) => *score += item.prob,
            None => scores.push((item.class_id.as_str(), item.prob)),
        }
    }
    let mut ranked = scores;
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (top_class, top_score) = ranked[0];
    let second_score = ranked.get(1).map(|kv| kv.1).unwrap_or(0.0);
    let sum: f32 = ranked.iter().map(|kv| kv.1).sum();
    let total = if sum > 0.0 { sum } else { 1.0 };
    (top_class.to_string(), top_score / total, (top_score - second_score) / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_votes_nothing() {
        assert_eq!(weighted_vote(&[]), (String::new(), 0.0, 0.0));
    }

    #[test]
    fn single_class_takes_full_share() {
        let items = vec![ClassProb::new("apple", 0.9), ClassProb::new("apple", 0.8)];
        let (class, prob, margin) = weighted_vote(&items);
        assert_eq!(class, "apple");
        assert!((prob - 1.0).abs() < 1e-6);
        assert!((margin - 1.0).abs() < 1e-6);
    }

    #[test]
    fn margin_is_bounded_by_top_prob() {
        let items = vec![
            ClassProb::new("apple", 0.6),
            ClassProb::new("banana", 0.3),
            ClassProb::new("apple", 0.5),
            ClassProb::new("orange", 0.2),
        ];
        let (class, prob, margin) = weighted_vote(&items);
        assert_eq!(class, "apple");
        assert!(prob > 0.0 && prob <= 1.0);
        assert!(margin >= 0.0 && margin <= prob);
    }

    #[test]
    fn exact_tie_goes_to_first_seen_class() {
        // zucchini would win a lexicographic tie-break; first-seen wins here.
        let items = vec![
            ClassProb::new("zucchini", 0.5),
            ClassProb::new("apple", 0.5),
        ];
        let (class, prob, margin) = weighted_vote(&items);
        assert_eq!(class, "zucchini");
        assert!((prob - 0.5).abs() < 1e-6);
        assert!(margin.abs() < 1e-6);

        // Same scores accumulated across interleaved observations.
        let items = vec![
            ClassProb::new("banana", 0.3),
            ClassProb::new("apple", 0.4),
            ClassProb::new("banana", 0.4),
            ClassProb::new("apple", 0.3),
        ];
        let (class, _, _) = weighted_vote(&items);
        assert_eq!(class, "banana");
    }

    #[test]
    fn zero_prob_window_does_not_divide_by_zero() {
        let items = vec![ClassProb::new("apple", 0.0)];
        let (class, prob, margin) = weighted_vote(&items);
        assert_eq!(class, "apple");
        assert_eq!(prob, 0.0);
        assert_eq!(margin, 0.0);
    }
}
