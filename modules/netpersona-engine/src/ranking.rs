//! Batch ordering: the most viral candidates get first claim on the budget.

use netpersona_common::{CandidateContent, EngagementMetrics};

const REPLY_WEIGHT: f64 = 3.0;
const SHARE_WEIGHT: f64 = 5.0;
const VIEW_WEIGHT: f64 = 0.01;

pub fn virality_score(metrics: &EngagementMetrics) -> f64 {
    f64::from(metrics.like_count)
        + REPLY_WEIGHT * f64::from(metrics.reply_count)
        + SHARE_WEIGHT * f64::from(metrics.share_count)
        + VIEW_WEIGHT * metrics.view_count as f64
}

/// Highest score first. Ties keep their input order.
pub fn rank_by_virality(mut candidates: Vec<CandidateContent>) -> Vec<CandidateContent> {
    candidates.sort_by(|a, b| virality_score(&b.metrics).total_cmp(&virality_score(&a.metrics)));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpersona_common::Platform;

    fn candidate(id: &str, likes: u32, replies: u32, shares: u32, views: u64) -> CandidateContent {
        let mut c = CandidateContent::new(Platform::X, id, "dev", "post");
        c.metrics = EngagementMetrics {
            reply_count: replies,
            like_count: likes,
            share_count: shares,
            view_count: views,
        };
        c
    }

    #[test]
    fn score_weights_replies_and_shares() {
        let metrics = EngagementMetrics {
            reply_count: 2,
            like_count: 10,
            share_count: 1,
            view_count: 1000,
        };
        assert_eq!(virality_score(&metrics), 10.0 + 6.0 + 5.0 + 10.0);
    }

    #[test]
    fn ranks_descending_and_keeps_ties_stable() {
        let ranked = rank_by_virality(vec![
            candidate("quiet", 1, 0, 0, 0),
            candidate("tie-a", 0, 2, 0, 0),
            candidate("viral", 50, 10, 4, 20_000),
            candidate("tie-b", 6, 0, 0, 0),
        ]);

        let ids: Vec<_> = ranked.iter().map(|c| c.key.external_id.as_str()).collect();
        assert_eq!(ids, vec!["viral", "tie-a", "tie-b", "quiet"]);
    }

    #[test]
    fn empty_batch() {
        assert!(rank_by_virality(Vec::new()).is_empty());
    }
}
