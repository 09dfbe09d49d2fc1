//! Post-generation merge pass over card drafts.
//!
//! The card generator is prompted to avoid slivers, but it still emits them.
//! This pass folds any card shorter than the configured minimum into an
//! adjacent card with a compatible category, repeating until no such pair
//! remains. Pure function over drafts; persistence happens in the caller.

use chrono::Duration;

use crate::db::models::CardCategory;
use crate::inference::parse::CardDraft;

fn draft_duration(card: &CardDraft) -> Duration {
    card.end_time - card.start_time
}

/// Merge short cards into compatible neighbors until a fixpoint. Cards are
/// processed in chronological order and the earliest eligible pair merges
/// first, so the result is deterministic. A card exactly at `min_duration`
/// is not short.
pub fn merge_short_cards(mut cards: Vec<CardDraft>, min_duration: Duration) -> Vec<CardDraft> {
    cards.sort_by_key(|card| card.start_time);

    while let Some(idx) = find_mergeable_pair(&cards, min_duration) {
        let right = cards.remove(idx + 1);
        let left = cards.remove(idx);
        cards.insert(idx, merge_pair(left, right));
    }
    cards
}

fn find_mergeable_pair(cards: &[CardDraft], min_duration: Duration) -> Option<usize> {
    for idx in 0..cards.len().saturating_sub(1) {
        let left = &cards[idx];
        let right = &cards[idx + 1];
        let has_short = draft_duration(left) < min_duration || draft_duration(right) < min_duration;
        if has_short && left.category.compatible_with(right.category) {
            return Some(idx);
        }
    }
    None
}

/// Combine two adjacent drafts. The longer card contributes the title, the
/// descriptions concatenate chronologically, and a specific category wins
/// over `Other`.
fn merge_pair(left: CardDraft, right: CardDraft) -> CardDraft {
    let category = if left.category == CardCategory::Other {
        right.category
    } else {
        left.category
    };
    let title = if draft_duration(&right) > draft_duration(&left) {
        right.title.clone()
    } else {
        left.title.clone()
    };
    let description = if right.description.is_empty() {
        left.description
    } else if left.description.is_empty() {
        right.description
    } else {
        format!("{} {}", left.description, right.description)
    };

    CardDraft {
        start_time: left.start_time,
        end_time: right.end_time,
        category,
        title,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn card(start_min: i64, end_min: i64, category: CardCategory, title: &str) -> CardDraft {
        let base = Utc.with_ymd_and_hms(2025, 3, 9, 13, 0, 0).unwrap();
        CardDraft {
            start_time: base + Duration::minutes(start_min),
            end_time: base + Duration::minutes(end_min),
            category,
            title: title.to_string(),
            description: format!("{title} details"),
        }
    }

    #[test]
    fn short_card_folds_into_longer_neighbor() {
        let cards = vec![
            card(0, 5, CardCategory::Work, "Quick standup"),
            card(5, 45, CardCategory::Work, "Writing documentation"),
        ];
        let merged = merge_short_cards(cards, Duration::minutes(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Writing documentation");
        assert_eq!(merged[0].start_time.format("%H:%M").to_string(), "13:00");
        assert_eq!(merged[0].end_time.format("%H:%M").to_string(), "13:45");
    }

    #[test]
    fn card_exactly_at_minimum_stays() {
        let cards = vec![
            card(0, 10, CardCategory::Work, "Standup"),
            card(10, 40, CardCategory::Work, "Coding"),
        ];
        let merged = merge_short_cards(cards, Duration::minutes(10));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn incompatible_categories_never_merge() {
        let cards = vec![
            card(0, 5, CardCategory::Work, "Email triage"),
            card(5, 40, CardCategory::Entertainment, "Watching videos"),
        ];
        let merged = merge_short_cards(cards, Duration::minutes(10));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn other_folds_into_specific_category() {
        let cards = vec![
            card(0, 4, CardCategory::Other, "Desktop idle"),
            card(4, 35, CardCategory::Learning, "Spanish course"),
        ];
        let merged = merge_short_cards(cards, Duration::minutes(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].category, CardCategory::Learning);
        assert_eq!(merged[0].title, "Spanish course");
    }

    #[test]
    fn chain_of_shorts_reaches_fixpoint() {
        let cards = vec![
            card(0, 3, CardCategory::Work, "a"),
            card(3, 6, CardCategory::Work, "b"),
            card(6, 9, CardCategory::Work, "c"),
            card(9, 12, CardCategory::Work, "d"),
        ];
        let merged = merge_short_cards(cards, Duration::minutes(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end_time - merged[0].start_time, Duration::minutes(12));
    }
}
