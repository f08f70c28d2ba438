//! Candidate selection for the matchmaking queue.
//!
//! Matching is bidirectional: a candidate is eligible only when the searcher's filters admit
//! the candidate's profile and the candidate's filters admit the searcher's profile.

use crate::dao::models::{
    Gender, GenderPreference, MatchFilters, QueueEntryEntity, SearchProfile,
};

/// Whether `filters` accept someone presenting `profile`.
///
/// A bound filter rejects profiles that leave the constrained attribute unknown.
pub fn admits(filters: &MatchFilters, profile: &SearchProfile) -> bool {
    let gender_ok = match filters.gender {
        GenderPreference::Any => true,
        GenderPreference::Male => profile.gender == Gender::Male,
        GenderPreference::Female => profile.gender == Gender::Female,
    };
    if !gender_ok {
        return false;
    }

    if filters.min_age.is_some() || filters.max_age.is_some() {
        let Some(age) = profile.age else {
            return false;
        };
        if filters.min_age.is_some_and(|min| age < min) {
            return false;
        }
        if filters.max_age.is_some_and(|max| age > max) {
            return false;
        }
    }

    if let Some(city) = filters.city.as_deref().filter(|city| !city.trim().is_empty()) {
        let same_city = profile
            .city
            .as_deref()
            .is_some_and(|candidate| same_place(candidate, city));
        if !same_city {
            return false;
        }
    }

    if !filters.provinces.is_empty() {
        let Some(province) = profile.province.as_deref() else {
            return false;
        };
        if !filters
            .provinces
            .iter()
            .any(|wanted| same_place(wanted, province))
        {
            return false;
        }
    }

    true
}

/// Both sides accept each other.
pub fn mutually_admits(a: &QueueEntryEntity, b: &QueueEntryEntity) -> bool {
    admits(&a.filters, &b.profile) && admits(&b.filters, &a.profile)
}

/// Earliest-queued entry that mutually matches `searcher` within its game type.
///
/// `queue` must be ordered by enqueue time; the searcher's own entry is skipped.
pub fn find_candidate<'a>(
    searcher: &QueueEntryEntity,
    queue: &'a [QueueEntryEntity],
) -> Option<&'a QueueEntryEntity> {
    queue.iter().find(|candidate| {
        candidate.user_id != searcher.user_id
            && candidate.game_type == searcher.game_type
            && mutually_admits(searcher, candidate)
    })
}

fn same_place(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
