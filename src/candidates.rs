//! Candidate Assembler: turns search hits into annotated candidates.
//!
//! Default ordering is plain descending similarity (stable). The opt-in
//! [`prioritize_resolved`] comparator implements the resolution-first
//! policy explicitly instead of leaving it to the text generator.

use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::models::{Candidate, ResolvedStatus, SearchHit};

pub const BADGE_UNCONFIRMED: &str = "Attempted (not confirmed): solution may be incomplete.";
pub const BADGE_UNKNOWN: &str = "Unknown resolution status.";

/// Width of the similarity bands inside which resolution status outranks score.
pub const SCORE_BAND: f32 = 0.02;

/// Interpret a free-text resolved flag. Never fails.
///
/// `true`/`false` match case-insensitively; otherwise numeric values are
/// truthy when nonzero; anything else is [`ResolvedStatus::Unknown`].
pub fn parse_resolved(raw: &str) -> ResolvedStatus {
    let value = raw.trim();
    if value.eq_ignore_ascii_case("true") {
        return ResolvedStatus::Resolved;
    }
    if value.eq_ignore_ascii_case("false") {
        return ResolvedStatus::Unresolved;
    }
    match value.parse::<f64>() {
        Ok(n) if n.is_nan() => ResolvedStatus::Unknown,
        Ok(n) if n == 0.0 => ResolvedStatus::Unresolved,
        Ok(_) => ResolvedStatus::Resolved,
        Err(_) => ResolvedStatus::Unknown,
    }
}

pub fn status_badge(status: ResolvedStatus) -> Option<String> {
    match status {
        ResolvedStatus::Resolved => None,
        ResolvedStatus::Unresolved => Some(BADGE_UNCONFIRMED.to_string()),
        ResolvedStatus::Unknown => Some(BADGE_UNKNOWN.to_string()),
    }
}

/// `YYYY-MM-DD`, falling back to `MM/DD/YYYY`.
pub fn parse_candidate_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%m/%d/%Y"))
        .ok()
}

pub fn to_candidate(hit: &SearchHit) -> Candidate {
    let meta = &hit.metadata;
    let resolved = parse_resolved(&meta.resolved);
    let ticket_id = if meta.ticket_id.is_empty() {
        hit.id.clone()
    } else {
        meta.ticket_id.clone()
    };

    Candidate {
        ticket_id,
        problem: meta.problem.clone(),
        resolution: meta.resolution.clone(),
        date: meta.date.clone(),
        agent_name: meta.agent_name.clone(),
        category: meta.category.clone(),
        resolved,
        score: hit.score,
        badge: status_badge(resolved),
        parsed_date: parse_candidate_date(&meta.date),
    }
}

/// One candidate per hit, ordered by descending score; ties keep hit order.
pub fn assemble_candidates(hits: &[SearchHit]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = hits.iter().map(to_candidate).collect();
    candidates.sort_by(|a, b| by_score(a.score, b.score));
    candidates
}

/// Reorder so confirmed fixes lead among near-equal matches.
///
/// Candidates are grouped into [`SCORE_BAND`]-wide similarity bands; within
/// a band resolved beats unknown beats unresolved, then higher score, then
/// more recent date. Stable.
pub fn prioritize_resolved(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        band(b.score)
            .cmp(&band(a.score))
            .then_with(|| status_rank(a.resolved).cmp(&status_rank(b.resolved)))
            .then_with(|| by_score(a.score, b.score))
            .then_with(|| b.parsed_date.cmp(&a.parsed_date))
    });
}

fn band(score: f32) -> i64 {
    if score.is_nan() {
        i64::MIN
    } else {
        (score / SCORE_BAND).floor() as i64
    }
}

fn status_rank(status: ResolvedStatus) -> u8 {
    match status {
        ResolvedStatus::Resolved => 0,
        ResolvedStatus::Unknown => 1,
        ResolvedStatus::Unresolved => 2,
    }
}

fn by_score(a: f32, b: f32) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;

    fn hit(id: &str, score: f32, resolved: &str, date: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            score,
            metadata: DocumentMetadata {
                ticket_id: id.to_string(),
                resolved: resolved.to_string(),
                date: date.to_string(),
                ..DocumentMetadata::default()
            },
        }
    }

    #[test]
    fn resolved_flag_parsing() {
        assert_eq!(parse_resolved("True"), ResolvedStatus::Resolved);
        assert_eq!(parse_resolved("TRUE"), ResolvedStatus::Resolved);
        assert_eq!(parse_resolved("1"), ResolvedStatus::Resolved);
        assert_eq!(parse_resolved("2.5"), ResolvedStatus::Resolved);
        assert_eq!(parse_resolved("false"), ResolvedStatus::Unresolved);
        assert_eq!(parse_resolved("0"), ResolvedStatus::Unresolved);
        assert_eq!(parse_resolved("0.0"), ResolvedStatus::Unresolved);
        assert_eq!(parse_resolved(""), ResolvedStatus::Unknown);
        assert_eq!(parse_resolved("maybe"), ResolvedStatus::Unknown);
        assert_eq!(parse_resolved("NaN"), ResolvedStatus::Unknown);
    }

    #[test]
    fn badges_follow_status() {
        assert_eq!(status_badge(ResolvedStatus::Resolved), None);
        assert_eq!(
            status_badge(ResolvedStatus::Unresolved).as_deref(),
            Some(BADGE_UNCONFIRMED)
        );
        assert_eq!(
            status_badge(ResolvedStatus::Unknown).as_deref(),
            Some(BADGE_UNKNOWN)
        );
    }

    #[test]
    fn dates_accept_two_layouts() {
        assert_eq!(
            parse_candidate_date("2024-01-15"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_candidate_date("01/15/2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_candidate_date("last week"), None);
    }

    #[test]
    fn assembly_sorts_by_score_stably() {
        let hits = vec![
            hit("TCKT-1", 0.5, "true", ""),
            hit("TCKT-2", 0.9, "false", ""),
            hit("TCKT-3", 0.5, "", ""),
        ];
        let candidates = assemble_candidates(&hits);
        let ids: Vec<&str> = candidates.iter().map(|c| c.ticket_id.as_str()).collect();
        assert_eq!(ids, vec!["TCKT-2", "TCKT-1", "TCKT-3"]);
        assert_eq!(candidates[0].badge.as_deref(), Some(BADGE_UNCONFIRMED));
        assert_eq!(candidates[1].badge, None);
    }

    #[test]
    fn ticket_id_falls_back_to_hit_id() {
        let mut h = hit("TCKT-9", 0.1, "", "");
        h.metadata.ticket_id.clear();
        assert_eq!(to_candidate(&h).ticket_id, "TCKT-9");
    }

    #[test]
    fn prioritization_prefers_resolved_within_band() {
        let hits = vec![
            hit("unresolved", 0.811, "false", "2024-03-01"),
            hit("resolved", 0.805, "true", "2023-01-01"),
            hit("distant", 0.50, "true", "2024-05-01"),
        ];
        let mut candidates = assemble_candidates(&hits);
        prioritize_resolved(&mut candidates);
        let ids: Vec<&str> = candidates.iter().map(|c| c.ticket_id.as_str()).collect();
        assert_eq!(ids, vec!["resolved", "unresolved", "distant"]);
    }

    #[test]
    fn prioritization_breaks_ties_by_recency() {
        let hits = vec![
            hit("old", 0.7, "true", "2022-06-01"),
            hit("new", 0.7, "true", "06/01/2024"),
        ];
        let mut candidates = assemble_candidates(&hits);
        prioritize_resolved(&mut candidates);
        assert_eq!(candidates[0].ticket_id, "new");
    }
}
