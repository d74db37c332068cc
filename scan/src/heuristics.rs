//! Stress heuristics: workload items to tagged stressful items, and tag ranking.

use chrono::{DateTime, NaiveDate, Utc};

use walkworthy_core::records::{
    MAX_STRESS_TAGS, StressfulItem, WorkloadItem, WorkloadKind, iso_timestamp,
};

pub const DEFAULT_MAX_ITEMS: usize = 20;
pub const MAX_RANKED_TAGS: usize = 4;
pub const DEFAULT_TAGS: [&str; 4] = ["anxiety", "stress", "rest", "peace"];

const HEAVY_WEIGHT_POINTS: f64 = 20.0;
const DEADLINE_HOURS: f64 = 48.0;
const URGENT_HOURS: f64 = 6.0;

/// Map workload items to stressful items, keeping input order. Items without a
/// usable title are dropped; at most `max_items` are returned.
pub fn to_stressful_items(
    items: &[WorkloadItem],
    max_items: usize,
    now: DateTime<Utc>,
) -> Vec<StressfulItem> {
    items
        .iter()
        .filter_map(|item| to_stressful_item(item, now))
        .take(max_items)
        .collect()
}

fn to_stressful_item(item: &WorkloadItem, now: DateTime<Utc>) -> Option<StressfulItem> {
    let title = item
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_string();

    let due = [item.due_at.as_deref(), item.todo_date.as_deref()]
        .into_iter()
        .flatten()
        .find_map(parse_timestamp);
    let hours_until_due = due.map(|d| (d - now).num_milliseconds() as f64 / 3_600_000.0);

    let mut tags: Vec<&'static str> = Vec::with_capacity(8);
    let mut tag = |t: &'static str| {
        if !tags.contains(&t) {
            tags.push(t);
        }
    };

    tag("encouragement");
    match item.kind {
        WorkloadKind::Exam => {
            tag("exam");
            tag("courage");
        }
        WorkloadKind::Assignment => tag("assignment"),
        WorkloadKind::Event => {}
    }
    if item.points_possible.is_some_and(|p| p >= HEAVY_WEIGHT_POINTS) {
        tag("weight");
        tag("pressure");
    }
    if let Some(hours) = hours_until_due {
        if hours <= DEADLINE_HOURS {
            tag("deadline");
        }
        if hours <= URGENT_HOURS {
            tag("urgency");
        }
        if hours < 0.0 {
            tag("overdue");
        }
    }
    tags.truncate(MAX_STRESS_TAGS);

    Some(StressfulItem {
        kind: item.kind,
        title,
        course: item.course_id.clone(),
        due_at: due.map(iso_timestamp),
        stress_tags: tags.into_iter().map(ToString::to_string).collect(),
        weight: item.points_possible,
    })
}

/// RFC 3339 timestamps, or bare dates taken as UTC midnight.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Most frequent tags across items, case-insensitive, padded with the default
/// tags at count 1. Ties keep first-seen order. At most four tags.
pub fn rank_tags(items: &[StressfulItem]) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for tag in items.iter().flat_map(|i| i.stress_tags.iter()) {
        let normalized = tag.to_lowercase();
        match counts.iter_mut().find(|(t, _)| *t == normalized) {
            Some((_, count)) => *count += 1,
            None => counts.push((normalized, 1)),
        }
    }
    for default in DEFAULT_TAGS {
        if !counts.iter().any(|(t, _)| t == default) {
            counts.push((default.to_string(), 1));
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(MAX_RANKED_TAGS)
        .map(|(tag, _)| tag)
        .collect()
}

/// Deduplicated lowercase tags in first-seen order.
pub fn unique_tags(items: &[StressfulItem]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for tag in items.iter().flat_map(|i| i.stress_tags.iter()) {
        let normalized = tag.to_lowercase();
        if !seen.contains(&normalized) {
            seen.push(normalized);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-17T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn item(kind: WorkloadKind, title: Option<&str>, due_in_hours: Option<i64>) -> WorkloadItem {
        WorkloadItem {
            id: "1".to_string(),
            kind,
            title: title.map(ToString::to_string),
            course_id: Some("42".to_string()),
            due_at: due_in_hours.map(|h| iso_timestamp(now() + Duration::hours(h))),
            todo_date: None,
            points_possible: None,
            html_url: None,
        }
    }

    #[test]
    fn exam_due_soon_gets_exam_courage_deadline_urgency() {
        let items = to_stressful_items(&[item(WorkloadKind::Exam, Some("Midterm"), Some(3))], 20, now());
        assert_eq!(
            items[0].stress_tags,
            vec!["encouragement", "exam", "courage", "deadline", "urgency"]
        );
        assert_eq!(items[0].due_at.as_deref(), Some("2026-10-17T15:00:00.000Z"));
    }

    #[test]
    fn titleless_items_are_dropped() {
        let items = to_stressful_items(
            &[
                item(WorkloadKind::Assignment, None, Some(10)),
                item(WorkloadKind::Assignment, Some("   "), Some(10)),
                item(WorkloadKind::Assignment, Some("  Essay 2 "), Some(100)),
            ],
            20,
            now(),
        );
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Essay 2");
        assert_eq!(items[0].stress_tags, vec!["encouragement", "assignment"]);
    }

    #[test]
    fn overdue_heavy_exam_is_capped_at_six_tags() {
        let mut overdue = item(WorkloadKind::Exam, Some("Final"), Some(-2));
        overdue.points_possible = Some(100.0);
        let items = to_stressful_items(&[overdue], 20, now());
        assert_eq!(
            items[0].stress_tags,
            vec!["encouragement", "exam", "courage", "weight", "pressure", "deadline"]
        );
        assert_eq!(items[0].weight, Some(100.0));
    }

    #[test]
    fn todo_date_is_used_and_bad_timestamps_are_ignored() {
        let mut todo = item(WorkloadKind::Event, Some("Reading"), None);
        todo.todo_date = Some("2026-10-18".to_string());
        let mut garbage = item(WorkloadKind::Event, Some("Club"), None);
        garbage.due_at = Some("next tuesday".to_string());

        let items = to_stressful_items(&[todo, garbage], 20, now());
        assert_eq!(items[0].stress_tags, vec!["encouragement", "deadline"]);
        assert_eq!(items[1].stress_tags, vec!["encouragement"]);
        assert!(items[1].due_at.is_none());
    }

    #[test]
    fn output_is_bounded_and_ordered() {
        let source: Vec<_> = (0..30)
            .map(|i| {
                let mut it = item(WorkloadKind::Event, Some("x"), None);
                it.id = i.to_string();
                it.title = Some(format!("item {i}"));
                it
            })
            .collect();
        let items = to_stressful_items(&source, 25, now());
        assert_eq!(items.len(), 25);
        assert_eq!(items[0].title, "item 0");
        assert_eq!(items[24].title, "item 24");
    }

    #[test]
    fn rank_tags_on_empty_input_is_the_defaults() {
        assert_eq!(rank_tags(&[]), vec!["anxiety", "stress", "rest", "peace"]);
    }

    #[test]
    fn rank_tags_orders_by_frequency_then_first_seen() {
        let items = to_stressful_items(
            &[
                item(WorkloadKind::Exam, Some("Quiz 1"), Some(3)),
                item(WorkloadKind::Exam, Some("Quiz 2"), Some(30)),
                item(WorkloadKind::Assignment, Some("Lab"), Some(200)),
            ],
            20,
            now(),
        );
        let ranked = rank_tags(&items);
        assert_eq!(ranked, vec!["encouragement", "exam", "courage", "deadline"]);
        assert!(ranked.len() <= MAX_RANKED_TAGS);
    }

    #[test]
    fn unique_tags_dedupes_case_insensitively() {
        let mut a = to_stressful_items(&[item(WorkloadKind::Exam, Some("A"), None)], 20, now());
        a[0].stress_tags.push("EXAM".to_string());
        assert_eq!(unique_tags(&a), vec!["encouragement", "exam", "courage"]);
    }
}
