use serde::Serialize;
use serde_json::Value;

use super::table::{is_known_key, TargetField};
use crate::domain::RawEvent;

const SAMPLE_LENGTH: usize = 60;

/// Keyword heuristics, checked in order against the lowercased key.
/// More specific words come before generic ones ("end" before "date").
static KEYWORD_RULES: &[(&str, TargetField)] = &[
    ("venue", TargetField::Venue),
    ("location", TargetField::Venue),
    ("address", TargetField::Venue),
    ("organi", TargetField::Organizer),
    ("host", TargetField::Organizer),
    ("currency", TargetField::Currency),
    ("price", TargetField::Cost),
    ("ticket", TargetField::Cost),
    ("cost", TargetField::Cost),
    ("fee", TargetField::Cost),
    ("image", TargetField::ImageUrl),
    ("banner", TargetField::ImageUrl),
    ("photo", TargetField::ImageUrl),
    ("thumbnail", TargetField::ImageUrl),
    ("recur", TargetField::Series),
    ("series", TargetField::Series),
    ("online", TargetField::Online),
    ("virtual", TargetField::Online),
    ("zone", TargetField::Timezone),
    ("end", TargetField::EndAt),
    ("finish", TargetField::EndAt),
    ("start", TargetField::StartAt),
    ("begin", TargetField::StartAt),
    ("date", TargetField::StartAt),
    ("time", TargetField::StartAt),
    ("tag", TargetField::Categories),
    ("categor", TargetField::Categories),
    ("genre", TargetField::Categories),
    ("url", TargetField::EventUrl),
    ("link", TargetField::EventUrl),
    ("summary", TargetField::Excerpt),
    ("desc", TargetField::Content),
    ("title", TargetField::Title),
    ("name", TargetField::Title),
];

/// One guessed mapping for a key the static table does not cover
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingSuggestion {
    pub source_field: String,
    pub suggested_target_field: TargetField,
    pub sample_value: String,
}

/// Operator-facing schema discovery. Diagnostic only: nothing it returns is
/// ever consulted by `FieldMapper::map`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MappingSuggester;

impl MappingSuggester {
    pub fn new() -> Self {
        Self
    }

    /// Lazily yield suggestions for the top-level keys of `raw`, in key order
    pub fn suggestions<'a>(&self, raw: &'a RawEvent) -> impl Iterator<Item = MappingSuggestion> + 'a {
        raw.as_object()
            .into_iter()
            .flat_map(|obj| obj.iter())
            .filter(|(key, _)| !is_known_key(key))
            .filter_map(|(key, value)| {
                guess_target(key).map(|target| MappingSuggestion {
                    source_field: key.clone(),
                    suggested_target_field: target,
                    sample_value: sample(value),
                })
            })
    }

    /// All suggestions, sorted by source field
    pub fn suggest(&self, raw: &RawEvent) -> Vec<MappingSuggestion> {
        let mut out: Vec<_> = self.suggestions(raw).collect();
        out.sort_by(|a, b| a.source_field.cmp(&b.source_field));
        out
    }
}

fn guess_target(key: &str) -> Option<TargetField> {
    let lowered = key.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, target)| *target)
}

fn sample(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() <= SAMPLE_LENGTH {
        rendered
    } else {
        let mut cut: String = rendered.chars().take(SAMPLE_LENGTH).collect();
        cut.push('…');
        cut
    }
}
