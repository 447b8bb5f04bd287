//! Maps raw Humanitix event documents onto the canonical event shape.
//!
//! `FieldMapper::map` is total: every field it cannot resolve falls back to a
//! documented default and, where useful, a `MappingWarning` on the result.
//! Heuristic suggestions for unknown keys live in `suggest` and share only
//! the static rename table with the authoritative path.

pub mod pricing;
pub mod suggest;
pub mod table;

pub use suggest::{MappingSuggester, MappingSuggestion};
pub use table::{TargetField, RENAME_TABLE};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::common::constants::{DEFAULT_CURRENCY, EXCERPT_LENGTH};
use crate::domain::{CanonicalEvent, MappingWarning, OrganizerRecord, RawEvent, VenueRecord};
use table::{lookup, lookup_all};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Authoritative raw → canonical mapping
#[derive(Debug, Clone)]
pub struct FieldMapper {
    default_timezone: Tz,
    default_currency: String,
}

impl Default for FieldMapper {
    fn default() -> Self {
        Self::new(chrono_tz::UTC, DEFAULT_CURRENCY)
    }
}

impl FieldMapper {
    pub fn new(default_timezone: Tz, default_currency: impl Into<String>) -> Self {
        Self {
            default_timezone,
            default_currency: default_currency.into(),
        }
    }

    /// Map one raw event. Never fails; a non-object input maps to an all-defaults event.
    pub fn map(&self, raw: &RawEvent) -> CanonicalEvent {
        let empty = Map::new();
        let record = raw.as_object().unwrap_or(&empty);
        let mut warnings = Vec::new();

        let external_id = match lookup(record, TargetField::ExternalId).and_then(scalar_text) {
            Some(id) => id,
            None => {
                warnings.push(MappingWarning::MissingExternalId);
                fallback_external_id(raw)
            }
        };

        let title = text(record, TargetField::Title).unwrap_or_default();
        let content = lookup(record, TargetField::Content)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();
        let excerpt = text(record, TargetField::Excerpt).unwrap_or_else(|| derive_excerpt(&content));

        let tz = self.resolve_timezone(record, &mut warnings);
        let start_at = match lookup(record, TargetField::StartAt) {
            Some(value) => parse_date_field("start_at", value, tz, &mut warnings),
            None => {
                warnings.push(MappingWarning::MissingStartDate);
                None
            }
        };
        let end_at = lookup(record, TargetField::EndAt)
            .and_then(|value| parse_date_field("end_at", value, tz, &mut warnings));
        if let (Some(start), Some(end)) = (start_at, end_at) {
            if end < start {
                warnings.push(MappingWarning::EndBeforeStart);
            }
        }

        let currency = text(record, TargetField::Currency)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());
        let cost_summary = pricing::cost_summary(lookup_all(record, TargetField::Cost), &currency);

        let location = lookup(record, TargetField::Venue);
        let is_online = lookup(record, TargetField::Online)
            .and_then(as_flag)
            .unwrap_or(false)
            || location.map(location_is_online).unwrap_or(false);

        CanonicalEvent {
            external_id,
            title,
            content,
            excerpt,
            start_at,
            end_at,
            timezone: tz.name().to_string(),
            cost_summary,
            currency,
            venue: location.and_then(venue_record),
            organizer: lookup(record, TargetField::Organizer).and_then(organizer_record),
            image_url: lookup(record, TargetField::ImageUrl).and_then(image_url),
            event_url: text(record, TargetField::EventUrl),
            categories: collect_categories(record),
            is_online,
            series: None,
            warnings,
        }
    }

    fn resolve_timezone(&self, record: &Map<String, Value>, warnings: &mut Vec<MappingWarning>) -> Tz {
        match text(record, TargetField::Timezone) {
            Some(name) => name.parse::<Tz>().unwrap_or_else(|_| {
                warnings.push(MappingWarning::UnknownTimezone(name));
                self.default_timezone
            }),
            None => self.default_timezone,
        }
    }
}

fn parse_date_field(
    field: &str,
    value: &Value,
    tz: Tz,
    warnings: &mut Vec<MappingWarning>,
) -> Option<DateTime<FixedOffset>> {
    let parsed = parse_instant(value, tz);
    if parsed.is_none() {
        warnings.push(MappingWarning::UnparseableDate {
            field: field.to_string(),
            value: render(value),
        });
    }
    parsed
}

/// ISO-8601 with offset first, then naive local formats interpreted in `tz`,
/// then bare dates (midnight), then unix timestamps.
pub fn parse_instant(value: &Value, tz: Tz) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => parse_instant_str(s.trim(), tz),
        Value::Number(n) => {
            let mut secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Millisecond timestamps
            if secs.unsigned_abs() > 100_000_000_000 {
                secs /= 1000;
            }
            let utc = DateTime::from_timestamp(secs, 0)?;
            Some(utc.with_timezone(&tz).fixed_offset())
        }
        _ => None,
    }
}

fn parse_instant_str(s: &str, tz: Tz) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&tz).fixed_offset());
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return localize(naive, tz);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(|naive| localize(naive, tz))
}

/// Local wall time in `tz`. Ambiguous times take the earlier instant; times
/// inside a DST gap are shifted forward by the length of the gap.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<FixedOffset>> {
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Some(dt.fixed_offset());
    }
    let before_gap = tz
        .offset_from_utc_datetime(&naive.checked_sub_signed(Duration::days(1))?)
        .fix();
    let utc = naive.checked_sub_signed(Duration::seconds(before_gap.local_minus_utc() as i64))?;
    Some(tz.from_utc_datetime(&utc).fixed_offset())
}

/// Trimmed, non-empty string for the first table key of `target`
fn text(record: &Map<String, Value>, target: TargetField) -> Option<String> {
    lookup(record, target).and_then(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(scalar_text))
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic id for records that arrive without one
fn fallback_external_id(raw: &RawEvent) -> String {
    let digest = Sha256::digest(raw.to_string().as_bytes());
    format!("anon-{}", &hex::encode(digest)[..16])
}

fn derive_excerpt(content: &str) -> String {
    let stripped = TAG_RE
        .replace_all(content, " ")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    let collapsed = WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string();

    if collapsed.chars().count() <= EXCERPT_LENGTH {
        return collapsed;
    }
    let mut excerpt: String = collapsed.chars().take(EXCERPT_LENGTH).collect();
    excerpt.truncate(excerpt.trim_end().len());
    excerpt.push('…');
    excerpt
}

fn location_is_online(value: &Value) -> bool {
    value.get("type").and_then(Value::as_str) == Some("online")
}

fn venue_record(value: &Value) -> Option<VenueRecord> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(VenueRecord {
            name: name.trim().to_string(),
            ..Default::default()
        }),
        Value::Object(obj) => {
            let name = first_text(obj, &["name", "venueName", "venue_name", "title"])?;
            Some(VenueRecord {
                name,
                address: first_text(obj, &["address", "streetAddress", "street"]),
                city: first_text(obj, &["city", "suburb", "locality"]),
                region: first_text(obj, &["region", "state"]),
                postal_code: first_text(obj, &["postal_code", "postalCode", "postcode", "zip"]),
                country: first_text(obj, &["country", "countryCode"]),
                phone: first_text(obj, &["phone"]),
                email: first_text(obj, &["email"]),
                website: first_text(obj, &["website", "url"]),
                external_id: first_text(obj, &["external_id", "_id", "id", "placeId"]),
            })
        }
        _ => None,
    }
}

fn organizer_record(value: &Value) -> Option<OrganizerRecord> {
    match value {
        Value::String(name) if !name.trim().is_empty() => Some(OrganizerRecord {
            name: name.trim().to_string(),
            ..Default::default()
        }),
        Value::Object(obj) => {
            let name = first_text(obj, &["name", "organiserName", "organizer_name", "title"])?;
            Some(OrganizerRecord {
                name,
                phone: first_text(obj, &["phone"]),
                email: first_text(obj, &["email"]),
                website: first_text(obj, &["website", "url"]),
                external_id: first_text(obj, &["external_id", "_id", "id"]),
            })
        }
        _ => None,
    }
}

fn image_url(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => first_text(obj, &["url", "src", "href"]),
        other => scalar_text(other),
    }
}

/// Union of `category`, `categories` and `tags`, order-preserving and de-duplicated
fn collect_categories(record: &Map<String, Value>) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    let mut push = |name: Option<String>| {
        if let Some(name) = name {
            if !categories.contains(&name) {
                categories.push(name);
            }
        }
    };
    for value in lookup_all(record, TargetField::Categories) {
        match value {
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(obj) => push(first_text(obj, &["name", "label", "value"])),
                        other => push(scalar_text(other)),
                    }
                }
            }
            other => push(scalar_text(other)),
        }
    }
    categories
}
