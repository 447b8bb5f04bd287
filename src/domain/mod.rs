use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Raw event exactly as returned by the external API. Only the ingestion
/// boundary and the mapper ever look inside it.
pub type RawEvent = Value;

/// Field payload handed to the local datastore on create/update
pub type FieldSet = BTreeMap<String, Value>;

/// Opaque identifier of a record in the local datastore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kinds of local records the importer writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Venue,
    Organizer,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Event => "event",
            EntityKind::Venue => "venue",
            EntityKind::Organizer => "organizer",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A venue embedded in a source event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueRecord {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub external_id: Option<String>,
}

/// An organizer embedded in a source event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrganizerRecord {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub external_id: Option<String>,
}

/// Normalized recurrence/series information for one event instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    /// Empty means "use `parent_event_id` instead"
    pub series_id: String,
    pub instance_number: u32,
    pub total_instances: u32,
    /// Semicolon-joined `KEY=VALUE` tokens, empty when no recurrence was given
    pub recurrence_rule: String,
    pub parent_event_id: String,
}

impl SeriesDescriptor {
    /// The identifier that groups instances together
    pub fn group_id(&self) -> &str {
        if self.series_id.is_empty() {
            &self.parent_event_id
        } else {
            &self.series_id
        }
    }
}

/// Problems found while mapping. They flag a record, they never reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingWarning {
    MissingExternalId,
    MissingStartDate,
    UnparseableDate { field: String, value: String },
    UnknownTimezone(String),
    EndBeforeStart,
}

impl MappingWarning {
    /// Short machine label used for metric tags
    pub fn label(&self) -> &'static str {
        match self {
            MappingWarning::MissingExternalId => "missing_external_id",
            MappingWarning::MissingStartDate => "missing_start_date",
            MappingWarning::UnparseableDate { .. } => "unparseable_date",
            MappingWarning::UnknownTimezone(_) => "unknown_timezone",
            MappingWarning::EndBeforeStart => "end_before_start",
        }
    }
}

impl fmt::Display for MappingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingWarning::MissingExternalId => write!(f, "no external id, derived one from content"),
            MappingWarning::MissingStartDate => write!(f, "no start date"),
            MappingWarning::UnparseableDate { field, value } => {
                write!(f, "could not parse {} '{}'", field, value)
            }
            MappingWarning::UnknownTimezone(tz) => write!(f, "unknown timezone '{}'", tz),
            MappingWarning::EndBeforeStart => write!(f, "end date is before start date"),
        }
    }
}

/// The fixed-shape event produced by the field mapper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub start_at: Option<DateTime<FixedOffset>>,
    pub end_at: Option<DateTime<FixedOffset>>,
    pub timezone: String,
    pub cost_summary: String,
    pub currency: String,
    pub venue: Option<VenueRecord>,
    pub organizer: Option<OrganizerRecord>,
    pub image_url: Option<String>,
    pub event_url: Option<String>,
    pub categories: Vec<String>,
    pub is_online: bool,
    pub series: Option<SeriesDescriptor>,
    #[serde(skip)]
    pub warnings: Vec<MappingWarning>,
}

impl CanonicalEvent {
    /// Datastore fields for this event. Related entity ids are added by the caller.
    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("title".into(), json!(self.title));
        fields.insert("content".into(), json!(self.content));
        fields.insert("excerpt".into(), json!(self.excerpt));
        fields.insert("start_at".into(), json!(format_instant(self.start_at)));
        fields.insert("end_at".into(), json!(format_instant(self.end_at)));
        fields.insert("timezone".into(), json!(self.timezone));
        fields.insert("cost".into(), json!(self.cost_summary));
        fields.insert("currency".into(), json!(self.currency));
        fields.insert("event_url".into(), json!(self.event_url.clone().unwrap_or_default()));
        fields.insert("categories".into(), json!(self.categories));
        fields.insert("is_online".into(), json!(self.is_online));
        fields
    }
}

fn format_instant(at: Option<DateTime<FixedOffset>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn insert_opt(fields: &mut FieldSet, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        fields.insert(key.to_string(), json!(v));
    }
}

impl VenueRecord {
    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("name".into(), json!(self.name));
        insert_opt(&mut fields, "address", &self.address);
        insert_opt(&mut fields, "city", &self.city);
        insert_opt(&mut fields, "region", &self.region);
        insert_opt(&mut fields, "postal_code", &self.postal_code);
        insert_opt(&mut fields, "country", &self.country);
        insert_opt(&mut fields, "phone", &self.phone);
        insert_opt(&mut fields, "email", &self.email);
        insert_opt(&mut fields, "website", &self.website);
        fields
    }
}

impl OrganizerRecord {
    pub fn to_fields(&self) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert("name".into(), json!(self.name));
        insert_opt(&mut fields, "phone", &self.phone);
        insert_opt(&mut fields, "email", &self.email);
        insert_opt(&mut fields, "website", &self.website);
        fields
    }
}
