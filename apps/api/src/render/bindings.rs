//! Flat binding map built from a profile: every template token plus derived
//! convenience fields (formatted dates, checkbox glyphs, combined score, presence flags).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};

use crate::models::profile::{CandidateProfile, EmploymentEntry, ImagePayload, YesNo};

pub const CHECKED_BOX: &str = "\u{2611}";
pub const EMPTY_BOX: &str = "\u{2610}";
/// Rendered in place of a missing or unreadable date.
pub const DATE_PLACEHOLDER: &str = "DD-Mon-YYYY";

/// A value bound to a template token.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    Flag(bool),
    List(Vec<Bindings>),
    Image(ImagePayload),
}

pub type Bindings = BTreeMap<String, TemplateValue>;

impl TemplateValue {
    pub fn text(value: impl Into<String>) -> Self {
        TemplateValue::Text(value.into())
    }

    /// Section semantics: whether `{#tag}` renders at least once.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Text(text) => !text.is_empty(),
            TemplateValue::Flag(flag) => *flag,
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Image(payload) => !payload.is_empty(),
        }
    }
}

/// Formats an ISO date as `DD-Mon-YYYY`; `None` when empty or unparseable.
pub fn format_date(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))?;
    Some(date.format("%d-%b-%Y").to_string())
}

fn date_or_placeholder(value: &str) -> TemplateValue {
    TemplateValue::Text(format_date(value).unwrap_or_else(|| DATE_PLACEHOLDER.to_string()))
}

fn glyph(checked: bool) -> TemplateValue {
    TemplateValue::text(if checked { CHECKED_BOX } else { EMPTY_BOX })
}

fn insert_yes_no(bindings: &mut Bindings, name: &str, value: YesNo) {
    bindings.insert(name.to_string(), TemplateValue::text(value.as_str()));
    bindings.insert(format!("{name}Yes"), glyph(value.is_yes()));
    bindings.insert(format!("{name}No"), glyph(!value.is_yes()));
}

fn employment_bindings(entry: &EmploymentEntry) -> Bindings {
    [
        ("duration", &entry.duration),
        ("company", &entry.company),
        ("title", &entry.title),
        ("technology", &entry.technology),
        ("role", &entry.role),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), TemplateValue::text(value.as_str())))
    .collect()
}

/// Builds the binding map for `profile`. An explicit `photo` takes precedence over
/// the one stored on the profile.
pub fn build_bindings(profile: &CandidateProfile, photo: Option<&ImagePayload>) -> Bindings {
    let mut bindings = Bindings::new();
    let mut text = |key: &str, value: &str| {
        bindings.insert(key.to_string(), TemplateValue::text(value));
    };

    text("firstName", &profile.first_name);
    text("lastName", &profile.last_name);
    text("noticePeriod", &profile.notice_period);
    text("candidateType", profile.candidate_type.as_str());
    text("cdsid", &profile.cdsid);
    text("supervisor", &profile.supervisor);
    text("projectDuration", &profile.project_duration);
    text("exitReason", &profile.exit_reason);
    text("overallExperience", &profile.overall_experience);
    text("coreSkillExperience", &profile.core_skill_experience);
    text("qualifications", &profile.qualifications);
    text("hackerRankScore", &profile.hacker_rank_score);
    text("hackerRankTotal", &profile.hacker_rank_total);
    text(
        "hackerRankFull",
        &format!("{} / {}", profile.hacker_rank_score, profile.hacker_rank_total),
    );
    text("skill1", &profile.skill1);
    text("skill2", &profile.skill2);
    text("skill3", &profile.skill3);
    text("bachelorDuration", &profile.bachelor_duration);
    text("bachelorDetails", &profile.bachelor_details);
    text("masterDuration", &profile.master_duration);
    text("masterDetails", &profile.master_details);

    let additional = profile.additional_details.trim();
    text("additionalDetails", additional);

    bindings.insert("interviewDate".to_string(), date_or_placeholder(&profile.interview_date));
    bindings.insert("startDate".to_string(), date_or_placeholder(&profile.start_date));
    insert_yes_no(&mut bindings, "workedForFord", profile.worked_for_ford);
    insert_yes_no(&mut bindings, "workedAsAgency", profile.worked_as_agency);

    // Gates the cdsid / supervisor / projectDuration / exitReason block.
    bindings.insert(
        "hasPriorEngagement".to_string(),
        TemplateValue::Flag(profile.has_prior_engagement()),
    );
    bindings.insert(
        "hasAdditionalDetails".to_string(),
        TemplateValue::Flag(!additional.is_empty()),
    );

    bindings.insert(
        "employmentHistory".to_string(),
        TemplateValue::List(profile.employment_history.iter().map(employment_bindings).collect()),
    );

    let photo = photo
        .or(profile.photo.as_ref())
        .filter(|payload| !payload.is_empty());
    bindings.insert("hasPhoto".to_string(), TemplateValue::Flag(photo.is_some()));
    bindings.insert(
        "photo".to_string(),
        photo.map_or_else(|| TemplateValue::text(""), |p| TemplateValue::Image(p.clone())),
    );

    bindings
}
