//! Schema reconciler: merges a parsed extraction record into the canonical profile.
//!
//! Each canonical field carries an ordered alias list; the first alias present
//! with a non-empty value wins. A resolved value replaces the existing field only
//! when it is non-empty, so manual entries survive weak or partial extractions.
//! Total over any record: unknown keys and unusable value types are ignored.

use serde_json::Value;

use crate::extraction::parser::RawRecord;
use crate::models::profile::{CandidateProfile, EmploymentEntry};

/// Canonical scalar fields filled from extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    FirstName,
    LastName,
    OverallExperience,
    CoreSkillExperience,
    Qualifications,
    Skill1,
    Skill2,
    Skill3,
    BachelorDuration,
    BachelorDetails,
    MasterDuration,
    MasterDetails,
    AdditionalDetails,
}

/// Canonical field → accepted keys, in resolution order.
pub const FIELD_ALIASES: &[(ProfileField, &[&str])] = &[
    (ProfileField::FirstName, &["firstName", "first_name", "firstname", "FirstName"]),
    (ProfileField::LastName, &["lastName", "last_name", "lastname", "LastName"]),
    (
        ProfileField::OverallExperience,
        &["overallExperience", "overall_experience", "experience"],
    ),
    (
        ProfileField::CoreSkillExperience,
        &["coreSkillExperience", "core_skill_experience"],
    ),
    (
        ProfileField::Qualifications,
        &["qualifications", "qualification", "qualificationsList"],
    ),
    (ProfileField::Skill1, &["skill1", "topSkill1", "skill_1"]),
    (ProfileField::Skill2, &["skill2", "topSkill2", "skill_2"]),
    (ProfileField::Skill3, &["skill3", "topSkill3", "skill_3"]),
    (ProfileField::BachelorDuration, &["bachelorDuration", "bachelor_duration"]),
    (ProfileField::BachelorDetails, &["bachelorDetails", "bachelor_details"]),
    (ProfileField::MasterDuration, &["masterDuration", "master_duration"]),
    (ProfileField::MasterDetails, &["masterDetails", "master_details"]),
    (
        ProfileField::AdditionalDetails,
        &["additionalDetails", "additional_details", "otherDetails", "additionalInfo"],
    ),
];

pub const EMPLOYMENT_ALIASES: &[&str] = &["employmentHistory", "employment_history", "employment"];

const DURATION_ALIASES: &[&str] = &["duration", "period", "dates"];
const COMPANY_ALIASES: &[&str] = &["company", "employer", "organization"];
const TITLE_ALIASES: &[&str] = &["title", "jobTitle", "designation"];
const TECHNOLOGY_ALIASES: &[&str] = &["technology", "technologies", "techStack"];
const ROLE_ALIASES: &[&str] = &["role", "responsibilities", "description"];

impl ProfileField {
    fn slot<'a>(&self, profile: &'a mut CandidateProfile) -> &'a mut String {
        match self {
            ProfileField::FirstName => &mut profile.first_name,
            ProfileField::LastName => &mut profile.last_name,
            ProfileField::OverallExperience => &mut profile.overall_experience,
            ProfileField::CoreSkillExperience => &mut profile.core_skill_experience,
            ProfileField::Qualifications => &mut profile.qualifications,
            ProfileField::Skill1 => &mut profile.skill1,
            ProfileField::Skill2 => &mut profile.skill2,
            ProfileField::Skill3 => &mut profile.skill3,
            ProfileField::BachelorDuration => &mut profile.bachelor_duration,
            ProfileField::BachelorDetails => &mut profile.bachelor_details,
            ProfileField::MasterDuration => &mut profile.master_duration,
            ProfileField::MasterDetails => &mut profile.master_details,
            ProfileField::AdditionalDetails => &mut profile.additional_details,
        }
    }
}

/// Returns a new profile: `existing` with every non-empty resolved value applied.
pub fn reconcile(existing: &CandidateProfile, parsed: &RawRecord) -> CandidateProfile {
    let mut profile = existing.clone();

    for (field, aliases) in FIELD_ALIASES {
        if let Some(value) = resolve_scalar(parsed, aliases) {
            *field.slot(&mut profile) = value;
        }
    }

    if let Some(entries) = resolve_employment(parsed) {
        profile.employment_history = entries;
    }

    profile
}

/// True when any value in the record carries something a user would call data.
pub fn has_any_signal(parsed: &RawRecord) -> bool {
    parsed.values().any(has_signal)
}

fn has_signal(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// First alias whose value coerces to non-blank text.
fn resolve_scalar(record: &RawRecord, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|alias| record.get(*alias))
        .find_map(scalar_text)
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null | Value::Bool(_) | Value::Object(_) => return None,
    };
    (!text.trim().is_empty()).then_some(text)
}

/// First alias holding an array that yields at least one entry; replaces wholesale.
fn resolve_employment(record: &RawRecord) -> Option<Vec<EmploymentEntry>> {
    EMPLOYMENT_ALIASES
        .iter()
        .filter_map(|alias| record.get(*alias).and_then(Value::as_array))
        .map(|items| items.iter().filter_map(employment_entry).collect::<Vec<_>>())
        .find(|entries| !entries.is_empty())
}

fn employment_entry(value: &Value) -> Option<EmploymentEntry> {
    let record = value.as_object()?;
    let field = |aliases: &[&str]| resolve_scalar(record, aliases).unwrap_or_default();
    Some(EmploymentEntry {
        duration: field(DURATION_ALIASES),
        company: field(COMPANY_ALIASES),
        title: field(TITLE_ALIASES),
        technology: field(TECHNOLOGY_ALIASES),
        role: field(ROLE_ALIASES),
    })
}
