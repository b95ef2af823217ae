//! Canonical candidate profile, the one shape passed between extraction and rendering.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateType {
    Internal,
    #[default]
    External,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Internal => "Internal",
            CandidateType::External => "External",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum YesNo {
    Yes,
    #[default]
    No,
}

impl YesNo {
    pub fn as_str(&self) -> &'static str {
        match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

/// One row of employment history. Order in the parent vector is chronological
/// order as entered or extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmploymentEntry {
    pub duration: String,
    pub company: String,
    pub title: String,
    pub technology: String,
    pub role: String,
}

/// Candidate profile as entered by the user and enriched by extraction.
///
/// Field names serialize in camelCase so the JSON matches the template token
/// vocabulary and the extraction contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateProfile {
    // Identity
    pub first_name: String,
    pub last_name: String,

    // Engagement metadata (human-entered)
    pub notice_period: String,
    pub candidate_type: CandidateType,
    /// ISO date (`YYYY-MM-DD`), empty when unknown.
    pub interview_date: String,
    /// ISO date (`YYYY-MM-DD`), empty when unknown.
    pub start_date: String,
    pub worked_for_ford: YesNo,
    pub worked_as_agency: YesNo,
    /// Only meaningful when `worked_for_ford` or `worked_as_agency` is `Yes`.
    pub cdsid: String,
    pub supervisor: String,
    pub project_duration: String,
    pub exit_reason: String,

    // Assessment
    pub overall_experience: String,
    pub core_skill_experience: String,
    pub qualifications: String,
    pub hacker_rank_score: String,
    pub hacker_rank_total: String,

    // Top three skills
    pub skill1: String,
    pub skill2: String,
    pub skill3: String,

    // Education
    pub bachelor_duration: String,
    pub bachelor_details: String,
    pub master_duration: String,
    pub master_details: String,

    pub employment_history: Vec<EmploymentEntry>,

    /// Residual extracted sections (summary, certifications, ...) kept verbatim.
    pub additional_details: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<ImagePayload>,
}

impl CandidateProfile {
    /// True when either engagement enum is `Yes`, i.e. the cdsid / supervisor /
    /// project duration / exit reason sub-fields apply.
    pub fn has_prior_engagement(&self) -> bool {
        self.worked_for_ford.is_yes() || self.worked_as_agency.is_yes()
    }

    /// Download name used for rendered documents.
    pub fn document_file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}_MSXi_Resume.{extension}",
            sanitize_file_component(&self.first_name),
            sanitize_file_component(&self.last_name)
        )
    }
}

fn sanitize_file_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// A photo carried as a data URL (`data:image/png;base64,....`).
///
/// Kept in its textual form so profiles round-trip through JSON storage; decoded
/// to bytes only when a document needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImagePayload(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub content_type: &'static str,
}

impl ImagePayload {
    pub fn new(data_url: impl Into<String>) -> Self {
        Self(data_url.into())
    }

    pub fn from_bytes(bytes: &[u8], content_type: &str) -> Self {
        Self(format!("data:{content_type};base64,{}", STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Strips the encoding header (everything up to the first comma) and
    /// base64-decodes the remainder.
    pub fn decode(&self) -> Result<DecodedImage, base64::DecodeError> {
        let raw = self.0.trim();
        let (header, body) = match raw.split_once(',') {
            Some((header, body)) => (header, body),
            None => ("", raw),
        };
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD.decode(compact)?;
        let (extension, content_type) = detect_image_format(header, &bytes);
        Ok(DecodedImage {
            bytes,
            extension,
            content_type,
        })
    }
}

fn detect_image_format(header: &str, bytes: &[u8]) -> (&'static str, &'static str) {
    let header = header.to_ascii_lowercase();
    if header.contains("image/jpeg")
        || header.contains("image/jpg")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
    {
        ("jpeg", "image/jpeg")
    } else if header.contains("image/gif") || bytes.starts_with(b"GIF8") {
        ("gif", "image/gif")
    } else {
        ("png", "image/png")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_serializes_camel_case_with_defaults() {
        let profile = CandidateProfile::default();
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["firstName"], "");
        assert_eq!(json["candidateType"], "External");
        assert_eq!(json["workedForFord"], "No");
        assert!(json["employmentHistory"].as_array().unwrap().is_empty());
        assert!(json.get("photo").is_none());
    }

    #[test]
    fn test_profile_deserializes_partial_input() {
        let profile: CandidateProfile =
            serde_json::from_str(r#"{"firstName":"Jane","workedAsAgency":"Yes"}"#).unwrap();
        assert_eq!(profile.first_name, "Jane");
        assert!(profile.has_prior_engagement());
        assert_eq!(profile.candidate_type, CandidateType::External);
    }

    #[test]
    fn test_document_file_name() {
        let profile = CandidateProfile {
            first_name: "Mary Ann".to_string(),
            last_name: "O'Neil".to_string(),
            ..Default::default()
        };
        assert_eq!(profile.document_file_name("docx"), "Mary_Ann_O_Neil_MSXi_Resume.docx");
    }

    #[test]
    fn test_image_payload_decodes_data_url() {
        let payload = ImagePayload::new("data:image/png;base64,aGVsbG8=");
        let image = payload.decode().unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.extension, "png");
    }

    #[test]
    fn test_image_payload_detects_jpeg() {
        let payload = ImagePayload::from_bytes(&[0xFF, 0xD8, 0xFF, 0xE0], "image/jpeg");
        let image = payload.decode().unwrap();
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.bytes.len(), 4);
    }

    #[test]
    fn test_image_payload_rejects_bad_base64() {
        assert!(ImagePayload::new("data:image/png;base64,@@@").decode().is_err());
    }
}
