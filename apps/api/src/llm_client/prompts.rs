// Prompt constants for resume extraction.
// The system instruction fixes the output contract; the extraction instruction
// describes every target field and is appended after the resume body.

/// System instruction: JSON only, no prose, no markdown fencing.
pub const RESUME_PARSER_SYSTEM: &str = "You are a resume parser. \
    Extract information from the resume text and return ONLY valid JSON \
    with no markdown formatting or additional text.";

/// Wraps the normalized resume body for the user turn.
pub const USER_TURN_TEMPLATE: &str = "Here is the resume text:\n\n{resume_body}\n\n{instruction}";

/// Extraction instruction listing every canonical field and its semantics.
pub const EXTRACTION_INSTRUCTION: &str = r#"Extract the following information from this resume and return ONLY a JSON object with no markdown formatting or backticks:
{
  "firstName": "candidate's first name",
  "lastName": "candidate's last name",
  "overallExperience": "total years of experience (e.g., '7.4 years')",
  "coreSkillExperience": "years in primary technology",
  "qualifications": "certifications or qualifications",
  "skill1": "top skill 1",
  "skill2": "top skill 2",
  "skill3": "top skill 3",
  "bachelorDuration": "bachelor duration if available",
  "bachelorDetails": "degree, course, university (e.g., 'B.Tech/B.E. SNS College of Engineering, Coimbatore')",
  "masterDuration": "master duration if available",
  "masterDetails": "degree, course, university if available",
  "employmentHistory": [
    {
      "duration": "Start Date to End Date (e.g., 'Jun 2018 to till date')",
      "company": "company name",
      "title": "job title",
      "technology": "technologies used",
      "role": "detailed role description and achievements"
    }
  ],
  "additionalDetails": "Extract ALL remaining professional information from the resume in a well-formatted, structured text format. Include these sections if present:

PROFESSIONAL SUMMARY
(Complete professional summary/objective from resume)

TECHNICAL SKILLS
(All technical skills organized by categories like: Cloud Platforms, Programming Languages, Databases, Tools, Frameworks, etc.)

PROFESSIONAL EXPERIENCE (DETAILED)
(For each job, include: Company, Duration, Project name, Tech Stack, Key Responsibilities in detail, Achievements)

KEY ACHIEVEMENTS
(All notable achievements, awards, recognitions)

CERTIFICATIONS & TRAINING
(All certifications, courses, training programs)

DOMAIN EXPERTISE
(Areas of domain knowledge and expertise)

PROJECTS
(Any academic or personal projects)

PUBLICATIONS & RESEARCH
(Any published papers or research work)

PROFESSIONAL MEMBERSHIPS
(Associations, communities, memberships)

Include ALL professional information that adds value to the candidate profile.
EXCLUDE: Phone numbers, email addresses, physical addresses, date of birth, national ID numbers, religion, marital status, nationality, languages spoken (unless professionally relevant), gender, photographs, passport details, Aadhar/PAN numbers.
Format this as clear, readable text with proper section headings and line breaks."
}

IMPORTANT: Return ONLY the JSON object, no other text."#;

pub fn build_user_turn(resume_body: &str, instruction: &str) -> String {
    USER_TURN_TEMPLATE
        .replace("{instruction}", instruction)
        .replace("{resume_body}", resume_body)
}
