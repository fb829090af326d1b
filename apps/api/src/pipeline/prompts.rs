// All LLM prompt constants for the resume pipeline.
// Templates use `{placeholder}` markers replaced before sending.

/// System prompt for PDF text extraction via the document-understanding model.
pub const EXTRACT_SYSTEM: &str = "Extract all text content from this document. \
    Format it cleanly and preserve structure like sections, bullet points, \
    and contact information.";

/// User prompt wrapping the base64-encoded document. Replace `{base64_pdf}`.
pub const EXTRACT_PROMPT_TEMPLATE: &str = "Please extract all text from this document \
(base64-encoded PDF follows):\ndata:application/pdf;base64,{base64_pdf}";

/// System prompt for structured resume parsing — enforces JSON-only output.
pub const PARSE_SYSTEM: &str = "You are a resume parser. Respond only with valid JSON.";

/// Structured parsing prompt. Replace `{resume_text}` before sending.
pub const PARSE_PROMPT_TEMPLATE: &str = r#"Extract structured information from this resume text and return a JSON object with the following structure:
{
  "personal_info": {
    "name": "Full Name",
    "email": "email@example.com",
    "phone": "phone number",
    "location": "city, state/country"
  },
  "skills": ["skill1", "skill2", "skill3"],
  "experience": [
    {
      "title": "Job Title",
      "company": "Company Name",
      "duration": "Start - End dates",
      "description": "Job description"
    }
  ],
  "education": [
    {
      "degree": "Degree Type",
      "institution": "University/School Name",
      "year": "Graduation year",
      "gpa": "GPA if available"
    }
  ],
  "certifications": ["certification1", "certification2"],
  "projects": [
    {
      "name": "Project Name",
      "description": "Project description",
      "technologies": ["tech1", "tech2"]
    }
  ]
}

Resume text:
{resume_text}"#;

/// System prompt for relevance scoring — enforces JSON-only output.
pub const ANALYZE_SYSTEM: &str = "You are an expert recruiter. Respond only with valid JSON.";

/// Relevance scoring prompt. Replace `{title}`, `{company}`,
/// `{experience_level}`, `{location}`, `{required_skills}`,
/// `{preferred_skills}`, `{description}`, `{resume_text}` before sending.
/// Absent optional fields must be substituted with "Not specified".
pub const ANALYZE_PROMPT_TEMPLATE: &str = r#"You are an expert recruiter and career advisor. Analyze the following resume against the job description and provide a detailed assessment.

JOB DESCRIPTION:
Title: {title}
Company: {company}
Experience Level: {experience_level}
Location: {location}
Required Skills: {required_skills}
Preferred Skills: {preferred_skills}
Description: {description}

RESUME CONTENT:
{resume_text}

Please provide a JSON response with the following structure:
{
  "relevance_score": <number 0-100>,
  "verdict": "<High|Medium|Low>",
  "hard_match_score": <number 0-100>,
  "soft_match_score": <number 0-100>,
  "missing_skills": ["skill1", "skill2"],
  "improvement_suggestions": ["suggestion1", "suggestion2"],
  "detailed_analysis": {
    "strengths": ["strength1", "strength2"],
    "weaknesses": ["weakness1", "weakness2"],
    "experience_match": "explanation",
    "skills_match": "explanation",
    "education_match": "explanation"
  }
}

Scoring criteria:
- Hard Match (40%): Direct keyword matching for skills, certifications, education, job titles
- Soft Match (60%): Semantic understanding, relevant experience, transferable skills
- Relevance Score: Weighted combination of hard and soft match
- Verdict: High (80-100), Medium (50-79), Low (0-49)"#;
