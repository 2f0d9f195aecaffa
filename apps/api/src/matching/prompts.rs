// LLM prompt constants for model-assisted match scoring.

/// System prompt for match scoring — enforces JSON-only output.
pub const MATCH_SCORE_SYSTEM: &str =
    "You are an expert technical recruiter evaluating how well a candidate's resume \
    matches a job description. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Match scoring prompt template. Replace `{resume_text}` and
/// `{job_description}` before sending.
pub const MATCH_SCORE_PROMPT_TEMPLATE: &str = r#"Evaluate how well the candidate's resume matches the job description.

Return a JSON object with this EXACT schema (no extra fields):
{
  "score": 74,
  "matched_skills": ["Rust", "PostgreSQL"],
  "missing_skills": ["Kubernetes"],
  "experience_assessment": "One sentence on whether the experience level fits.",
  "recommended_edits": [
    "Surface the 2021 platform migration project near the top."
  ]
}

Scoring rules:
- "score" is an integer 0-100: 0 means no overlap at all, 100 means the resume
  covers every requirement at the expected seniority.
- Weigh hard requirements over nice-to-haves.
- Base the assessment ONLY on what the resume states. Do NOT assume unstated skills.

RESUME:
{resume_text}

JOB DESCRIPTION:
{job_description}"#;
