// LLM prompt constants for tailored document generation.

/// System prompt for cover letters — plain text output, grounded in the resume.
pub const COVER_LETTER_SYSTEM: &str =
    "You are an expert career writer producing concise, specific cover letters. \
    Write in plain text with no markdown headers. \
    Ground every claim in the candidate's resume. \
    Do NOT invent experience, employers, dates, or metrics not present in the resume. \
    Keep it under 300 words.";

/// Cover letter prompt template. Replace: {job_title}, {company},
/// {recruiter_line}, {job_description}, {resume_text}.
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"Write a cover letter for the position below.

POSITION: {job_title} at {company}
{recruiter_line}

Guidelines:
- Open with a direct statement of fit for this specific role.
- Pick the 2-3 strongest overlaps between the resume and the job description and lead with those.
- Acknowledge at most one gap honestly, framed as a growth area.
- Close with a specific, low-pressure call to action.

JOB DESCRIPTION:
{job_description}

RESUME:
{resume_text}"#;

/// System prompt for resume tailoring — reorders and rewords, never invents.
pub const TAILORED_RESUME_SYSTEM: &str =
    "You are an expert resume editor tailoring an existing resume to a specific job. \
    You may reorder sections, reword bullets, and cut irrelevant material. \
    You MUST NOT add skills, employers, titles, dates, or metrics that are not \
    in the original resume. Return the full tailored resume as plain text.";

/// Tailored resume prompt template. Replace: {job_title}, {company},
/// {job_description}, {resume_text}.
pub const TAILORED_RESUME_PROMPT_TEMPLATE: &str = r#"Tailor the resume below for this position.

POSITION: {job_title} at {company}

Guidelines:
- Move the most relevant experience and skills to the top.
- Mirror the job description's terminology where the resume already supports it.
- Trim bullets that add nothing for this role.
- Preserve all factual content: employers, titles, dates, metrics.

JOB DESCRIPTION:
{job_description}

ORIGINAL RESUME:
{resume_text}"#;
