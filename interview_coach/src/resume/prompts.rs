use super::JobPosting;
use std::fmt::Write;

pub const SUMMARY_SYSTEM: &str = "You are a career advisor. You read resumes and describe \
the candidate's skills, experience and seniority in plain prose.";

pub const RECOMMENDATION_SYSTEM: &str = "You are a career advisor. You explain which job \
openings suit a candidate and why, citing concrete evidence from their resume.";

pub fn summary_prompt(resume: &str) -> String {
    format!(
        "Summarize the following resume in one short paragraph. Mention the main \
technologies, domains and years of experience.\n\nResume:\n{}",
        resume
    )
}

pub fn recommendation_prompt(resume: &str, candidates: &[JobPosting]) -> String {
    let mut prompt = String::from(
        "Given the resume below and the candidate job openings, explain which openings \
fit the candidate best and why. Rank them from best to worst fit.\n\n",
    );

    if candidates.is_empty() {
        prompt.push_str("No matching openings were found. Suggest the kind of role to look for.\n");
    } else {
        prompt.push_str("Openings:\n");
        for (i, job) in candidates.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}: {}", i + 1, job.title, job.description);
        }
    }

    let _ = write!(prompt, "\nResume:\n{}", resume);
    prompt
}
