mod job_index;
mod llm_client;
mod prompts;

pub use job_index::KeywordJobIndex;
pub use llm_client::{LlmClient, LlmError};

use crate::config::{LlmConfig, ResumeConfig};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fs, io, path::Path, sync::Arc};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub description: String,
}

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("resume is empty")]
    EmptyResume,
    #[error("language model request failed: {0}")]
    Llm(#[from] LlmError),
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read job catalog: {0}")]
    Io(#[from] io::Error),
    #[error("invalid job catalog: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, resume: &str) -> Result<String, ResumeError>;
}

#[async_trait]
pub trait Recommender: Send + Sync {
    async fn recommend(&self, resume: &str, candidates: &[JobPosting])
        -> Result<String, ResumeError>;
}

pub trait JobSearch: Send + Sync {
    fn search(&self, query: &str, top_k: usize) -> Vec<usize>;
}

/// A YAML list of `{title, description}` entries.
pub fn load_job_catalog(path: &Path) -> Result<Vec<JobPosting>, CatalogError> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(&contents)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub summary: String,
    pub recommended_titles: Vec<String>,
    pub recommended_descriptions: Vec<String>,
    pub recommendation_reasoning: String,
}

pub struct ResumePipeline {
    summarizer: Arc<dyn Summarizer>,
    search: Arc<dyn JobSearch>,
    recommender: Arc<dyn Recommender>,
    catalog: Vec<JobPosting>,
    top_k: usize,
}

impl ResumePipeline {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        search: Arc<dyn JobSearch>,
        recommender: Arc<dyn Recommender>,
        catalog: Vec<JobPosting>,
        top_k: usize,
    ) -> Self {
        Self {
            summarizer,
            search,
            recommender,
            catalog,
            top_k,
        }
    }

    /// `None` when no API key is configured or the HTTP client cannot be
    /// built. A missing or invalid catalog yields an empty one.
    pub fn from_config(resume_cfg: &ResumeConfig, llm_cfg: &LlmConfig) -> Option<Self> {
        let Some(api_key) = llm_cfg.get_api_key() else {
            tracing::warn!("No LLM API key configured, resume recommendations disabled");
            return None;
        };

        let llm = match LlmClient::new(llm_cfg, api_key) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!("Failed to build LLM client: {}", e);
                return None;
            }
        };

        let catalog = match load_job_catalog(&resume_cfg.jobs_file) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(
                    "Job catalog {:?} unavailable, starting empty: {}",
                    resume_cfg.jobs_file,
                    e
                );
                Vec::new()
            }
        };
        tracing::info!("Loaded {} job postings", catalog.len());

        let index = KeywordJobIndex::new(catalog.iter().map(|job| job.description.as_str()));

        Some(Self::new(
            llm.clone(),
            Arc::new(index),
            llm,
            catalog,
            resume_cfg.top_k,
        ))
    }

    #[cfg(test)]
    fn catalog_len(&self) -> usize {
        self.catalog.len()
    }

    #[instrument(skip_all, fields(chars = resume.len()))]
    pub async fn run(&self, resume: &str) -> Result<RecommendationReport, ResumeError> {
        let resume = resume.trim();
        if resume.is_empty() {
            return Err(ResumeError::EmptyResume);
        }

        let summary = self.summarizer.summarize(resume).await?;

        let matches: Vec<&JobPosting> = self
            .search
            .search(&summary, self.top_k)
            .into_iter()
            .filter_map(|i| self.catalog.get(i))
            .collect();
        tracing::debug!("Matched {} job postings", matches.len());

        let candidates: Vec<JobPosting> = matches.into_iter().cloned().collect();
        let recommendation_reasoning = self.recommender.recommend(resume, &candidates).await?;

        let (recommended_titles, recommended_descriptions) = candidates
            .into_iter()
            .map(|job| (job.title, job.description))
            .unzip();

        Ok(RecommendationReport {
            summary,
            recommended_titles,
            recommended_descriptions,
            recommendation_reasoning,
        })
    }
}
