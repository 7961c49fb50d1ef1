//! Failure detection on install-tool stderr.
//!
//! The install tool sometimes exits 0 after a failed conversion, so stderr is
//! scanned for failure markers. The default is a case-sensitive match on
//! `error` or `failed`; a capitalised `Error` does not trigger it.

use std::sync::Arc;

use aho_corasick::AhoCorasick;
use regex::Regex;
use thiserror::Error;

pub const DEFAULT_FAILURE_MARKERS: &[&str] = &["error", "failed"];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Invalid failure keywords: {0}")]
    Keywords(String),

    #[error("Invalid failure pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Decides whether captured stderr signals a failed install.
pub trait FailureDetector: Send + Sync {
    /// The matched marker, or `None` if stderr looks clean.
    fn detect(&self, stderr: &str) -> Option<String>;
}

/// Substring matcher over a fixed keyword set.
pub struct KeywordDetector {
    matcher: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordDetector {
    pub fn new<I, S>(keywords: I, case_insensitive: bool) -> Result<Self, DetectorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords: Vec<String> = keywords.into_iter().map(Into::into).collect();
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(case_insensitive)
            .build(&keywords)
            .map_err(|e| DetectorError::Keywords(e.to_string()))?;
        Ok(Self { matcher, keywords })
    }

    /// Case-sensitive `error` / `failed`.
    pub fn standard() -> Result<Self, DetectorError> {
        Self::new(DEFAULT_FAILURE_MARKERS.iter().copied(), false)
    }
}

impl FailureDetector for KeywordDetector {
    fn detect(&self, stderr: &str) -> Option<String> {
        self.matcher
            .find(stderr)
            .and_then(|m| self.keywords.get(m.pattern().as_usize()).cloned())
    }
}

/// Regex matcher for installs that need a stricter rule.
pub struct PatternDetector {
    regex: Regex,
}

impl PatternDetector {
    pub fn new(pattern: &str) -> Result<Self, DetectorError> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }
}

impl FailureDetector for PatternDetector {
    fn detect(&self, stderr: &str) -> Option<String> {
        self.regex.find(stderr).map(|m| m.as_str().to_string())
    }
}

/// Build the detector selected by configuration.
pub fn detector_from_pattern(pattern: Option<&str>) -> Result<Arc<dyn FailureDetector>, DetectorError> {
    match pattern {
        Some(p) if !p.trim().is_empty() => Ok(Arc::new(PatternDetector::new(p)?)),
        _ => Ok(Arc::new(KeywordDetector::standard()?)),
    }
}
