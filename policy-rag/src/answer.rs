//! The structured answer returned for every question.
//!
//! A [`StructuredAnswer`] is always fully populated. Degraded situations (no
//! retrieved policy, a failed model call, unparseable model output) produce
//! placeholder answers through the constructors below rather than errors.

use serde::{Deserialize, Serialize};

use crate::document::RetrievedChunk;

/// Sentence every `general_tips` section must carry.
pub const DISCLAIMER: &str = "Note: these tips are based on general banking knowledge and online information, not directly on the bank's policy documents.";

/// Marker used when the policy describes no step-by-step process.
pub const NOT_MENTIONED: &str = "not mentioned";

/// Default maximum snippet length, in characters.
pub const DEFAULT_SNIPPET_CHARS: usize = 400;

/// The step-by-step section of an answer.
///
/// Serialized as a JSON array of strings, or as the string `"not mentioned"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSteps", into = "RawSteps")]
pub enum Steps {
    /// Ordered steps taken from the policy text.
    Listed(Vec<String>),
    /// The policy does not describe a process.
    #[default]
    NotMentioned,
}

impl Steps {
    /// Build steps from a list, treating an empty list as not mentioned.
    pub fn from_list(steps: Vec<String>) -> Self {
        let steps: Vec<String> = steps
            .into_iter()
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .collect();
        if steps.is_empty() { Self::NotMentioned } else { Self::Listed(steps) }
    }

    /// Build steps from a single string, recognizing the marker.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if is_not_mentioned(text) { Self::NotMentioned } else { Self::Listed(vec![text.to_string()]) }
    }

    /// The listed steps; empty when not mentioned.
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Listed(steps) => steps,
            Self::NotMentioned => &[],
        }
    }
}

pub(crate) fn is_not_mentioned(text: &str) -> bool {
    let text = text.trim().trim_end_matches('.');
    text.is_empty() || text.eq_ignore_ascii_case(NOT_MENTIONED)
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSteps {
    Listed(Vec<String>),
    Marker(String),
}

impl TryFrom<RawSteps> for Steps {
    type Error = String;

    fn try_from(raw: RawSteps) -> Result<Self, Self::Error> {
        match raw {
            RawSteps::Listed(steps) => Ok(Self::from_list(steps)),
            RawSteps::Marker(text) if is_not_mentioned(&text) => Ok(Self::NotMentioned),
            RawSteps::Marker(text) => Err(format!("expected a list of steps, found string '{text}'")),
        }
    }
}

impl From<Steps> for RawSteps {
    fn from(steps: Steps) -> Self {
        match steps {
            Steps::Listed(steps) => Self::Listed(steps),
            Steps::NotMentioned => Self::Marker(NOT_MENTIONED.to_string()),
        }
    }
}

/// A policy document an answer draws on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Collection id (`common` or a bank id).
    pub bank: String,
    /// Document name.
    #[serde(alias = "document_name")]
    pub document: String,
    /// Short excerpt of the relevant passage.
    #[serde(default)]
    pub snippet: String,
}

/// The answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    /// Section 1A: policy-based summary.
    pub summary: String,
    /// Section 1B: policy-based steps.
    #[serde(default)]
    pub steps: Steps,
    /// Section 2: documents the answer is based on.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Section 3: general tips, always ending with [`DISCLAIMER`].
    #[serde(default, alias = "cost_saving_tips")]
    pub general_tips: String,
}

impl StructuredAnswer {
    /// Answer given when retrieval found nothing to ground an answer on.
    pub fn no_policy_found() -> Self {
        Self {
            summary: "No policy information was found for this question in the available bank documents.".into(),
            steps: Steps::NotMentioned,
            sources: Vec::new(),
            general_tips: DISCLAIMER.into(),
        }
    }

    /// Answer given when the language model could not be reached in time.
    pub fn generation_failed(sources: Vec<Source>) -> Self {
        Self {
            summary: "The answer could not be generated because the language model did not respond. The sources below were found for your question.".into(),
            steps: Steps::Listed(vec![
                "The step-by-step process could not be generated. Please try again.".into(),
            ]),
            sources,
            general_tips: DISCLAIMER.into(),
        }
    }

    /// Answer given when the model output could not be turned into an answer.
    pub fn unparseable(sources: Vec<Source>) -> Self {
        Self {
            summary: "The answer could not be generated in the expected format. The sources below were found for your question.".into(),
            steps: Steps::Listed(vec![
                "The step-by-step process could not be generated in the expected format.".into(),
            ]),
            sources,
            general_tips: DISCLAIMER.into(),
        }
    }

    /// Trim every text field and make sure the tips end with the disclaimer.
    pub fn normalize(mut self) -> Self {
        self.summary = self.summary.trim().to_string();
        for source in &mut self.sources {
            source.bank = source.bank.trim().to_string();
            source.document = source.document.trim().to_string();
            source.snippet = collapse_whitespace(&source.snippet);
        }

        let tips = self.general_tips.trim();
        self.general_tips = if tips.is_empty() {
            DISCLAIMER.to_string()
        } else if tips.contains(DISCLAIMER) {
            tips.to_string()
        } else {
            format!("{tips}\n\n{DISCLAIMER}")
        };
        self
    }
}

/// One source per distinct (collection, document) pair, in retrieval order.
///
/// Snippets are the whitespace-collapsed chunk text, cut to at most
/// `snippet_chars` characters.
pub fn sources_from_chunks(chunks: &[RetrievedChunk], snippet_chars: usize) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for chunk in chunks {
        let seen = sources
            .iter()
            .any(|s| s.bank == chunk.collection && s.document == chunk.source_document);
        if seen {
            continue;
        }
        sources.push(Source {
            bank: chunk.collection.clone(),
            document: chunk.source_document.clone(),
            snippet: collapse_whitespace(&chunk.text).chars().take(snippet_chars).collect(),
        });
    }
    sources
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
