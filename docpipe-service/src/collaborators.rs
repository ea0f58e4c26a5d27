//! External services the pipeline depends on.
//!
//! The orchestrator only sees the [`StructuralParser`] and [`Classifier`]
//! traits; the HTTP implementations live in the submodules and tests plug in
//! in-memory doubles.

mod classifier;
mod parser;

pub use classifier::HttpClassifier;
pub use parser::HttpStructuralParser;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::db::NewSection;
use crate::error::{ClassifierError, ParserError};

/// One section as returned by the structural parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSection {
    pub section_type: String,
    pub content: String,
    /// Inclusive `[start, end]` page numbers, when the parser knows them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<[i64; 2]>,
}

impl From<ParsedSection> for NewSection {
    fn from(section: ParsedSection) -> Self {
        NewSection {
            section_type: section.section_type,
            content: section.content,
            page_start: section.page_range.map(|[start, _]| start),
            page_end: section.page_range.map(|[_, end]| end),
        }
    }
}

/// Label assigned to one sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub label: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Turns raw document bytes into typed sections.
#[async_trait]
pub trait StructuralParser: Send + Sync {
    async fn parse(&self, content: Bytes) -> Result<Vec<ParsedSection>, ParserError>;
}

/// Labels a single sentence. Calls may fail or time out independently.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, ClassifierError>;
}
