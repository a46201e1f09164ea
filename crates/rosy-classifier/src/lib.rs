//! Waste classification and deposit-proof checks.
//!
//! [`gateway::Classifier`] talks to an OpenAI-style completion endpoint and
//! degrades to an [`offline::OfflineClassifier`] whenever that endpoint is
//! unconfigured or misbehaves. [`interpreter::interpret`] turns whatever
//! came back into a [`rosy_types::models::ClassificationResult`].

pub mod gateway;
pub mod interpreter;
pub mod offline;
pub mod proof;

pub use gateway::{ClassificationInput, Classifier, ClassifierConfig, RawModelOutput, UpstreamError};
pub use interpreter::{ParseOutcome, interpret, tolerant_parse};
pub use offline::{OfflineClassifier, OfflineMode, OfflineRecord};
pub use proof::{FilenameKeywordValidator, KeywordMatcher, ProofDecision, ProofValidator};
