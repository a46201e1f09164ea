use rosy_types::models::{POINTS_PER_DEPOSIT, ProofSubmission};

/// Filename keywords that mark a scanned image as a likely receipt.
/// "struk" is the Indonesian word for receipt.
pub const SCAN_RECEIPT_KEYWORDS: &[&str] = &["receipt", "bank", "trx", "transfer", "struk"];

/// Filename keywords accepted as deposit proof. "bukti" means proof.
pub const PROOF_KEYWORDS: &[&str] = &["receipt", "bank", "transfer", "trx", "bukti"];

pub const PROOF_REJECTED_MESSAGE: &str =
    "Uploaded image is not recognized as a bank transaction receipt.";

/// Case-insensitive substring match against a fixed keyword set.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn scan_receipts() -> Self {
        Self::new(SCAN_RECEIPT_KEYWORDS)
    }

    pub fn proofs() -> Self {
        Self::new(PROOF_KEYWORDS)
    }

    pub fn matches(&self, filename: &str) -> bool {
        let name = filename.to_lowercase();
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofDecision {
    pub accepted: bool,
    pub message: String,
}

impl ProofDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            message: format!("Proof accepted. +{} points", POINTS_PER_DEPOSIT),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
        }
    }
}

/// Decides whether a submission counts as a deposit receipt.
/// Pure decision: callers apply any consequences.
pub trait ProofValidator: Send + Sync {
    fn validate(&self, proof: &ProofSubmission) -> ProofDecision;
}

/// Placeholder policy until real document inspection exists: trust the
/// declared filename.
#[derive(Debug, Clone)]
pub struct FilenameKeywordValidator {
    matcher: KeywordMatcher,
}

impl FilenameKeywordValidator {
    pub fn new(matcher: KeywordMatcher) -> Self {
        Self { matcher }
    }
}

impl Default for FilenameKeywordValidator {
    fn default() -> Self {
        Self::new(KeywordMatcher::proofs())
    }
}

impl ProofValidator for FilenameKeywordValidator {
    fn validate(&self, proof: &ProofSubmission) -> ProofDecision {
        if self.matcher.matches(&proof.filename) {
            ProofDecision::accept()
        } else {
            ProofDecision::reject(PROOF_REJECTED_MESSAGE)
        }
    }
}
