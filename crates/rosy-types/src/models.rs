use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Points credited for one accepted deposit proof.
pub const POINTS_PER_DEPOSIT: u32 = 50;

/// How long a one-time code stays valid after it is issued.
pub const CODE_TTL_SECS: i64 = 5 * 60;

/// Highest confidence a result can carry.
pub const MAX_CONFIDENCE: u8 = 100;

// -- Users --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub name: String,
    pub points: u32,
    pub deposits: u32,
    #[serde(default)]
    pub badges: BTreeSet<String>,
}

impl User {
    /// Fresh profile for a verified email. The display name is the local part.
    pub fn new(email: &str) -> Self {
        let name = email.split('@').next().unwrap_or(email).to_string();
        Self {
            email: email.to_string(),
            name,
            points: 0,
            deposits: 0,
            badges: BTreeSet::new(),
        }
    }
}

/// A badge unlocked once a user's points reach `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Achievement {
    pub badge: &'static str,
    pub label: &'static str,
    pub threshold: u32,
}

pub const ACHIEVEMENTS: &[Achievement] = &[
    Achievement {
        badge: "rosy-sticker",
        label: "Rosy Sticker",
        threshold: 150,
    },
    Achievement {
        badge: "badge-warrior",
        label: "Eco-Warrior Badge",
        threshold: 320,
    },
];

// -- Classification --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WasteCategory {
    Organic,
    NonOrganic,
}

impl WasteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organic => "organic",
            Self::NonOrganic => "non-organic",
        }
    }
}

impl fmt::Display for WasteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt fields the model may extract from a bank-transaction image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Structured outcome of a scan. Wire names follow the scan endpoint:
/// `{type, item, guidance, confidence, isReceipt, vendor?, amount?, date?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    #[serde(rename = "type")]
    pub waste_category: WasteCategory,
    #[serde(rename = "item")]
    pub item_label: String,
    #[serde(rename = "guidance")]
    pub guidance_text: String,
    #[serde(rename = "confidence")]
    pub confidence_score: u8,
    #[serde(rename = "isReceipt")]
    pub is_receipt: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<ReceiptDetails>,
}

impl ClassificationResult {
    pub fn new(
        waste_category: WasteCategory,
        item_label: impl Into<String>,
        guidance_text: impl Into<String>,
        confidence_score: u8,
    ) -> Self {
        Self {
            waste_category,
            item_label: item_label.into(),
            guidance_text: guidance_text.into(),
            confidence_score: confidence_score.min(MAX_CONFIDENCE),
            is_receipt: false,
            receipt: None,
        }
    }

    /// Marks the result as a receipt. Receipt fields only ever travel with
    /// `is_receipt == true`.
    pub fn with_receipt(mut self, details: Option<ReceiptDetails>) -> Self {
        self.is_receipt = true;
        self.receipt = details;
        self
    }
}

// -- Deposit proofs --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofOutcome {
    Pending,
    Accepted,
    Rejected,
}

impl ProofOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ProofOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown proof outcome: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSubmission {
    pub id: Uuid,
    pub user_email: String,
    /// Where the uploaded image was stored.
    pub image_ref: String,
    /// Filename declared by the uploader.
    pub filename: String,
    pub outcome: ProofOutcome,
    pub created_at: DateTime<Utc>,
}

impl ProofSubmission {
    pub fn new(id: Uuid, user_email: &str, image_ref: &str, filename: &str) -> Self {
        Self {
            id,
            user_email: user_email.to_string(),
            image_ref: image_ref.to_string(),
            filename: filename.to_string(),
            outcome: ProofOutcome::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome != ProofOutcome::Pending
    }

    /// Settles a pending submission. Returns false if it was already terminal.
    pub fn resolve(&mut self, accepted: bool) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.outcome = if accepted {
            ProofOutcome::Accepted
        } else {
            ProofOutcome::Rejected
        };
        true
    }
}

/// Ledger entry for one credited submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTransaction {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub user_email: String,
    pub points_delta: u32,
    pub deposits_delta: u32,
    pub created_at: DateTime<Utc>,
}

impl RewardTransaction {
    pub fn for_deposit(submission: &ProofSubmission) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission_id: submission.id,
            user_email: submission.user_email.clone(),
            points_delta: POINTS_PER_DEPOSIT,
            deposits_delta: 1,
            created_at: Utc::now(),
        }
    }
}

// -- One-time codes --

/// A pending login code. Only the SHA-256 digest of the code is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeCode {
    pub email: String,
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

impl OneTimeCode {
    pub fn issue(email: &str, code_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            email: email.to_string(),
            code_hash,
            issued_at: now,
            expires_at: now + Duration::seconds(CODE_TTL_SECS),
            attempts: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
