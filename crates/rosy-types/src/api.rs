use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ACHIEVEMENTS, ClassificationResult, RewardTransaction, User};

// -- Session token claims --

/// Claims carried by the bearer token handed out on successful code
/// verification. `sub` is the user's email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub exp: usize,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// -- Auth --

#[derive(Debug, Default, Deserialize)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct SendCodeResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyCodeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyCodeResponse {
    pub ok: bool,
    pub user: User,
    pub token: String,
}

// -- Chat --

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

// -- Proofs --

#[derive(Debug, Serialize)]
pub struct UploadProofResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

// -- Profile --

#[derive(Debug, Serialize)]
pub struct AchievementProgress {
    pub badge: &'static str,
    pub label: &'static str,
    pub threshold: u32,
    pub earned: bool,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: User,
    pub achievements: Vec<AchievementProgress>,
    /// Credited deposits, oldest first.
    pub rewards: Vec<RewardTransaction>,
}

impl ProfileResponse {
    pub fn for_user(user: User, rewards: Vec<RewardTransaction>) -> Self {
        let achievements = ACHIEVEMENTS
            .iter()
            .map(|a| AchievementProgress {
                badge: a.badge,
                label: a.label,
                threshold: a.threshold,
                earned: user.badges.contains(a.badge),
            })
            .collect();
        Self {
            user,
            achievements,
            rewards,
        }
    }
}

// -- Scan session --

/// Externally visible state of a user's scan session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionSnapshot {
    Idle,
    Scanning,
    Result { result: ClassificationResult },
    ProofPending { submission_id: Uuid },
    ProofAccepted { submission_id: Uuid, points: u32 },
    ProofRejected { submission_id: Uuid, message: String },
}
