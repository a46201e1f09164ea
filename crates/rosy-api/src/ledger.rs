use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use rosy_db::{Database, RewardApplied};
use rosy_types::models::{ACHIEVEMENTS, ProofOutcome, ProofSubmission, RewardTransaction, User};

use crate::locks::KeyedLocks;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("submission {id} is {outcome}; only accepted submissions earn points")]
    InvalidState { id: Uuid, outcome: ProofOutcome },

    #[error("submission {0} has already been credited")]
    DuplicateCredit(Uuid),

    #[error("no profile for {0}")]
    UnknownUser(String),

    #[error("submission {0} is not on record for this user")]
    UnknownSubmission(Uuid),

    #[error("ledger storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Adds every achievement badge the user's points now qualify for.
pub fn award_badges(user: &mut User) {
    for achievement in ACHIEVEMENTS {
        if user.points >= achievement.threshold {
            user.badges.insert(achievement.badge.to_string());
        }
    }
}

/// Point and deposit counters. Each accepted submission is credited at
/// most once; credits for one user are applied one at a time.
pub struct RewardLedger {
    db: Arc<Database>,
    locks: KeyedLocks,
}

impl RewardLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn credit_deposit(
        &self,
        user_email: &str,
        submission: &ProofSubmission,
    ) -> Result<User, LedgerError> {
        if submission.outcome != ProofOutcome::Accepted {
            return Err(LedgerError::InvalidState {
                id: submission.id,
                outcome: submission.outcome,
            });
        }
        if submission.user_email != user_email {
            return Err(LedgerError::UnknownSubmission(submission.id));
        }

        let _guard = self.locks.lock(user_email).await;

        let reward = RewardTransaction::for_deposit(submission);
        let db = self.db.clone();
        let applied = tokio::task::spawn_blocking(move || db.apply_reward(&reward, award_badges))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        match applied {
            RewardApplied::Credited(user) => {
                info!(
                    "Credited submission {} to {}: {} points, {} deposits",
                    submission.id, user.email, user.points, user.deposits
                );
                Ok(user)
            }
            RewardApplied::AlreadyCredited => {
                warn!("Refusing second credit for submission {}", submission.id);
                Err(LedgerError::DuplicateCredit(submission.id))
            }
            RewardApplied::UnknownUser => Err(LedgerError::UnknownUser(user_email.to_string())),
            RewardApplied::UnknownSubmission => Err(LedgerError::UnknownSubmission(submission.id)),
            RewardApplied::NotPending(outcome) => Err(LedgerError::InvalidState {
                id: submission.id,
                outcome,
            }),
        }
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }
}
