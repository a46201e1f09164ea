//! Per-user scan session: the state machine and the orchestration around it.
//!
//! ```text
//! Idle --submit--> Scanning --settled--> Result --newScan--> Idle
//! Result --openProofUpload--> ProofPending --submitProof--> ProofAccepted | ProofRejected
//! ProofRejected --retry--> ProofPending
//! ProofAccepted --acknowledge--> Idle
//! ```
//!
//! Every outstanding request carries a [`RequestToken`]. A response whose
//! token is no longer current is dropped instead of applied.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use rosy_classifier::{ClassificationInput, Classifier, ProofDecision, ProofValidator, interpret};
use rosy_db::Database;
use rosy_types::api::SessionSnapshot;
use rosy_types::models::{ClassificationResult, POINTS_PER_DEPOSIT, ProofSubmission, User};

use crate::ledger::{LedgerError, RewardLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Scanning {
        token: RequestToken,
    },
    Result {
        result: ClassificationResult,
    },
    ProofPending {
        submission_id: Uuid,
        in_flight: Option<RequestToken>,
    },
    ProofAccepted {
        submission_id: Uuid,
        points: u32,
    },
    ProofRejected {
        submission_id: Uuid,
        message: String,
    },
}

impl FlowState {
    fn describe(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning { .. } => "scanning",
            Self::Result { .. } => "showing a result",
            Self::ProofPending { .. } => "waiting for a proof",
            Self::ProofAccepted { .. } => "a proof was accepted",
            Self::ProofRejected { .. } => "a proof was rejected",
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },

    #[error("A proof for this session is already being checked")]
    Busy,

    #[error("Request was superseded by a newer one")]
    Superseded,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// The bare state machine. No I/O; every method is one transition.
#[derive(Debug)]
pub struct SessionMachine {
    state: FlowState,
    next_token: u64,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: FlowState::Idle,
            next_token: 1,
        }
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.state {
            FlowState::Idle => SessionSnapshot::Idle,
            FlowState::Scanning { .. } => SessionSnapshot::Scanning,
            FlowState::Result { result } => SessionSnapshot::Result {
                result: result.clone(),
            },
            FlowState::ProofPending { submission_id, .. } => SessionSnapshot::ProofPending {
                submission_id: *submission_id,
            },
            FlowState::ProofAccepted {
                submission_id,
                points,
            } => SessionSnapshot::ProofAccepted {
                submission_id: *submission_id,
                points: *points,
            },
            FlowState::ProofRejected {
                submission_id,
                message,
            } => SessionSnapshot::ProofRejected {
                submission_id: *submission_id,
                message: message.clone(),
            },
        }
    }

    fn issue_token(&mut self) -> RequestToken {
        let token = RequestToken(self.next_token);
        self.next_token += 1;
        token
    }

    fn invalid(&self, action: &'static str) -> FlowError {
        FlowError::InvalidTransition {
            action,
            state: self.state.describe(),
        }
    }

    /// Idle -> Scanning. A submit while already scanning supersedes the
    /// earlier request.
    pub fn submit(&mut self) -> Result<RequestToken, FlowError> {
        match self.state {
            FlowState::Idle | FlowState::Scanning { .. } => {
                let token = self.issue_token();
                self.state = FlowState::Scanning { token };
                Ok(token)
            }
            _ => Err(self.invalid("start a scan")),
        }
    }

    /// Scanning -> Result, only for the current request.
    pub fn complete_scan(
        &mut self,
        token: RequestToken,
        result: ClassificationResult,
    ) -> Result<(), FlowError> {
        match self.state {
            FlowState::Scanning { token: current } if current == token => {
                self.state = FlowState::Result { result };
                Ok(())
            }
            _ => Err(FlowError::Superseded),
        }
    }

    /// Result -> Idle.
    pub fn new_scan(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::Result { .. } => {
                self.state = FlowState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("start over")),
        }
    }

    /// Result -> ProofPending with a fresh submission identity.
    pub fn open_proof_upload(&mut self) -> Result<Uuid, FlowError> {
        match self.state {
            FlowState::Result { .. } => Ok(self.await_proof()),
            _ => Err(self.invalid("open a proof upload")),
        }
    }

    /// Claims the pending submission for one in-flight check.
    pub fn begin_proof(&mut self) -> Result<(RequestToken, Uuid), FlowError> {
        let submission_id = match self.state {
            FlowState::ProofPending {
                in_flight: Some(_), ..
            } => return Err(FlowError::Busy),
            FlowState::ProofPending { submission_id, .. } => submission_id,
            _ => return Err(self.invalid("submit a proof")),
        };
        let token = self.issue_token();
        self.state = FlowState::ProofPending {
            submission_id,
            in_flight: Some(token),
        };
        Ok((token, submission_id))
    }

    /// ProofPending -> ProofAccepted | ProofRejected for the claimed check.
    pub fn finish_proof(
        &mut self,
        token: RequestToken,
        decision: &ProofDecision,
    ) -> Result<(), FlowError> {
        let submission_id = match self.state {
            FlowState::ProofPending {
                submission_id,
                in_flight: Some(current),
            } if current == token => submission_id,
            _ => return Err(FlowError::Superseded),
        };
        self.state = if decision.accepted {
            FlowState::ProofAccepted {
                submission_id,
                points: POINTS_PER_DEPOSIT,
            }
        } else {
            FlowState::ProofRejected {
                submission_id,
                message: decision.message.clone(),
            }
        };
        Ok(())
    }

    /// Releases a claimed check that failed before settling. The next
    /// attempt gets a new submission identity.
    pub fn abandon_proof(&mut self, token: RequestToken) {
        if let FlowState::ProofPending {
            in_flight: Some(current),
            ..
        } = self.state
        {
            if current == token {
                self.await_proof();
            }
        }
    }

    /// ProofRejected -> ProofPending. Retries are unlimited.
    pub fn retry(&mut self) -> Result<Uuid, FlowError> {
        match self.state {
            FlowState::ProofRejected { .. } => Ok(self.await_proof()),
            _ => Err(self.invalid("retry a proof")),
        }
    }

    /// ProofAccepted -> Idle.
    pub fn acknowledge(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::ProofAccepted { .. } => {
                self.state = FlowState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("acknowledge a proof")),
        }
    }

    fn await_proof(&mut self) -> Uuid {
        let submission_id = Uuid::new_v4();
        self.state = FlowState::ProofPending {
            submission_id,
            in_flight: None,
        };
        submission_id
    }
}

/// What a proof upload came to.
#[derive(Debug, Clone)]
pub struct ProofReceipt {
    pub submission_id: Uuid,
    pub decision: ProofDecision,
    /// Updated profile when the proof was accepted and credited.
    pub user: Option<User>,
}

type Session = Arc<Mutex<SessionMachine>>;

/// Storage, validation and crediting of one proof. Cloned into the task that
/// settles a submission so the work outlives the request that started it.
#[derive(Clone)]
struct ProofPipeline {
    validator: Arc<dyn ProofValidator>,
    ledger: Arc<RewardLedger>,
    db: Arc<Database>,
    upload_dir: PathBuf,
}

/// Drives each user's [`SessionMachine`] through the classifier, the proof
/// validator and the reward ledger. Sessions are keyed by user email.
pub struct FlowController {
    classifier: Arc<Classifier>,
    proofs: ProofPipeline,
    sessions: RwLock<HashMap<String, Session>>,
}

impl FlowController {
    pub fn new(
        classifier: Arc<Classifier>,
        validator: Arc<dyn ProofValidator>,
        db: Arc<Database>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            classifier,
            proofs: ProofPipeline {
                validator,
                ledger: Arc::new(RewardLedger::new(db.clone())),
                db,
                upload_dir,
            },
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &RewardLedger {
        &self.proofs.ledger
    }

    async fn session(&self, email: &str) -> Session {
        if let Some(session) = self.sessions.read().await.get(email) {
            return session.clone();
        }
        self.sessions
            .write()
            .await
            .entry(email.to_string())
            .or_default()
            .clone()
    }

    pub async fn snapshot(&self, email: &str) -> SessionSnapshot {
        self.session(email).await.lock().await.snapshot()
    }

    /// Submit -> classify -> settle. The session lock is not held while the
    /// classifier runs; a newer submit in the meantime makes this one stale.
    pub async fn scan(
        &self,
        email: &str,
        input: ClassificationInput,
    ) -> Result<ClassificationResult, FlowError> {
        let session = self.session(email).await;
        let token = session.lock().await.submit()?;
        debug!("Scan {:?} started for {}", token, email);

        let output = self.classifier.classify(&input).await;
        let result = interpret(&output);

        session.lock().await.complete_scan(token, result.clone())?;
        debug!(
            "Scan {:?} settled for {}: {} ({})",
            token, email, result.item_label, result.waste_category
        );
        Ok(result)
    }

    /// Stateless chat through the same gateway.
    pub async fn chat(&self, message: &str) -> String {
        self.classifier
            .classify(&ClassificationInput::Text(message.to_string()))
            .await
            .into_reply()
    }

    pub async fn new_scan(&self, email: &str) -> Result<SessionSnapshot, FlowError> {
        let session = self.session(email).await;
        let mut machine = session.lock().await;
        machine.new_scan()?;
        Ok(machine.snapshot())
    }

    pub async fn open_proof_upload(&self, email: &str) -> Result<SessionSnapshot, FlowError> {
        let session = self.session(email).await;
        let mut machine = session.lock().await;
        machine.open_proof_upload()?;
        Ok(machine.snapshot())
    }

    pub async fn retry_proof(&self, email: &str) -> Result<SessionSnapshot, FlowError> {
        let session = self.session(email).await;
        let mut machine = session.lock().await;
        machine.retry()?;
        Ok(machine.snapshot())
    }

    pub async fn acknowledge(&self, email: &str) -> Result<SessionSnapshot, FlowError> {
        let session = self.session(email).await;
        let mut machine = session.lock().await;
        machine.acknowledge()?;
        Ok(machine.snapshot())
    }

    /// ProofPending --submitProof--> ProofAccepted | ProofRejected. The
    /// ledger credit for an accepted proof happens inside this transition.
    ///
    /// Settling runs on its own task and always ends in `finish_proof` or
    /// `abandon_proof`, even if the caller stops waiting.
    pub async fn submit_proof(
        &self,
        email: &str,
        filename: &str,
        image: Bytes,
    ) -> Result<ProofReceipt, FlowError> {
        let session = self.session(email).await;
        let (token, submission_id) = session.lock().await.begin_proof()?;

        let proofs = self.proofs.clone();
        let email = email.to_string();
        let filename = filename.to_string();
        let task = tokio::spawn(async move {
            let settled = proofs.settle(&email, submission_id, &filename, image).await;
            let mut machine = session.lock().await;
            match settled {
                Ok(receipt) => {
                    machine.finish_proof(token, &receipt.decision)?;
                    Ok(receipt)
                }
                Err(e) => {
                    machine.abandon_proof(token);
                    Err(e)
                }
            }
        });

        task.await
            .map_err(|e| FlowError::Storage(anyhow!("proof task join error: {}", e)))?
    }

    /// Drop sessions that are back at Idle and not in use by any request.
    /// Returns how many were removed.
    pub async fn prune_idle_sessions(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            if Arc::strong_count(session) > 1 {
                return true;
            }
            match session.try_lock() {
                Ok(machine) => *machine.state() != FlowState::Idle,
                Err(_) => true,
            }
        });
        before - sessions.len()
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl ProofPipeline {
    async fn settle(
        &self,
        email: &str,
        submission_id: Uuid,
        filename: &str,
        image: Bytes,
    ) -> Result<ProofReceipt, FlowError> {
        let image_ref = self.store_image(submission_id, &image).await?;
        let mut submission = ProofSubmission::new(submission_id, email, &image_ref, filename);

        let db = self.db.clone();
        let pending = submission.clone();
        tokio::task::spawn_blocking(move || db.insert_proof(&pending))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        let decision = self.validator.validate(&submission);
        submission.resolve(decision.accepted);

        let user = if decision.accepted {
            Some(self.ledger.credit_deposit(email, &submission).await?)
        } else {
            let db = self.db.clone();
            tokio::task::spawn_blocking(move || db.reject_proof(submission_id))
                .await
                .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;
            None
        };

        info!(
            "Proof {} from {} ({}): {}",
            submission_id,
            email,
            filename,
            submission.outcome
        );
        Ok(ProofReceipt {
            submission_id,
            decision,
            user,
        })
    }

    async fn store_image(&self, submission_id: Uuid, image: &[u8]) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(submission_id.to_string());
        tokio::fs::write(&path, image).await?;
        Ok(path.display().to_string())
    }
}
