use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rosy_types::models::WasteCategory;
use sha2::{Digest, Sha256};

use crate::proof::KeywordMatcher;

/// Reply used for chat when no model is reachable.
pub const OFFLINE_CHAT_REPLY: &str = "Simulated reply: I can help you sort waste. For example, \
plastics and glass are recyclable, organic waste can be composted. Ask about a specific item.";

/// Locally computed stand-in for a model answer about an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineRecord {
    pub category: WasteCategory,
    pub item: String,
    pub guidance: String,
    pub is_receipt: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Exemplar {
    pub category: WasteCategory,
    pub item: &'static str,
    pub guidance: &'static str,
}

pub const CATALOG: &[Exemplar] = &[
    Exemplar {
        category: WasteCategory::Organic,
        item: "Vegetable scraps",
        guidance: "Compost it. Collect in a separate bin and turn it into fertilizer.",
    },
    Exemplar {
        category: WasteCategory::Organic,
        item: "Fruit peel",
        guidance: "Great for compost. Cut it into small pieces so it breaks down faster.",
    },
    Exemplar {
        category: WasteCategory::Organic,
        item: "Dry leaves",
        guidance: "Good compost material. Mix with wet organic waste for best results.",
    },
    Exemplar {
        category: WasteCategory::NonOrganic,
        item: "Plastic bottle",
        guidance: "Rinse and send to the recycling center or waste bank.",
    },
    Exemplar {
        category: WasteCategory::NonOrganic,
        item: "Cardboard box",
        guidance: "Flatten and recycle. Cardboard has value at the waste bank.",
    },
    Exemplar {
        category: WasteCategory::NonOrganic,
        item: "Used can",
        guidance: "Wash and crush it. Aluminium is valuable for recycling.",
    },
];

/// Strategy used when the classifier endpoint cannot answer.
pub trait OfflineClassifier: Send + Sync {
    fn classify_image(&self, filename: &str, bytes: &[u8]) -> OfflineRecord;

    fn chat_reply(&self, _message: &str) -> String {
        OFFLINE_CHAT_REPLY.to_string()
    }
}

fn record_from(exemplar: &Exemplar, is_receipt: bool) -> OfflineRecord {
    OfflineRecord {
        category: exemplar.category,
        item: exemplar.item.to_string(),
        guidance: exemplar.guidance.to_string(),
        is_receipt,
    }
}

/// Picks a catalog entry at random for every image.
#[derive(Debug, Clone)]
pub struct RandomCatalog {
    receipts: KeywordMatcher,
}

impl Default for RandomCatalog {
    fn default() -> Self {
        Self {
            receipts: KeywordMatcher::scan_receipts(),
        }
    }
}

impl OfflineClassifier for RandomCatalog {
    fn classify_image(&self, filename: &str, _bytes: &[u8]) -> OfflineRecord {
        let idx = rand::rng().random_range(0..CATALOG.len());
        record_from(&CATALOG[idx], self.receipts.matches(filename))
    }
}

/// Picks a catalog entry from a digest of the upload, so the same image
/// always gets the same answer.
#[derive(Debug, Clone)]
pub struct DeterministicCatalog {
    receipts: KeywordMatcher,
}

impl Default for DeterministicCatalog {
    fn default() -> Self {
        Self {
            receipts: KeywordMatcher::scan_receipts(),
        }
    }
}

impl DeterministicCatalog {
    fn index_for(filename: &str, bytes: &[u8]) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(filename.as_bytes());
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % CATALOG.len() as u64) as usize
    }
}

impl OfflineClassifier for DeterministicCatalog {
    fn classify_image(&self, filename: &str, bytes: &[u8]) -> OfflineRecord {
        let idx = Self::index_for(filename, bytes);
        record_from(&CATALOG[idx], self.receipts.matches(filename))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OfflineMode {
    #[default]
    Random,
    Deterministic,
}

impl OfflineMode {
    pub fn build(self) -> Arc<dyn OfflineClassifier> {
        match self {
            Self::Random => Arc::new(RandomCatalog::default()),
            Self::Deterministic => Arc::new(DeterministicCatalog::default()),
        }
    }
}

impl FromStr for OfflineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "deterministic" => Ok(Self::Deterministic),
            other => Err(format!(
                "invalid offline mode '{}', expected 'random' or 'deterministic'",
                other
            )),
        }
    }
}
