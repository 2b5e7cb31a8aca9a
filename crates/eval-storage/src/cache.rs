use std::collections::HashMap;
use std::sync::RwLock;

use eval_types::EvaluationRecord;

/// The façade's in-process read cache (§4.5 "an in-process cache"). Safe
/// under concurrent access via a single `RwLock`, matching the contract
/// in §5 ("the cache uses per-key locks or equivalent").
#[derive(Default)]
pub struct Cache {
    records: RwLock<HashMap<String, EvaluationRecord>>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<EvaluationRecord> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn put(&self, record: EvaluationRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record);
    }

    pub fn invalidate(&self, id: &str) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}
