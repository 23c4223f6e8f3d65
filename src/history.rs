use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::models::UploadRecord;

/// how many records the history keeps
pub const HISTORY_LIMIT: usize = 10;

/// recent uploads, newest first, plus a feed of completions for a UI layer
#[derive(Debug)]
pub struct UploadHistory {
    records: Mutex<VecDeque<UploadRecord>>,
    completed: broadcast::Sender<UploadRecord>,
}

impl Default for UploadHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadHistory {
    pub fn new() -> Self {
        let (completed, _) = broadcast::channel(64);
        Self {
            records: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT + 1)),
            completed,
        }
    }

    pub fn add(&self, record: UploadRecord) {
        {
            let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
            records.push_front(record.clone());
            records.truncate(HISTORY_LIMIT);
        }

        // nobody listening is fine
        let _ = self.completed.send(record);
    }

    /// copy of the current list, newest first
    pub fn recent(&self) -> Vec<UploadRecord> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.iter().cloned().collect()
    }

    /// receive every record added from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UploadRecord> {
        self.completed.subscribe()
    }
}
