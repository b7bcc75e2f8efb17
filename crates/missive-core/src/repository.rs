//! Repository boundary for dispatched messages.
//!
//! The engine produces [`MessageRecord`]s and [`MessageQuery`] filters; storing
//! and reading them is up to a [`MessageRepository`] implementation supplied
//! by the host. [`InMemoryRepository`] is a linear-scan implementation for
//! tests and small tools.

use parking_lot::RwLock;

use crate::foundation::error::RepositoryResult;
use crate::foundation::record::MessageRecord;
use crate::query::MessageQuery;

/// Stores and retrieves message records.
pub trait MessageRepository: Send + Sync {
    /// Appends a record.
    fn append(&self, record: MessageRecord) -> RepositoryResult<()>;

    /// Returns the records matching `query`, paginated by its skip and take.
    fn query(&self, query: &MessageQuery) -> RepositoryResult<Vec<MessageRecord>>;
}

/// A repository keeping records in insertion order in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<Vec<MessageRecord>>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns a copy of every stored record.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.read().clone()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl MessageRepository for InMemoryRepository {
    fn append(&self, record: MessageRecord) -> RepositoryResult<()> {
        self.records.write().push(record);
        Ok(())
    }

    fn query(&self, query: &MessageQuery) -> RepositoryResult<Vec<MessageRecord>> {
        let records = self.records.read();
        Ok(query.apply(records.iter()).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::message::{Message, ProcessingStatus};

    #[derive(Debug, serde::Serialize)]
    struct Audit(u32);

    fn stored(status: ProcessingStatus, duration: u64) -> MessageRecord {
        let mut message = Message::event(Audit(duration as u32));
        message.set_status(status);
        message.set_execution_duration_ms(duration);
        MessageRecord::from_message(&message)
    }

    #[test]
    fn test_append_and_query() {
        let repository = InMemoryRepository::new();
        for (status, duration) in [
            (ProcessingStatus::Completed, 50),
            (ProcessingStatus::Completed, 150),
            (ProcessingStatus::Failed, 300),
            (ProcessingStatus::Completed, 250),
        ] {
            repository.append(stored(status, duration)).unwrap();
        }
        assert_eq!(repository.len(), 4);

        let query: MessageQuery = "status=Completed,duration>100".parse().unwrap();
        let durations: Vec<u64> = repository
            .query(&query)
            .unwrap()
            .iter()
            .map(|r| r.execution_duration_ms)
            .collect();
        assert_eq!(durations, [150, 250]);

        repository.clear();
        assert!(repository.is_empty());
    }
}
