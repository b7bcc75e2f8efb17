//! Filters over recorded messages.
//!
//! A [`MessageQuery`] is a set of optional predicates plus pagination. It is
//! built either with the consuming setters or parsed from text:
//!
//! ```rust,ignore
//! let by_hand = MessageQuery::new()
//!     .with_status(ProcessingStatus::Completed)
//!     .duration_above(100)
//!     .take(10);
//!
//! let parsed: MessageQuery = "status=Completed,duration>100,take=10".parse()?;
//! assert_eq!(by_hand, parsed);
//! ```
//!
//! Set predicates are AND-combined; unset predicates always hold.

mod parser;

pub use parser::parse;

use std::ops::{Bound, RangeBounds};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::foundation::message::{MessageKind, ProcessingStatus, simple_type_name};
use crate::foundation::record::MessageRecord;

/// A lower and an upper bound.
pub type Interval<T> = (Bound<T>, Bound<T>);

fn unbounded<T>() -> Interval<T> {
    (Bound::Unbounded, Bound::Unbounded)
}

/// A filter over [`MessageRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageQuery {
    id: Option<Uuid>,
    created: Option<Interval<DateTime<Utc>>>,
    content_type: Option<String>,
    error_type: Option<String>,
    status: Option<ProcessingStatus>,
    kind: Option<MessageKind>,
    duration: Option<Interval<u64>>,
    skip: Option<usize>,
    take: Option<usize>,
}

impl MessageQuery {
    /// Creates a query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Setters
    // ========================================================================

    /// Matches the record with this id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Matches records whose content type is `content_type`, given either as
    /// the full type name or as its simple name.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Matches records whose captured error has this type, given either as
    /// the full type name or as its simple name.
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Matches records with this status.
    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Matches records of this kind.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Matches records created strictly after `at`.
    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created.get_or_insert_with(unbounded).0 = Bound::Excluded(at);
        self
    }

    /// Matches records created strictly before `at`.
    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created.get_or_insert_with(unbounded).1 = Bound::Excluded(at);
        self
    }

    /// Matches records created exactly at `at`.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created = Some((Bound::Included(at), Bound::Included(at)));
        self
    }

    /// Matches records whose execution took strictly longer than `ms`.
    pub fn duration_above(mut self, ms: u64) -> Self {
        self.duration.get_or_insert_with(unbounded).0 = Bound::Excluded(ms);
        self
    }

    /// Matches records whose execution took strictly less than `ms`.
    pub fn duration_below(mut self, ms: u64) -> Self {
        self.duration.get_or_insert_with(unbounded).1 = Bound::Excluded(ms);
        self
    }

    /// Matches records whose execution took exactly `ms`.
    pub fn duration_equal(mut self, ms: u64) -> Self {
        self.duration = Some((Bound::Included(ms), Bound::Included(ms)));
        self
    }

    /// Skips the first `count` matching records.
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = Some(count);
        self
    }

    /// Keeps at most `count` matching records.
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn created(&self) -> Option<&Interval<DateTime<Utc>>> {
        self.created.as_ref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    pub fn status(&self) -> Option<ProcessingStatus> {
        self.status
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.kind
    }

    pub fn duration(&self) -> Option<&Interval<u64>> {
        self.duration.as_ref()
    }

    pub fn skip_count(&self) -> Option<usize> {
        self.skip
    }

    pub fn take_count(&self) -> Option<usize> {
        self.take
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Returns `true` if every set predicate holds for `record`.
    ///
    /// Pagination is not part of matching.
    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.id.is_none_or(|id| record.id == id)
            && self
                .created
                .as_ref()
                .is_none_or(|range| range.contains(&record.created_at))
            && self
                .content_type
                .as_deref()
                .is_none_or(|wanted| type_matches(wanted, &record.content_type))
            && self.error_type.as_deref().is_none_or(|wanted| {
                record
                    .error_type
                    .as_deref()
                    .is_some_and(|actual| type_matches(wanted, actual))
            })
            && self.status.is_none_or(|status| record.status == status)
            && self.kind.is_none_or(|kind| record.kind == kind)
            && self
                .duration
                .as_ref()
                .is_none_or(|range| range.contains(&record.execution_duration_ms))
    }

    /// Filters `records` and applies `skip` and `take`, in that order.
    pub fn apply<'a, I>(&self, records: I) -> impl Iterator<Item = &'a MessageRecord>
    where
        I: IntoIterator<Item = &'a MessageRecord>,
    {
        let query = self.clone();
        records
            .into_iter()
            .filter(move |record| query.matches(record))
            .skip(self.skip.unwrap_or(0))
            .take(self.take.unwrap_or(usize::MAX))
    }
}

fn type_matches(wanted: &str, actual: &str) -> bool {
    wanted == actual || wanted == simple_type_name(actual)
}

impl std::str::FromStr for MessageQuery {
    type Err = crate::foundation::error::QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn record(status: ProcessingStatus, duration: u64) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            kind: MessageKind::Command,
            content_type: "ledger::commands::OpenAccount".into(),
            content: None,
            data: HashMap::new(),
            error_message: None,
            error_type: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            execution_duration_ms: duration,
            status,
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = MessageQuery::new();
        assert!(query.matches(&record(ProcessingStatus::Failed, 0)));
        assert!(query.matches(&record(ProcessingStatus::Completed, 9_999)));
    }

    #[test]
    fn test_duration_bounds() {
        let above = MessageQuery::new().duration_above(100);
        assert!(!above.matches(&record(ProcessingStatus::Completed, 100)));
        assert!(above.matches(&record(ProcessingStatus::Completed, 101)));

        let window = MessageQuery::new().duration_above(10).duration_below(20);
        assert!(window.matches(&record(ProcessingStatus::Completed, 15)));
        assert!(!window.matches(&record(ProcessingStatus::Completed, 20)));

        let exact = MessageQuery::new().duration_equal(42);
        assert!(exact.matches(&record(ProcessingStatus::Completed, 42)));
        assert!(!exact.matches(&record(ProcessingStatus::Completed, 43)));
    }

    #[test]
    fn test_created_bounds() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let sample = record(ProcessingStatus::Completed, 0);
        assert!(MessageQuery::new().created_at(at).matches(&sample));
        assert!(!MessageQuery::new().created_after(at).matches(&sample));
        assert!(!MessageQuery::new().created_before(at).matches(&sample));
        assert!(
            MessageQuery::new()
                .created_after(at - chrono::Duration::seconds(1))
                .created_before(at + chrono::Duration::seconds(1))
                .matches(&sample)
        );
    }

    #[test]
    fn test_type_names() {
        let mut failed = record(ProcessingStatus::Failed, 3);
        failed.error_type = Some("ledger::errors::Overdrawn".into());

        assert!(MessageQuery::new().with_content_type("OpenAccount").matches(&failed));
        assert!(
            MessageQuery::new()
                .with_content_type("ledger::commands::OpenAccount")
                .matches(&failed)
        );
        assert!(!MessageQuery::new().with_content_type("Open").matches(&failed));
        assert!(MessageQuery::new().with_error_type("Overdrawn").matches(&failed));
        assert!(
            !MessageQuery::new()
                .with_error_type("Overdrawn")
                .matches(&record(ProcessingStatus::Completed, 0))
        );
    }

    #[test]
    fn test_predicates_are_and_combined() {
        let sample = record(ProcessingStatus::Completed, 150);
        let query = MessageQuery::new()
            .with_status(ProcessingStatus::Completed)
            .with_kind(MessageKind::Command)
            .with_id(sample.id);
        assert!(query.matches(&sample));
        assert!(!query.clone().with_kind(MessageKind::Event).matches(&sample));
        assert!(!query.with_id(Uuid::new_v4()).matches(&sample));
    }

    #[test]
    fn test_apply_paginates_after_filtering() {
        let records: Vec<_> = (0..10)
            .map(|i| {
                let status = if i % 2 == 0 {
                    ProcessingStatus::Completed
                } else {
                    ProcessingStatus::Failed
                };
                record(status, i)
            })
            .collect();

        let page: Vec<u64> = MessageQuery::new()
            .with_status(ProcessingStatus::Completed)
            .skip(1)
            .take(2)
            .apply(&records)
            .map(|r| r.execution_duration_ms)
            .collect();

        assert_eq!(page, [2, 4]);
    }
}
