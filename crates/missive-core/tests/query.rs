//! Textual queries against recorded messages.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use missive_core::{
    InMemoryRepository, MessageKind, MessageQuery, MessageRecord, MessageRepository,
    ProcessingStatus, QueryParseError,
};
use uuid::Uuid;

fn record(status: ProcessingStatus, duration: u64, day: u32) -> MessageRecord {
    MessageRecord {
        id: Uuid::new_v4(),
        kind: MessageKind::Command,
        content_type: "ledger::Transfer".into(),
        content: None,
        data: HashMap::new(),
        error_message: None,
        error_type: (status == ProcessingStatus::Failed).then(|| "ledger::Overdrawn".into()),
        created_at: Utc.with_ymd_and_hms(2024, 3, day, 9, 30, 0).unwrap(),
        execution_duration_ms: duration,
        status,
    }
}

fn sample() -> Vec<MessageRecord> {
    let mut records = Vec::new();
    for i in 0..30_u64 {
        let status = match i % 3 {
            0 => ProcessingStatus::Completed,
            1 => ProcessingStatus::Failed,
            _ => ProcessingStatus::Rejected,
        };
        records.push(record(status, i * 10, (i % 28) as u32 + 1));
    }
    records
}

#[test]
fn completed_and_slow_limited_to_ten() {
    let query: MessageQuery = "status=Completed,duration>100,take=10".parse().unwrap();
    let records = sample();

    for r in &records {
        let expected = r.status == ProcessingStatus::Completed && r.execution_duration_ms > 100;
        assert_eq!(query.matches(r), expected);
    }

    let selected: Vec<_> = query.apply(&records).collect();
    assert!(!selected.is_empty());
    assert!(selected.len() <= 10);
    assert!(selected.iter().all(|r| query.matches(r)));
}

#[test]
fn unknown_field_is_named() {
    let err = "unknownfield=5".parse::<MessageQuery>().unwrap_err();
    assert_eq!(err, QueryParseError::UnknownField("unknownfield".into()));
    assert!(err.to_string().contains("unknownfield"));
}

#[test]
fn every_field_agrees_with_direct_comparison() {
    let records = sample();
    let pivot = &records[4];
    let day = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();

    let cases: Vec<(String, Box<dyn Fn(&MessageRecord) -> bool + '_>)> = vec![
        (format!("id={}", pivot.id), Box::new(|r: &MessageRecord| r.id == pivot.id)),
        ("created>2024-03-10".into(), Box::new(move |r: &MessageRecord| r.created_at > day)),
        ("created<2024-03-10".into(), Box::new(move |r: &MessageRecord| r.created_at < day)),
        (
            "created=2024-03-05 09:30:00".into(),
            Box::new(|r: &MessageRecord| r.created_at == Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap()),
        ),
        ("contenttype=Transfer".into(), Box::new(|_: &MessageRecord| true)),
        ("contenttype=Deposit".into(), Box::new(|_: &MessageRecord| false)),
        (
            "errortype=Overdrawn".into(),
            Box::new(|r: &MessageRecord| r.error_type.is_some()),
        ),
        (
            "status=Rejected".into(),
            Box::new(|r: &MessageRecord| r.status == ProcessingStatus::Rejected),
        ),
        ("type=command".into(), Box::new(|r: &MessageRecord| r.kind == MessageKind::Command)),
        ("type=3".into(), Box::new(|r: &MessageRecord| r.kind == MessageKind::Event)),
        ("duration=40".into(), Box::new(|r: &MessageRecord| r.execution_duration_ms == 40)),
        ("duration>40".into(), Box::new(|r: &MessageRecord| r.execution_duration_ms > 40)),
        ("duration<40".into(), Box::new(|r: &MessageRecord| r.execution_duration_ms < 40)),
    ];

    for (text, expected) in cases {
        let query: MessageQuery = text.parse().unwrap();
        for r in &records {
            assert_eq!(query.matches(r), expected(r), "{text}");
        }
    }
}

#[test]
fn repository_paginates_query() {
    let repository = InMemoryRepository::new();
    for r in sample() {
        repository.append(r).unwrap();
    }

    let all = repository
        .query(&"status=Completed".parse().unwrap())
        .unwrap();
    let page = repository
        .query(&"status=Completed; skip 2; take 3".parse().unwrap())
        .unwrap();

    assert_eq!(all.len(), 10);
    assert_eq!(page, all[2..5]);
}
