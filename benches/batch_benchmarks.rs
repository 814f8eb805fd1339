use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use taskforge::models::{BatchSummary, ItemOutcomeStatus, ItemRecord, TaskConfig, TaskKind};
use taskforge::state_machine::{determine_target_state, TaskEvent, TaskStatus};

fn records(count: usize) -> Vec<ItemRecord> {
    (0..count)
        .map(|i| ItemRecord {
            item_id: i as i64,
            subject_id: Some((i % 40) as i64),
            target_id: Some((i % 7) as i64),
            outcome_status: if i % 10 == 0 {
                ItemOutcomeStatus::Failed
            } else {
                ItemOutcomeStatus::Success
            },
            score: Some(0.8),
            feedback: Some("ok".to_string()),
            error: None,
            retry_count: (i % 3) as u32,
            timestamp: Utc::now(),
        })
        .collect()
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let ids: Vec<i64> = (0..1000).collect();
    let bag = json!({ "answerIds": ids });
    c.bench_function("config_parse_1000_ids", |b| {
        b.iter(|| TaskConfig::parse(Some(TaskKind::BatchEvaluation), black_box(&bag)))
    });
}

fn benchmark_summary(c: &mut Criterion) {
    let items = records(10_000);
    c.bench_function("summary_from_10k_items", |b| {
        b.iter(|| BatchSummary::from_items(10_000, black_box(&items), Utc::now()))
    });
}

fn benchmark_transition_table(c: &mut Criterion) {
    let events = [
        TaskEvent::Start,
        TaskEvent::Pause,
        TaskEvent::Resume,
        TaskEvent::Cancel,
        TaskEvent::Retry,
        TaskEvent::Complete,
    ];
    c.bench_function("transition_table_full_scan", |b| {
        b.iter(|| {
            TaskStatus::ALL
                .iter()
                .flat_map(|status| events.iter().map(move |event| (*status, event)))
                .filter(|(status, event)| determine_target_state(*status, event).is_ok())
                .count()
        })
    });
}

criterion_group!(
    benches,
    benchmark_config_parsing,
    benchmark_summary,
    benchmark_transition_table
);
criterion_main!(benches);
