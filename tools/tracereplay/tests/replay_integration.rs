use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use tracereplay::archive::{export_archive, import_archive, load_archive_steps, ExportOptions, HashCheck};
use tracereplay::diff::{diff_runs, first_divergence, DiffReason};
use tracereplay::errors::TraceError;
use tracereplay::golden::{test_run, CompareScope, FieldPath, GoldenTest};
use tracereplay::recorder::{Recorder, RecorderOptions};
use tracereplay::replay::Replayer;
use tracereplay::runtime::FakeClock;
use tracereplay::store::{SqliteStore, TraceStore};
use tracereplay::types::{Payload, StepKind};

// ── helpers ───────────────────────────────────────────────────────────────────

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn recorder(store: Arc<SqliteStore>) -> Recorder {
    let start = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).single().expect("valid date");
    Recorder::new(
        store,
        RecorderOptions {
            project: "weather-agent".to_string(),
            ..RecorderOptions::default()
        },
    )
    .expect("recorder")
    .with_clock(Arc::new(FakeClock::ticking(start, Duration::milliseconds(10))))
}

/// Planner asks for the weather, tool answers, planner summarizes.
fn record_weather_run(rec: &mut Recorder, forecast: &str) -> String {
    rec.run("weather", payload(json!({"city": "Oslo"})), |rec, handle| {
        rec.llm(
            "planner",
            payload(json!({"prompt": "weather in Oslo?", "api_key": "sk-secret"})),
            payload(json!({"tool": "get_weather"})),
            None,
        )?;
        rec.tool(
            "get_weather",
            payload(json!({"city": "Oslo"})),
            payload(json!({"forecast": forecast})),
            None,
        )?;
        rec.llm(
            "planner",
            payload(json!({"observation": forecast})),
            payload(json!({"answer": format!("It will be {forecast}.")})),
            None,
        )?;
        Ok::<_, TraceError>(handle.id.clone())
    })
    .expect("record weather run")
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[test]
fn recorded_run_reads_back_contiguous_and_redacted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::open(temp.path().join("traces.db")).expect("open"));
    let mut rec = recorder(store.clone());
    let run_id = record_weather_run(&mut rec, "rain");

    let run = store.get_run(&run_id).expect("run");
    assert_eq!(run.meta["project"], "weather-agent");
    assert_eq!(run.meta["city"], "Oslo");
    assert!(run.ended_at.expect("ended") > run.started_at);

    let steps = store.list_steps(&run_id).expect("steps");
    assert_eq!(steps.iter().map(|s| s.idx).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(steps[0].input["api_key"], "***REDACTED***");
    assert!(steps.windows(2).all(|pair| pair[0].ts < pair[1].ts));

    let report = Replayer::new(store.as_ref()).replay(&run_id, false).expect("replay");
    assert!(report.ok);
    assert_eq!(report.steps_replayed, 3);
}

#[test]
fn tool_mocker_replays_recorded_tool_results() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::open(temp.path().join("traces.db")).expect("open"));
    let mut rec = recorder(store.clone());
    let run_id = record_weather_run(&mut rec, "sun");

    let replayer = Replayer::new(store.as_ref());
    let mut mocker = replayer.build_tool_mocker(&run_id, true).expect("mocker");
    assert_eq!(
        mocker.next_output("get_weather", &payload(json!({"city": "Oslo"}))).expect("output"),
        payload(json!({"forecast": "sun"}))
    );
    assert!(matches!(
        mocker.next_output("get_weather", &payload(json!({"city": "Oslo"}))),
        Err(TraceError::ReplayExhausted { recorded: 1 })
    ));

    let mut strict = replayer.build_tool_mocker(&run_id, true).expect("mocker");
    assert!(matches!(
        strict.next_output("get_weather", &payload(json!({"city": "Bergen"}))),
        Err(TraceError::ToolInputMismatch { cursor: 0, .. })
    ));
}

#[test]
fn changed_tool_result_is_caught_by_diff_and_golden_test() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteStore::open(temp.path().join("traces.db")).expect("open"));
    let mut rec = recorder(store.clone());
    let golden = record_weather_run(&mut rec, "rain");
    let current = record_weather_run(&mut rec, "snow");

    assert!(diff_runs(store.as_ref(), &golden, &golden).expect("diff").is_none());
    let divergence = diff_runs(store.as_ref(), &golden, &current)
        .expect("diff")
        .expect("divergence");
    assert_eq!(divergence.index, 1);
    assert_eq!(divergence.reason, DiffReason::Output);

    let verdict = test_run(store.as_ref(), &GoldenTest::new(&golden, &current)).expect("test");
    assert!(!verdict.ok);
    let first = verdict.first_divergence.expect("first divergence");
    assert_eq!(first.step_idx, 0);
    assert_eq!(first.field_path, FieldPath::Output);
    assert_eq!(first.name, "get_weather");

    let mut actions_only = GoldenTest::new(&golden, &current);
    actions_only.compare = CompareScope::Actions;
    let verdict = test_run(store.as_ref(), &actions_only).expect("test");
    assert_eq!(verdict.first_divergence.expect("divergence").field_path, FieldPath::Input);
}

#[test]
fn archive_round_trip_preserves_the_trace_across_databases() {
    let temp = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(SqliteStore::open(temp.path().join("source.db")).expect("open"));
    let mut rec = recorder(source.clone());
    let run_id = record_weather_run(&mut rec, "fog");

    let archive = temp.path().join("goldens/weather.areplay");
    let info = export_archive(
        source.as_ref(),
        &run_id,
        &archive,
        &ExportOptions::default(),
    )
    .expect("export");
    assert_eq!(info.step_count, 3);

    let target = SqliteStore::open(temp.path().join("target.db")).expect("open");
    let report = import_archive(&target, &archive).expect("import");
    assert_eq!(report.hash_check, HashCheck::Verified);
    assert_ne!(report.run_id, run_id);

    let original = source.list_steps(&run_id).expect("steps");
    let imported = target.list_steps(&report.run_id).expect("steps");
    assert!(first_divergence(&original, &imported).is_none());
    assert_eq!(imported.iter().map(|s| s.kind).collect::<Vec<_>>(), vec![StepKind::Llm, StepKind::Tool, StepKind::Llm]);

    let from_file = load_archive_steps(&archive).expect("load");
    assert!(first_divergence(&from_file, &original).is_none());

    let verdict = test_run(
        &target,
        &GoldenTest::new(&archive.display().to_string(), &report.run_id),
    )
    .expect("golden");
    assert!(verdict.ok);
    assert_eq!(verdict.details.golden.kind, "file");
}
