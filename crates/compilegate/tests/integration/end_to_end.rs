use std::sync::Arc;

use compilegate::{CompileOptions, OutputEvent, SanitizeError, Sanitizer, Stats};

use super::{
    ECHO_COMPILER, compiler, fake_config, fixture_source, wait_until, work_dir_is_empty,
};

#[tokio::test]
async fn test_successful_compilation() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));
    let source = fixture_source("counter.facto");

    let events = compiler.submit(source.clone(), CompileOptions::new()).collect().await;

    assert_eq!(
        events,
        vec![
            OutputEvent::QueuePosition(0),
            OutputEvent::Status("Starting compilation".to_string()),
            OutputEvent::Log("compiling".to_string()),
            OutputEvent::Status("Compilation successful".to_string()),
            OutputEvent::Artifact(source.trim_end().to_string()),
        ]
    );

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_compilations, 1);
    assert_eq!(snapshot.successful_compilations, 1);
    assert_eq!(snapshot.failed_compilations, 0);
    assert!(compiler.queue().active().is_none());
    assert!(work_dir_is_empty(dir.path()));
}

#[tokio::test]
async fn test_oversize_source_rejected_before_queue() {
    let dir = tempfile::tempdir().unwrap();
    let config = compilegate::Config {
        max_source_length: 16,
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let (compiler, stats) = compiler(config);

    let events = compiler
        .submit("a".repeat(17), CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![OutputEvent::Error(
            "Source code exceeds maximum length of 16 characters".to_string()
        )]
    );
    assert_eq!(stats.snapshot().total_compilations, 0);
    assert!(compiler.queue().active().is_none());
}

#[tokio::test]
async fn test_source_at_length_limit_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let config = compilegate::Config {
        max_source_length: 16,
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let (compiler, _stats) = compiler(config);

    let events = compiler
        .submit("é".repeat(16), CompileOptions::new())
        .collect()
        .await;

    assert_eq!(events.last(), Some(&OutputEvent::Artifact("é".repeat(16))));
}

#[tokio::test]
async fn test_two_concurrent_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(
        dir.path(),
        r#"sleep 0.3; cat "$1" > "$3""#,
    ));

    let first = compiler.submit("Signal a = 1;", CompileOptions::new());
    wait_until(|| compiler.queue().active() == Some(first.job_id())).await;
    let second = compiler.submit("Signal b = 2;", CompileOptions::new());
    wait_until(|| compiler.queue().position(second.job_id()) == Some(1)).await;

    let (first, second) = tokio::join!(first.collect(), second.collect());

    assert_eq!(first[0], OutputEvent::QueuePosition(0));
    assert_eq!(first.last(), Some(&OutputEvent::Artifact("Signal a = 1;".to_string())));
    assert_eq!(
        second,
        vec![
            OutputEvent::QueuePosition(1),
            OutputEvent::Status("Waiting in queue (position 1)".to_string()),
            OutputEvent::QueuePosition(0),
            OutputEvent::Status("Starting compilation".to_string()),
            OutputEvent::Status("Compilation successful".to_string()),
            OutputEvent::Artifact("Signal b = 2;".to_string()),
        ]
    );
    assert_eq!(stats.snapshot().successful_compilations, 2);
}

#[tokio::test]
async fn test_timeout_leaves_no_orphan_process() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("compiler.pid");
    let script = format!(
        r#"echo $$ > "{}"; echo "working" >&2; exec sleep 30"#,
        pidfile.display()
    );
    let config = compilegate::Config {
        compilation_timeout: 0.3,
        ..fake_config(dir.path(), &script)
    };
    let (compiler, stats) = compiler(config);

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert!(events.contains(&OutputEvent::Log("working".to_string())));
    assert!(!events.iter().any(OutputEvent::is_artifact));
    let error = super::last_error(&events).unwrap();
    assert!(error.starts_with("Compilation timed out after"), "{error}");
    assert_eq!(stats.snapshot().failed_compilations, 1);
    assert!(compiler.queue().active().is_none());
    assert!(work_dir_is_empty(dir.path()));

    let pid = std::fs::read_to_string(&pidfile).unwrap();
    let proc_dir = std::path::Path::new("/proc").join(pid.trim());
    if std::path::Path::new("/proc/self").exists() {
        assert!(!proc_dir.exists(), "compiler process {} still alive", pid.trim());
    }
}

#[tokio::test]
async fn test_options_reach_the_compiler() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, _stats) = compiler(fake_config(
        dir.path(),
        r#"shift 3; echo "$@" >&2; exit 1"#,
    ));
    let options = CompileOptions::new()
        .with_power_poles("medium")
        .with_name("My <Blueprint>!")
        .with_no_optimize(true)
        .with_log_level("loud");

    let events = compiler.submit("Signal a = 1;", options).collect().await;

    assert!(events.contains(&OutputEvent::Log(
        "--power-poles medium --name My Blueprint --no-optimize --log-level info".to_string()
    )));
}

#[tokio::test]
async fn test_debug_mode_reports_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let config = compilegate::Config {
        debug: true,
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let (compiler, _stats) = compiler(config);

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    match &events[2] {
        OutputEvent::Log(line) => {
            assert!(line.starts_with("Running: /bin/sh -c"), "{line}");
            assert!(line.ends_with("--log-level info"), "{line}");
        }
        other => panic!("expected command line, got {other:?}"),
    }
}

struct Uppercase;

impl Sanitizer for Uppercase {
    fn sanitize(&self, source: &str) -> Result<String, SanitizeError> {
        Ok(source.to_uppercase())
    }
}

#[tokio::test]
async fn test_injected_sanitizer_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, _stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));
    let compiler = compiler.with_sanitizer(Arc::new(Uppercase));

    let events = compiler
        .submit("echo `id`", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(events.last(), Some(&OutputEvent::Artifact("ECHO `ID`".to_string())));
}

#[tokio::test]
async fn test_stats_file_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let stats_path = dir.path().join("stats.json");
    let config = compilegate::Config {
        stats_file: Some(stats_path.clone()),
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let compiler = compilegate::Compiler::new(config).unwrap();

    compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;
    compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    let snapshot = Stats::load(&stats_path).snapshot();
    assert_eq!(snapshot.total_compilations, 2);
    assert_eq!(snapshot.successful_compilations, 2);
}

#[tokio::test]
async fn test_stats_recorder_sees_every_admitted_job() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));

    for source in ["Signal a = 1;", "echo $(id)", "Signal b = 2;"] {
        compiler.submit(source, CompileOptions::new()).collect().await;
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.total_compilations, 3);
    assert_eq!(snapshot.successful_compilations, 2);
    assert_eq!(snapshot.failed_compilations, 1);
}
