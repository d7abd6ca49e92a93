use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use compilegate::{
    CommandBuilder, CompileOptions, Config, OutputEvent, SanitizeError, Sanitizer, StatsRecorder,
};

use super::{ECHO_COMPILER, compiler, fake_config, last_error, work_dir_is_empty};

#[tokio::test]
async fn test_non_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(
        dir.path(),
        r#"echo "error: unknown signal" >&2; exit 2"#,
    ));

    let events = compiler
        .submit("Signal a = b;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        &events[2..],
        &[
            OutputEvent::Log("error: unknown signal".to_string()),
            OutputEvent::Status("Compilation failed (exit code 2)".to_string()),
            OutputEvent::Error("See log output for details".to_string()),
        ]
    );
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.failed_compilations, 1);
    assert_eq!(snapshot.successful_compilations, 0);
    assert!(compiler.queue().active().is_none());
    assert!(work_dir_is_empty(dir.path()));
}

#[tokio::test]
async fn test_artifact_requires_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, _stats) = compiler(fake_config(dir.path(), r#"cat "$1" > "$3"; exit 1"#));

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert!(!events.iter().any(OutputEvent::is_artifact));
    assert_eq!(last_error(&events), Some("See log output for details"));
    assert!(work_dir_is_empty(dir.path()));
}

#[tokio::test]
async fn test_zero_exit_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(dir.path(), "exit 0"));

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert!(!events.iter().any(OutputEvent::is_artifact));
    assert!(events.contains(&OutputEvent::Status(
        "Compilation failed (no output)".to_string()
    )));
    assert_eq!(
        last_error(&events),
        Some("Compiler finished without producing a blueprint")
    );
    assert_eq!(stats.snapshot().failed_compilations, 1);
}

#[tokio::test]
async fn test_suspicious_source_rejected_after_admission() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));

    let events = compiler
        .submit("Signal a = `id`;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            OutputEvent::QueuePosition(0),
            OutputEvent::Status("Starting compilation".to_string()),
            OutputEvent::Error("Source contains potentially malicious content".to_string()),
        ]
    );
    assert_eq!(stats.snapshot().failed_compilations, 1);
    assert!(compiler.queue().active().is_none());
}

#[tokio::test]
async fn test_custom_deny_patterns() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        deny_patterns: Some(vec![r"import\s+os".to_string()]),
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let (compiler, _stats) = compiler(config);

    let rejected = compiler
        .submit("IMPORT   os", CompileOptions::new())
        .collect()
        .await;
    assert!(rejected.iter().any(OutputEvent::is_error));

    let accepted = compiler
        .submit("echo `id`", CompileOptions::new())
        .collect()
        .await;
    assert!(accepted.iter().any(OutputEvent::is_artifact));
}

#[tokio::test]
async fn test_missing_compiler() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        compiler_path: "/nonexistent/factompile".into(),
        compiler_args: Vec::new(),
        ..fake_config(dir.path(), "")
    };
    let (compiler, stats) = compiler(config);

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        events.last(),
        Some(&OutputEvent::Error(
            "Compiler is unavailable. Please try again later.".to_string()
        ))
    );
    assert!(!events.iter().any(|e| matches!(e, OutputEvent::Log(_))));
    assert_eq!(stats.snapshot().failed_compilations, 1);
    assert!(work_dir_is_empty(dir.path()));
}

#[tokio::test]
async fn test_unwritable_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();
    let config = Config {
        work_dir: Some(blocker.join("jobs")),
        ..fake_config(dir.path(), ECHO_COMPILER)
    };
    let (compiler, stats) = compiler(config);

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(last_error(&events), Some("Failed to prepare compilation"));
    assert_eq!(stats.snapshot().failed_compilations, 1);
    assert!(compiler.queue().active().is_none());
}

#[derive(Default)]
struct Counting {
    starts: AtomicUsize,
    finishes: AtomicUsize,
}

impl StatsRecorder for Counting {
    fn record_start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn record_success(&self, _duration_seconds: f64) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self, _duration_seconds: f64) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_release_and_record_once_per_admitted_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        max_source_length: 32,
        ..fake_config(
            dir.path(),
            r#"case "$(cat "$1")" in *fail*) exit 1;; esac; cat "$1" > "$3""#,
        )
    };
    let counting = Arc::new(Counting::default());
    let compiler = compilegate::Compiler::new(config)
        .unwrap()
        .with_stats(counting.clone());

    let sources = [
        "Signal ok = 1;".to_string(),
        "Signal fail = 1;".to_string(),
        "Signal bad = `id`;".to_string(),
        "x".repeat(33),
        "Signal ok = 2;".to_string(),
    ];
    for source in sources {
        compiler.submit(source, CompileOptions::new()).collect().await;
        assert!(compiler.queue().active().is_none());
    }

    // The oversize source never reached the queue
    assert_eq!(counting.starts.load(Ordering::SeqCst), 4);
    assert_eq!(counting.finishes.load(Ordering::SeqCst), 4);
}

struct ExplodingSanitizer;

impl Sanitizer for ExplodingSanitizer {
    fn sanitize(&self, _source: &str) -> Result<String, SanitizeError> {
        panic!("sanitizer bug");
    }
}

struct ExplodingCommands;

impl CommandBuilder for ExplodingCommands {
    fn build(&self, _input: &Path, _output: &Path, _options: &CompileOptions) -> Vec<String> {
        panic!("command builder bug");
    }
}

const INTERNAL_ERROR: &str = "Compilation failed unexpectedly. Please try again later.";

#[tokio::test]
async fn test_panicking_sanitizer_still_ends_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));
    let compiler = compiler.with_sanitizer(Arc::new(ExplodingSanitizer));

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            OutputEvent::QueuePosition(0),
            OutputEvent::Status("Starting compilation".to_string()),
            OutputEvent::Error(INTERNAL_ERROR.to_string()),
        ]
    );
    assert_eq!(stats.snapshot().failed_compilations, 1);
    assert!(compiler.queue().active().is_none());
}

#[tokio::test]
async fn test_panicking_command_builder_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let (compiler, _stats) = compiler(fake_config(dir.path(), ECHO_COMPILER));
    let compiler = compiler.with_command_builder(Arc::new(ExplodingCommands));

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(last_error(&events), Some(INTERNAL_ERROR));
    assert!(!events.iter().any(OutputEvent::is_artifact));
    assert!(work_dir_is_empty(dir.path()));

    // The slot is free for the next job
    let next = compiler
        .submit("Signal b = 2;", CompileOptions::new())
        .collect()
        .await;
    assert_eq!(next[0], OutputEvent::QueuePosition(0));
}

struct BrokenStart {
    finishes: AtomicUsize,
}

impl StatsRecorder for BrokenStart {
    fn record_start(&self) {
        panic!("stats store unavailable");
    }

    fn record_success(&self, _duration_seconds: f64) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self, _duration_seconds: f64) {
        self.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_failing_stats_sink_does_not_abort_job() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(BrokenStart {
        finishes: AtomicUsize::new(0),
    });
    let compiler = compilegate::Compiler::new(fake_config(dir.path(), ECHO_COMPILER))
        .unwrap()
        .with_stats(recorder.clone());

    let events = compiler
        .submit("Signal a = 1;", CompileOptions::new())
        .collect()
        .await;

    assert_eq!(
        events.last(),
        Some(&OutputEvent::Artifact("Signal a = 1;".to_string()))
    );
    assert_eq!(recorder.finishes.load(Ordering::SeqCst), 1);
    assert!(compiler.queue().active().is_none());
}
