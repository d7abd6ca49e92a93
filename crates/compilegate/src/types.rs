use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a blueprint display name, in characters
pub const MAX_NAME_LENGTH: usize = 100;

/// Unique identifier of a compilation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random job id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued behind the active job
    Waiting,
    /// Holding the compilation slot
    Active,
    /// Finished, successfully or not
    Completed,
    /// Left the queue without ever becoming active
    Cancelled,
}

/// A single compilation request as tracked by the orchestrator
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    pub submitted_at: SystemTime,
    pub options: CompileOptions,
}

impl Job {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            id: JobId::new(),
            state: JobState::Waiting,
            submitted_at: SystemTime::now(),
            options,
        }
    }
}

/// Power pole size passed to the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoleSize {
    /// Do not place power poles
    #[default]
    None,
    Small,
    Medium,
    Big,
    Substation,
}

impl PoleSize {
    /// Parse a pole size, falling back to [`PoleSize::None`] for unknown values
    pub fn coerce(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "small" => PoleSize::Small,
            "medium" => PoleSize::Medium,
            "big" => PoleSize::Big,
            "substation" => PoleSize::Substation,
            _ => PoleSize::None,
        }
    }

    /// Compiler argument value, or `None` when no flag should be passed
    pub fn as_arg(&self) -> Option<&'static str> {
        match self {
            PoleSize::None => None,
            PoleSize::Small => Some("small"),
            PoleSize::Medium => Some("medium"),
            PoleSize::Big => Some("big"),
            PoleSize::Substation => Some("substation"),
        }
    }
}

/// Compiler log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a log level, falling back to [`LogLevel::Info`] for unknown values
    pub fn coerce(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated options for one compilation
///
/// Every constructor yields a value inside the legal domain: unknown pole
/// sizes and log levels fall back to their defaults, and the display name is
/// filtered down to allowed characters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CompileOptions {
    pub power_poles: PoleSize,
    name: Option<String>,
    pub no_optimize: bool,
    pub json_output: bool,
    pub log_level: LogLevel,
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_power_poles(mut self, value: &str) -> Self {
        self.power_poles = PoleSize::coerce(value);
        self
    }

    /// Set the display name; characters outside `[A-Za-z0-9 _-]` are dropped
    pub fn with_name(mut self, value: &str) -> Self {
        self.name = sanitize_name(value);
        self
    }

    pub fn with_no_optimize(mut self, enable: bool) -> Self {
        self.no_optimize = enable;
        self
    }

    pub fn with_json_output(mut self, enable: bool) -> Self {
        self.json_output = enable;
        self
    }

    pub fn with_log_level(mut self, value: &str) -> Self {
        self.log_level = LogLevel::coerce(value);
        self
    }

    /// Sanitized display name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Options as they arrive from a caller, before coercion
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCompileOptions {
    pub power_poles: Option<String>,
    pub name: Option<String>,
    pub no_optimize: bool,
    pub json_output: bool,
    pub log_level: Option<String>,
}

impl From<RawCompileOptions> for CompileOptions {
    fn from(raw: RawCompileOptions) -> Self {
        let mut options = CompileOptions::new()
            .with_no_optimize(raw.no_optimize)
            .with_json_output(raw.json_output);
        if let Some(ref poles) = raw.power_poles {
            options = options.with_power_poles(poles);
        }
        if let Some(ref name) = raw.name {
            options = options.with_name(name);
        }
        if let Some(ref level) = raw.log_level {
            options = options.with_log_level(level);
        }
        options
    }
}

impl<'de> Deserialize<'de> for CompileOptions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        RawCompileOptions::deserialize(deserializer).map(Into::into)
    }
}

fn sanitize_name(value: &str) -> Option<String> {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(MAX_NAME_LENGTH)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}

/// One event in a job's output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A diagnostic line from the compiler
    Log(String),
    /// The compiled blueprint
    Artifact(String),
    /// A terminal failure message
    Error(String),
    /// Human-readable progress
    Status(String),
    /// Queue position; 0 means the job is compiling
    QueuePosition(usize),
}

impl OutputEvent {
    pub fn is_artifact(&self) -> bool {
        matches!(self, OutputEvent::Artifact(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, OutputEvent::Error(_))
    }
}
