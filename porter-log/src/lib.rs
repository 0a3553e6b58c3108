//! Porter logging.
//!
//! Leveled logging controlled by `PORTER_*` environment variables, with
//! optional structured key-value fields attached to each record.
//!
//! # Usage
//!
//! ```rust
//! use porter_log::{debug, error, info, warn};
//!
//! info!("Worker started");
//! debug!("Polling queue {}", "webhooks");
//! warn!("Lease lost"; job_id = 42, worker = "w1");
//! error!(target: "porter::store", "Store unreachable: {}", "timeout");
//! ```
//!
//! Fields after the `;` render as `key=value` pairs in the pretty and compact
//! formats and as a `fields` object in JSON output.
//!
//! # Environment Variables
//!
//! - `PORTER_DEBUG=1` - Enable debug logging
//! - `PORTER_LOG_LEVEL=trace|debug|info|warn|error|off` - Minimum level
//! - `PORTER_LOG_FORMAT=pretty|compact|json` - Output format (default json)
//! - `PORTER_LOG_COLOR=1|0` - Enable/disable colors
//! - `PORTER_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `PORTER_LOG_MODULE=1|0` - Include the record target

use once_cell::sync::Lazy;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

// ============================================================================
// Log Levels
// ============================================================================

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    /// Most verbose
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    /// Least verbose
    Error = 4,
    /// Nothing is emitted
    Off = 5,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            4 => Level::Error,
            _ => Level::Off,
        }
    }

    #[cfg(feature = "color")]
    fn colored(&self) -> colored::ColoredString {
        use colored::Colorize;
        match self {
            Level::Trace => "TRACE".magenta(),
            Level::Debug => "DEBUG".blue(),
            Level::Info => "INFO".green(),
            Level::Warn => "WARN".yellow(),
            Level::Error => "ERROR".red().bold(),
            Level::Off => "OFF".white(),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Human-readable, one record per line with full timestamp
    Pretty,
    /// Short single-line form
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Global Configuration
// ============================================================================

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

static CONFIG: Lazy<LogConfig> = Lazy::new(|| {
    let config = LogConfig::from_env();
    DEBUG_ENABLED.store(config.debug, Ordering::SeqCst);
    LOG_LEVEL.store(config.level as u8, Ordering::SeqCst);
    config
});

/// Logging configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub debug: bool,
    pub level: Level,
    pub format: Format,
    pub color: bool,
    pub timestamps: bool,
    /// Include the record target (module path) in output
    pub module_path: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            timestamps: true,
            module_path: true,
        }
    }
}

impl LogConfig {
    /// Build a configuration from `PORTER_*` environment variables.
    ///
    /// Does not touch the global level; that happens on first use of the
    /// global configuration.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let debug = flag("PORTER_DEBUG").unwrap_or(defaults.debug);

        let level = env::var("PORTER_LOG_LEVEL")
            .ok()
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { defaults.level });

        let format = env::var("PORTER_LOG_FORMAT")
            .ok()
            .and_then(|s| Format::parse(&s))
            .unwrap_or(defaults.format);

        let color = flag("PORTER_LOG_COLOR")
            .unwrap_or_else(|| env::var("NO_COLOR").is_err() && env::var("TERM").is_ok());

        Self {
            debug,
            level,
            format,
            color,
            timestamps: flag("PORTER_LOG_TIMESTAMPS").unwrap_or(defaults.timestamps),
            module_path: flag("PORTER_LOG_MODULE").unwrap_or(defaults.module_path),
        }
    }
}

fn flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
}

// ============================================================================
// Public API
// ============================================================================

/// Force configuration from the environment.
///
/// Happens lazily on the first log call otherwise.
pub fn init() {
    Lazy::force(&CONFIG);
}

/// Get the global configuration.
pub fn config() -> &'static LogConfig {
    &CONFIG
}

#[inline]
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn is_level_enabled(level: Level) -> bool {
    level != Level::Off && level as u8 >= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Whether a record at `level` would be emitted.
///
/// Debug records are also emitted while the debug flag is set.
#[doc(hidden)]
#[inline]
pub fn enabled(level: Level) -> bool {
    Lazy::force(&CONFIG);
    is_level_enabled(level) || (level == Level::Debug && is_debug_enabled())
}

pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Change the minimum level at runtime.
pub fn set_level(level: Level) {
    Lazy::force(&CONFIG);
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    log::set_max_level(max_level_filter(level));
}

/// Toggle debug mode at runtime. Enabling it lowers the level to debug.
pub fn set_debug(enabled: bool) {
    Lazy::force(&CONFIG);
    DEBUG_ENABLED.store(enabled, Ordering::SeqCst);
    if enabled && current_level() > Level::Debug {
        set_level(Level::Debug);
    }
}

// ============================================================================
// Log Output
// ============================================================================

/// A structured field attached to a record.
pub type Field<'a> = (&'a str, String);

/// Emit a record. Used by the macros.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if !enabled(level) {
        return;
    }

    let config = config();
    match config.format {
        Format::Pretty => write_pretty(level, target, message, fields, config),
        Format::Compact => write_compact(level, target, message, fields, config),
        Format::Json => write_json(level, target, message, fields, config),
    }
}

fn write_fields(out: &mut impl Write, fields: &[Field<'_>]) {
    for (key, value) in fields {
        if value.contains(char::is_whitespace) {
            let _ = write!(out, " {}={:?}", key, value);
        } else {
            let _ = write!(out, " {}={}", key, value);
        }
    }
}

fn write_pretty(
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
    config: &LogConfig,
) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Utc::now();
        let _ = write!(stderr, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.3fZ"));
    }

    #[cfg(feature = "color")]
    if config.color {
        let _ = write!(stderr, "{:5} ", level.colored());
    } else {
        let _ = write!(stderr, "{:5} ", level.as_str());
    }

    #[cfg(not(feature = "color"))]
    let _ = write!(stderr, "{:5} ", level.as_str());

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "[{}] ", target);
    }

    let _ = write!(stderr, "{}", message);
    write_fields(&mut stderr, fields);
    let _ = writeln!(stderr);
}

fn write_compact(
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
    config: &LogConfig,
) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let _ = write!(stderr, "{} ", chrono::Utc::now().format("%H:%M:%S"));
    }

    let _ = write!(stderr, "{} ", level.as_str().chars().next().unwrap_or('?'));

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "{}: ", target);
    }

    let _ = write!(stderr, "{}", message);
    write_fields(&mut stderr, fields);
    let _ = writeln!(stderr);
}

#[cfg(feature = "json")]
fn write_json(
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
    config: &LogConfig,
) {
    if let Some(line) = json_line(level, target, message, fields, config) {
        eprintln!("{}", line);
    }
}

#[cfg(feature = "json")]
fn json_line(
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
    config: &LogConfig,
) -> Option<String> {
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct Entry<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        level: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<&'a str>,
        message: &'a str,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<&'a str, &'a str>,
    }

    let entry = Entry {
        timestamp: config.timestamps.then(|| chrono::Utc::now().to_rfc3339()),
        level: level.as_str(),
        target: (config.module_path && !target.is_empty()).then_some(target),
        message,
        fields: fields.iter().map(|(k, v)| (*k, v.as_str())).collect(),
    };

    serde_json::to_string(&entry).ok()
}

#[cfg(not(feature = "json"))]
fn write_json(
    level: Level,
    target: &str,
    message: &str,
    fields: &[Field<'_>],
    _config: &LogConfig,
) {
    let mut line = format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}""#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        escape_json(target),
        escape_json(message)
    );
    if !fields.is_empty() {
        let rendered: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!(r#""{}":"{}""#, escape_json(k), escape_json(v)))
            .collect();
        line.push_str(&format!(r#","fields":{{{}}}"#, rendered.join(",")));
    }
    line.push('}');
    eprintln!("{}", line);
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => result.push_str(&format!("\\u{:04x}", c as u32)),
            c => result.push(c),
        }
    }
    result
}

// ============================================================================
// `log` crate bridge
// ============================================================================

struct Bridge;

static BRIDGE: Bridge = Bridge;

impl log::Log for Bridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        enabled(metadata.level().into())
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        crate::log(record.level().into(), record.target(), &message, &[]);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn max_level_filter(level: Level) -> log::LevelFilter {
    match level {
        Level::Trace => log::LevelFilter::Trace,
        Level::Debug => log::LevelFilter::Debug,
        Level::Info => log::LevelFilter::Info,
        Level::Warn => log::LevelFilter::Warn,
        Level::Error => log::LevelFilter::Error,
        Level::Off => log::LevelFilter::Off,
    }
}

/// Route records from crates using the `log` facade (sqlx, for one)
/// through Porter's formatter.
///
/// Fails if another logger is already installed.
pub fn init_log_bridge() -> Result<(), log::SetLoggerError> {
    init();
    log::set_logger(&BRIDGE)?;
    let level = if is_debug_enabled() && current_level() > Level::Debug {
        Level::Debug
    } else {
        current_level()
    };
    log::set_max_level(max_level_filter(level));
    Ok(())
}

// ============================================================================
// Macros
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __porter_log {
    ($level:expr, target: $target:expr, $fmt:literal $(, $arg:expr)* ; $($key:ident = $value:expr),+ $(,)?) => {
        if $crate::enabled($level) {
            $crate::log(
                $level,
                $target,
                &format!($fmt $(, $arg)*),
                &[$((stringify!($key), format!("{}", $value))),+],
            );
        }
    };
    ($level:expr, target: $target:expr, $($arg:tt)+) => {
        if $crate::enabled($level) {
            $crate::log($level, $target, &format!($($arg)+), &[]);
        }
    };
    ($level:expr, $fmt:literal $(, $arg:expr)* ; $($key:ident = $value:expr),+ $(,)?) => {
        if $crate::enabled($level) {
            $crate::log(
                $level,
                module_path!(),
                &format!($fmt $(, $arg)*),
                &[$((stringify!($key), format!("{}", $value))),+],
            );
        }
    };
    ($level:expr, $($arg:tt)+) => {
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), &format!($($arg)+), &[]);
        }
    };
}

/// Log at trace level.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => { $crate::__porter_log!($crate::Level::Trace, $($arg)+) };
}

/// Log at debug level.
///
/// Emitted when `PORTER_DEBUG=1` or the level is debug or lower.
///
/// ```rust
/// use porter_log::debug;
///
/// let queue = "webhooks";
/// debug!("Claim found nothing on {}", queue);
/// debug!(target: "porter::worker", "Polling"; queue = queue);
/// ```
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => { $crate::__porter_log!($crate::Level::Debug, $($arg)+) };
}

/// Log at info level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => { $crate::__porter_log!($crate::Level::Info, $($arg)+) };
}

/// Log at warn level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => { $crate::__porter_log!($crate::Level::Warn, $($arg)+) };
}

/// Log at error level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => { $crate::__porter_log!($crate::Level::Error, $($arg)+) };
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! A `tracing` subscriber that follows the `PORTER_*` level settings.

    use super::*;

    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("debug"), Some(Level::Debug));
        assert_eq!(Level::parse(" WARNING "), Some(Level::Warn));
        assert_eq!(Level::parse("none"), Some(Level::Off));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(Format::parse("Pretty"), Some(Format::Pretty));
        assert_eq!(Format::parse("json"), Some(Format::Json));
        assert_eq!(Format::parse("xml"), None);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(Level::from(log::Level::Warn), Level::Warn);
        assert_eq!(max_level_filter(Level::Off), log::LevelFilter::Off);
    }

    #[test]
    fn test_off_is_never_enabled() {
        assert!(!is_level_enabled(Level::Off));
    }

    #[test]
    fn test_set_level_roundtrip() {
        let original = current_level();

        set_level(Level::Error);
        assert_eq!(current_level(), Level::Error);
        assert!(!enabled(Level::Info));

        set_level(original);
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_line_includes_fields() {
        let config = LogConfig {
            timestamps: false,
            ..LogConfig::default()
        };
        let line = json_line(
            Level::Info,
            "porter::worker",
            "job completed",
            &[("job_id", "42".to_string())],
            &config,
        )
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["target"], "porter::worker");
        assert_eq!(value["fields"]["job_id"], "42");
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_macros_compile() {
        let job_id = 7;
        trace!("trace message");
        debug!("debug {}", job_id);
        info!("claimed"; job_id = job_id, queue = "default");
        warn!(target: "test", "with target");
        error!(target: "test", "failed {}", job_id; attempt = 3);
    }
}
