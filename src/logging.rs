use chrono::Utc;
use serde_json::json;

/// Logger struct for handling structured logging
#[derive(Clone, Debug)]
pub struct Logger {
    request_id: String,
}

impl Logger {
    /// Create a new Logger instance
    ///
    /// # Arguments
    ///
    /// * `request_id` - A unique identifier for the current request
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Log an info message
    pub fn info(&self, message: &str, data: Option<serde_json::Value>) {
        self.log(Level::Info, message, data);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str, data: Option<serde_json::Value>) {
        self.log(Level::Warn, message, data);
    }

    /// Log an error message
    pub fn error(&self, message: &str, data: Option<serde_json::Value>) {
        self.log(Level::Error, message, data);
    }

    fn log(&self, level: Level, message: &str, data: Option<serde_json::Value>) {
        let line = render(level, &self.request_id, message, data);
        emit(level, &line);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

fn render(level: Level, request_id: &str, message: &str, data: Option<serde_json::Value>) -> String {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "level": level.as_str(),
        "request_id": request_id,
        "message": message,
        "data": data
    })
    .to_string()
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        fn emit(level: Level, line: &str) {
            let value = line.into();
            match level {
                Level::Info => web_sys::console::log_1(&value),
                Level::Warn => web_sys::console::warn_1(&value),
                Level::Error => web_sys::console::error_1(&value),
            }
        }
    } else {
        // Native builds (tests, tooling) have no JS console to write to.
        fn emit(_level: Level, line: &str) {
            eprintln!("{line}");
        }
    }
}

/// Macro to create a JSON object for additional log data
///
/// Usage: log_data!("uploadId" => id, "partNumber" => 3)
#[macro_export]
macro_rules! log_data {
    ($($key:expr => $value:expr),* $(,)?) => {
        Some(serde_json::json!({ $($key: $value),* }))
    };
}
