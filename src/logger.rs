use std::sync::LazyLock;

/// Whether `event!` lines are printed, read once from `LOG_SCOPE_EVENTS`.
pub static EVENTS_ENABLED: LazyLock<bool> = LazyLock::new(|| std::env::var("LOG_SCOPE_EVENTS").is_ok());

/// Prints one tagged line. Millisecond timestamps, state changes are often closer than a second.
#[macro_export]
macro_rules! emit {
    ($style:literal, $tag:literal, $($arg:tt)*) => {
        println!(
            concat!("\x1b[", $style, "m", $tag, "[{}]\x1b[0m {}"),
            chrono::Utc::now().format("%H:%M:%S%.3f"),
            format!($($arg)*)
        )
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => { $crate::emit!("32", "[INFO] ", $($arg)*) };
}

#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => { $crate::emit!("33", "[LOG]  ", $($arg)*) };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { $crate::emit!("35", "[WARN] ", $($arg)*) };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => { $crate::emit!("31", "[ERROR]", $($arg)*) };
}

/// Observation progress: target selection, exposures, finished sets.
#[macro_export]
macro_rules! obs {
    ($($arg:tt)*) => { $crate::emit!("1;34", "[OBS]  ", $($arg)*) };
}

/// Verbose tracing of facade calls and weather polls.
#[macro_export]
macro_rules! event {
    ($($arg:tt)*) => {
        if *$crate::logger::EVENTS_ENABLED {
            $crate::emit!("36", "[EVENT]", $($arg)*)
        }
    };
}

/// Unrecoverable startup condition. Never used inside state logic.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {
        panic!(
            "\x1b[1;31m[FATAL][{}]\x1b[0m {}",
            chrono::Utc::now().format("%H:%M:%S%.3f"),
            format!($($arg)*)
        )
    };
}
