//! Stdout/stderr logging macros, prefixed `[inferno-init]`.
//!
//! PID 1 inside an initrd has no guaranteed `/dev/log` or async runtime
//! until well into the boot sequence, so this binary is the one place in
//! the workspace that does not pull in `tracing-subscriber` — every other
//! line is written straight to the console device the kernel already
//! wired up for us.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        let _ = std::io::Write::write_fmt(&mut std::io::stdout(), format_args!("[inferno-init] {}\n", format_args!($($arg)*)));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        let _ = std::io::Write::write_fmt(&mut std::io::stderr(), format_args!("[inferno-init] ERROR: {}\n", format_args!($($arg)*)));
    };
}
