use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "anubis", about = "Embedded secret store HTTP front-end")]
pub struct Cli {
    /// Path to the sqlite-backed secret database.
    #[arg(long, default_value = "anubis.db")]
    pub db_path: PathBuf,

    /// Unix socket to serve on.
    #[arg(long, default_value = "/var/run/anubis.sock")]
    pub socket_path: PathBuf,

    /// Socket file mode, octal.
    #[arg(long, default_value = "0660")]
    pub socket_mode: String,

    /// Log format: 'text' or 'json'.
    #[arg(long, default_value = "json")]
    pub log_format: String,
}
