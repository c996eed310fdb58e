use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mimic", version, about = "Mimic replica platform")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value = "8000", env = "MIMIC_PORT")]
        port: u16,
    },

    /// Apply platform database migrations.
    Migrate {
        /// Postgres URL override (else MIMIC_DATABASE_URL / DATABASE_URL).
        #[arg(long)]
        database_url: Option<String>,
    },

    /// Create a platform API key and print the token once.
    CreateApiKey {
        /// Caller the key belongs to (owner of environments it creates).
        #[arg(long)]
        owner: String,

        /// Optional expiry in days from now.
        #[arg(long)]
        expires_in_days: Option<u64>,
    },

    /// Print current configuration (redacted secrets).
    Config,

    /// Health check the configured store.
    Check,
}
