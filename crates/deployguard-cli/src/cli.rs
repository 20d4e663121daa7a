use clap::{Parser, Subcommand};
use deployguard_kernel::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "deployguard",
    about = "Deployguard: trust-boundary checks between plan and apply",
    version
)]
pub struct Cli {
    /// Path to the project config
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign a plan file, writing its `.sha256` sidecar
    Sign {
        /// Plan file to sign
        plan: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a plan file against its sidecar signature
    Verify {
        /// Plan file to verify
        plan: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that the plan only targets allowed subscriptions
    Scope {
        /// Plan file to introspect
        plan: PathBuf,

        /// Working directory for plan introspection
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Identity binding checks
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },

    /// Remote state guard operations
    State {
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Classify an error message into a category and exit code
    Classify {
        /// Error message text
        message: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run verify, scope and identity in order, stopping at the first block
    Check {
        /// Plan file to check
        plan: PathBuf,

        /// Working directory for plan introspection
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        /// File holding the access token (defaults to $ARM_ACCESS_TOKEN)
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum IdentityCommands {
    /// Compare the configured client id against the active one
    PreAuth {
        /// Active client id (defaults to $ARM_CLIENT_ID)
        #[arg(long)]
        client_id: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare access-token claims against the project binding
    PostAuth {
        /// File holding the access token (defaults to $ARM_ACCESS_TOKEN)
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum StateCommands {
    /// Create a tagged version of one state object
    Snapshot {
        /// State key
        key: String,

        /// Snapshot tag (timestamped default when empty)
        #[arg(long, default_value = "")]
        tag: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Snapshot every state object under the configured prefix
    SnapshotAll {
        /// Snapshot tag (timestamped default when empty)
        #[arg(long, default_value = "")]
        tag: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List versions of one state object
    Versions {
        /// State key
        key: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show whether a state object is leased
    LockStatus {
        /// State key
        key: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Forcibly break the lease on a state object
    BreakLease {
        /// State key
        key: String,

        /// Skip the typed confirmation
        #[arg(long)]
        yes: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the backend security-posture checks
    Health {
        /// State key
        key: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
