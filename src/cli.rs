use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(
    name = "towervault",
    author,
    version,
    about = "An on-disk encrypted multi-user credential vault engine.",
    long_about = "towervault stores account records behind AES-256-GCM, either under a single \
        legacy password (v1) or behind a multi-user key-slot table with role-based access \
        control (v2)."
)]
pub struct Cli {
    #[arg(long, global = true, help = "Emit machine-readable JSON instead of plain text.")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Args, Clone)]
pub struct PathArgs {
    #[arg(long, help = "Vault file path. Defaults to $TOWERVAULT_PATH or the platform config dir.")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RoleArg {
    Administrator,
    Standard,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Print the resolved vault file path.")]
    Path(PathArgs),

    #[command(about = "Create a new vault.")]
    Init(InitArgs),

    #[command(subcommand, about = "Manage account records.")]
    Account(AccountCommands),

    #[command(subcommand, about = "Manage key-slot users of a v2 vault.")]
    User(UserCommands),

    #[command(about = "Convert an open v1 vault into v2 in place.")]
    Migrate(MigrateArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub path: PathArgs,

    #[arg(long, help = "Create a multi-user (v2) vault instead of legacy single-user (v1).")]
    pub v2: bool,

    #[arg(long, requires = "v2", help = "Username of the initial administrator (v2 only).")]
    pub admin: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum AccountCommands {
    #[command(about = "List visible account records.")]
    List(OpenArgs),
    #[command(about = "Show one account record.")]
    Get(GetArgs),
    #[command(about = "Add a new account record.")]
    Add(AddArgs),
    #[command(about = "Remove an account record.")]
    Rm(GetArgs),
}

#[derive(Debug, Subcommand)]
pub enum UserCommands {
    #[command(about = "List active key-slot users.")]
    List(OpenArgs),
    #[command(about = "Add a user (administrator only).")]
    Add(AddUserArgs),
    #[command(about = "Remove a user (administrator only).")]
    Rm(RemoveUserArgs),
    #[command(about = "Change a user's password.")]
    Passwd(PasswdArgs),
}

#[derive(Debug, Args)]
pub struct OpenArgs {
    #[command(flatten)]
    pub path: PathArgs,

    #[arg(long, help = "Username; omit to open the legacy single-user (v1) vault.")]
    pub user: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    pub id: uuid::Uuid,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    pub name: String,

    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long, help = "Account password; if omitted, you are prompted.")]
    pub secret: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long, value_delimiter = ',')]
    pub tags: Vec<String>,
}

#[derive(Debug, Args)]
pub struct AddUserArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    pub new_username: String,

    #[arg(long, default_value = "standard")]
    pub role: RoleArg,
}

#[derive(Debug, Args)]
pub struct RemoveUserArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    pub target_username: String,
}

#[derive(Debug, Args)]
pub struct PasswdArgs {
    #[command(flatten)]
    pub open: OpenArgs,

    #[arg(long, help = "Target username; defaults to the session's own user.")]
    pub target: Option<String>,
}

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub path: PathArgs,

    #[arg(long)]
    pub admin: String,
}
