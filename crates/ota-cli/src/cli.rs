use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

pub const OTA_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nOptions:\n{options}\n\nCommands:\n{subcommands}\n";

pub const OTA_BEFORE_HELP: &str = concat!(
    "ota-store ",
    env!("CARGO_PKG_VERSION"),
    " – inspect and maintain an over-the-air update store\n\n",
    "Settings come from OTA_STORE_DIR, OTA_SCOPE_KEY, OTA_UPDATE_URL,\n",
    "OTA_REQUEST_HEADERS, OTA_HAS_EMBEDDED_UPDATE and OTA_EMBEDDED_UPDATE_ID;\n",
    "flags override them.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "ota-store",
    version,
    disable_help_subcommand = true,
    before_help = OTA_BEFORE_HELP,
    help_template = OTA_HELP_TEMPLATE
)]
#[allow(clippy::struct_excessive_bools)]
pub struct OtaCli {
    #[arg(long, value_name = "DIR", help = "Store directory (overrides OTA_STORE_DIR)", global = true)]
    pub dir: Option<PathBuf>,
    #[arg(long, value_name = "KEY", help = "Scope key (overrides OTA_SCOPE_KEY)", global = true)]
    pub scope: Option<String>,
    #[arg(
        long,
        value_name = "URL",
        help = "Update URL of the current build (overrides OTA_UPDATE_URL)",
        global = true
    )]
    pub update_url: Option<String>,
    #[arg(
        long,
        value_name = "UUID",
        value_parser = value_parser!(Uuid),
        help = "Id of the update embedded in the current build",
        global = true
    )]
    pub embedded_update: Option<Uuid>,
    #[arg(short, long, help = "Suppress human output", global = true)]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Emit {status,command,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "Show how the store opened and what it holds for the scope.")]
    Status,
    #[command(about = "List stored assets, optionally only those of one update.")]
    Assets(AssetsArgs),
    #[command(about = "Run the startup checks: build-data guard, then file integrity.")]
    Doctor,
    #[command(about = "Compare the recorded build data with the current settings.")]
    CheckBuildData,
    #[command(about = "Delete updates and asset files no longer needed after a launch.")]
    Reap(ReapArgs),
}

#[derive(Args, Debug)]
pub struct AssetsArgs {
    #[arg(long, value_name = "UUID", value_parser = value_parser!(Uuid), help = "Only assets of this update")]
    pub update: Option<Uuid>,
}

#[derive(Args, Debug)]
pub struct ReapArgs {
    #[arg(long, value_name = "UUID", value_parser = value_parser!(Uuid), help = "Update that was just launched")]
    pub launched: Uuid,
    #[arg(long, value_enum, default_value_t = PolicyArg::FilterAware, help = "Which updates to keep")]
    pub policy: PolicyArg,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 10,
        help = "Updates kept by the development policy"
    )]
    pub keep: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Keep the launched update and one fallback matching the manifest filters.
    FilterAware,
    /// Keep the most recently accessed updates up to --keep.
    Development,
}
