// `scriptdesk init`: write identity and storage settings to the global config.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use scriptdesk_common::types::Role;
use scriptdesk_engine::config::{self, GlobalConfig};
use serde::Serialize;

use crate::context;
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// User id recorded on suggestions, drafts and line attribution.
    #[arg(long)]
    user: String,

    #[arg(long)]
    display_name: Option<String>,

    /// `admin` or `contributor`.
    #[arg(long, value_parser = parse_role)]
    role: Option<Role>,

    /// SQLite database path (defaults to ~/.scriptdesk/scriptdesk.db).
    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub config_path: String,
    pub user_id: String,
    pub role: Role,
    pub database_path: Option<String>,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let result = config::global_config_path()
        .context("could not determine home directory")
        .and_then(|path| write_config(&path, GlobalConfig::load(), args));
    context::finish(format, result, format_human)
}

/// Applies `args` on top of `existing` and saves the result to `path`.
/// Settings the flags do not mention are kept.
fn write_config(path: &Path, existing: GlobalConfig, args: InitArgs) -> anyhow::Result<InitResult> {
    let config = apply(existing, args)?;
    config.save_to(path).with_context(|| format!("failed to write `{}`", path.display()))?;

    Ok(InitResult {
        config_path: path.display().to_string(),
        user_id: config.user_id.clone().unwrap_or_default(),
        role: config.role,
        database_path: config.database_path().map(|p| p.display().to_string()),
    })
}

fn apply(mut config: GlobalConfig, args: InitArgs) -> anyhow::Result<GlobalConfig> {
    let user = args.user.trim();
    anyhow::ensure!(!user.is_empty(), "--user must not be blank");

    config.user_id = Some(user.to_owned());
    if args.display_name.is_some() {
        config.display_name = args.display_name;
    }
    if let Some(role) = args.role {
        config.role = role;
    }
    if args.database.is_some() {
        config.database_path = args.database;
    }
    Ok(config)
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role `{value}`, expected admin or contributor"))
}

fn format_human(result: &InitResult) -> String {
    let mut lines = vec![
        format!("Wrote {}", result.config_path),
        format!("  user: {} ({})", result.user_id, result.role.as_str()),
    ];
    if let Some(database) = &result.database_path {
        lines.push(format!("  database: {database}"));
    }
    lines.join("\n")
}
