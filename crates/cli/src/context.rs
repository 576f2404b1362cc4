// Shared command setup: identity from the global config, the SQLite store,
// and a current-thread runtime to drive the async engine.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use scriptdesk_common::delta::Delta;
use scriptdesk_common::normalize::normalize;
use scriptdesk_common::types::Actor;
use scriptdesk_engine::config::GlobalConfig;
use scriptdesk_engine::store::SqliteStore;
use scriptdesk_engine::suggestion::SuggestionService;
use serde::Serialize;
use serde_json::Value;

use crate::output::{self, OutputFormat};

/// No `user_id` in the config and none given with `--as`.
#[derive(Debug)]
pub struct MissingIdentity;

impl fmt::Display for MissingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no user identity configured")
    }
}

impl std::error::Error for MissingIdentity {}

pub struct CliContext {
    pub config: GlobalConfig,
    pub service: SuggestionService<SqliteStore>,
    as_user: Option<String>,
}

impl CliContext {
    /// Loads the global config and opens its database. `as_user` overrides
    /// the configured identity for one invocation.
    pub fn load(as_user: Option<String>) -> anyhow::Result<Self> {
        let config = GlobalConfig::load();
        let path = config.database_path().context("could not determine home directory")?;
        let store = open_store(&path)?;
        Ok(Self { config, service: SuggestionService::new(Arc::new(store)), as_user })
    }

    /// The acting user; read-only commands never ask for it.
    pub fn actor(&self) -> anyhow::Result<Actor> {
        actor_for(&self.config, self.as_user.as_deref())
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        self.service.store()
    }
}

pub fn actor_for(config: &GlobalConfig, as_user: Option<&str>) -> anyhow::Result<Actor> {
    let user_id = as_user
        .map(str::to_owned)
        .or_else(|| config.user_id.clone())
        .filter(|user| !user.trim().is_empty())
        .ok_or(MissingIdentity)?;
    Ok(Actor { user_id, role: config.role })
}

fn open_store(path: &Path) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create `{}`", parent.display()))?;
    }
    SqliteStore::open(path).with_context(|| format!("failed to open `{}`", path.display()))
}

/// Runs `future` to completion on a fresh current-thread runtime.
pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}

/// Reads a script file as the raw value the normalizer accepts.
pub fn read_raw(path: &Path) -> anyhow::Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    raw_value(path, raw)
}

/// Reads a script file into a normalized document.
///
/// `.json` files hold an operation document (or a bare op array); anything
/// else is taken as plain text.
pub fn read_document(path: &Path) -> anyhow::Result<Delta> {
    Ok(normalize(&read_raw(path)?))
}

fn raw_value(path: &Path, raw: String) -> anyhow::Result<Value> {
    if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&raw)
            .with_context(|| format!("`{}` is not valid JSON", path.display()))
    } else {
        Ok(Value::String(raw))
    }
}

/// Prints the command result, or its error, in the selected format.
pub fn finish<T, F>(format: OutputFormat, result: anyhow::Result<T>, human_fn: F) -> anyhow::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match result {
        Ok(value) => {
            output::print_output(format, &value, human_fn)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}
