//! `reindex` command — incremental sync or full rebuild.

use super::{CommandIo, SelectorArgs};
use crate::config::Settings;
use crate::db::IndexStore;
use crate::embedding;
use crate::error::{Error, Result};
use crate::index::sync;
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(
    all: bool,
    force: bool,
    selector: &SelectorArgs,
    json: bool,
    io: &mut CommandIo,
) -> Result<()> {
    if all && (selector.public || selector.token.is_some()) {
        return Err(Error::InvalidInput(
            "--all cannot be combined with --public or --token".into(),
        ));
    }

    let settings = Settings::load()?;
    let workspaces = if all {
        Workspace::list_all()?
    } else {
        vec![Workspace::open(&selector.resolve()?)?]
    };

    if workspaces.is_empty() {
        return Err(Error::InvalidInput("no initialized workspaces".into()));
    }

    let provider = match embedding::create_provider(&settings.embeddings) {
        Ok(provider) => Some(provider),
        Err(e) if e.is_embeddings_unavailable() => {
            writeln!(io.err, "warning: {e}; indexing without embeddings")?;
            None
        }
        Err(e) => return Err(e),
    };

    let mut reports = Vec::new();
    for workspace in &workspaces {
        let store = IndexStore::open(workspace.index_path())?;
        let outcome = if force {
            sync::reindex(workspace, &store, &settings, provider.as_deref())?
        } else {
            sync::ensure_up_to_date(workspace, &store, &settings, provider.as_deref())?
        };
        reports.push((workspace, outcome));
    }

    if json {
        let payload: Vec<serde_json::Value> = reports
            .iter()
            .map(|(workspace, outcome)| {
                serde_json::json!({
                    "workspace": workspace.root().display().to_string(),
                    "kind": workspace.kind.as_str(),
                    "outcome": outcome,
                })
            })
            .collect();
        writeln!(io.out, "{}", serde_json::Value::Array(payload))?;
        return Ok(());
    }

    for (workspace, outcome) in &reports {
        writeln!(
            io.out,
            "{}: {} files, {} chunks ({} indexed, {} deleted)",
            workspace.root().display(),
            outcome.total_files,
            outcome.total_chunks,
            outcome.indexed_files,
            outcome.deleted_files
        )?;
    }
    Ok(())
}
