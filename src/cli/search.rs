//! `search` command — semantic query over indexed memory.

use super::{CommandIo, SelectorArgs};
use crate::config::Settings;
use crate::db::IndexStore;
use crate::embedding;
use crate::error::{Error, Result};
use crate::index::sync;
use crate::search::search_vector;
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(
    query: &[String],
    limit: Option<usize>,
    selector: &SelectorArgs,
    json: bool,
    io: &mut CommandIo,
) -> Result<()> {
    let query = query.join(" ");
    if query.trim().is_empty() {
        return Err(Error::InvalidInput("no query provided".into()));
    }

    let selector = selector.resolve()?;
    let workspace = Workspace::open(&selector)?;
    let settings = Settings::load()?;

    // Pure-vector search cannot degrade: a missing provider is fatal here.
    let provider = embedding::create_provider(&settings.embeddings)?;

    let store = IndexStore::open(workspace.index_path())?;
    sync::ensure_up_to_date(&workspace, &store, &settings, Some(provider.as_ref()))?;

    let query_vec = provider.embed_query(&query)?;
    let k = limit.unwrap_or(settings.search.limit);

    if settings.debug.vector {
        let path = if store.vector_search_available() {
            "native"
        } else {
            "fallback"
        };
        writeln!(io.err, "[mem-cli] vector search path: {path} (k={k})")?;
    }

    let hits = search_vector(
        &store,
        &query_vec,
        k,
        Some(provider.model_path()),
        settings.search.snippet_max_chars,
    )?;

    if json {
        writeln!(io.out, "{}", serde_json::to_string(&hits)?)?;
        return Ok(());
    }

    if hits.is_empty() {
        writeln!(io.out, "No results.")?;
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        writeln!(
            io.out,
            "{}. {}:{}-{} ({:.3})",
            i + 1,
            hit.path,
            hit.line_start,
            hit.line_end,
            hit.score
        )?;
        for line in hit.snippet.lines() {
            writeln!(io.out, "   {line}")?;
        }
    }
    Ok(())
}
