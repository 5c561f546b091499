//! `add` command — append a note to memory and index it.

use super::{AddSlot, CommandIo, SelectorArgs};
use crate::config::Settings;
use crate::db::IndexStore;
use crate::embedding;
use crate::error::{Error, Result};
use crate::index::sync;
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(
    slot: AddSlot,
    text: &[String],
    use_stdin: bool,
    selector: &SelectorArgs,
    json: bool,
    io: &mut CommandIo,
) -> Result<()> {
    let selector = selector.resolve()?;
    let workspace = Workspace::open(&selector)?;
    let settings = Settings::load()?;

    let note = if use_stdin {
        io.stdin
            .take()
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    } else {
        text.join(" ")
    };
    if note.trim().is_empty() {
        return Err(Error::InvalidInput("no note text provided".into()));
    }

    let rel_path = append_note(&workspace, slot, &note)?;

    // Embeddings are best-effort here: the note is already on disk, so a
    // missing provider degrades to indexing without vectors.
    let store = IndexStore::open(workspace.index_path())?;
    let provider = match embedding::create_provider(&settings.embeddings) {
        Ok(provider) => Some(provider),
        Err(e) if e.is_embeddings_unavailable() => {
            writeln!(io.err, "warning: {e}; indexing without embeddings")?;
            None
        }
        Err(e) => return Err(e),
    };
    let outcome = sync::ensure_up_to_date(
        &workspace,
        &store,
        &settings,
        provider.as_deref(),
    )?;

    if json {
        let payload = serde_json::json!({
            "ok": true,
            "path": rel_path,
            "embedded": provider.is_some(),
            "totalChunks": outcome.total_chunks,
        });
        writeln!(io.out, "{payload}")?;
    } else {
        writeln!(io.out, "Added to {rel_path}")?;
    }
    Ok(())
}

/// Append the note to its target file, creating it (with a heading for
/// dated files) when absent. Returns the workspace-relative path.
fn append_note(workspace: &Workspace, slot: AddSlot, note: &str) -> Result<String> {
    let (rel_path, abs_path, heading) = match slot {
        AddSlot::Short => {
            let day = chrono::Local::now().format("%Y-%m-%d");
            let rel = format!("memory/{day}.md");
            let abs = workspace.root().join(&rel);
            (rel, abs, Some(format!("# {day}\n")))
        }
        AddSlot::Long => {
            let rel = crate::workspace::LONG_MEMORY_FILE.to_string();
            let abs = workspace.long_memory_path();
            (rel, abs, None)
        }
    };

    if let Some(parent) = abs_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut body = String::new();
    if !abs_path.exists() {
        if let Some(heading) = heading {
            body.push_str(&heading);
        }
    }
    body.push_str("\n- ");
    body.push_str(note);
    body.push('\n');

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&abs_path)?;
    file.write_all(body.as_bytes())?;

    Ok(rel_path)
}
