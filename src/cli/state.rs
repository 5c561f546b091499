//! `state` command — workspace and index health report.

use super::{CommandIo, SelectorArgs};
use crate::db::IndexStore;
use crate::error::Result;
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(selector: &SelectorArgs, json: bool, io: &mut CommandIo) -> Result<()> {
    let selector = selector.resolve()?;
    let workspace = Workspace::open(&selector)?;

    let index_exists = workspace.index_path().exists();
    let store = IndexStore::open(workspace.index_path())?;
    let meta = store.read_meta()?;
    let files = store.file_count()?;
    let chunks = store.chunk_count()?;
    let vector_ready = store.vector_search_available();
    let disk_files = workspace.list_memory_files()?.len();

    if json {
        let payload = serde_json::json!({
            "workspace": workspace.root().display().to_string(),
            "kind": workspace.kind.as_str(),
            "indexExists": index_exists,
            "diskFiles": disk_files,
            "indexedFiles": files,
            "chunks": chunks,
            "model": meta.model,
            "dims": meta.dims,
            "vectorReady": vector_ready,
        });
        writeln!(io.out, "{payload}")?;
        return Ok(());
    }

    writeln!(io.out, "Workspace:      {}", workspace.root().display())?;
    writeln!(io.out, "Kind:           {}", workspace.kind.as_str())?;
    writeln!(io.out, "Markdown files: {disk_files}")?;
    writeln!(io.out, "Indexed files:  {files}")?;
    writeln!(io.out, "Chunks:         {chunks}")?;
    if meta.model.is_empty() {
        writeln!(io.out, "Model:          (indexed without embeddings)")?;
    } else {
        writeln!(io.out, "Model:          {} ({} dims)", meta.model, meta.dims)?;
    }
    writeln!(
        io.out,
        "Vector search:  {}",
        if vector_ready { "native" } else { "fallback" }
    )?;
    Ok(())
}
