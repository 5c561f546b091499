//! `init` command — create a workspace.

use super::{CommandIo, SelectorArgs};
use crate::error::Result;
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(selector: &SelectorArgs, json: bool, io: &mut CommandIo) -> Result<()> {
    let selector = selector.resolve()?;
    let workspace = Workspace::init(&selector)?;

    if json {
        let payload = serde_json::json!({
            "ok": true,
            "workspace": workspace.root().display().to_string(),
            "kind": workspace.kind.as_str(),
        });
        writeln!(io.out, "{payload}")?;
    } else {
        writeln!(
            io.out,
            "Initialized {} workspace at {}",
            workspace.kind.as_str(),
            workspace.root().display()
        )?;
    }
    Ok(())
}
