//! `destroy` command — delete a workspace and its index.

use super::{CommandIo, SelectorArgs};
use crate::error::{Error, Result};
use crate::workspace::Workspace;
use std::io::Write;

pub fn run(selector: &SelectorArgs, confirm: bool, json: bool, io: &mut CommandIo) -> Result<()> {
    if !confirm {
        return Err(Error::InvalidInput(
            "destroying a workspace is irreversible; pass --confirm".into(),
        ));
    }

    let selector = selector.resolve()?;
    let workspace = Workspace::open(&selector)?;
    let root = workspace.root().display().to_string();
    let kind = workspace.kind;
    workspace.destroy()?;

    if json {
        let payload = serde_json::json!({
            "ok": true,
            "workspace": root,
            "kind": kind.as_str(),
        });
        writeln!(io.out, "{payload}")?;
    } else {
        writeln!(io.out, "Destroyed workspace at {root}")?;
    }
    Ok(())
}
