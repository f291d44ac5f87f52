// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

use printdesk_core::error::Result;

/// Return the application data directory, creating it if needed.
///
/// `PRINTDESK_DATA_DIR` is used verbatim when set; otherwise the XDG data
/// home (or `~/.local/share`) gets a `printdesk` subdirectory.
pub fn data_dir() -> Result<PathBuf> {
    let dir = resolve(|key| std::env::var(key).ok());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn resolve<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(dir) = non_empty("PRINTDESK_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let base = if let Some(xdg) = non_empty("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = non_empty("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        // Last resort
        std::env::temp_dir()
    };
    base.join("printdesk")
}
