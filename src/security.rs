#![forbid(unsafe_code)]

//! Process-level guards shared by the mirror binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start as root: every file the mirror writes should belong to the
/// user who owns the archive.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; run it as the user owning the archive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "mirror").is_ok());
    }

    #[test]
    fn rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "mirror").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }
}
