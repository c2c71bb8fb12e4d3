#![forbid(unsafe_code)]

//! Startup check on the account the API server runs under.

use std::path::Path;

use anyhow::{Result, bail};
use nix::unistd::{Uid, User};

/// Returns the name of the account the server runs as, refusing to continue
/// when either the real or the effective uid is root. Media files and the
/// database are created under this identity, so `data_paths` are named in
/// the error to point the operator at what must be owned by the service
/// account instead.
pub fn service_identity(data_paths: &[&Path]) -> Result<String> {
    let (real, effective) = (Uid::current(), Uid::effective());
    reject_root(real, effective, data_paths)?;
    let name = User::from_uid(effective)
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| format!("uid {effective}"));
    Ok(name)
}

fn reject_root(real: Uid, effective: Uid, data_paths: &[&Path]) -> Result<()> {
    if real.is_root() || effective.is_root() {
        let paths = data_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("refusing to serve as root; run vidtube under an account that owns {paths}");
    }
    Ok(())
}
