//! On-disk records inside a per-symlink stack directory.
//!
//! Every record is itself a symlink so a claim can be read with one
//! `readlink`, without opening anything: claim entries are named by the
//! device id and carry `"<priority>:<devnode>"` as their target, and
//! the `owner` entry's target is the winning device id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

pub const OWNER_ENTRY: &str = "owner";
pub const LOCK_ENTRY: &str = ".lock";

/// Prefix for rename-over staging entries.
const TMP_PREFIX: &str = ".#";

/// One device's claim on the symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub id: String,
    pub priority: u32,
    pub devnode: PathBuf,
}

/// Replace a symlink atomically: stage under a tmp name, rename over.
fn replace_symlink(target: &str, path: &Path) -> io::Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    let tmp = path.with_file_name(format!("{}{}", TMP_PREFIX, name.to_string_lossy()));

    // A crashed worker may have left its staging entry behind.
    if let Err(e) = fs::remove_file(&tmp) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(e);
        }
    }
    std::os::unix::fs::symlink(target, &tmp)?;
    fs::rename(&tmp, path)
}

/// Write or update a claim entry in place.
pub fn write_claim(dir: &Path, claim: &Claim) -> io::Result<()> {
    let target = format!("{}:{}", claim.priority, claim.devnode.display());
    replace_symlink(&target, &dir.join(&claim.id))
}

/// Read one claim by device id. Missing or malformed entries read as
/// `None`; only that device's events touch its entry, so a malformed
/// record is its owner's problem to rewrite.
pub fn read_claim(dir: &Path, id: &str) -> io::Result<Option<Claim>> {
    let target = match fs::read_link(dir.join(id)) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let Some(claim) = parse_claim(id, &target) else {
        debug!(id, target = %target.display(), "unparseable claim entry");
        return Ok(None);
    };
    Ok(Some(claim))
}

fn parse_claim(id: &str, target: &Path) -> Option<Claim> {
    let text = target.to_str()?;
    let (priority, devnode) = text.split_once(':')?;
    Some(Claim {
        id: id.to_string(),
        priority: priority.parse().ok()?,
        devnode: PathBuf::from(devnode),
    })
}

pub fn remove_claim(dir: &Path, id: &str) -> io::Result<()> {
    match fs::remove_file(dir.join(id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// All claim entries in traversal order, skipping bookkeeping files and
/// staging leftovers.
pub fn scan_claims(dir: &Path) -> io::Result<Vec<Claim>> {
    let mut claims = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == OWNER_ENTRY || name == LOCK_ENTRY || name.starts_with(TMP_PREFIX) {
            continue;
        }
        if let Some(claim) = read_claim(dir, name)? {
            claims.push(claim);
        }
    }
    Ok(claims)
}

pub fn read_owner(dir: &Path) -> Option<String> {
    fs::read_link(dir.join(OWNER_ENTRY))
        .ok()
        .and_then(|t| t.to_str().map(str::to_string))
}

pub fn write_owner(dir: &Path, id: &str) -> io::Result<()> {
    replace_symlink(id, &dir.join(OWNER_ENTRY))
}

pub fn remove_owner(dir: &Path) -> io::Result<()> {
    match fs::remove_file(dir.join(OWNER_ENTRY)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
