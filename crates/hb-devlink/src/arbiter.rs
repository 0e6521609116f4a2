//! Per-symlink claim arbitration.
//!
//! Several devices may want the same `/dev` symlink (two partitions
//! with the same filesystem label, a device re-appearing under a new
//! node). Each symlink has a stack directory accumulating one claim
//! per device; the highest-priority claim owns the visible symlink,
//! and every decision for a symlink runs under that directory's lock,
//! so workers for different symlinks never serialize on each other.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use hb_common::escape::escape_link_name;
use hb_common::lockfile::{LockError, LockFile, LockType};

use crate::stack::{self, Claim, LOCK_ENTRY};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid device id {0:?}")]
    InvalidDeviceId(String),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A device as seen by the arbiter: stable id, current node, claim
/// priority.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub devnode: PathBuf,
    pub priority: u32,
}

/// A device number for the unconditional `/dev/{block,char}/M:m` links.
#[derive(Debug, Clone, Copy)]
pub struct DevNum {
    pub major: u32,
    pub minor: u32,
    pub block: bool,
}

pub struct LinkArbiter {
    links_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for LinkArbiter {
    fn default() -> Self {
        Self::new("/run/udev/links", "/dev")
    }
}

impl LinkArbiter {
    pub fn new(links_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            links_root: links_root.into(),
            dev_root: dev_root.into(),
        }
    }

    fn stack_dir(&self, slink: &str) -> PathBuf {
        self.links_root.join(escape_link_name(slink))
    }

    fn dev_path(&self, slink: &str) -> PathBuf {
        let rel = slink
            .strip_prefix("/dev/")
            .unwrap_or_else(|| slink.trim_start_matches('/'));
        self.dev_root.join(rel)
    }

    /// Record `device`'s claim on `slink` and take over the visible
    /// symlink if the claim outranks the current owner. Equal priority
    /// does not preempt. Idempotent for a given (id, priority, devnode).
    pub fn add_claim(&self, device: &Device, slink: &str) -> Result<(), LinkError> {
        check_device_id(&device.id)?;

        let dir = self.stack_dir(slink);
        fs::create_dir_all(&dir)?;
        let _lock = LockFile::acquire(&dir.join(LOCK_ENTRY), LockType::Exclusive)?;

        stack::write_claim(
            &dir,
            &Claim {
                id: device.id.clone(),
                priority: device.priority,
                devnode: device.devnode.clone(),
            },
        )?;

        // A rival incumbent that outranks (or ties) the new claim keeps
        // the symlink; no re-scan is needed, since every entry was
        // compared against the then-owner when it was written. That
        // shortcut is void when the owner record names the calling
        // device itself: the write above just replaced the entry it
        // described, so the symlink has to be re-arbitrated against the
        // other live claims.
        let rival_incumbent = stack::read_owner(&dir)
            .filter(|id| *id != device.id)
            .map(|id| stack::read_claim(&dir, &id))
            .transpose()?
            .flatten();

        match rival_incumbent {
            Some(owner) if owner.priority >= device.priority => {
                debug!(slink, id = %device.id, "claim recorded, incumbent keeps the symlink");
            }
            Some(_) => {
                self.point_symlink(slink, &device.devnode)?;
                stack::write_owner(&dir, &device.id)?;
                info!(slink, id = %device.id, devnode = %device.devnode.display(), "symlink claimed");
            }
            None => match self.best_live_claim(&dir, slink, Some(&device.id))? {
                Some(best) if best.priority > device.priority => {
                    self.point_symlink(slink, &best.devnode)?;
                    stack::write_owner(&dir, &best.id)?;
                    info!(slink, id = %best.id, "symlink passed to higher-priority claim");
                }
                _ => {
                    self.point_symlink(slink, &device.devnode)?;
                    stack::write_owner(&dir, &device.id)?;
                    info!(slink, id = %device.id, devnode = %device.devnode.display(), "symlink claimed");
                }
            },
        }

        Ok(())
    }

    /// Drop `device`'s claim on `slink`; if it held the symlink, hand
    /// it to the best surviving claim or retire it.
    pub fn remove_claim(&self, device: &Device, slink: &str) -> Result<(), LinkError> {
        check_device_id(&device.id)?;

        let dir = self.stack_dir(slink);
        if !dir.is_dir() {
            return Ok(());
        }
        let _lock = LockFile::acquire(&dir.join(LOCK_ENTRY), LockType::Exclusive)?;

        stack::remove_claim(&dir, &device.id)?;

        if let Some(owner) = stack::read_owner(&dir) {
            if owner != device.id {
                // A concurrent claim holds the symlink; nothing to do.
                return Ok(());
            }
        }

        match self.best_live_claim(&dir, slink, None)? {
            Some(next) => {
                self.point_symlink(slink, &next.devnode)?;
                stack::write_owner(&dir, &next.id)?;
                info!(slink, id = %next.id, "symlink passed on");
            }
            None => {
                self.retire_symlink(slink)?;
                stack::remove_owner(&dir)?;
                info!(slink, "symlink retired");
            }
        }

        Ok(())
    }

    /// Highest-priority live claim in the stack directory, skipping
    /// `exclude` and claims whose devnode vanished (those are left in
    /// place: only that device's own remove event unlinks them). Ties
    /// go to traversal order.
    fn best_live_claim(
        &self,
        dir: &Path,
        slink: &str,
        exclude: Option<&str>,
    ) -> Result<Option<Claim>, LinkError> {
        let mut winner: Option<Claim> = None;
        for claim in stack::scan_claims(dir)? {
            if exclude.is_some_and(|id| id == claim.id) {
                continue;
            }
            if !claim.devnode.exists() {
                debug!(slink, id = %claim.id, "skipping claim with missing devnode");
                continue;
            }
            if winner.as_ref().is_none_or(|w| claim.priority > w.priority) {
                winner = Some(claim);
            }
        }
        Ok(winner)
    }

    /// Apply a device's new claim set: retract what disappeared, claim
    /// what appeared. Unchanged claims are left alone.
    pub fn update_device(
        &self,
        device: &Device,
        old: &[String],
        new: &[String],
    ) -> Result<(), LinkError> {
        for slink in old.iter().filter(|s| !new.contains(s)) {
            self.remove_claim(device, slink)?;
        }
        for slink in new.iter().filter(|s| !old.contains(s)) {
            self.add_claim(device, slink)?;
        }
        Ok(())
    }

    /// Maintain the unconditional `/dev/block/M:m` or `/dev/char/M:m`
    /// symlink for a device. Not arbitrated: exactly one device owns a
    /// device number.
    pub fn devnum_link(&self, device: &Device, devnum: DevNum) -> Result<(), LinkError> {
        let kind = if devnum.block { "block" } else { "char" };
        let slink = format!("{}/{}:{}", kind, devnum.major, devnum.minor);
        self.point_symlink(&slink, &device.devnode)
    }

    pub fn remove_devnum_link(&self, devnum: DevNum) -> Result<(), LinkError> {
        let kind = if devnum.block { "block" } else { "char" };
        let slink = format!("{}/{}:{}", kind, devnum.major, devnum.minor);
        self.retire_symlink(&slink)
    }

    /// Point the visible symlink at `devnode`, atomically via a staged
    /// symlink and rename, so readers never observe a half-written
    /// state.
    fn point_symlink(&self, slink: &str, devnode: &Path) -> Result<(), LinkError> {
        let path = self.dev_path(slink);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let name = path
            .file_name()
            .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
        let tmp = path.with_file_name(format!(".#{}", name.to_string_lossy()));
        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        std::os::unix::fs::symlink(devnode, &tmp)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Remove the visible symlink and prune directories it leaves
    /// empty, stopping at the `/dev` root.
    fn retire_symlink(&self, slink: &str) -> Result<(), LinkError> {
        let path = self.dev_path(slink);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == self.dev_root || !dir.starts_with(&self.dev_root) {
                break;
            }
            // Fails (and stops the walk) as soon as a directory is
            // still populated.
            if fs::remove_dir(dir).is_err() {
                break;
            }
            parent = dir.parent();
        }
        Ok(())
    }
}

fn check_device_id(id: &str) -> Result<(), LinkError> {
    let sane = !id.is_empty()
        && Path::new(id).components().count() == 1
        && Path::new(id)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        && !id.starts_with(".#")
        && id != stack::OWNER_ENTRY
        && id != LOCK_ENTRY;
    if sane {
        Ok(())
    } else {
        Err(LinkError::InvalidDeviceId(id.to_string()))
    }
}
