//! Surface registry implementation

use crate::capture::Resolution;
use crate::utils::error::{RecorderError, RecorderResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Opaque handle to a platform surface (window, encoder input, camera texture)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeSurface(pub u64);

/// Registry-assigned surface identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// What a surface is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRole {
    /// Camera writes frames, render engine samples them
    CameraInput,
    /// On-screen drawable
    PreviewOutput,
    /// Hardware encoder input
    EncoderInput,
}

/// Component allowed to bind or release a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceOwner {
    RenderEngine,
    RecordingController,
}

/// Snapshot of a registered surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub id: SurfaceId,
    pub role: SurfaceRole,
    pub owner: SurfaceOwner,
    pub native: NativeSurface,
    pub size: Option<Resolution>,
    pub bound_by: Option<SurfaceOwner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    live: HashMap<SurfaceId, SurfaceInfo>,
    released: HashSet<SurfaceId>,
}

/// Tracks live surfaces and who may touch them
#[derive(Default)]
pub struct SurfaceRegistry {
    inner: Mutex<RegistryInner>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created surface under its owner.
    ///
    /// Only one encoder input surface may be live at a time.
    pub fn register(
        &self,
        role: SurfaceRole,
        owner: SurfaceOwner,
        native: NativeSurface,
        size: Option<Resolution>,
    ) -> RecorderResult<SurfaceId> {
        let mut inner = self.inner.lock();

        if role == SurfaceRole::EncoderInput
            && inner.live.values().any(|s| s.role == SurfaceRole::EncoderInput)
        {
            return Err(RecorderError::SurfaceLifecycle(
                "an encoder input surface is already live".to_string(),
            ));
        }

        inner.next_id += 1;
        let id = SurfaceId(inner.next_id);
        inner.live.insert(
            id,
            SurfaceInfo {
                id,
                role,
                owner,
                native,
                size,
                bound_by: None,
            },
        );

        tracing::debug!("Registered {} as {:?} owned by {:?}", id, role, owner);
        Ok(id)
    }

    /// Mark a surface as being written by `user` and return its native handle
    pub fn bind(&self, id: SurfaceId, user: SurfaceOwner) -> RecorderResult<NativeSurface> {
        let mut inner = self.inner.lock();
        let released = inner.released.contains(&id);
        let entry = inner.live.get_mut(&id).ok_or_else(|| missing(id, released))?;

        match entry.bound_by {
            Some(current) if current != user => Err(RecorderError::SurfaceLifecycle(format!(
                "{} is already bound by {:?}",
                id, current
            ))),
            _ => {
                entry.bound_by = Some(user);
                tracing::debug!("{} bound by {:?}", id, user);
                Ok(entry.native)
            }
        }
    }

    /// Drop the binding taken by `user`
    pub fn unbind(&self, id: SurfaceId, user: SurfaceOwner) -> RecorderResult<()> {
        let mut inner = self.inner.lock();
        let released = inner.released.contains(&id);
        let entry = inner.live.get_mut(&id).ok_or_else(|| missing(id, released))?;

        if entry.bound_by != Some(user) {
            return Err(RecorderError::SurfaceLifecycle(format!(
                "{} is not bound by {:?}",
                id, user
            )));
        }
        entry.bound_by = None;
        tracing::debug!("{} unbound by {:?}", id, user);
        Ok(())
    }

    /// Release a surface. Must be called by its owner, exactly once, and
    /// never while another component still has it bound.
    pub fn release(&self, id: SurfaceId, owner: SurfaceOwner) -> RecorderResult<SurfaceInfo> {
        let mut inner = self.inner.lock();
        let released = inner.released.contains(&id);
        let entry = inner.live.get(&id).ok_or_else(|| missing(id, released))?;

        if entry.owner != owner {
            return Err(RecorderError::SurfaceLifecycle(format!(
                "{} is owned by {:?}, not {:?}",
                id, entry.owner, owner
            )));
        }
        if let Some(user) = entry.bound_by {
            if user != owner {
                return Err(RecorderError::SurfaceLifecycle(format!(
                    "{} is still bound by {:?}",
                    id, user
                )));
            }
        }

        let info = *entry;
        inner.live.remove(&id);
        inner.released.insert(id);
        tracing::debug!("Released {} ({:?})", id, info.role);
        Ok(info)
    }

    /// Whether the surface is registered and not yet released
    pub fn is_live(&self, id: SurfaceId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Snapshot of a live surface
    pub fn info(&self, id: SurfaceId) -> Option<SurfaceInfo> {
        self.inner.lock().live.get(&id).copied()
    }

    /// Number of live surfaces with the given role
    pub fn live_count(&self, role: SurfaceRole) -> usize {
        self.inner
            .lock()
            .live
            .values()
            .filter(|s| s.role == role)
            .count()
    }
}

fn missing(id: SurfaceId, released: bool) -> RecorderError {
    if released {
        RecorderError::SurfaceLifecycle(format!("{} was already released", id))
    } else {
        RecorderError::SurfaceLifecycle(format!("{} is not registered", id))
    }
}
