use crate::dispatch::UserEvent;
use crate::error::{Error, Result};
use crate::platform::{Device, Platform};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: u64,
    platform_index: usize,
    devices: Vec<Device>,
}

/// Execution context over one or more devices of a single platform.
///
/// Buffers, programs, queues and user events belong to exactly one context.
/// The context is released when the last handle (including those held by
/// its buffers, programs and queues) is dropped.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn new(devices: &[Device]) -> Result<Self> {
        let first = devices
            .first()
            .ok_or_else(|| Error::context("device list is empty"))?;
        let platform_index = first.platform_index();

        for (i, device) in devices.iter().enumerate() {
            if device.platform_index() != platform_index {
                return Err(Error::context(format!(
                    "device '{}' belongs to platform {}, context platform is {}",
                    device.name(),
                    device.platform_index(),
                    platform_index
                )));
            }
            if devices[..i].contains(device) {
                return Err(Error::context(format!(
                    "device '{}' listed twice",
                    device.name()
                )));
            }
        }

        let id = CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        info!(
            context = id,
            platform = platform_index,
            devices = devices.len(),
            "created context"
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                platform_index,
                devices: devices.to_vec(),
            }),
        })
    }

    /// Context over every device of `platform`.
    pub fn from_platform(platform: &Platform) -> Result<Self> {
        if platform.devices().is_empty() {
            return Err(Error::context(format!(
                "platform '{}' has no devices",
                platform.name()
            )));
        }
        Self::new(platform.devices())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn platform_index(&self) -> usize {
        self.inner.platform_index
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.inner.devices.contains(device)
    }

    /// A host-controlled event for gating commands in this context.
    pub fn create_user_event(&self) -> UserEvent {
        UserEvent::new(self.inner.id)
    }

    /// Largest single allocation every device of the context can hold.
    pub(crate) fn max_allocation(&self) -> u64 {
        self.inner
            .devices
            .iter()
            .map(|d| d.info().global_memory_bytes)
            .min()
            .unwrap_or(0)
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("platform", &self.inner.platform_index)
            .field("devices", &self.inner.devices)
            .finish()
    }
}
