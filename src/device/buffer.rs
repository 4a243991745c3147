use std::fmt;
use std::sync::Weak;

/// Direction a host transfer buffer is used for. Pools are kept separately per usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    /// GPU to host (readback).
    ReadOnly,
    /// Host to GPU (upload).
    WriteOnly,
}

impl BufferUsage {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::ReadOnly => 0,
            Self::WriteOnly => 1,
        }
    }
}

/// Receives host buffer storage when its handle is dropped.
pub(crate) trait Recycler: Send + Sync {
    fn recycle(&self, tag: u64, usage: BufferUsage, data: Vec<u8>);
}

/// A host-visible transfer buffer leased from a device pool.
///
/// The tag identifies the underlying storage for its whole life, across every trip through the
/// pool. Dropping the handle invalidates any upload cached for this storage and returns it to its
/// pool; once the device is gone the storage is simply freed.
pub struct HostBuffer {
    tag: u64,
    usage: BufferUsage,
    data: Vec<u8>,
    home: Weak<dyn Recycler>,
}

impl HostBuffer {
    pub(crate) fn new(tag: u64, usage: BufferUsage, data: Vec<u8>, home: Weak<dyn Recycler>) -> Self {
        Self {
            tag,
            usage,
            data,
            home,
        }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuffer")
            .field("tag", &self.tag)
            .field("usage", &self.usage)
            .field("size", &self.data.len())
            .finish()
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        match self.home.upgrade() {
            Some(home) => home.recycle(self.tag, self.usage, data),
            None => tracing::info!(
                tag = self.tag,
                size = data.len(),
                "host buffer released after device teardown"
            ),
        }
    }
}
