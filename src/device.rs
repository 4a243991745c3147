//! The device: pooled GPU and host resources plus the single execution context that is allowed
//! to touch the backend.

pub mod buffer;
pub mod executor;
pub(crate) mod pool;
pub mod texture;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::backend::{GpuBackend, KernelParams};
use crate::foundation::core::TagSequence;
use crate::foundation::error::{MixerError, MixerResult};
use crate::frame::data::{FrameBytes, ImageData};

use self::buffer::{BufferUsage, HostBuffer, Recycler};
use self::executor::{Executor, Priority, TaskFuture};
use self::pool::{Lease, PoolMap};
use self::texture::{PooledTexture, Texture, TextureShape};

/// Device construction options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeviceOpts {
    /// Bound on queued execution-context tasks, per priority.
    pub queue_capacity: usize,
    /// Pool-miss allocations slower than this are logged as a performance warning.
    pub alloc_warn_ms: u64,
    /// Uploads of at least this many bytes are staged with a parallel copy.
    pub parallel_copy_min_bytes: usize,
    /// Thread name of the execution context.
    pub context_name: String,
}

impl Default for DeviceOpts {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            alloc_warn_ms: 20,
            parallel_copy_min_bytes: 1 << 20,
            context_name: "gpu-context".to_string(),
        }
    }
}

impl DeviceOpts {
    /// Defaults overridden by `LAYERMIX_QUEUE_CAPACITY`, `LAYERMIX_ALLOC_WARN_MS` and
    /// `LAYERMIX_PARALLEL_COPY_MIN_BYTES`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: FromStr>(v: Option<String>) -> Option<T> {
            v.and_then(|v| v.trim().parse().ok())
        }

        let mut opts = Self::default();
        if let Some(n) = parse::<usize>(get("LAYERMIX_QUEUE_CAPACITY")).filter(|&n| n > 0) {
            opts.queue_capacity = n;
        }
        if let Some(ms) = parse::<u64>(get("LAYERMIX_ALLOC_WARN_MS")) {
            opts.alloc_warn_ms = ms;
        }
        if let Some(n) = parse::<usize>(get("LAYERMIX_PARALLEL_COPY_MIN_BYTES")) {
            opts.parallel_copy_min_bytes = n;
        }
        opts
    }

    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn with_alloc_warn_ms(mut self, ms: u64) -> Self {
        self.alloc_warn_ms = ms;
        self
    }

    pub fn with_parallel_copy_min_bytes(mut self, n: usize) -> Self {
        self.parallel_copy_min_bytes = n;
        self
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }
}

/// Allocation and transfer counters since the device was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceStats {
    pub textures_allocated: u64,
    pub textures_reused: u64,
    pub buffers_allocated: u64,
    pub buffers_reused: u64,
    pub uploads: u64,
    pub upload_cache_hits: u64,
    pub readbacks: u64,
    pub slow_allocations: u64,
}

#[derive(Default)]
struct Counters {
    textures_allocated: AtomicU64,
    textures_reused: AtomicU64,
    buffers_allocated: AtomicU64,
    buffers_reused: AtomicU64,
    uploads: AtomicU64,
    upload_cache_hits: AtomicU64,
    readbacks: AtomicU64,
    slow_allocations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DeviceStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DeviceStats {
            textures_allocated: get(&self.textures_allocated),
            textures_reused: get(&self.textures_reused),
            buffers_allocated: get(&self.buffers_allocated),
            buffers_reused: get(&self.buffers_reused),
            uploads: get(&self.uploads),
            upload_cache_hits: get(&self.upload_cache_hits),
            readbacks: get(&self.readbacks),
            slow_allocations: get(&self.slow_allocations),
        }
    }
}

struct HostStorage {
    tag: u64,
    data: Vec<u8>,
}

struct CachedUpload<B: GpuBackend> {
    shape: TextureShape,
    texture: Texture<B>,
}

/// Everything pooled, shared with outstanding host buffers through a weak reference.
struct Resources<B: GpuBackend> {
    /// Indexed by `TextureShape::class`, keyed by `TextureShape::size_key`.
    textures: [PoolMap<u32, Arc<PooledTexture<B::Texture>>>; 8],
    /// Indexed by `BufferUsage::index`, keyed by byte size.
    buffers: [PoolMap<usize, HostStorage>; 2],
    /// Host buffer tag to the texture its contents were last uploaded into.
    upload_cache: Mutex<HashMap<u64, CachedUpload<B>>>,
    tags: TagSequence,
    counters: Counters,
}

impl<B: GpuBackend> Resources<B> {
    fn new() -> Self {
        Self {
            textures: std::array::from_fn(|_| PoolMap::default()),
            buffers: std::array::from_fn(|_| PoolMap::default()),
            upload_cache: Mutex::new(HashMap::new()),
            tags: TagSequence::default(),
            counters: Counters::default(),
        }
    }

    /// Returns `(textures, buffers)` dropped.
    fn drain(&self) -> (usize, usize) {
        let textures = self.textures.iter().map(PoolMap::drain).sum();
        let buffers = self.buffers.iter().map(PoolMap::drain).sum();
        (textures, buffers)
    }

    fn teardown(&self) {
        let cached = std::mem::take(&mut *self.upload_cache.lock());
        drop(cached);
        let textures: usize = self.textures.iter().map(PoolMap::clear).sum();
        let buffers: usize = self.buffers.iter().map(PoolMap::clear).sum();
        tracing::debug!(textures, buffers, "device pools released");
    }
}

impl<B: GpuBackend> Recycler for Resources<B> {
    fn recycle(&self, tag: u64, usage: BufferUsage, data: Vec<u8>) {
        let stale = self.upload_cache.lock().remove(&tag);
        drop(stale);
        self.buffers[usage.index()]
            .bucket(data.len())
            .push(HostStorage { tag, data });
    }
}

struct DeviceCore<B: GpuBackend> {
    // Dropped first: joins the context thread before the backend goes away.
    executor: Executor,
    opts: DeviceOpts,
    backend: B,
    resources: Arc<Resources<B>>,
}

impl<B: GpuBackend> Drop for DeviceCore<B> {
    fn drop(&mut self) {
        let resources = Arc::clone(&self.resources);
        let released = self.executor.invoke(Priority::High, move || {
            resources.teardown();
            Ok(())
        });
        if let Err(err) = released {
            tracing::warn!(error = %err, "device teardown ran without the execution context");
            self.resources.teardown();
        }
        tracing::info!(context = %self.executor.name(), "device destroyed");
    }
}

/// Handle to a device. Clones share the same pools and execution context.
pub struct Device<B: GpuBackend> {
    core: Arc<DeviceCore<B>>,
}

impl<B: GpuBackend> Clone for Device<B> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<B: GpuBackend> Device<B> {
    pub fn new(backend: B, opts: DeviceOpts) -> MixerResult<Self> {
        let executor = Executor::new(&opts.context_name, opts.queue_capacity)?;
        let device = Self {
            core: Arc::new(DeviceCore {
                executor,
                opts,
                backend,
                resources: Arc::new(Resources::new()),
            }),
        };
        tracing::info!(
            context = %device.core.opts.context_name,
            backend = %device.version(),
            queue_capacity = device.core.opts.queue_capacity,
            "device initialized"
        );
        Ok(device)
    }

    pub fn opts(&self) -> &DeviceOpts {
        &self.core.opts
    }

    /// Whether the calling thread is this device's execution context.
    pub fn is_current(&self) -> bool {
        self.core.executor.is_current()
    }

    /// Queue `f` on the execution context.
    pub fn begin_invoke<R, F>(&self, priority: Priority, f: F) -> TaskFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> MixerResult<R> + Send + 'static,
    {
        self.core.executor.begin_invoke(priority, f)
    }

    /// Run `f` on the execution context and wait for the result. Runs inline when called from
    /// the context itself.
    pub fn invoke<R, F>(&self, f: F) -> MixerResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> MixerResult<R> + Send + 'static,
    {
        self.core.executor.invoke(Priority::Normal, f)
    }

    /// Lease a texture of the given shape, reusing an idle one of the exact same shape if any.
    ///
    /// Only valid on the execution context.
    pub fn create_texture(
        &self,
        width: u32,
        height: u32,
        stride: u32,
        mipmapped: bool,
        clear: bool,
    ) -> MixerResult<Texture<B>> {
        if !self.is_current() {
            return Err(MixerError::off_context());
        }
        let shape = texture_shape(width, height, stride, mipmapped)?;
        let max = self.core.backend.max_texture_size();
        if width > max || height > max {
            return Err(MixerError::validation(format!(
                "texture {width}x{height} exceeds the maximum size {max}"
            )));
        }

        let resources = &self.core.resources;
        let bucket = resources.textures[shape.class()].bucket(shape.size_key());
        let item = match bucket.pop() {
            Some(item) => {
                Counters::bump(&resources.counters.textures_reused);
                item
            }
            None => {
                let raw = self
                    .core
                    .backend
                    .create_texture(width, height, stride, mipmapped)?;
                Counters::bump(&resources.counters.textures_allocated);
                let tag = resources.tags.next();
                tracing::trace!(tag, width, height, stride, mipmapped, "texture allocated");
                Arc::new(PooledTexture { tag, raw })
            }
        };
        let texture = Texture::new(shape, Lease::new(item, &bucket));
        if clear {
            self.core.backend.clear_texture(texture.raw())?;
        }
        Ok(texture)
    }

    /// Lease a host transfer buffer of exactly `size` bytes.
    ///
    /// A pool miss allocates on the execution context at high priority. Waits longer than
    /// `alloc_warn_ms`, queueing included, are logged and counted.
    pub fn create_buffer(&self, size: usize, usage: BufferUsage) -> MixerResult<HostBuffer> {
        if size == 0 {
            return Err(MixerError::validation("host buffer size must be > 0"));
        }
        let resources = &self.core.resources;
        if let Some(HostStorage { tag, data }) =
            resources.buffers[usage.index()].bucket(size).pop()
        {
            Counters::bump(&resources.counters.buffers_reused);
            return Ok(self.wrap_buffer(tag, usage, data));
        }

        let core = Arc::clone(&self.core);
        let started = Instant::now();
        let data = self
            .core
            .executor
            .invoke(Priority::High, move || Ok(core.backend.allocate_host(size)))?;
        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(self.core.opts.alloc_warn_ms) {
            Counters::bump(&resources.counters.slow_allocations);
            tracing::warn!(
                size,
                ?usage,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "host buffer allocation blocked"
            );
        }
        Counters::bump(&resources.counters.buffers_allocated);
        Ok(self.wrap_buffer(resources.tags.next(), usage, data))
    }

    fn wrap_buffer(&self, tag: u64, usage: BufferUsage, data: Vec<u8>) -> HostBuffer {
        let home: Weak<dyn Recycler> = Arc::downgrade(&self.core.resources) as Weak<dyn Recycler>;
        HostBuffer::new(tag, usage, data, home)
    }

    /// Upload host bytes into a texture.
    ///
    /// Pooled sources are cached by buffer identity: uploading the same buffer again with the same
    /// shape yields the same texture without touching the GPU. Owned sources are staged through a
    /// fresh write-only buffer and always uploaded.
    pub fn copy_async(
        &self,
        source: &ImageData,
        width: u32,
        height: u32,
        stride: u32,
        mipmapped: bool,
    ) -> TaskFuture<Texture<B>> {
        let staged = texture_shape(width, height, stride, mipmapped).and_then(|shape| {
            if source.len() != shape.byte_len() {
                return Err(MixerError::validation(format!(
                    "upload of {} bytes does not match {width}x{height}x{stride}",
                    source.len()
                )));
            }
            let (buffer, cacheable) = match source {
                ImageData::Pooled(buffer) => (Arc::clone(buffer), true),
                ImageData::Owned(bytes) => {
                    let mut buffer = self.create_buffer(bytes.len(), BufferUsage::WriteOnly)?;
                    copy_bytes(
                        buffer.as_mut_slice(),
                        bytes,
                        self.core.opts.parallel_copy_min_bytes,
                    );
                    (Arc::new(buffer), false)
                }
            };
            Ok((shape, buffer, cacheable))
        });
        let (shape, buffer, cacheable) = match staged {
            Ok(staged) => staged,
            Err(err) => return TaskFuture::ready(Err(err)),
        };

        let device = self.clone();
        self.core.executor.begin_invoke(Priority::High, move || {
            device.upload_now(&buffer, shape, cacheable)
        })
    }

    fn upload_now(
        &self,
        buffer: &HostBuffer,
        shape: TextureShape,
        cacheable: bool,
    ) -> MixerResult<Texture<B>> {
        let resources = &self.core.resources;
        if cacheable {
            let hit = resources
                .upload_cache
                .lock()
                .get(&buffer.tag())
                .filter(|c| c.shape == shape)
                .map(|c| c.texture.clone());
            if let Some(texture) = hit {
                Counters::bump(&resources.counters.upload_cache_hits);
                return Ok(texture);
            }
        }

        let texture = self.create_texture(
            shape.width,
            shape.height,
            shape.stride,
            shape.mipmapped,
            false,
        )?;
        self.core.backend.upload(texture.raw(), buffer.as_slice())?;
        Counters::bump(&resources.counters.uploads);

        if cacheable {
            let replaced = resources.upload_cache.lock().insert(
                buffer.tag(),
                CachedUpload {
                    shape,
                    texture: texture.clone(),
                },
            );
            drop(replaced);
        }
        Ok(texture)
    }

    /// Schedule a copy of `texture` back to host memory.
    ///
    /// The GPU side copy is issued now; mapping the result is deferred until the returned
    /// [`Readback`] is awaited. Only valid on the execution context.
    pub fn read_back(&self, texture: &Texture<B>) -> MixerResult<Readback<B>> {
        if !self.is_current() {
            return Err(MixerError::off_context());
        }
        let buffer = self.create_buffer(texture.size(), BufferUsage::ReadOnly)?;
        let pending = self.core.backend.begin_readback(texture.raw())?;
        Counters::bump(&self.core.resources.counters.readbacks);
        Ok(Readback {
            device: self.clone(),
            pending: Some((pending, buffer)),
            mapping: None,
        })
    }

    fn finish_readback(&self, pending: B::Readback, mut buffer: HostBuffer) -> MixerResult<HostBuffer> {
        let started = Instant::now();
        self.core
            .backend
            .finish_readback(pending, buffer.as_mut_slice())?;
        tracing::trace!(
            tag = buffer.tag(),
            size = buffer.size(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "readback mapped"
        );
        Ok(buffer)
    }

    /// Issue one kernel draw. Only valid on the execution context.
    pub(crate) fn draw(&self, params: &KernelParams<'_, B::Texture>) -> MixerResult<()> {
        if !self.is_current() {
            return Err(MixerError::off_context());
        }
        self.core.backend.draw(params)
    }

    pub(crate) fn post_process(&self, target: &Texture<B>, straighten: bool) -> MixerResult<()> {
        if !self.is_current() {
            return Err(MixerError::off_context());
        }
        self.core.backend.post_process(target.raw(), straighten)
    }

    /// Drop every idle pooled texture and host buffer.
    pub fn gc(&self) -> TaskFuture<()> {
        let resources = Arc::clone(&self.core.resources);
        self.core.executor.begin_invoke(Priority::High, move || {
            let (textures, buffers) = resources.drain();
            tracing::info!(textures, buffers, "device gc");
            Ok(())
        })
    }

    /// Backend description, or `"Not found"` when it cannot be queried.
    pub fn version(&self) -> String {
        let core = Arc::clone(&self.core);
        self.invoke(move || core.backend.describe())
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "backend version query failed");
                "Not found".to_string()
            })
    }

    /// Largest single texture dimension, queried on the execution context.
    pub fn max_texture_size(&self) -> MixerResult<u32> {
        let core = Arc::clone(&self.core);
        self.invoke(move || Ok(core.backend.max_texture_size()))
    }

    pub fn stats(&self) -> DeviceStats {
        self.core.resources.counters.snapshot()
    }

    /// Pool occupancy and counters as JSON.
    pub fn info(&self) -> serde_json::Value {
        let resources = &self.core.resources;

        let mut textures = Vec::new();
        let (mut idle_textures, mut idle_texture_bytes) = (0usize, 0usize);
        for (class, pool) in resources.textures.iter().enumerate() {
            for (key, count) in pool.occupancy() {
                let shape = TextureShape::from_class_key(class, key);
                idle_textures += count;
                idle_texture_bytes += count * shape.byte_len();
                textures.push(serde_json::json!({
                    "stride": shape.stride,
                    "mipmapping": shape.mipmapped,
                    "width": shape.width,
                    "height": shape.height,
                    "size": shape.byte_len(),
                    "count": count,
                }));
            }
        }

        let mut buffers = Vec::new();
        let (mut idle_buffers, mut idle_buffer_bytes) = (0usize, 0usize);
        for usage in [BufferUsage::ReadOnly, BufferUsage::WriteOnly] {
            for (size, count) in resources.buffers[usage.index()].occupancy() {
                idle_buffers += count;
                idle_buffer_bytes += count * size;
                buffers.push(serde_json::json!({
                    "usage": usage,
                    "size": size,
                    "count": count,
                }));
            }
        }

        serde_json::json!({
            "context": self.core.opts.context_name,
            "queued": self.core.executor.queued(),
            "textures": textures,
            "buffers": buffers,
            "totals": {
                "idle_textures": idle_textures,
                "idle_texture_bytes": idle_texture_bytes,
                "idle_buffers": idle_buffers,
                "idle_buffer_bytes": idle_buffer_bytes,
                "cached_uploads": resources.upload_cache.lock().len(),
            },
            "stats": self.stats(),
        })
    }
}

/// A scheduled GPU to host copy. Awaiting it maps the result on the execution context.
#[must_use = "a readback does nothing unless awaited"]
pub struct Readback<B: GpuBackend> {
    device: Device<B>,
    pending: Option<(B::Readback, HostBuffer)>,
    mapping: Option<TaskFuture<HostBuffer>>,
}

impl<B: GpuBackend> Unpin for Readback<B> {}

impl<B: GpuBackend> Readback<B> {
    pub fn wait(self) -> MixerResult<FrameBytes> {
        pollster::block_on(self)
    }
}

impl<B: GpuBackend> Future for Readback<B> {
    type Output = MixerResult<FrameBytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some((pending, buffer)) = self.pending.take() {
            if self.device.is_current() {
                return Poll::Ready(
                    self.device
                        .finish_readback(pending, buffer)
                        .map(FrameBytes::from_host),
                );
            }
            let device = self.device.clone();
            self.mapping = Some(
                self.device
                    .begin_invoke(Priority::High, move || device.finish_readback(pending, buffer)),
            );
        }
        match self.mapping.as_mut() {
            Some(mapping) => Pin::new(mapping)
                .poll(cx)
                .map(|r| r.map(FrameBytes::from_host)),
            None => Poll::Ready(Err(MixerError::gpu("readback polled after completion"))),
        }
    }
}

fn texture_shape(width: u32, height: u32, stride: u32, mipmapped: bool) -> MixerResult<TextureShape> {
    if !(1..=4).contains(&stride) {
        return Err(MixerError::validation(format!(
            "texture stride must be in 1..=4, got {stride}"
        )));
    }
    if !(1..=0xFFFF).contains(&width) || !(1..=0xFFFF).contains(&height) {
        return Err(MixerError::validation(format!(
            "texture dimensions must be in 1..=65535, got {width}x{height}"
        )));
    }
    Ok(TextureShape {
        width,
        height,
        stride,
        mipmapped,
    })
}

fn copy_bytes(dst: &mut [u8], src: &[u8], parallel_min: usize) {
    if src.len() < parallel_min.max(1) {
        dst.copy_from_slice(src);
        return;
    }
    let chunk = (src.len() / rayon::current_num_threads().max(1)).max(64 * 1024);
    dst.par_chunks_mut(chunk)
        .zip(src.par_chunks(chunk))
        .for_each(|(d, s)| d.copy_from_slice(s));
}

#[cfg(test)]
#[path = "../tests/unit/device/device.rs"]
mod tests;
