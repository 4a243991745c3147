use super::*;
use crate::backend::cpu::{CpuBackend, CpuBackendOpts};

fn device() -> Device<CpuBackend> {
    Device::new(CpuBackend::default(), DeviceOpts::default()).unwrap()
}

fn pooled(device: &Device<CpuBackend>, bytes: &[u8]) -> ImageData {
    let mut buffer = device
        .create_buffer(bytes.len(), BufferUsage::WriteOnly)
        .unwrap();
    buffer.as_mut_slice().copy_from_slice(bytes);
    ImageData::Pooled(Arc::new(buffer))
}

fn totals(device: &Device<CpuBackend>) -> serde_json::Value {
    device.info()["totals"].clone()
}

#[test]
fn gpu_only_calls_are_rejected_off_context() {
    let d = device();
    let err = d.create_texture(4, 4, 4, false, false).unwrap_err();
    assert!(matches!(err, MixerError::InvalidOperation(_)));

    let texture = d
        .copy_async(&ImageData::from(vec![7u8; 64]), 4, 4, 4, false)
        .wait()
        .unwrap();
    assert!(matches!(
        d.read_back(&texture),
        Err(MixerError::InvalidOperation(_))
    ));
}

#[test]
fn released_textures_are_reused_by_exact_shape() {
    let d = device();
    let inner = d.clone();
    let (first, again, other) = d
        .invoke(move || {
            let a = inner.create_texture(8, 8, 4, false, false)?;
            let first = a.tag();
            drop(a);
            let again = inner.create_texture(8, 8, 4, false, false)?.tag();
            let other = inner.create_texture(8, 8, 4, true, false)?.tag();
            Ok((first, again, other))
        })
        .unwrap();
    assert_eq!(first, again);
    assert_ne!(first, other);

    let stats = d.stats();
    assert_eq!(stats.textures_allocated, 2);
    assert_eq!(stats.textures_reused, 1);
}

#[test]
fn live_textures_never_share_storage() {
    let d = device();
    let inner = d.clone();
    let tags = d
        .invoke(move || {
            let held: Vec<_> = (0..4)
                .map(|_| inner.create_texture(2, 2, 1, false, false))
                .collect::<MixerResult<_>>()?;
            Ok(held.iter().map(Texture::tag).collect::<Vec<_>>())
        })
        .unwrap();
    let mut unique = tags.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 4);
}

#[test]
fn cleared_textures_come_back_zeroed() {
    let d = device();
    let texture = d
        .copy_async(&ImageData::from(vec![9u8; 16]), 2, 2, 4, false)
        .wait()
        .unwrap();
    drop(texture);

    let inner = d.clone();
    let readback = d
        .invoke(move || {
            let t = inner.create_texture(2, 2, 4, false, true)?;
            inner.read_back(&t)
        })
        .unwrap();
    assert_eq!(&*readback.wait().unwrap(), &[0u8; 16][..]);
    assert_eq!(d.stats().textures_reused, 1);
}

#[test]
fn same_buffer_upload_hits_the_cache() {
    let d = device();
    let data = pooled(&d, &[1u8; 64]);
    let a = d.copy_async(&data, 4, 4, 4, false).wait().unwrap();
    let b = d.copy_async(&data, 4, 4, 4, false).wait().unwrap();
    assert!(Texture::ptr_eq(&a, &b));

    let stats = d.stats();
    assert_eq!(stats.uploads, 1);
    assert_eq!(stats.upload_cache_hits, 1);
}

#[test]
fn cache_requires_the_same_shape() {
    let d = device();
    let data = pooled(&d, &[1u8; 64]);
    let square = d.copy_async(&data, 4, 4, 4, false).wait().unwrap();
    let wide = d.copy_async(&data, 8, 2, 4, false).wait().unwrap();
    assert!(!Texture::ptr_eq(&square, &wide));
    assert_eq!((wide.width(), wide.height()), (8, 2));
    assert_eq!(d.stats().uploads, 2);
    assert_eq!(d.stats().upload_cache_hits, 0);
}

#[test]
fn identical_bytes_in_another_buffer_upload_again() {
    let d = device();
    let a = d
        .copy_async(&pooled(&d, &[3u8; 16]), 2, 2, 4, false)
        .wait()
        .unwrap();
    let b = d
        .copy_async(&pooled(&d, &[3u8; 16]), 2, 2, 4, false)
        .wait()
        .unwrap();
    assert!(!Texture::ptr_eq(&a, &b));
    assert_eq!(d.stats().uploads, 2);
}

#[test]
fn owned_bytes_bypass_the_cache() {
    let d = device();
    let data = ImageData::from(vec![5u8; 16]);
    let a = d.copy_async(&data, 2, 2, 4, false).wait().unwrap();
    let b = d.copy_async(&data, 2, 2, 4, false).wait().unwrap();
    assert!(!Texture::ptr_eq(&a, &b));
    let stats = d.stats();
    assert_eq!((stats.uploads, stats.upload_cache_hits), (2, 0));
    assert_eq!(totals(&d)["cached_uploads"], 0);
}

#[test]
fn recycling_a_buffer_evicts_its_cached_upload() {
    let d = device();
    let data = pooled(&d, &[4u8; 16]);
    let tag = data.buffer_tag().unwrap();
    let texture = d.copy_async(&data, 2, 2, 4, false).wait().unwrap();
    assert_eq!(totals(&d)["cached_uploads"], 1);

    drop(texture);
    drop(data);
    assert_eq!(totals(&d)["cached_uploads"], 0);

    // same storage, same tag, different contents
    let reused = pooled(&d, &[8u8; 16]);
    assert_eq!(reused.buffer_tag(), Some(tag));
    let texture = d.copy_async(&reused, 2, 2, 4, false).wait().unwrap();

    let stats = d.stats();
    assert_eq!(stats.buffers_reused, 1);
    assert_eq!(stats.uploads, 2);
    assert_eq!(stats.upload_cache_hits, 0);

    let inner = d.clone();
    let bytes = d
        .invoke(move || inner.read_back(&texture))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(&*bytes, &[8u8; 16][..]);
}

#[test]
fn readback_round_trips_uploaded_pixels() {
    let d = device();
    let pixels: Vec<u8> = (0..24).collect();
    let texture = d
        .copy_async(&ImageData::from(pixels.clone()), 2, 3, 4, false)
        .wait()
        .unwrap();
    let inner = d.clone();
    let readback = d.invoke(move || inner.read_back(&texture)).unwrap();
    let bytes = readback.wait().unwrap();
    assert_eq!(bytes.into_vec(), pixels);
    assert_eq!(d.stats().readbacks, 1);
}

#[test]
fn readback_polled_on_the_context_maps_inline() {
    let d = device();
    let texture = d
        .copy_async(&ImageData::from(vec![6u8; 4]), 2, 2, 1, false)
        .wait()
        .unwrap();
    let inner = d.clone();
    let bytes = d
        .invoke(move || inner.read_back(&texture)?.wait())
        .unwrap();
    assert_eq!(&*bytes, &[6u8; 4][..]);
}

#[test]
fn buffers_are_pooled_by_usage_and_size() {
    let d = device();
    let a = d.create_buffer(32, BufferUsage::WriteOnly).unwrap();
    let tag = a.tag();
    drop(a);

    let read = d.create_buffer(32, BufferUsage::ReadOnly).unwrap();
    assert_ne!(read.tag(), tag);
    let write = d.create_buffer(32, BufferUsage::WriteOnly).unwrap();
    assert_eq!(write.tag(), tag);
    assert_eq!(write.usage(), BufferUsage::WriteOnly);

    let stats = d.stats();
    assert_eq!((stats.buffers_allocated, stats.buffers_reused), (2, 1));
}

#[test]
fn blocked_buffer_allocation_is_counted() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let d = Device::new(
        CpuBackend::default(),
        DeviceOpts::default().with_alloc_warn_ms(10),
    )
    .unwrap();
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let busy = d.begin_invoke(Priority::High, move || {
        let _ = started_tx.send(());
        std::thread::sleep(Duration::from_millis(80));
        Ok(())
    });
    started_rx.recv().unwrap();

    let buffer = d.create_buffer(12345, BufferUsage::WriteOnly).unwrap();
    assert_eq!(buffer.size(), 12345);
    busy.wait().unwrap();
    assert_eq!(d.stats().slow_allocations, 1);
}

#[test]
fn gc_drops_idle_resources() {
    let d = device();
    drop(d.create_buffer(32, BufferUsage::ReadOnly).unwrap());
    drop(
        d.copy_async(&ImageData::from(vec![0u8; 16]), 2, 2, 4, false)
            .wait()
            .unwrap(),
    );
    let before = totals(&d);
    assert_eq!(before["idle_textures"], 1);
    assert_eq!(before["idle_texture_bytes"], 16);
    assert!(before["idle_buffers"].as_u64().unwrap() >= 1);

    d.gc().wait().unwrap();
    let after = totals(&d);
    assert_eq!(after["idle_textures"], 0);
    assert_eq!(after["idle_buffers"], 0);
}

#[test]
fn info_lists_pool_buckets() {
    let d = device();
    drop(
        d.copy_async(&ImageData::from(vec![0u8; 8]), 4, 2, 1, false)
            .wait()
            .unwrap(),
    );
    let info = d.info();
    let textures = info["textures"].as_array().unwrap();
    assert_eq!(textures.len(), 1);
    assert_eq!(textures[0]["stride"], 1);
    assert_eq!(textures[0]["width"], 4);
    assert_eq!(textures[0]["height"], 2);
    assert_eq!(textures[0]["mipmapping"], false);
    assert_eq!(textures[0]["count"], 1);
    assert!(
        info["buffers"]
            .as_array()
            .unwrap()
            .iter()
            .any(|b| b["usage"] == "write_only" && b["size"] == 8)
    );
    assert_eq!(info["context"], "gpu-context");
    assert_eq!(info["stats"]["uploads"], 1);
}

#[test]
fn resources_may_outlive_the_device() {
    let d = device();
    let buffer = d.create_buffer(16, BufferUsage::WriteOnly).unwrap();
    let texture = d
        .copy_async(&ImageData::from(vec![1u8; 16]), 2, 2, 4, false)
        .wait()
        .unwrap();
    drop(d);
    assert_eq!(buffer.size(), 16);
    assert_eq!(texture.size(), 16);
    drop(buffer);
    drop(texture);
}

#[test]
fn version_and_limits_come_from_the_backend() {
    let backend = CpuBackend::new(CpuBackendOpts::default().with_max_texture_size(64));
    let d = Device::new(backend, DeviceOpts::default()).unwrap();
    assert!(d.version().starts_with("cpu reference kernel"));
    assert_eq!(d.max_texture_size().unwrap(), 64);

    let inner = d.clone();
    let err = d
        .invoke(move || inner.create_texture(65, 8, 4, false, false))
        .unwrap_err();
    assert!(matches!(err, MixerError::Validation(_)));
}

#[test]
fn invalid_shapes_are_rejected() {
    let d = device();
    let inner = d.clone();
    let (zero_stride, wide_stride, huge) = d
        .invoke(move || {
            Ok((
                inner.create_texture(4, 4, 0, false, false).err(),
                inner.create_texture(4, 4, 5, false, false).err(),
                inner.create_texture(70_000, 4, 4, false, false).err(),
            ))
        })
        .unwrap();
    for err in [zero_stride, wide_stride, huge] {
        assert!(matches!(err, Some(MixerError::Validation(_))), "{err:?}");
    }

    let mismatch = d
        .copy_async(&ImageData::from(vec![0u8; 10]), 2, 2, 4, false)
        .wait()
        .unwrap_err();
    assert!(matches!(mismatch, MixerError::Validation(_)));
    assert!(matches!(
        d.create_buffer(0, BufferUsage::ReadOnly),
        Err(MixerError::Validation(_))
    ));
}

#[test]
fn large_owned_uploads_take_the_parallel_copy() {
    let opts = DeviceOpts::default().with_parallel_copy_min_bytes(64);
    let d = Device::new(CpuBackend::default(), opts).unwrap();
    let pixels: Vec<u8> = (0..=255).cycle().take(32 * 32 * 4).collect();
    let texture = d
        .copy_async(&ImageData::from(pixels.clone()), 32, 32, 4, false)
        .wait()
        .unwrap();
    let inner = d.clone();
    let bytes = d
        .invoke(move || inner.read_back(&texture))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(bytes.into_vec(), pixels);
}

#[test]
fn copy_bytes_matches_a_plain_copy() {
    let src: Vec<u8> = (0..=255).cycle().take(10_000).collect();
    for min in [0, 1, 4096, 1 << 20] {
        let mut dst = vec![0u8; src.len()];
        copy_bytes(&mut dst, &src, min);
        assert_eq!(dst, src);
    }
}

#[test]
fn opts_from_lookup_override_defaults() {
    let env = |key: &str| match key {
        "LAYERMIX_QUEUE_CAPACITY" => Some("32".to_string()),
        "LAYERMIX_ALLOC_WARN_MS" => Some(" 5 ".to_string()),
        "LAYERMIX_PARALLEL_COPY_MIN_BYTES" => Some("lots".to_string()),
        _ => None,
    };
    let opts = DeviceOpts::from_lookup(env);
    assert_eq!(opts.queue_capacity, 32);
    assert_eq!(opts.alloc_warn_ms, 5);
    assert_eq!(opts.parallel_copy_min_bytes, DeviceOpts::default().parallel_copy_min_bytes);

    let zero = DeviceOpts::from_lookup(|k| (k == "LAYERMIX_QUEUE_CAPACITY").then(|| "0".into()));
    assert_eq!(zero.queue_capacity, 256);
}

#[test]
fn opts_deserialize_partially() {
    let opts: DeviceOpts = serde_json::from_str(r#"{"context_name": "gpu-2"}"#).unwrap();
    assert_eq!(opts, DeviceOpts::default().with_context_name("gpu-2"));
}
