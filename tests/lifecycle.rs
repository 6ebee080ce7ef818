//! Integration tests for delivery budgets, sweeping, cancellation and
//! context-bound finishing

use archetype_resource::{
    AssetLoader, AssetManager, AssetRecord, DeliveryBudget, FileSystem, LoadedData,
    MemoryFileSystem, OpaqueData, TypeTag,
};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const IMG: TypeTag = TypeTag::new("IMG");
const GPU: TypeTag = TypeTag::new("GPU");

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[derive(Default)]
struct BytesLoader {
    load_calls: AtomicUsize,
    unload_calls: AtomicUsize,
}

impl AssetLoader for BytesLoader {
    fn load(&self, record: &AssetRecord, fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedData::new(fs.read(record.path())?))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        drop(data);
    }
}

/// Pretend GPU context handed to finish callbacks on the owner thread
#[derive(Default)]
struct FakeGpu {
    uploads: usize,
    destroys: usize,
}

struct GpuTexture {
    bytes: Vec<u8>,
}

/// Decodes off-thread, then uploads during finish_pending
#[derive(Default)]
struct GpuTextureLoader {
    load_calls: AtomicUsize,
}

impl AssetLoader for GpuTextureLoader {
    fn load(&self, record: &AssetRecord, fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedData::new(fs.read(record.path())?))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        drop(data);
    }

    fn requires_finish(&self) -> bool {
        true
    }

    fn finish(
        &self,
        record: &AssetRecord,
        staged: OpaqueData,
        context: &mut dyn Any,
    ) -> archetype_resource::Result<OpaqueData> {
        let gpu = context
            .downcast_mut::<FakeGpu>()
            .ok_or_else(|| archetype_resource::AssetError::FinishFailed {
                path: record.path().to_string(),
                reason: "wrong context type".into(),
            })?;
        let bytes = *staged
            .downcast::<Vec<u8>>()
            .map_err(|_| archetype_resource::AssetError::FinishFailed {
                path: record.path().to_string(),
                reason: "unexpected staged payload".into(),
            })?;
        gpu.uploads += 1;
        Ok(Box::new(GpuTexture { bytes }))
    }

    fn unload_finished(&self, _record: &AssetRecord, data: OpaqueData, context: &mut dyn Any) {
        if let Some(gpu) = context.downcast_mut::<FakeGpu>() {
            gpu.destroys += 1;
        }
        drop(data);
    }
}

fn setup() -> (Arc<MemoryFileSystem>, AssetManager, Arc<BytesLoader>) {
    let fs = Arc::new(MemoryFileSystem::new());
    for i in 0..8 {
        fs.insert(format!("img_{i}.png"), vec![i as u8]);
    }
    let manager = AssetManager::new(Arc::clone(&fs) as Arc<dyn FileSystem>);
    let loader = Arc::new(BytesLoader::default());
    manager.register_loader(IMG, Arc::clone(&loader) as Arc<dyn AssetLoader>);
    (fs, manager, loader)
}

#[test]
fn test_delivery_budget_is_resumable() {
    let (_fs, manager, _loader) = setup();
    manager.start_worker().unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let delivered = Arc::clone(&delivered);
        manager.request(IMG, &format!("img_{i}.png"), 0, move |result| {
            assert!(result.is_ok());
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending_deliveries() == 5
    }));

    assert_eq!(manager.deliver(DeliveryBudget::Items(2)), 2);
    assert_eq!(delivered.load(Ordering::SeqCst), 2);
    assert_eq!(manager.pending_deliveries(), 3);

    assert_eq!(manager.deliver(DeliveryBudget::Items(10)), 3);
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert_eq!(manager.deliver(DeliveryBudget::Unlimited), 0);
}

#[test]
fn test_cancel_all_deliveries_drops_callbacks() {
    let (_fs, manager, _loader) = setup();
    manager.start_worker().unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    for i in 0..4 {
        let delivered = Arc::clone(&delivered);
        manager.request(IMG, &format!("img_{i}.png"), 0, move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending_deliveries() == 4
    }));

    manager.cancel_all_deliveries();
    assert_eq!(manager.deliver(DeliveryBudget::Unlimited), 0);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sweep_respects_pause_and_references() {
    let (_fs, manager, loader) = setup();
    manager.start_worker().unwrap();

    let handle = manager.request(IMG, "img_0.png", 0, |_| {});
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        handle.is_loaded()
    }));

    // Still referenced: not swept
    assert_eq!(manager.sweep_unreferenced(), 0);

    drop(handle);
    manager.pause_unload(IMG);
    assert_eq!(manager.sweep_unreferenced(), 0);

    manager.resume_unload(IMG);
    assert_eq!(manager.sweep_unreferenced(), 1);
    assert!(wait_until(Duration::from_secs(5), || {
        manager.list_loaded().is_empty()
    }));
    assert_eq!(loader.unload_calls.load(Ordering::SeqCst), 1);
    // The entry survives the unload
    assert_eq!(manager.record_count(), 1);
}

#[test]
fn test_explicit_unload_ignores_pause() {
    let (_fs, manager, loader) = setup();
    manager.start_worker().unwrap();

    let handle = manager.request(IMG, "img_1.png", 0, |_| {});
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        handle.is_loaded()
    }));

    manager.pause_unload(IMG);
    assert!(manager.unload_path(IMG, "img_1.png"));
    assert!(wait_until(Duration::from_secs(5), || {
        manager.list_loaded().is_empty()
    }));
    assert_eq!(loader.unload_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ref_count_floor() {
    let (_fs, manager, _loader) = setup();

    let handle = manager.get_or_create(IMG, "img_2.png");
    for _ in 0..100 {
        let clone = handle.clone();
        drop(clone);
    }
    drop(handle);

    let record = manager.get_or_create(IMG, "img_2.png");
    assert_eq!(record.ref_count(), 2);
}

#[test]
fn test_context_bound_finish_flow() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("t.dds", vec![4, 5, 6]);
    let manager = AssetManager::new(fs as Arc<dyn FileSystem>);
    let loader = Arc::new(GpuTextureLoader::default());
    manager.register_loader(GPU, Arc::clone(&loader) as Arc<dyn AssetLoader>);
    manager.start_worker().unwrap();

    let delivered = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&delivered);
    let handle = manager.request(GPU, "t.dds", 0, move |result| {
        let texture = result.expect("finish should succeed");
        assert_eq!(
            texture.with_data(|t: &GpuTexture| t.bytes.clone()),
            Some(vec![4, 5, 6])
        );
        observed.fetch_add(1, Ordering::SeqCst);
    });

    // The worker decodes but cannot mark the record loaded
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending_finishes() == 1
    }));
    assert!(!handle.is_loaded());
    assert!(handle.needs_finish());
    assert_eq!(manager.deliver(DeliveryBudget::Unlimited), 0);

    // Owner thread materializes it into the context
    let mut gpu = FakeGpu::default();
    assert_eq!(manager.finish_pending(&mut gpu), 1);
    assert_eq!(gpu.uploads, 1);
    assert!(handle.is_loaded());

    manager.deliver(DeliveryBudget::Unlimited);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);

    // Context-bound unload runs on the owner thread too
    drop(handle);
    assert_eq!(manager.sweep_unreferenced(), 1);
    assert_eq!(manager.finish_pending(&mut gpu), 0);
    assert_eq!(gpu.destroys, 1);
    assert!(manager.list_loaded().is_empty());
}

/// Decodes fine off-thread but always refuses to finish
struct UnfinishableLoader;

impl AssetLoader for UnfinishableLoader {
    fn load(&self, record: &AssetRecord, fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        Ok(LoadedData::new(fs.read(record.path())?))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        drop(data);
    }

    fn requires_finish(&self) -> bool {
        true
    }

    fn finish(
        &self,
        record: &AssetRecord,
        _staged: OpaqueData,
        _context: &mut dyn Any,
    ) -> archetype_resource::Result<OpaqueData> {
        Err(archetype_resource::AssetError::FinishFailed {
            path: record.path().to_string(),
            reason: "device lost".into(),
        })
    }
}

#[test]
fn test_finish_failure_is_delivered() {
    const BAD: TypeTag = TypeTag::new("BAD");
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("bad.dds", vec![1]);
    let manager = AssetManager::new(fs as Arc<dyn FileSystem>);
    manager.register_loader(BAD, Arc::new(UnfinishableLoader));
    manager.start_worker().unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&failures);
    let handle = manager.request(BAD, "bad.dds", 0, move |result| {
        let error = result.expect_err("finish should fail");
        assert!(matches!(
            *error,
            archetype_resource::AssetError::FinishFailed { .. }
        ));
        observed.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending_finishes() == 1
    }));

    let mut gpu = FakeGpu::default();
    assert_eq!(manager.finish_pending(&mut gpu), 0);
    manager.deliver(DeliveryBudget::Unlimited);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert!(!handle.is_loaded());
    assert_eq!(manager.stats().loads_failed(), 1);
}

#[test]
fn test_delivery_budget_time() {
    let (_fs, manager, _loader) = setup();
    manager.start_worker().unwrap();

    for i in 0..3 {
        manager.request(IMG, &format!("img_{i}.png"), 0, |_| {});
    }
    assert!(wait_until(Duration::from_secs(5), || {
        manager.pending_deliveries() == 3
    }));

    // An already-elapsed budget delivers nothing; a generous one drains
    assert_eq!(manager.deliver(DeliveryBudget::Time(Duration::ZERO)), 0);
    assert_eq!(manager.pending_deliveries(), 3);
    assert_eq!(
        manager.deliver(DeliveryBudget::Time(Duration::from_secs(5))),
        3
    );
}

#[test]
fn test_delete_all_tears_down() {
    let (_fs, manager, _loader) = setup();
    manager.start_worker().unwrap();

    for i in 0..4 {
        manager.request(IMG, &format!("img_{i}.png"), 0, |_| {});
    }
    manager.stop_worker_when_idle();
    manager.join_worker();

    manager.delete_all();
    assert_eq!(manager.record_count(), 0);
    assert!(manager.is_idle());
}
