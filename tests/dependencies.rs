//! Integration tests for dependency resolution and keep-alive

use archetype_resource::{
    AssetError, AssetLoader, AssetManager, AssetRecord, DeliveryBudget, DependencyList,
    FileSystem, LoadedData, MemoryFileSystem, OpaqueData, TypeTag,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TEX: TypeTag = TypeTag::new("TEX");
const MAT: TypeTag = TypeTag::new("MAT");
const CYC: TypeTag = TypeTag::new("CYC");

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
struct TextureLoader {
    load_calls: AtomicUsize,
}

impl AssetLoader for TextureLoader {
    fn load(&self, record: &AssetRecord, fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(LoadedData::new(fs.read(record.path())?))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        drop(data);
    }
}

/// Loads a material that depends on a fixed texture list
struct MaterialLoader {
    textures: Vec<String>,
    blocking: bool,
}

impl AssetLoader for MaterialLoader {
    fn load(&self, _record: &AssetRecord, _fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        Ok(LoadedData::new("material".to_string()))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        drop(data);
    }

    fn dependencies(&self, _record: &AssetRecord) -> DependencyList {
        let assets = self
            .textures
            .iter()
            .map(|path| (TEX, path.clone()))
            .collect();
        if self.blocking {
            DependencyList::blocking(assets)
        } else {
            DependencyList::deferred(assets)
        }
    }
}

/// Two records that each list the other, to exercise the depth limit
struct CycleLoader;

impl AssetLoader for CycleLoader {
    fn load(&self, _record: &AssetRecord, _fs: &dyn FileSystem) -> archetype_resource::Result<LoadedData> {
        Ok(LoadedData::new(()))
    }

    fn unload(&self, _record: &AssetRecord, data: OpaqueData, _fs: &dyn FileSystem) {
        drop(data);
    }

    fn dependencies(&self, record: &AssetRecord) -> DependencyList {
        let next = if record.path() == "a" { "b" } else { "a" };
        DependencyList::blocking(vec![(CYC, next.to_string())])
    }
}

fn setup(blocking: bool) -> (AssetManager, Arc<TextureLoader>) {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("t.tex", vec![1]);
    fs.insert("u.tex", vec![2]);
    let manager = AssetManager::new(fs as Arc<dyn FileSystem>);
    let textures = Arc::new(TextureLoader::default());
    manager.register_loader(TEX, Arc::clone(&textures) as Arc<dyn AssetLoader>);
    manager.register_loader(
        MAT,
        Arc::new(MaterialLoader {
            textures: vec!["t.tex".into(), "u.tex".into()],
            blocking,
        }),
    );
    (manager, textures)
}

#[test]
fn test_blocking_dependencies_load_first() {
    let (manager, textures) = setup(true);
    manager.start_worker().unwrap();

    let handle = manager.request(MAT, "m.mat", 0, |result| {
        let material = result.expect("material should load");
        // Dependencies finished before the dependent was marked loaded
        assert_eq!(material.dependency_count(), 2);
    });
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        handle.is_loaded()
    }));

    assert_eq!(textures.load_calls.load(Ordering::SeqCst), 2);
    let tex = manager.get_or_create(TEX, "t.tex");
    assert!(tex.is_loaded());
}

#[test]
fn test_deferred_dependencies_load_eventually() {
    let (manager, textures) = setup(false);
    manager.start_worker().unwrap();

    let handle = manager.request(MAT, "m.mat", 3, |_| {});
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        handle.is_loaded() && textures.load_calls.load(Ordering::SeqCst) == 2
    }));
    // Keep-alive edges exist even though the textures loaded later
    assert_eq!(handle.dependency_count(), 2);
}

#[test]
fn test_dependency_keep_alive() {
    let (manager, _textures) = setup(true);
    manager.start_worker().unwrap();

    let material = manager.request(MAT, "m.mat", 0, |_| {});
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        material.is_loaded()
    }));

    // Only the cache and the material reference the texture now;
    // sweeping must not select it while the material holds it
    {
        let tex = manager.get_or_create(TEX, "t.tex");
        assert_eq!(tex.ref_count(), 3);
    }
    assert_eq!(manager.sweep_unreferenced(), 0);

    // Release the material; it becomes sweepable, and unloading it
    // releases the textures for the next sweep
    drop(material);
    assert_eq!(manager.sweep_unreferenced(), 1);
    assert!(wait_until(Duration::from_secs(5), || {
        let tex = manager.get_or_create(TEX, "t.tex");
        // Only this probe handle and the cache remain once the material's
        // keep-alive references are gone
        tex.ref_count() == 2
    }));

    assert_eq!(manager.sweep_unreferenced(), 2);
    assert!(wait_until(Duration::from_secs(5), || manager.list_loaded().is_empty()));
    // Records stay in the cache after unload
    assert_eq!(manager.record_count(), 3);
}

#[test]
fn test_dependency_cycle_hits_depth_limit() {
    let fs = Arc::new(MemoryFileSystem::new());
    let manager = AssetManager::new(fs as Arc<dyn FileSystem>);
    manager.register_loader(CYC, Arc::new(CycleLoader));
    manager.start_worker().unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&failures);
    let handle = manager.request(CYC, "a", 0, move |result| {
        let error = result.expect_err("cycle must not load");
        assert!(matches!(
            *error,
            AssetError::LoadFailed { .. } | AssetError::DependencyTooDeep { .. }
        ));
        observed.fetch_add(1, Ordering::SeqCst);
    });

    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        failures.load(Ordering::SeqCst) == 1
    }));
    assert!(!handle.is_loaded());
}

#[test]
fn test_missing_dependency_fails_dependent() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.insert("t.tex", vec![1]);
    // u.tex is missing
    let manager = AssetManager::new(fs as Arc<dyn FileSystem>);
    manager.register_loader(TEX, Arc::new(TextureLoader::default()));
    manager.register_loader(
        MAT,
        Arc::new(MaterialLoader {
            textures: vec!["t.tex".into(), "u.tex".into()],
            blocking: true,
        }),
    );
    manager.start_worker().unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&failures);
    let handle = manager.request(MAT, "m.mat", 0, move |result| {
        assert!(result.is_err());
        observed.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_until(Duration::from_secs(5), || {
        manager.deliver(DeliveryBudget::Unlimited);
        failures.load(Ordering::SeqCst) == 1
    }));
    assert!(!handle.is_loaded());
}
