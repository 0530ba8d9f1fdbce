use super::core::traits::LoaderInstaller;
use super::manifest::SyntheticVersionManifest;
use super::types::{InstallSpec, LoaderDescriptor, ModloaderType, ProgressReporter};
use super::*;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every reporter call.
#[derive(Default)]
pub(crate) struct MockProgressReporter {
    pub steps: Mutex<Vec<String>>,
    pub percent: Mutex<i32>,
    pub messages: Mutex<Vec<String>>,
    pub finished: Mutex<Option<bool>>,
}

impl ProgressReporter for MockProgressReporter {
    fn start_step(&self, name: &str, _total_steps: Option<u32>) {
        self.steps.lock().unwrap().push(name.to_string());
    }
    fn update_bytes(&self, _transferred: u64, _total: Option<u64>) {}
    fn set_percent(&self, percent: i32) {
        *self.percent.lock().unwrap() = percent;
    }
    fn set_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
    fn set_substep(&self, _name: Option<&str>, _current: Option<u32>, _total: Option<u32>) {}
    fn done(&self, success: bool, _message: Option<&str>) {
        *self.finished.lock().unwrap() = Some(success);
    }
}

/// Installer double: writes a manifest on install, optionally fails.
struct FakeInstaller {
    descriptor: LoaderDescriptor,
    valid: AtomicBool,
    fail_install: bool,
    installs: AtomicUsize,
}

impl FakeInstaller {
    fn new(valid: bool, fail_install: bool) -> Self {
        Self {
            descriptor: LoaderDescriptor::new(ModloaderType::Fabric, "1.20.1", "0.15.11"),
            valid: AtomicBool::new(valid),
            fail_install,
            installs: AtomicUsize::new(0),
        }
    }
}

impl LoaderInstaller for FakeInstaller {
    fn descriptor(&self) -> &LoaderDescriptor {
        &self.descriptor
    }

    fn check_compatibility<'a>(&'a self, _spec: &'a InstallSpec) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn validate_installation<'a>(&'a self, _spec: &'a InstallSpec) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.valid.load(Ordering::SeqCst)) })
    }

    fn install<'a>(
        &'a self,
        spec: &'a InstallSpec,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.installs.fetch_add(1, Ordering::SeqCst);
            reporter.start_step("Installing", Some(1));
            let id = self.version_id();
            let manifest = SyntheticVersionManifest::new(&id, "net.fabricmc.loader.launch.knot.KnotClient");
            manifest.save(&spec.version_json_path(&id)).await?;
            if self.fail_install {
                anyhow::bail!("simulated failure");
            }
            self.valid.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn spec(root: &std::path::Path, installer: &FakeInstaller) -> InstallSpec {
    InstallSpec::new(installer.descriptor.clone(), root.to_path_buf())
}

#[tokio::test]
async fn valid_install_is_left_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = FakeInstaller::new(true, false);
    let reporter = Arc::new(MockProgressReporter::default());

    let state = ensure_installed(&installer, &spec(tmp.path(), &installer), reporter.clone())
        .await
        .unwrap();
    assert_eq!(state, InstallState::Valid);
    assert_eq!(installer.installs.load(Ordering::SeqCst), 0);
    assert_eq!(*reporter.finished.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn invalid_install_is_reinstalled() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = FakeInstaller::new(false, false);
    let reporter = Arc::new(MockProgressReporter::default());
    let spec = spec(tmp.path(), &installer);

    let state = ensure_installed(&installer, &spec, reporter.clone()).await.unwrap();
    assert_eq!(state, InstallState::Installed);
    assert_eq!(installer.installs.load(Ordering::SeqCst), 1);
    assert!(spec.version_json_path("fabric-loader-0.15.11-1.20.1").is_file());
    assert_eq!(reporter.steps.lock().unwrap().as_slice(), ["Installing"]);
}

#[tokio::test]
async fn failed_reinstall_restores_previous_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let installer = FakeInstaller::new(false, true);
    let spec = spec(tmp.path(), &installer);
    let json = spec.version_json_path("fabric-loader-0.15.11-1.20.1");
    std::fs::create_dir_all(json.parent().unwrap()).unwrap();
    std::fs::write(&json, "previous").unwrap();

    let reporter = Arc::new(MockProgressReporter::default());
    let err = ensure_installed(&installer, &spec, reporter.clone()).await.unwrap_err();
    assert!(err.to_string().contains("simulated failure"));
    assert_eq!(std::fs::read_to_string(&json).unwrap(), "previous");
    assert_eq!(*reporter.finished.lock().unwrap(), Some(false));
}

#[tokio::test]
async fn missing_loader_version_is_rejected_before_work() {
    let tmp = tempfile::tempdir().unwrap();
    let mut installer = FakeInstaller::new(false, false);
    installer.descriptor.loader_version = None;
    let spec = spec(tmp.path(), &installer);

    let err = ensure_installed(&installer, &spec, Arc::new(MockProgressReporter::default()))
        .await
        .unwrap_err();
    assert!(matches!(
        crate::error::find_anvil_error(&err),
        Some(crate::error::AnvilError::InvalidLoaderDescriptor(_))
    ));
    assert_eq!(installer.installs.load(Ordering::SeqCst), 0);
}

#[test]
fn dispatch_picks_one_installer_per_tag() {
    let ctx = InstallerContext::new().unwrap();
    let cases = [
        (LoaderDescriptor::vanilla("1.20.1"), "1.20.1"),
        (
            LoaderDescriptor::new(ModloaderType::Fabric, "1.20.1", "0.15.11"),
            "fabric-loader-0.15.11-1.20.1",
        ),
        (
            LoaderDescriptor::new(ModloaderType::Quilt, "1.20.1", "0.26.0"),
            "quilt-loader-0.26.0-1.20.1",
        ),
        (
            LoaderDescriptor::new(ModloaderType::Forge, "1.20.1", "47.2.0"),
            "1.20.1-forge-47.2.0",
        ),
        (
            LoaderDescriptor::new(ModloaderType::NeoForge, "1.21.1", "21.1.65"),
            "neoforge-21.1.65",
        ),
    ];
    for (descriptor, id) in cases {
        let installer = get_installer(&descriptor, ctx.clone());
        assert_eq!(installer.descriptor(), &descriptor);
        assert_eq!(installer.version_id(), id);
    }
}
