use crate::game::installer::manifest::SyntheticVersionManifest;
use crate::game::installer::types::{InstallSpec, LoaderDescriptor, ProgressReporter};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;

/// One implementation per loader family. The pipeline only talks to this
/// trait; [`crate::game::installer::get_installer`] picks the variant.
pub trait LoaderInstaller: Send + Sync {
    fn descriptor(&self) -> &LoaderDescriptor;

    /// Id of the version directory this installer produces.
    fn version_id(&self) -> String {
        self.descriptor().effective_version_id()
    }

    /// Asks the vendor whether this loader version exists for the requested
    /// Minecraft version. Fails with `IncompatibleVersion` when it does not.
    fn check_compatibility<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<()>>;

    /// Cheap on-disk check that the install is complete and current.
    /// Any problem is reported as `Ok(false)`.
    fn validate_installation<'a>(&'a self, spec: &'a InstallSpec) -> BoxFuture<'a, Result<bool>>;

    fn install<'a>(
        &'a self,
        spec: &'a InstallSpec,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BoxFuture<'a, Result<()>>;

    /// The installed manifest. Fails with `VersionJsonMalformed` if it is
    /// missing required fields.
    fn get_version_json<'a>(
        &'a self,
        spec: &'a InstallSpec,
    ) -> BoxFuture<'a, Result<SyntheticVersionManifest>> {
        Box::pin(async move {
            let path = spec.version_json_path(&self.version_id());
            SyntheticVersionManifest::load(&path).await
        })
    }
}
