//! Game launcher: from an installed version to a running JVM
pub mod arguments;
pub mod builder;
pub mod classpath;
pub mod jpms;
pub mod modlist;
pub mod natives;
pub mod process;
pub mod rules;
pub mod types;
pub mod version_parser;

pub use crate::game::installer::types::OsType;
pub use builder::{build_launch_plan, LaunchArgumentBuilder};
pub use classpath::{ClasspathBuilder, ValidationError};
pub use jpms::{HiddenJars, JarHider};
pub use process::{ChildHandle, ExitCleanup, ExitInfo, LogCallback, LogStream, ProcessSupervisor};
pub use rules::RuleContext;
pub use types::{LaunchContext, LaunchPlan};
pub use version_parser::{
    parse_version_json, resolve_version_chain, Argument, Arguments, Library, VersionManifest,
};

use crate::game::config_store::ConfigStore;
use crate::game::catalog::ServerDescriptor;
use crate::game::java::JavaResolver;
use anyhow::Result;

/// Resolves Java, builds the plan and spawns the game for `server`.
pub async fn launch(
    store: &dyn ConfigStore,
    java: &dyn JavaResolver,
    server: ServerDescriptor,
    callback: Option<LogCallback>,
) -> Result<ChildHandle> {
    let vanilla = resolve_version_chain(server.minecraft_version(), &store.common_directory()).await?;
    let required = vanilla.java_version.as_ref().map(|j| j.major_version);
    let configured = store.java_executable(&server.id);
    let runtime = java
        .resolve(server.minecraft_version(), required, configured.as_deref())
        .await?;

    let ctx = LaunchContext::from_config(store, server, runtime.path)?;
    let detached = ctx.game.launch_detached;
    let plan = build_launch_plan(&ctx).await?;

    let mut supervisor = ProcessSupervisor::new(ctx.server.id.clone(), ctx.log_file());
    if let Some(cb) = callback {
        supervisor = supervisor.with_callback(cb);
    }
    supervisor.launch_plan(plan, detached).await
}
