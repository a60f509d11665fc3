use otapack_edify::{register_builtins, FunctionRegistry};
use tracing::debug;

use crate::blockimg::register_blockimg_functions;
use crate::config::UpdaterConfig;
use crate::fs_ops::register_fs_functions;
use crate::install::register_install_functions;

/// Device-specific primitives registered after the stock namespaces, so
/// they can replace any of them.
pub trait DeviceExtensions {
    fn namespace(&self) -> &str;

    fn register<'p>(&self, registry: &mut FunctionRegistry<UpdaterConfig<'p>>);
}

/// Stock builds ship no device primitives.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceExtensions;

impl DeviceExtensions for NoDeviceExtensions {
    fn namespace(&self) -> &str {
        "device"
    }

    fn register<'p>(&self, _registry: &mut FunctionRegistry<UpdaterConfig<'p>>) {}
}

/// Registry with every primitive namespace, in shadowing order: builtins,
/// filesystem, install, block image, device extensions.
pub fn build_registry<'p>(extensions: &dyn DeviceExtensions) -> FunctionRegistry<UpdaterConfig<'p>> {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry);
    register_fs_functions(&mut registry);
    register_install_functions(&mut registry);
    register_blockimg_functions(&mut registry);
    extensions.register(&mut registry);
    debug!(
        "registered {} functions ({} extensions)",
        registry.len(),
        extensions.namespace()
    );
    registry
}
