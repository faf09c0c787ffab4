//! Default runtime factory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{SandboxError, SandboxResult};
use crate::sandbox::inprocess::{InProcessRuntime, PluginHooks};
use crate::sandbox::runtime::{PluginRuntime, RuntimeContext, RuntimeFactory};
use crate::sandbox::wasm::WasmRuntime;

/// Entry prefix selecting a registered built-in plugin.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Chooses a runtime from the manifest entry: `builtin:<name>` runs a
/// registered [`PluginHooks`] in process, anything ending in `.wasm` is
/// loaded with Extism.
#[derive(Default)]
pub struct StandardRuntimes {
    builtins: DashMap<String, Arc<dyn PluginHooks>>,
}

impl StandardRuntimes {
    /// A factory with no built-ins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in plugin under `name`, replacing any previous one.
    pub fn register_builtin(&self, name: impl Into<String>, hooks: Arc<dyn PluginHooks>) {
        self.builtins.insert(name.into(), hooks);
    }

    /// Builder form of [`register_builtin`](Self::register_builtin).
    #[must_use]
    pub fn with_builtin(self, name: impl Into<String>, hooks: Arc<dyn PluginHooks>) -> Self {
        self.register_builtin(name, hooks);
        self
    }
}

impl fmt::Debug for StandardRuntimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.builtins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("StandardRuntimes")
            .field("builtins", &names)
            .finish()
    }
}

#[async_trait]
impl RuntimeFactory for StandardRuntimes {
    async fn create(&self, ctx: &RuntimeContext) -> SandboxResult<Box<dyn PluginRuntime>> {
        let entry = ctx.manifest.entry.as_str();
        if let Some(name) = entry.strip_prefix(BUILTIN_PREFIX) {
            let hooks = self
                .builtins
                .get(name)
                .map(|h| Arc::clone(h.value()))
                .ok_or_else(|| SandboxError::Load(format!("no built-in plugin named '{name}'")))?;
            return Ok(Box::new(InProcessRuntime::new(hooks, ctx)));
        }
        if entry.ends_with(".wasm") {
            return Ok(Box::new(WasmRuntime::load(ctx).await?));
        }
        Err(SandboxError::Load(format!(
            "unsupported entry '{entry}': expected a .wasm module or {BUILTIN_PREFIX}<name>"
        )))
    }
}
