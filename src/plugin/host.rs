//! Sandboxed WASM plugin host: load, call, and unload guest modules.
//!
//! Each plugin is compiled once at load time and instantiated fresh for
//! every call, so one plugin can never corrupt another's linear memory
//! and a trap in one call never poisons the next. WASI is enabled but
//! no filesystem preopens are configured, so a guest gets no host
//! filesystem access beyond what this host explicitly grants it (none).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use wasmtime::{Engine, ExternType, Instance, Linker, Module, Store};
use wasmtime_wasi::{ResourceTable, WasiCtx, WasiCtxBuilder, WasiView};

use crate::plugin::wire::{PluginEventWire, PluginResponseWire};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' is not loaded")]
    NotFound(String),
    #[error("plugin host is closed")]
    HostClosed,
    #[error("plugin '{0}' failed to load: {1}")]
    LoadFailed(String, String),
    #[error("plugin '{0}' trapped: {1}")]
    Trapped(String, String),
    #[error("plugin '{0}' returned an invalid response: {1}")]
    InvalidResponse(String, String),
    #[error("plugin '{0}' exports neither 'alloc' nor 'handle_event'")]
    MissingAbi(String),
}

struct PluginState {
    wasi: WasiCtx,
    table: ResourceTable,
}

impl WasiView for PluginState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }
}

/// A compiled plugin, ready to be instantiated per call. `call_lock`
/// serializes concurrent calls into the same plugin so two deliveries
/// never race over the same guest's (re-instantiated, but still
/// conceptually single-threaded) execution slot. `has_handler` is the
/// "flag indicating whether the module exports the event-handler entry
/// point" the plugin record carries per spec.md §3, computed once at
/// load time rather than re-probed on every delivery.
struct LoadedPlugin {
    module: Module,
    call_lock: AsyncMutex<()>,
    has_handler: bool,
}

/// Whether `module` exports a `handle_event` function. Missing entirely
/// is the common case (a plugin that only reacts to some events, or
/// none); a present export of the wrong kind is treated the same way —
/// the host does not fail `load` over a shape mismatch, it just never
/// invokes it.
fn exports_handler(module: &Module) -> bool {
    module
        .exports()
        .any(|export| export.name() == "handle_event" && matches!(export.ty(), ExternType::Func(_)))
}

/// Registry state. Once closed, the host never reopens — `load`,
/// `deliver`, and `has` all observe the terminal state from here on.
enum Registry {
    Open(HashMap<String, Arc<LoadedPlugin>>),
    Closed,
}

pub struct PluginHost {
    engine: Engine,
    plugins: RwLock<Registry>,
}

impl PluginHost {
    pub fn new() -> Result<Self, PluginError> {
        let engine = Engine::default();
        Ok(Self {
            engine,
            plugins: RwLock::new(Registry::Open(HashMap::new())),
        })
    }

    /// Compile `wasm_bytes` and register it under `name`, replacing any
    /// existing plugin with the same name. Fails if the host is closed
    /// or the module fails to compile.
    pub fn load(&self, name: &str, wasm_bytes: &[u8]) -> Result<(), PluginError> {
        if self.is_closed() {
            return Err(PluginError::HostClosed);
        }
        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| PluginError::LoadFailed(name.to_string(), e.to_string()))?;
        let has_handler = exports_handler(&module);
        let loaded = Arc::new(LoadedPlugin {
            module,
            call_lock: AsyncMutex::new(()),
            has_handler,
        });
        let mut guard = self.plugins.write();
        match &mut *guard {
            Registry::Open(map) => {
                map.insert(name.to_string(), loaded);
                Ok(())
            }
            Registry::Closed => Err(PluginError::HostClosed),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        match &*self.plugins.read() {
            Registry::Open(map) => map.contains_key(name),
            Registry::Closed => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        match &*self.plugins.read() {
            Registry::Open(map) => map.keys().cloned().collect(),
            Registry::Closed => Vec::new(),
        }
    }

    /// Release every loaded module and transition to the terminal
    /// state. Idempotent: closing an already-closed host is a no-op.
    /// Wasmtime modules need no explicit teardown beyond being dropped,
    /// so there is no per-module close error to collect here — the
    /// "join any per-module close errors" contract in spec.md §4.6 has
    /// nothing to join against in this runtime.
    pub fn close(&self) {
        let mut guard = self.plugins.write();
        *guard = Registry::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(&*self.plugins.read(), Registry::Closed)
    }

    /// Deliver `wire_event` to `name`'s `handle_event` export and parse
    /// its JSON response. Refuses if the host is closed or the plugin
    /// is absent; returns an empty response without invoking the
    /// module if the plugin never exported a handler.
    pub async fn deliver(&self, name: &str, wire_event: &PluginEventWire) -> Result<PluginResponseWire, PluginError> {
        let plugin = {
            let guard = self.plugins.read();
            match &*guard {
                Registry::Open(map) => map.get(name).cloned().ok_or_else(|| PluginError::NotFound(name.to_string()))?,
                Registry::Closed => return Err(PluginError::HostClosed),
            }
        };
        if !plugin.has_handler {
            return Ok(PluginResponseWire::default());
        }
        let _guard = plugin.call_lock.lock().await;

        let engine = self.engine.clone();
        let module = plugin.module.clone();
        let input = serde_json::to_vec(wire_event).map_err(|e| PluginError::InvalidResponse(name.to_string(), e.to_string()))?;
        let name_owned = name.to_string();

        tokio::task::spawn_blocking(move || run_call(&engine, &module, &name_owned, &input))
            .await
            .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?
    }
}

fn run_call(engine: &Engine, module: &Module, name: &str, input: &[u8]) -> Result<PluginResponseWire, PluginError> {
    let wasi = WasiCtxBuilder::new().build();
    let mut store = Store::new(engine, PluginState { wasi, table: ResourceTable::new() });

    let mut linker: Linker<PluginState> = Linker::new(engine);
    wasmtime_wasi::add_to_linker_sync(&mut linker).map_err(|e| PluginError::LoadFailed(name.to_string(), e.to_string()))?;
    let instance: Instance = linker
        .instantiate(&mut store, module)
        .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?;

    let memory = instance.get_memory(&mut store, "memory").ok_or_else(|| PluginError::MissingAbi(name.to_string()))?;
    let alloc = instance
        .get_typed_func::<i32, i32>(&mut store, "alloc")
        .map_err(|_| PluginError::MissingAbi(name.to_string()))?;
    let handle_event = instance
        .get_typed_func::<(i32, i32), i64>(&mut store, "handle_event")
        .map_err(|_| PluginError::MissingAbi(name.to_string()))?;

    let in_ptr = alloc
        .call(&mut store, input.len() as i32)
        .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?;
    memory
        .write(&mut store, in_ptr as usize, input)
        .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?;

    let packed = handle_event
        .call(&mut store, (in_ptr, input.len() as i32))
        .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?;
    let out_ptr = (packed >> 32) as u32 as usize;
    let out_len = packed as u32 as usize;

    if out_len == 0 {
        return Ok(PluginResponseWire::default());
    }

    let mut out = vec![0u8; out_len];
    memory
        .read(&store, out_ptr, &mut out)
        .map_err(|e| PluginError::Trapped(name.to_string(), e.to_string()))?;

    serde_json::from_slice(&out).map_err(|e| PluginError::InvalidResponse(name.to_string(), e.to_string()))
}
