//! Plugin Host (§4.2): discovers and loads shared libraries exporting
//! capability factories, hands out typed collections.
//!
//! Library retention grounded on the Auralyn example's `PluginManager`
//! (`burned_libraries: Vec<Arc<libloading::Library>>`) — every successfully
//! opened library is kept alive for the process lifetime and never
//! unloaded, since a `dlclose`/`FreeLibrary` while any trait-object vtable
//! from it is still reachable is unsound. "Burned" is the Auralyn example's
//! own term for this; the host never calls `Library::close`.

pub mod builtin;
pub mod capability;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::error::{Error, Result};
use capability::{PluginCapabilities, PLUGIN_ENTRY_SYMBOL};

pub struct LoadedPlugin {
    pub path: PathBuf,
    pub capabilities: PluginCapabilities,
}

pub struct PluginHost {
    plugins: parking_lot::RwLock<Vec<LoadedPlugin>>,
    /// Libraries are retained here for the process lifetime; see module
    /// docs. Never popped, never closed.
    burned_libraries: Vec<Arc<Library>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self {
            plugins: parking_lot::RwLock::new(Vec::new()),
            burned_libraries: Vec::new(),
        }
    }

    /// Enumerate `dir` for shared libraries, load each, and resolve its
    /// entry point. A plugin that fails to load is logged and skipped; it
    /// does not abort the rest of the scan (§4.2 "Failure semantics").
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "plugin directory does not exist, skipping");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !is_shared_library(&path) {
                continue;
            }
            match self.load_one(&path) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load plugin, skipping");
                }
            }
        }
        Ok(loaded)
    }

    fn load_one(&mut self, path: &Path) -> Result<()> {
        // SAFETY: plugin libraries are trusted, operator-supplied code; the
        // host cannot verify their internal safety beyond confining any
        // panic that unwinds back across the call to `catch_unwind`.
        let library = unsafe { Library::new(path) }.map_err(Error::PluginLoad)?;

        let entry: Symbol<capability::PluginEntryFn> = unsafe {
            library
                .get(PLUGIN_ENTRY_SYMBOL)
                .map_err(Error::PluginLoad)?
        };

        let capabilities = std::panic::catch_unwind(|| {
            // SAFETY: the entry point contract requires returning a valid,
            // heap-allocated `PluginCapabilities` the host now owns.
            unsafe {
                let raw = entry();
                if raw.is_null() {
                    None
                } else {
                    Some(*Box::from_raw(raw))
                }
            }
        })
        .map_err(|_| Error::PluginMisbehaving(format!("{} panicked during load", path.display())))?;

        let Some(capabilities) = capabilities else {
            return Err(Error::PluginMisbehaving(format!(
                "{} returned a null capability record",
                path.display()
            )));
        };

        self.burned_libraries.push(Arc::new(library));
        self.plugins.get_mut().push(LoadedPlugin {
            path: path.to_path_buf(),
            capabilities,
        });
        tracing::info!(path = %path.display(), "plugin loaded");
        Ok(())
    }

    /// Register a statically-linked built-in plugin (the bundled lofty
    /// reader, the cpal output) without going through `libloading` at all.
    pub fn register_builtin(&mut self, name: &str, capabilities: PluginCapabilities) {
        self.plugins.get_mut().push(LoadedPlugin {
            path: PathBuf::from(format!("<builtin:{name}>")),
            capabilities,
        });
    }

    pub fn metadata_readers(&self) -> Vec<Arc<dyn capability::MetadataReader>> {
        self.plugins
            .read()
            .iter()
            .filter_map(|p| p.capabilities.metadata_reader.clone())
            .collect()
    }

    /// The path-tagged `DataStreamFactory` for every plugin that can open
    /// `uri`, so a decode-time failure can be traced back to the plugin
    /// that owns it and evicted (§4.2, §7 `PluginMisbehaving`).
    pub fn find_data_stream_factory(&self, uri: &str) -> Option<(PathBuf, Arc<dyn capability::DataStreamFactory>)> {
        self.plugins.read().iter().find_map(|p| {
            let factory = p.capabilities.data_stream_factory.as_ref()?;
            factory.can_open(uri).then(|| (p.path.clone(), Arc::clone(factory)))
        })
    }

    /// The path-tagged `DecoderFactory` for the first plugin that can
    /// handle `extension`; see `find_data_stream_factory`.
    pub fn find_decoder_factory(&self, extension: &str) -> Option<(PathBuf, Arc<dyn capability::DecoderFactory>)> {
        self.plugins.read().iter().find_map(|p| {
            let factory = p.capabilities.decoder_factory.as_ref()?;
            factory.can_handle(extension).then(|| (p.path.clone(), Arc::clone(factory)))
        })
    }

    pub fn playback_remotes(&self) -> Vec<Arc<dyn capability::PlaybackRemote>> {
        self.plugins
            .read()
            .iter()
            .filter_map(|p| p.capabilities.playback_remote.clone())
            .collect()
    }

    pub fn indexer_sources(&self) -> Vec<Arc<dyn capability::IndexerSource>> {
        self.plugins
            .read()
            .iter()
            .filter_map(|p| p.capabilities.indexer_source.clone())
            .collect()
    }

    /// Every loaded `IAnalyzer`, tagged with the path of the plugin it came
    /// from so a misbehaving one can be evicted.
    pub fn analyzers(&self) -> Vec<(PathBuf, Arc<parking_lot::Mutex<dyn capability::Analyzer>>)> {
        self.plugins
            .read()
            .iter()
            .flat_map(|p| p.capabilities.analyzers.iter().cloned().map(|a| (p.path.clone(), a)))
            .collect()
    }

    /// The first loaded output plugin, if any (§4.6: Transport picks one
    /// active output; selecting among several is a configuration concern
    /// outside this crate's scope).
    pub fn audio_output(&self) -> Option<Arc<parking_lot::Mutex<dyn capability::AudioOutputPlugin>>> {
        self.plugins.read().iter().find_map(|p| p.capabilities.audio_output.clone())
    }

    /// Every loaded `IDSP`, in load order, that decoded buffers are routed
    /// through before reaching the active output (§4.6).
    pub fn dsp_chain(&self) -> Vec<Arc<parking_lot::Mutex<dyn capability::Dsp>>> {
        self.plugins.read().iter().filter_map(|p| p.capabilities.dsp.clone()).collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Evict a plugin that misbehaved at call time (§4.2, §7
    /// `PluginMisbehaving`). The library stays burned-in; only its
    /// capability record is dropped from the active list. Takes `&self`
    /// (backed by an internal `RwLock`) since the host is shared via `Arc`
    /// across the Transport's decode threads and the Indexer's analysis
    /// pass, neither of which holds a `&mut PluginHost`.
    pub fn evict(&self, path: &Path) {
        self.plugins.write().retain(|p| p.path != path);
        tracing::warn!(path = %path.display(), "plugin evicted after misbehaving");
    }
}

impl Default for PluginHost {
    fn default() -> Self {
        Self::new()
    }
}

fn is_shared_library(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("so") | Some("dll") | Some("dylib")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_directory_on_missing_dir_returns_zero() {
        let mut host = PluginHost::new();
        let loaded = host.load_directory(Path::new("/nonexistent/plugin/dir")).unwrap();
        assert_eq!(loaded, 0);
        assert_eq!(host.loaded_count(), 0);
    }

    #[test]
    fn is_shared_library_matches_platform_extensions() {
        assert!(is_shared_library(Path::new("foo.so")));
        assert!(is_shared_library(Path::new("foo.dll")));
        assert!(is_shared_library(Path::new("foo.dylib")));
        assert!(!is_shared_library(Path::new("foo.txt")));
    }

    #[test]
    fn register_builtin_is_visible_without_loading_a_library() {
        let mut host = PluginHost::new();
        host.register_builtin("test", PluginCapabilities::default());
        assert_eq!(host.loaded_count(), 1);
    }

    #[test]
    fn evict_removes_only_the_named_plugin() {
        let mut host = PluginHost::new();
        host.register_builtin("a", PluginCapabilities::default());
        host.register_builtin("b", PluginCapabilities::default());
        assert_eq!(host.loaded_count(), 2);

        host.evict(Path::new("<builtin:a>"));
        assert_eq!(host.loaded_count(), 1);
    }
}
