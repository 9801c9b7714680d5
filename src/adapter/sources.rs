//! Mapping between the host's `Package.Class` names and `.uc` files on disk.
//!
//! UnrealScript source trees look like `<root>/<Package>/Classes/<Class>.uc`.
//! The editor sends file paths, the host speaks qualified class names; this
//! module converts both ways using the source roots the launch request
//! configured. Resolution results are cached and canonicalised so the editor
//! and the debugger agree about path case.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, anyhow, bail};
use log::debug;

pub struct SourceRoots {
    roots: Vec<PathBuf>,
    /// Upper-cased qualified class name -> resolved source file.
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl SourceRoots {
    /// Build from the `sourceRoots` launch argument. A configured root that
    /// does not exist is a configuration error, reported in the launch
    /// response rather than discovered frame by frame later.
    pub fn new(roots: Vec<String>) -> anyhow::Result<SourceRoots> {
        let mut checked = Vec::with_capacity(roots.len());
        for root in roots {
            let path = PathBuf::from(&root);
            if !path.is_dir() {
                bail!("source root '{root}' does not exist or is not a directory");
            }
            checked.push(path);
        }
        Ok(SourceRoots {
            roots: checked,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn empty() -> SourceRoots {
        SourceRoots {
            roots: Vec::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `"Package.Class"` -> path of `Package/Classes/Class.uc` under the
    /// first root that has it, canonicalised to the OS-true spelling.
    pub fn class_to_source(&self, qualified: &str) -> Option<PathBuf> {
        let key = qualified.to_uppercase();
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            return Some(hit.clone());
        }

        let (package, class) = qualified.split_once('.')?;
        for root in &self.roots {
            let candidate = root.join(package).join("Classes").join(format!("{class}.uc"));
            if candidate.is_file() {
                // Canonicalise so case-insensitive filesystems hand the
                // editor the same spelling the OS uses.
                let resolved = candidate.canonicalize().unwrap_or(candidate);
                debug!(target: "adapter", "resolved {qualified} -> {}", resolved.display());
                self.cache.lock().unwrap().insert(key, resolved.clone());
                return Some(resolved);
            }
        }
        None
    }

    /// Reverse direction: a `.uc` path from the editor back to the
    /// `Package.Class` name the host understands. The class is the file stem
    /// and the package is the directory above `Classes`.
    pub fn source_to_class(path: &str) -> anyhow::Result<String> {
        let path = Path::new(path);
        let class = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("source path has no file name: {}", path.display()))?;

        let package = path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .with_context(|| format!("unexpected source path format: {}", path.display()))?;

        Ok(format!("{package}.{class}"))
    }
}
