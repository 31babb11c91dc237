use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ast::Program;

/// Errors from import-path resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot find module `{specifier}`")]
    NotFound { specifier: String },
    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Lifecycle of a module inside the resolver's cache.
///
/// The `Loading` marker is installed before a module's declarations are
/// available; a second load attempt that observes the marker is a circular
/// import.
#[derive(Debug, Clone)]
pub enum ModuleState {
    Loading,
    Loaded(Program),
}

/// Maps import strings to canonical file paths and caches parsed modules.
///
/// Import paths come in three flavors: absolute (used directly), relative
/// (resolved against the importing file's directory), and library (tried
/// against the configured search paths in order). The cache key is always
/// the canonical path — symlinks resolved, `.`/`..` removed.
#[derive(Debug, Default, Clone)]
pub struct ModuleResolver {
    search_paths: Vec<PathBuf>,
    modules: FxHashMap<PathBuf, ModuleState>,
}

impl ModuleResolver {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            modules: FxHashMap::default(),
        }
    }

    /// Build the search-path list from the environment: every entry of the
    /// colon-separated `FLOW_PATH`, then `$HOME/.flow/packages`.
    pub fn from_env() -> Self {
        let mut search_paths = Vec::new();
        if let Ok(flow_path) = std::env::var("FLOW_PATH") {
            for entry in flow_path.split(':').filter(|e| !e.is_empty()) {
                search_paths.push(PathBuf::from(entry));
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            search_paths.push(Path::new(&home).join(".flow").join("packages"));
        }
        Self::new(search_paths)
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Resolve an import specifier to a canonical path.
    ///
    /// `importing_dir` is the directory of the file containing the import.
    pub fn resolve(&self, specifier: &str, importing_dir: &Path) -> Result<PathBuf, ResolveError> {
        let spec_path = Path::new(specifier);

        if spec_path.is_absolute() {
            return std::fs::canonicalize(spec_path).map_err(|_| ResolveError::NotFound {
                specifier: specifier.to_string(),
            });
        }

        if let Ok(canonical) = std::fs::canonicalize(importing_dir.join(spec_path)) {
            return Ok(canonical);
        }

        for base in &self.search_paths {
            if let Ok(canonical) = std::fs::canonicalize(base.join(spec_path)) {
                return Ok(canonical);
            }
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
        })
    }

    /// Convenience: resolve relative to the file containing the import.
    pub fn resolve_from_file(
        &self,
        importing_file: &Path,
        specifier: &str,
    ) -> Result<PathBuf, ResolveError> {
        let dir = importing_file.parent().unwrap_or(Path::new("."));
        self.resolve(specifier, dir)
    }

    /// Install the loading marker for a module about to be parsed/analyzed.
    pub fn begin_loading(&mut self, canonical: &Path) {
        self.modules
            .insert(canonical.to_path_buf(), ModuleState::Loading);
    }

    /// Replace the loading marker with the parsed program.
    pub fn finish_loading(&mut self, canonical: &Path, program: Program) {
        self.modules
            .insert(canonical.to_path_buf(), ModuleState::Loaded(program));
    }

    /// True when the module is mid-load — i.e. importing it now would close
    /// a cycle.
    pub fn is_loading(&self, canonical: &Path) -> bool {
        matches!(self.modules.get(canonical), Some(ModuleState::Loading))
    }

    pub fn get(&self, canonical: &Path) -> Option<&Program> {
        match self.modules.get(canonical) {
            Some(ModuleState::Loaded(program)) => Some(program),
            _ => None,
        }
    }

    /// All fully loaded modules, for the orchestrator's external-declaration
    /// pass. Read-only after discovery.
    pub fn loaded(&self) -> impl Iterator<Item = (&PathBuf, &Program)> {
        self.modules.iter().filter_map(|(path, state)| match state {
            ModuleState::Loaded(program) => Some((path, program)),
            ModuleState::Loading => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::source::FileId;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn relative_resolution_against_importing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let b = write(tmp.path(), "b.flow", "func answer() -> int { return 42; }");
        let resolver = ModuleResolver::new(Vec::new());

        let resolved = resolver.resolve("b.flow", tmp.path()).unwrap();
        assert_eq!(resolved, fs::canonicalize(&b).unwrap());
    }

    #[test]
    fn library_paths_are_tried_in_order() {
        let lib1 = tempfile::tempdir().unwrap();
        let lib2 = tempfile::tempdir().unwrap();
        write(lib2.path(), "util.flow", "");
        let elsewhere = tempfile::tempdir().unwrap();

        let resolver =
            ModuleResolver::new(vec![lib1.path().to_path_buf(), lib2.path().to_path_buf()]);
        let resolved = resolver.resolve("util.flow", elsewhere.path()).unwrap();
        assert!(resolved.ends_with("util.flow"));
        assert!(resolved.starts_with(fs::canonicalize(lib2.path()).unwrap()));
    }

    #[test]
    fn missing_module_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = ModuleResolver::new(Vec::new());
        let err = resolver.resolve("nope.flow", tmp.path()).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn canonical_paths_collapse_dot_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("sub");
        fs::create_dir(&sub).unwrap();
        write(tmp.path(), "a.flow", "");

        let resolver = ModuleResolver::new(Vec::new());
        let resolved = resolver.resolve("../a.flow", &sub).unwrap();
        assert_eq!(resolved, fs::canonicalize(tmp.path().join("a.flow")).unwrap());
    }

    #[test]
    fn loading_marker_flags_cycles() {
        let mut resolver = ModuleResolver::new(Vec::new());
        let path = Path::new("/tmp/cyclic.flow");
        assert!(!resolver.is_loading(path));

        resolver.begin_loading(path);
        assert!(resolver.is_loading(path));
        assert!(resolver.get(path).is_none());

        resolver.finish_loading(
            path,
            Program {
                file: FileId(0),
                decls: Vec::new(),
            },
        );
        assert!(!resolver.is_loading(path));
        assert!(resolver.get(path).is_some());
        assert_eq!(resolver.loaded().count(), 1);
    }
}
