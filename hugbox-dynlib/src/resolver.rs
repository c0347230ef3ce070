//! Shared library closure of a set of binaries.
//!
//! Breadth first over files, with one visited set for files and one for
//! library names. A name is resolved once; a file is scanned once.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::elf::ImportExtractor;
use crate::error::{DynlibError, Result};

/// Canonical library path -> names it was imported under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LibraryMap(BTreeMap<PathBuf, BTreeSet<String>>);

impl LibraryMap {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Aliases of a canonical path
    pub fn aliases(&self, path: &Path) -> Option<&BTreeSet<String>> {
        self.0.get(path)
    }

    /// Canonical path an alias is bound to.
    pub fn path_of(&self, alias: &str) -> Option<&Path> {
        self.0
            .iter()
            .find(|(_, aliases)| aliases.contains(alias))
            .map(|(path, _)| path.as_path())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &BTreeSet<String>)> {
        self.0.iter().map(|(path, aliases)| (path.as_path(), aliases))
    }

    pub fn into_inner(self) -> BTreeMap<PathBuf, BTreeSet<String>> {
        self.0
    }
}

/// Split a `:`-separated search path, dropping empty elements.
pub fn split_search_path(path_list: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(path_list)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

/// One resolution session against a loaded cache.
pub struct Resolver<'a, E> {
    cache: &'a Cache,
    extractor: E,
}

impl<'a, E: ImportExtractor> Resolver<'a, E> {
    pub fn new(cache: &'a Cache, extractor: E) -> Self {
        Self { cache, extractor }
    }

    /// Resolve the libraries needed by `binaries`.
    ///
    /// `extra_libs` are resolved as if the first binary imported them.
    /// Libraries found in `search_path` are scanned for their own imports but
    /// left out of the result, since the sandbox reaches them through the
    /// same search path. Any other import missing from the cache is fatal.
    pub fn resolve(
        &self,
        binaries: &[PathBuf],
        extra_libs: &[String],
        search_path: &[PathBuf],
    ) -> Result<LibraryMap> {
        if binaries.is_empty() && !extra_libs.is_empty() {
            warn!("dynlib: no binaries, ignoring extra libs: {:?}", extra_libs);
        }

        let mut libraries: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut checked_file: HashSet<PathBuf> = HashSet::new();
        let mut checked_lib: HashSet<String> = HashSet::new();
        let mut extra_libs = Some(extra_libs).filter(|libs| !libs.is_empty());
        let mut to_check: Vec<PathBuf> = binaries.to_vec();

        while !to_check.is_empty() {
            let mut next: BTreeSet<PathBuf> = BTreeSet::new();

            for file in to_check {
                if !checked_file.insert(file.clone()) {
                    continue;
                }

                let mut imports = self.extractor.imports(&file)?;
                debug!("dynlib: {} imports: {:?}", file.display(), imports);

                if let Some(extra) = extra_libs.take() {
                    info!("dynlib: appending extra libs: {:?}", extra);
                    imports.extend(extra.iter().cloned());
                }

                for lib in imports {
                    if checked_lib.contains(&lib) {
                        continue;
                    }

                    let path = match find_in_search_path(search_path, &lib) {
                        Some(path) => {
                            debug!("dynlib: {} found in search path: {}", lib, path.display());
                            path
                        }
                        None => {
                            let path = self.cache.library_path(&lib).ok_or_else(|| {
                                DynlibError::Unresolved {
                                    library: lib.clone(),
                                }
                            })?;
                            let path = PathBuf::from(path);
                            libraries.insert(lib.clone(), path.clone());
                            path
                        }
                    };

                    if !checked_file.contains(&path) {
                        next.insert(path);
                    }
                    checked_lib.insert(lib);
                }
            }

            to_check = next.into_iter().collect();
        }

        let map = group_by_canonical_path(libraries)?;
        info!(
            "dynlib: resolved {} libraries to bind, {} files scanned",
            map.len(),
            checked_file.len()
        );
        Ok(map)
    }
}

fn find_in_search_path(search_path: &[PathBuf], lib: &str) -> Option<PathBuf> {
    search_path
        .iter()
        .map(|dir| dir.join(lib))
        .find(|candidate| candidate.exists())
}

/// Collapse names that symlink to the same file into one alias set.
fn group_by_canonical_path(libraries: BTreeMap<String, PathBuf>) -> Result<LibraryMap> {
    let mut map: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
    for (lib, path) in libraries {
        let canonical = path
            .canonicalize()
            .map_err(|e| DynlibError::io(&path, e))?;
        map.entry(canonical).or_default().insert(lib);
    }
    Ok(LibraryMap(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fs;

    #[derive(Default)]
    struct MockImports {
        imports: HashMap<PathBuf, Vec<String>>,
        calls: RefCell<HashMap<PathBuf, usize>>,
    }

    impl MockImports {
        fn with(mut self, path: &Path, libs: &[&str]) -> Self {
            self.imports
                .insert(path.to_path_buf(), libs.iter().map(|s| s.to_string()).collect());
            self
        }

        fn calls(&self, path: &Path) -> usize {
            self.calls.borrow().get(path).copied().unwrap_or(0)
        }
    }

    impl ImportExtractor for MockImports {
        fn imports(&self, path: &Path) -> Result<Vec<String>> {
            *self.calls.borrow_mut().entry(path.to_path_buf()).or_default() += 1;
            self.imports.get(path).cloned().ok_or_else(|| DynlibError::Elf {
                path: path.to_path_buf(),
                reason: "not an ELF file".to_string(),
            })
        }
    }

    fn cache(entries: &[(&str, &PathBuf)]) -> Cache {
        entries
            .iter()
            .map(|(name, path)| CacheEntry {
                name: name.to_string(),
                path: path.to_str().unwrap().to_string(),
                flags: 0x0303,
                os_version: 0,
                hwcap: 0,
            })
            .collect()
    }

    fn touch(path: &Path) -> PathBuf {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"\x7fELF").unwrap();
        path.to_path_buf()
    }

    fn canonical(path: &Path) -> PathBuf {
        path.canonicalize().unwrap()
    }

    fn aliases(map: &LibraryMap, path: &Path) -> Vec<String> {
        map.aliases(&canonical(path))
            .unwrap()
            .iter()
            .cloned()
            .collect()
    }

    fn assert_aliases_unique(map: &LibraryMap) {
        let mut seen = HashSet::new();
        for (_, aliases) in map.iter() {
            for alias in aliases {
                assert!(seen.insert(alias.clone()), "{alias} bound twice");
            }
        }
    }

    #[test]
    fn single_cache_hit() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let libx = touch(&root.path().join("usr/lib/libx.so"));

        let cache = cache(&[("libx.so", &libx)]);
        let mock = MockImports::default()
            .with(&bin, &["libx.so"])
            .with(&libx, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[])
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(aliases(&map, &libx), vec!["libx.so"]);
        assert_eq!(map.path_of("libx.so"), Some(canonical(&libx).as_path()));
    }

    #[test]
    fn search_path_hit_is_not_bound() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let bundle = root.path().join("bundle");
        let libx = touch(&bundle.join("libx.so"));

        // libx.so is absent from the cache
        let cache = Cache::default();
        let mock = MockImports::default()
            .with(&bin, &["libx.so"])
            .with(&libx, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[bundle])
            .unwrap();

        assert!(map.is_empty());
        assert_eq!(mock.calls(&libx), 1);
    }

    #[test]
    fn search_path_library_imports_are_resolved() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("firefox");
        let bundle = root.path().join("bundle");
        let xul = touch(&bundle.join("libxul.so"));
        let glib = touch(&root.path().join("usr/lib/libglib-2.0.so.0"));

        let cache = cache(&[("libglib-2.0.so.0", &glib)]);
        let mock = MockImports::default()
            .with(&bin, &["libxul.so"])
            .with(&xul, &["libglib-2.0.so.0"])
            .with(&glib, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[root.path().join("missing"), bundle])
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(aliases(&map, &glib), vec!["libglib-2.0.so.0"]);
        assert!(map.path_of("libxul.so").is_none());
    }

    #[test]
    fn symlinked_aliases_merge() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let lib_dir = root.path().join("usr/lib");
        let real = touch(&lib_dir.join("libfoo.so.1.2.3"));
        let link = lib_dir.join("libfoo.so.1");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let cache = cache(&[("libfoo.so.1", &link), ("libfoo.so.1.2.3", &real)]);
        let mock = MockImports::default()
            .with(&bin, &["libfoo.so.1", "libfoo.so.1.2.3"])
            .with(&link, &[])
            .with(&real, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[])
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(aliases(&map, &real), vec!["libfoo.so.1", "libfoo.so.1.2.3"]);
        assert_aliases_unique(&map);
    }

    #[test]
    fn unresolved_import_names_library() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let mock = MockImports::default().with(&bin, &["libmissing.so"]);

        let err = Resolver::new(&Cache::default(), &mock)
            .resolve(&[bin], &[], &[root.path().to_path_buf()])
            .unwrap_err();

        match err {
            DynlibError::Unresolved { library } => assert_eq!(library, "libmissing.so"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extractor_error_propagates() {
        let root = tempfile::tempdir().unwrap();
        let err = Resolver::new(&Cache::default(), &MockImports::default())
            .resolve(&[root.path().join("not-elf")], &[], &[])
            .unwrap_err();
        assert!(matches!(err, DynlibError::Elf { .. }));
    }

    #[test]
    fn extra_libs_attach_to_first_binary() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("A");
        let b = root.path().join("B");
        let libc = touch(&root.path().join("lib/libc.so.6"));
        let libnss = touch(&root.path().join("lib/libnss_files.so.2"));

        let cache = cache(&[("libc.so.6", &libc), ("libnss_files.so.2", &libnss)]);
        let mock = MockImports::default()
            .with(&a, &["libc.so.6"])
            .with(&b, &["libc.so.6"])
            .with(&libc, &[])
            .with(&libnss, &["libc.so.6"]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[a, b], &["libnss_files.so.2".to_string()], &[])
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(aliases(&map, &libnss), vec!["libnss_files.so.2"]);
        assert_eq!(mock.calls(&libnss), 1);
        assert_eq!(mock.calls(&libc), 1);
    }

    #[test]
    fn cycles_terminate_and_scan_once() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let liba = touch(&root.path().join("lib/liba.so"));
        let libb = touch(&root.path().join("lib/libb.so"));
        let libc = touch(&root.path().join("lib/libc.so.6"));

        let cache = cache(&[("liba.so", &liba), ("libb.so", &libb), ("libc.so.6", &libc)]);
        let mock = MockImports::default()
            .with(&bin, &["liba.so", "libc.so.6"])
            .with(&liba, &["libb.so", "libc.so.6"])
            .with(&libb, &["liba.so", "libc.so.6"])
            .with(&libc, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin.clone(), bin.clone()], &[], &[])
            .unwrap();

        assert_eq!(map.len(), 3);
        for path in [&bin, &liba, &libb, &libc] {
            assert_eq!(mock.calls(path), 1, "{}", path.display());
        }
        assert_aliases_unique(&map);
    }

    #[test]
    fn missing_cache_target_is_io_error() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let gone = root.path().join("lib/libgone.so");

        let cache = cache(&[("libgone.so", &gone)]);
        let mock = MockImports::default()
            .with(&bin, &["libgone.so"])
            .with(&gone, &[]);

        let err = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[])
            .unwrap_err();
        assert!(matches!(err, DynlibError::Io { .. }));
    }

    #[test]
    fn serializes_as_plain_map() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("A");
        let libx = touch(&root.path().join("libx.so"));
        let cache = cache(&[("libx.so", &libx)]);
        let mock = MockImports::default()
            .with(&bin, &["libx.so"])
            .with(&libx, &[]);

        let map = Resolver::new(&cache, &mock)
            .resolve(&[bin], &[], &[])
            .unwrap();
        let json = serde_json::to_value(&map).unwrap();
        let key = canonical(&libx).to_str().unwrap().to_string();
        assert_eq!(json[key.as_str()], serde_json::json!(["libx.so"]));
    }

    #[test]
    fn splits_search_path() {
        assert_eq!(
            split_search_path(OsStr::new("/opt/bundle::/opt/bundle/lib:")),
            vec![PathBuf::from("/opt/bundle"), PathBuf::from("/opt/bundle/lib")]
        );
        assert!(split_search_path(OsStr::new("")).is_empty());
    }
}
