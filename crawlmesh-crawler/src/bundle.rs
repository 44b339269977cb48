//! Bundle staging
//!
//! Assembles a client's bundle: copies data files and task scripts into the
//! staging directory, reads each script's task names and concurrency limits,
//! writes the manifest and packs the directory into an archive.

use anyhow::{Context, Result, bail};
use crawlmesh_core::{BundleManifest, MANIFEST_FILE, TaskSpec, pack_dir};
use crawlmesh_lua::parse_task_metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// What goes into a bundle, as declared by the crawler author
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleSpec {
    /// Host modules the tasks need on the worker
    #[serde(default, alias = "pip")]
    pub dependencies: Vec<String>,

    /// Data files, local source path to destination inside the bundle
    #[serde(default)]
    pub files: BTreeMap<PathBuf, String>,

    /// Task scripts; each defines one or more tasks
    pub tasks: Vec<PathBuf>,
}

impl BundleSpec {
    pub fn new(tasks: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            tasks: tasks.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_dependency(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    pub fn with_file(mut self, source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        self.files.insert(source.into(), destination.into());
        self
    }
}

/// A bundle assembled on disk
#[derive(Debug, Clone)]
pub struct StagedBundle {
    pub dir: PathBuf,
    pub manifest: BundleManifest,
}

impl StagedBundle {
    /// Pack the staging directory next to itself as `<dir>.zip`
    pub fn pack(&self) -> Result<PathBuf> {
        let name = self
            .dir
            .file_name()
            .with_context(|| format!("Invalid staging directory {}", self.dir.display()))?;
        let mut archive_name = name.to_os_string();
        archive_name.push(".zip");
        let archive = self.dir.with_file_name(archive_name);
        let count = pack_dir(&self.dir, &archive)
            .with_context(|| format!("Failed to pack {}", self.dir.display()))?;
        info!("Packed {} file(s) into {}", count, archive.display());
        Ok(archive)
    }

    pub fn has_task(&self, task_name: &str) -> bool {
        self.manifest.tasks.contains_key(task_name)
    }
}

/// Stage `spec` for `client_id` into `staging_dir`
///
/// Any previous content of `staging_dir` is removed.
pub fn stage(spec: &BundleSpec, client_id: &str, staging_dir: &Path) -> Result<StagedBundle> {
    if spec.tasks.is_empty() {
        bail!("Bundle must declare at least one task script");
    }
    let modules = module_names(&spec.tasks)?;
    check_destinations(&spec.files, &modules)?;

    if staging_dir.exists() {
        std::fs::remove_dir_all(staging_dir)
            .with_context(|| format!("Failed to clear {}", staging_dir.display()))?;
    }
    std::fs::create_dir_all(staging_dir)
        .with_context(|| format!("Failed to create {}", staging_dir.display()))?;

    for (source, destination) in &spec.files {
        let target = staging_dir.join(destination);
        copy_into(source, &target)?;
        info!("Copied {} => {}", source.display(), target.display());
    }

    let mut tasks = BTreeMap::new();
    for (script, module) in spec.tasks.iter().zip(modules) {
        let source = std::fs::read_to_string(script)
            .with_context(|| format!("Task script {} does not exist", script.display()))?;
        let definitions = parse_task_metadata(&source)
            .with_context(|| format!("Invalid task script {}", script.display()))?;

        for definition in definitions {
            info!("Found task '{}' in {}", definition.name, module);
            let previous = tasks.insert(
                definition.name.clone(),
                TaskSpec {
                    max_threads: definition.max_threads,
                    module: module.clone(),
                },
            );
            if let Some(previous) = previous {
                bail!(
                    "Task '{}' is defined in both {} and {}",
                    definition.name,
                    previous.module,
                    module
                );
            }
        }

        std::fs::write(staging_dir.join(&module), source)
            .with_context(|| format!("Failed to stage {}", module))?;
    }

    let manifest = BundleManifest {
        client_id: client_id.to_string(),
        dependencies: spec.dependencies.clone(),
        files: spec
            .files
            .iter()
            .map(|(source, destination)| (source.display().to_string(), destination.clone()))
            .collect(),
        tasks,
    };
    manifest.validate()?;
    manifest.write(staging_dir)?;

    Ok(StagedBundle {
        dir: staging_dir.to_path_buf(),
        manifest,
    })
}

/// Scripts land at the bundle root under their file name, so names must be unique
fn module_names(scripts: &[PathBuf]) -> Result<Vec<String>> {
    let mut owners: BTreeMap<&str, &Path> = BTreeMap::new();
    let mut modules = Vec::with_capacity(scripts.len());
    for script in scripts {
        let module = script
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("Invalid task script path {}", script.display()))?;
        if let Some(other) = owners.insert(module, script) {
            bail!(
                "Task scripts {} and {} share the name {}",
                other.display(),
                script.display(),
                module
            );
        }
        modules.push(module.to_string());
    }
    Ok(modules)
}

/// Reject data file destinations that leave the bundle or overlap the
/// manifest, a task script or each other
fn check_destinations(files: &BTreeMap<PathBuf, String>, modules: &[String]) -> Result<()> {
    let mut taken: BTreeSet<PathBuf> = modules.iter().map(PathBuf::from).collect();
    taken.insert(PathBuf::from(MANIFEST_FILE));

    for destination in files.values() {
        let mut normalized = PathBuf::new();
        for component in Path::new(destination).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                _ => bail!("File destination '{}' must stay inside the bundle", destination),
            }
        }
        if normalized.as_os_str().is_empty() {
            bail!("File destination '{}' names no file", destination);
        }
        if let Some(other) = taken
            .iter()
            .find(|t| t.starts_with(&normalized) || normalized.starts_with(t))
        {
            bail!(
                "File destination '{}' collides with {} in the bundle",
                destination,
                other.display()
            );
        }
        taken.insert(normalized);
    }
    Ok(())
}

fn copy_into(source: &Path, target: &Path) -> Result<()> {
    if !source.is_file() {
        bail!("File {} does not exist", source.display());
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, target)
        .with_context(|| format!("Failed to copy {}", source.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crawlmesh_core::{MANIFEST_FILE, unpack_archive};

    const SITE: &str = r#"
        local function fetch(meta) return meta.url end
        return {
            task.define { name = "list", max_threads = 2, request = fetch },
            task.define { name = "detail", max_threads = 5, request = fetch },
        }
    "#;

    #[test]
    fn test_stage_builds_manifest() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("site.lua");
        std::fs::write(&script, SITE).unwrap();
        let data = src.path().join("words.txt");
        std::fs::write(&data, "a\nb\n").unwrap();

        let staging = src.path().join("out").join("t1");
        let spec = BundleSpec::new([&script])
            .with_dependency("json")
            .with_file(&data, "data/words.txt");
        let bundle = stage(&spec, "t1", &staging).unwrap();

        assert_eq!(bundle.manifest.client_id, "t1");
        assert_eq!(bundle.manifest.tasks["list"].max_threads, 2);
        assert_eq!(bundle.manifest.tasks["detail"].module, "site.lua");
        assert!(bundle.has_task("detail"));
        assert!(staging.join("site.lua").exists());
        assert!(staging.join("data/words.txt").exists());

        let loaded = BundleManifest::load(&staging).unwrap();
        assert_eq!(loaded, bundle.manifest);
    }

    #[test]
    fn test_pack_round_trips_through_archive() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("site.lua");
        std::fs::write(&script, SITE).unwrap();

        let bundle = stage(&BundleSpec::new([&script]), "t1", &src.path().join("t1")).unwrap();
        let archive = bundle.pack().unwrap();
        assert_eq!(archive, src.path().join("t1.zip"));

        let unpacked = src.path().join("unpacked");
        unpack_archive(&archive, &unpacked).unwrap();
        assert!(unpacked.join(MANIFEST_FILE).exists());
        assert!(unpacked.join("site.lua").exists());
    }

    #[test]
    fn test_missing_inputs_fail() {
        let src = tempfile::tempdir().unwrap();
        let staging = src.path().join("t1");

        assert!(stage(&BundleSpec::default(), "t1", &staging).is_err());
        assert!(stage(&BundleSpec::new(["nope.lua"]), "t1", &staging).is_err());

        let script = src.path().join("site.lua");
        std::fs::write(&script, SITE).unwrap();
        let spec = BundleSpec::new([&script]).with_file(src.path().join("absent.txt"), "a.txt");
        assert!(stage(&spec, "t1", &staging).is_err());

        let data = src.path().join("words.txt");
        std::fs::write(&data, "a").unwrap();
        let spec = BundleSpec::new([&script]).with_file(&data, "../escape.txt");
        assert!(stage(&spec, "t1", &staging).is_err());
        assert!(!src.path().join("escape.txt").exists());
    }

    #[test]
    fn test_archive_name_keeps_dotted_client_id() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("site.lua");
        std::fs::write(&script, SITE).unwrap();

        let bundle = stage(&BundleSpec::new([&script]), "crawler.v2", &src.path().join("crawler.v2"))
            .unwrap();
        assert_eq!(bundle.pack().unwrap(), src.path().join("crawler.v2.zip"));
    }

    #[test]
    fn test_invalid_max_threads_fail() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("bad.lua");
        std::fs::write(
            &script,
            r#"return task.define { name = "x", max_threads = 0, request = function() end }"#,
        )
        .unwrap();

        assert!(stage(&BundleSpec::new([&script]), "t1", &src.path().join("t1")).is_err());
    }

    #[test]
    fn test_duplicate_task_across_scripts_fails() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a.lua");
        let b = src.path().join("b.lua");
        std::fs::write(&a, SITE).unwrap();
        std::fs::write(&b, SITE).unwrap();

        let err = stage(&BundleSpec::new([&a, &b]), "t1", &src.path().join("t1")).unwrap_err();
        assert!(err.to_string().contains("defined in both"));
    }

    #[test]
    fn test_scripts_sharing_a_file_name_fail() {
        let src = tempfile::tempdir().unwrap();
        let a = src.path().join("a").join("site.lua");
        let b = src.path().join("b").join("site.lua");
        for script in [&a, &b] {
            std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        }
        std::fs::write(&a, SITE).unwrap();
        std::fs::write(&b, r#"return task.define { name = "other", request = function() end }"#)
            .unwrap();

        let staging = src.path().join("t1");
        let err = stage(&BundleSpec::new([&a, &b]), "t1", &staging).unwrap_err();
        assert!(err.to_string().contains("share the name site.lua"));
        assert!(!staging.exists());
    }

    #[test]
    fn test_destination_over_reserved_entry_fails() {
        let src = tempfile::tempdir().unwrap();
        let script = src.path().join("site.lua");
        std::fs::write(&script, SITE).unwrap();
        let data = src.path().join("words.txt");
        std::fs::write(&data, "a").unwrap();
        let other = src.path().join("more.txt");
        std::fs::write(&other, "b").unwrap();
        let staging = src.path().join("t1");

        for destination in [MANIFEST_FILE, "./site.lua", "site.lua/words.txt"] {
            let spec = BundleSpec::new([&script]).with_file(&data, destination);
            let err = stage(&spec, "t1", &staging).unwrap_err();
            assert!(err.to_string().contains("collides with"), "{}", destination);
        }

        let spec = BundleSpec::new([&script])
            .with_file(&data, "data/words.txt")
            .with_file(&other, "data/./words.txt");
        assert!(stage(&spec, "t1", &staging).is_err());

        let spec = BundleSpec::new([&script]).with_file(&data, ".");
        assert!(stage(&spec, "t1", &staging).is_err());
        assert!(!staging.exists());
    }

    #[test]
    fn test_spec_accepts_pip_alias() {
        let spec: BundleSpec =
            serde_json::from_str(r#"{"pip": ["json"], "tasks": ["site.lua"]}"#).unwrap();
        assert_eq!(spec.dependencies, vec!["json"]);
        assert_eq!(spec.tasks, vec![PathBuf::from("site.lua")]);
    }
}
