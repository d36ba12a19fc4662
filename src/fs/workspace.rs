//! Per-device workspace staging
//!
//! Every device runs from its own copy of the repository's scripts and
//! asset trees, so workers never write into shared directories.

use crate::config::AssetSpec;
use crate::error::{IoResultExt, LaunchError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Trainer output file inside a workspace
pub const LOG_FILE: &str = "log.txt";

/// Environment snapshot inside a workspace
pub const ENV_LOG_FILE: &str = "env.log";

/// Staging statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Files copied
    pub files: u64,
    /// Directories created
    pub dirs: u64,
    /// Symlinks recreated
    pub symlinks: u64,
    /// Bytes copied
    pub bytes: u64,
}

impl StageStats {
    /// Accumulate another set of statistics
    pub fn merge(&mut self, other: &StageStats) {
        self.files += other.files;
        self.dirs += other.dirs;
        self.symlinks += other.symlinks;
        self.bytes += other.bytes;
    }
}

/// What to copy from the source root, resolved once for all workspaces
#[derive(Debug, Clone)]
pub struct AssetPlan {
    source_root: PathBuf,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    excluded: HashSet<PathBuf>,
}

impl AssetPlan {
    /// Resolve `spec` against `source_root`
    ///
    /// Top-level files are matched now; missing asset directories are
    /// reported here, before any workspace is touched.
    pub fn new(source_root: &Path, spec: &AssetSpec) -> Result<Self> {
        if !source_root.is_dir() {
            return Err(LaunchError::config(format!(
                "source root {} is not a directory",
                source_root.display()
            )));
        }

        let matcher = build_globset(&spec.files)?;
        let mut files = Vec::new();
        for entry in fs::read_dir(source_root).with_path(source_root)? {
            let entry = entry.with_path(source_root)?;
            let path = entry.path();
            if path.is_file() && matcher.is_match(entry.file_name()) {
                files.push(path);
            }
        }
        files.sort();

        let mut dirs = Vec::with_capacity(spec.dirs.len());
        for dir in &spec.dirs {
            let path = source_root.join(dir);
            if !path.is_dir() {
                return Err(LaunchError::io(
                    &path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "asset directory not found"),
                ));
            }
            dirs.push(path);
        }

        tracing::debug!(
            root = %source_root.display(),
            files = files.len(),
            dirs = dirs.len(),
            "resolved asset plan"
        );

        Ok(Self {
            source_root: source_root.to_path_buf(),
            files,
            dirs,
            excluded: HashSet::new(),
        })
    }

    /// Never copy these paths out of an asset tree
    ///
    /// Workspaces and the manifest may live inside an asset tree (the
    /// scripts directory); excluding them keeps workspaces from being copied
    /// into each other.
    pub fn with_excluded<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.excluded.extend(paths);
        self
    }

    /// Source root
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Top-level files that will be copied
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Asset trees that will be copied
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0 && self.excluded.contains(entry.path())
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| LaunchError::config(format!("Invalid glob pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| LaunchError::config(format!("Failed to build glob set: {}", e)))
}

/// An isolated working directory for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Device index the workspace belongs to
    pub rank: usize,
    /// Workspace directory
    pub dir: PathBuf,
}

impl Workspace {
    /// Create a workspace handle; nothing is touched on disk
    pub fn new(rank: usize, dir: PathBuf) -> Self {
        Self { rank, dir }
    }

    /// Trainer log file
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Environment snapshot file
    pub fn env_log_path(&self) -> PathBuf {
        self.dir.join(ENV_LOG_FILE)
    }

    /// Destroy and recreate the directory, then copy the planned assets in
    pub fn prepare(&self, plan: &AssetPlan) -> Result<StageStats> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).with_path(&self.dir)?;
        }
        fs::create_dir_all(&self.dir).with_path(&self.dir)?;

        let mut stats = StageStats::default();

        for file in plan.files() {
            let name = file.file_name().unwrap_or_default();
            stats.bytes += copy_file(file, &self.dir.join(name))?;
            stats.files += 1;
        }

        for dir in plan.dirs() {
            let tree = copy_tree(plan, dir, &self.dir)?;
            stats.merge(&tree);
        }

        tracing::debug!(
            rank = self.rank,
            workspace = %self.dir.display(),
            files = stats.files,
            bytes = stats.bytes,
            "workspace staged"
        );

        Ok(stats)
    }

    /// Write `KEY=VALUE` lines for the child's environment
    pub fn write_env_log<'a, I>(&self, vars: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let path = self.env_log_path();
        let file = fs::File::create(&path).with_path(&path)?;
        let mut writer = BufWriter::new(file);
        for (key, value) in vars {
            writeln!(writer, "{}={}", key, value).with_path(&path)?;
        }
        writer.flush().with_path(&path)?;
        Ok(path)
    }
}

/// Copy `src` to `dst`, keeping the modification time
fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    let bytes = fs::copy(src, dst).with_path(src)?;
    if let Ok(mtime) = fs::metadata(src).and_then(|m| m.modified()) {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            tracing::debug!(path = %dst.display(), error = %e, "failed to preserve mtime");
        }
    }
    Ok(bytes)
}

/// Copy the tree rooted at `src_dir` to `dest_parent/<name of src_dir>`
fn copy_tree(plan: &AssetPlan, src_dir: &Path, dest_parent: &Path) -> Result<StageStats> {
    let name = src_dir.file_name().unwrap_or_default();
    let dest_root = dest_parent.join(name);
    let mut stats = StageStats::default();

    let walker = WalkDir::new(src_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        // The workspace itself may sit inside the tree being copied
        .filter_entry(|e| !plan.is_excluded(e) && e.path() != dest_parent);

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src_dir.to_path_buf());
            LaunchError::io(path, e.into())
        })?;

        let relative = entry.path().strip_prefix(src_dir).unwrap_or(entry.path());
        let target = dest_root.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).with_path(&target)?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            stats.symlinks += 1;
        } else {
            stats.bytes += copy_file(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src).with_path(src)?;
    std::os::unix::fs::symlink(&target, dst).with_path(dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    copy_file(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_repo() -> TempDir {
        let root = TempDir::new().unwrap();
        let p = root.path();
        fs::write(p.join("train.py"), "print('train')\n").unwrap();
        fs::write(p.join("test.py"), "print('test')\n").unwrap();
        fs::write(p.join("README.md"), "docs\n").unwrap();
        for dir in ["config/data", "network", "utils", "scripts"] {
            fs::create_dir_all(p.join(dir)).unwrap();
        }
        fs::write(p.join("config/data/coco.yaml"), "nc: 80\n").unwrap();
        fs::write(p.join("network/yolo.py"), "class Model: pass\n").unwrap();
        fs::write(p.join("utils/general.py"), "\n").unwrap();
        fs::write(p.join("scripts/run_distribute_train.sh"), "#!/bin/sh\n").unwrap();
        root
    }

    #[test]
    fn test_asset_plan_matches_top_level_python() {
        let repo = source_repo();
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap();
        let names: Vec<_> = plan
            .files()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["test.py", "train.py"]);
        assert_eq!(plan.dirs().len(), 4);
    }

    #[test]
    fn test_missing_asset_dir() {
        let repo = source_repo();
        fs::remove_dir_all(repo.path().join("utils")).unwrap();
        let err = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap_err();
        assert_eq!(err.path(), Some(&repo.path().join("utils")));
    }

    #[test]
    fn test_prepare_copies_assets() {
        let repo = source_repo();
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap();
        let ws = Workspace::new(0, repo.path().join("scripts/train_parallel0"));

        let stats = ws.prepare(&plan).unwrap();
        assert_eq!(stats.files, 6);
        assert!(ws.dir.join("train.py").is_file());
        assert!(!ws.dir.join("README.md").exists());
        assert!(ws.dir.join("config/data/coco.yaml").is_file());
        assert!(ws.dir.join("network/yolo.py").is_file());
        assert!(ws.dir.join("utils/general.py").is_file());
        assert!(ws.dir.join("scripts/run_distribute_train.sh").is_file());
        assert!(!ws.dir.join("scripts/train_parallel0").exists());
    }

    #[test]
    fn test_workspaces_not_copied_into_each_other() {
        let repo = source_repo();
        let scripts = repo.path().join("scripts");
        let ws0 = Workspace::new(0, scripts.join("train_parallel0"));
        let ws1 = Workspace::new(1, scripts.join("train_parallel1"));
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default())
            .unwrap()
            .with_excluded(vec![ws0.dir.clone(), ws1.dir.clone(), scripts.join("launch.json")]);
        fs::write(scripts.join("launch.json"), "{}").unwrap();

        ws0.prepare(&plan).unwrap();
        ws1.prepare(&plan).unwrap();

        assert!(!ws1.dir.join("scripts/train_parallel0").exists());
        assert!(!ws1.dir.join("scripts/launch.json").exists());
    }

    #[test]
    fn test_prefix_named_assets_are_copied() {
        let repo = source_repo();
        fs::write(repo.path().join("config/train_parallel.yaml"), "lr: 0.01\n").unwrap();
        fs::create_dir_all(repo.path().join("scripts/train_parallel_utils")).unwrap();
        fs::write(repo.path().join("scripts/train_parallel_utils/run.sh"), "\n").unwrap();

        let ws = Workspace::new(0, repo.path().join("scripts/train_parallel0"));
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default())
            .unwrap()
            .with_excluded(vec![ws.dir.clone()]);
        ws.prepare(&plan).unwrap();

        assert!(ws.dir.join("config/train_parallel.yaml").is_file());
        assert!(ws.dir.join("scripts/train_parallel_utils/run.sh").is_file());
        assert!(!ws.dir.join("scripts/train_parallel0").exists());
    }

    #[test]
    fn test_prepare_replaces_previous_contents() {
        let repo = source_repo();
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap();
        let ws = Workspace::new(2, repo.path().join("train_parallel2"));

        fs::create_dir_all(&ws.dir).unwrap();
        fs::write(ws.dir.join("stale.ckpt"), "old").unwrap();

        ws.prepare(&plan).unwrap();
        assert!(!ws.dir.join("stale.ckpt").exists());
        assert!(ws.dir.join("train.py").exists());
    }

    #[test]
    fn test_prepare_preserves_mtime() {
        let repo = source_repo();
        let src = repo.path().join("network/yolo.py");
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let plan = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap();
        let ws = Workspace::new(0, repo.path().join("train_parallel0"));
        ws.prepare(&plan).unwrap();

        let copied = fs::metadata(ws.dir.join("network/yolo.py")).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&copied), old);
    }

    #[test]
    fn test_write_env_log() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(5, dir.path().to_path_buf());
        let path = ws
            .write_env_log(vec![("DEVICE_ID", "5"), ("RANK_ID", "5")])
            .unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "DEVICE_ID=5\nRANK_ID=5\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_recreated() {
        let repo = source_repo();
        std::os::unix::fs::symlink("coco.yaml", repo.path().join("config/data/default.yaml")).unwrap();
        let plan = AssetPlan::new(repo.path(), &AssetSpec::default()).unwrap();
        let ws = Workspace::new(0, repo.path().join("train_parallel0"));

        let stats = ws.prepare(&plan).unwrap();
        assert_eq!(stats.symlinks, 1);
        let link = ws.dir.join("config/data/default.yaml");
        assert_eq!(fs::read_link(link).unwrap(), PathBuf::from("coco.yaml"));
    }
}
