//! Performance benchmarks for workspace staging and CPU partitioning
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use distlaunch::config::{AssetSpec, CpuPolicy};
use distlaunch::fs::{AssetPlan, Workspace};
use distlaunch::system::partition_cpus;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Build a source tree shaped like a training repository
fn create_source_repo(root: &Path, files_per_dir: usize, file_size: usize) {
    let body = vec![b'#'; file_size];
    fs::write(root.join("train.py"), &body).unwrap();
    fs::write(root.join("test.py"), &body).unwrap();

    for dir in ["config", "network", "utils", "scripts"] {
        let path = root.join(dir).join("nested");
        fs::create_dir_all(&path).unwrap();
        for i in 0..files_per_dir {
            fs::write(path.join(format!("module_{}.py", i)), &body).unwrap();
        }
    }
}

fn bench_prepare_workspace(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepare_workspace");

    for files_per_dir in [10usize, 100, 500] {
        let source = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        create_source_repo(source.path(), files_per_dir, 4096);

        let plan = AssetPlan::new(source.path(), &AssetSpec::default()).unwrap();
        let workspace = Workspace::new(0, work.path().join("train_parallel0"));

        group.throughput(Throughput::Elements((files_per_dir * 4 + 2) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(files_per_dir),
            &files_per_dir,
            |b, _| {
                b.iter(|| black_box(workspace.prepare(&plan).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_asset_plan(c: &mut Criterion) {
    let source = TempDir::new().unwrap();
    create_source_repo(source.path(), 50, 256);

    c.bench_function("resolve_asset_plan", |b| {
        b.iter(|| black_box(AssetPlan::new(source.path(), &AssetSpec::default()).unwrap()));
    });
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_cpus");

    for cpus in [8usize, 192, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(cpus), &cpus, |b, &cpus| {
            b.iter(|| black_box(partition_cpus(cpus, 8, CpuPolicy::Reject).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_prepare_workspace, bench_asset_plan, bench_partition);
criterion_main!(benches);
