//! Test helpers for end-to-end launch and setup scenarios

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub use pktgen_launch::testing::RecordingRunner;

pub const TARGET: &str = "x86_64-native-linux-gcc";

/// A scratch host: SDK tree, work directory with a cfg tree, and a sysfs
pub struct TestHost {
    pub root: TempDir,
}

impl TestHost {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["sdk", "work/cfg", "sys"] {
            std::fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        Self { root }
    }

    pub fn sdk(&self) -> PathBuf {
        self.root.path().join("sdk")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn cfg_dir(&self) -> PathBuf {
        self.work_dir().join("cfg")
    }

    pub fn sysfs(&self) -> PathBuf {
        self.root.path().join("sys")
    }

    /// Write a unit under the cfg tree
    pub fn unit(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.cfg_dir().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Create an empty file relative to `base`
    pub fn touch(&self, base: &Path, rel: &str) {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    /// Add a NUMA node with a huge-page control file
    pub fn numa_node(&self, node: usize) {
        let rel = format!(
            "devices/system/node/node{}/hugepages/hugepages-2048kB/nr_hugepages",
            node
        );
        self.touch(&self.sysfs(), &rel);
    }
}
