use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_config(&self, content: &str) {
        let path = self.root.path().join("flotilla.kdl");
        fs::write(path, content).unwrap();
    }

    #[allow(dead_code)]
    pub fn create_env_dir(&self, env: &str) -> PathBuf {
        let dir = self.root.path().join(".infra").join("env").join(env);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}
