use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub project_root: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub corpus_dir: PathBuf,
    pub config_path: PathBuf,
    pub secrets_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let project_root = discover_project_root();
        let data_dir = discover_data_dir(&project_root);
        let config_path = env::var("MANUALCHAT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| project_root.join("config.yml"));
        Self::build(project_root, data_dir, config_path)
    }

    /// Lays everything out under a single directory. Used by tests and the corpus tool.
    pub fn rooted_at(dir: &Path) -> Self {
        Self::build(dir.to_path_buf(), dir.to_path_buf(), dir.join("config.yml"))
    }

    fn build(project_root: PathBuf, data_dir: PathBuf, config_path: PathBuf) -> Self {
        let log_dir = data_dir.join("logs");
        let corpus_dir = data_dir.join("corpus");
        let db_path = data_dir.join("manualchat.db");
        let secrets_path = data_dir.join("secrets.yaml");

        for dir in [&data_dir, &log_dir, &corpus_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            project_root,
            data_dir,
            log_dir,
            db_path,
            corpus_dir,
            config_path,
            secrets_path,
        }
    }

    pub fn document_corpus_dir(&self, document_id: &str) -> PathBuf {
        self.corpus_dir.join(document_id)
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_project_root() -> PathBuf {
    if let Ok(root) = env::var("MANUALCHAT_ROOT") {
        return PathBuf::from(root);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    if manifest_dir.join("config.yml").exists() {
        return manifest_dir;
    }

    env::current_dir().unwrap_or(manifest_dir)
}

fn discover_data_dir(project_root: &Path) -> PathBuf {
    if let Ok(dir) = env::var("MANUALCHAT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return project_root.join("data");
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        home_dir()
            .join(".local/share")
            .to_string_lossy()
            .to_string()
    });
    PathBuf::from(xdg).join("manualchat")
}

fn home_dir() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
