use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "roomlink";
pub const APP_NAME: &str = "roomlink";

pub const DATA_DIR_ENV: &str = "ROOMLINK_DATA_DIR";
pub const CONFIG_DIR_ENV: &str = "ROOMLINK_CONFIG_DIR";

fn project_dirs() -> anyhow::Result<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))
}

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    Ok(project_dirs()?.data_dir().to_path_buf())
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    Ok(project_dirs()?.config_dir().to_path_buf())
}
