//! 命令行参数、环境变量与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

/// 单个上传分段与整个表单的默认大小上限（20 MiB）。
pub const MAX_UPLOAD_SIZE: u64 = 20 << 20;
pub const DEFAULT_MOUNT_PREFIX: &str = "/browse";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const GRACEFUL_SHUTDOWN_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "browse-drive",
    version = VERSION_INFO,
    about = "HTTP file browser over a local directory tree"
)]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "STORAGE_DIR",
        help = "Root directory exposed through the API"
    )]
    pub storage_dir: PathBuf,
    #[arg(
        short = 'b',
        long = "bind",
        env = "BROWSE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        short = 'm',
        long,
        env = "BROWSE_MOUNT_PREFIX",
        default_value = DEFAULT_MOUNT_PREFIX,
        help = "URL prefix the file API is mounted under"
    )]
    pub mount_prefix: String,
    #[arg(
        long,
        env = "BROWSE_UPLOAD_MAX_PART_SIZE",
        default_value_t = MAX_UPLOAD_SIZE,
        help = "Max size in bytes of a single uploaded file"
    )]
    pub upload_max_part_size: u64,
    #[arg(
        long,
        env = "BROWSE_UPLOAD_MAX_FORM_SIZE",
        default_value_t = MAX_UPLOAD_SIZE,
        help = "Max size in bytes of all files in one upload request"
    )]
    pub upload_max_form_size: u64,
    #[arg(
        long,
        env = "BROWSE_LOG_LEVEL",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log level used when RUST_LOG is not set"
    )]
    pub log_level: String,
}

/// `.env` 的加载结果；日志初始化之后再输出。
#[derive(Debug)]
pub enum EnvFile {
    Loaded(PathBuf),
    Missing,
    Invalid(String),
}

impl EnvFile {
    pub fn log(&self) {
        match self {
            EnvFile::Loaded(path) => info!(path = %path.display(), "loaded .env file"),
            EnvFile::Missing => info!(".env file not found, using environment variables"),
            EnvFile::Invalid(error) => warn!(error = %error, "failed to load .env file"),
        }
    }
}

/// 在解析参数之前加载当前目录（或上级目录）中的 `.env`，已有环境变量优先。
pub fn load_env_file() -> EnvFile {
    env_file_status(dotenvy::dotenv())
}

fn env_file_status(result: Result<PathBuf, dotenvy::Error>) -> EnvFile {
    match result {
        Ok(path) => EnvFile::Loaded(path),
        Err(err) if err.not_found() => EnvFile::Missing,
        Err(err) => EnvFile::Invalid(err.to_string()),
    }
}

/// 规范化挂载前缀：保留前导 `/`，去掉末尾 `/`，根挂载返回空串。
pub fn normalize_mount_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    format!("/{trimmed}")
}
