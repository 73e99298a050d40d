//! 上传暂存文件：先写入目标目录下的隐藏临时文件，提交时改名为唯一文件名。

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{self, File, OpenOptions};
use uuid::Uuid;

/// 为同一上传生成唯一文件名的最大尝试次数。
const MAX_NAME_ATTEMPTS: usize = 16;
const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

const STAGING_PREFIX: &str = ".upload-";
const STAGING_SUFFIX: &str = ".tmp";

/// 暂存文件名，列目录时不可见。
pub fn is_staging_name(name: &str) -> bool {
    name.len() > STAGING_PREFIX.len() + STAGING_SUFFIX.len()
        && name.starts_with(STAGING_PREFIX)
        && name.ends_with(STAGING_SUFFIX)
}

/// 暂存中的上传文件。
///
/// 未提交就被丢弃时（包括请求 future 中途被取消），`Drop` 会删除临时文件。
pub struct StagedFile {
    dir: PathBuf,
    original_name: String,
    temp_path: PathBuf,
    file: Option<File>,
    armed: bool,
}

impl StagedFile {
    /// 在目标目录内创建隐藏的暂存文件。
    pub async fn create(dir: &Path, original_name: &str) -> io::Result<Self> {
        let temp_path = dir.join(format!(
            "{STAGING_PREFIX}{}{STAGING_SUFFIX}",
            Uuid::new_v4()
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            original_name: original_name.to_string(),
            temp_path,
            file: Some(file),
            armed: true,
        })
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    #[cfg(test)]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// 返回暂存文件的可写句柄。
    pub fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("staged file already closed"))
    }

    /// 放弃并删除暂存文件。
    pub async fn discard(mut self) {
        self.file.take();
        self.armed = false;
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 落盘后以独占方式占用一个唯一文件名，再把暂存文件改名过去。
    ///
    /// 任何一步失败都会删除暂存文件。
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        if let Some(file) = self.file.take() {
            file.sync_all().await?;
        }

        let destination = reserve_unique_path(&self.dir, &self.original_name).await?;

        if let Err(err) = fs::rename(&self.temp_path, &destination).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&destination).await.is_ok()
                    && fs::rename(&self.temp_path, &destination).await.is_ok()
                {
                    self.armed = false;
                    return Ok(destination);
                }
            }
            let _ = fs::remove_file(&destination).await;
            return Err(err);
        }

        self.armed = false;
        Ok(destination)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        self.file.take();
        if self.armed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

async fn reserve_unique_path(dir: &Path, original_name: &str) -> io::Result<PathBuf> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let candidate = dir.join(unique_file_name(original_name));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free upload name for {original_name}"),
    ))
}

/// `<纳秒时间戳的 32 进制>-<原文件名>`
pub fn unique_file_name(original_name: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", to_base32(nanos), original_name)
}

fn to_base32(mut value: u128) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE32_DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
