//! 从对象存储下载代码包并解压

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use builder_core::errors::MissingSource;
use builder_core::{BuilderError, BuilderResult, CommitInfo};
use flate2::read::GzDecoder;
use tracing::info;

use crate::repo_info::RepoBuildInfo;

#[derive(Clone)]
pub struct OssSource {
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

impl OssSource {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    /// 下载并解压到 `code_home`，对象存储没有提交信息
    pub async fn fetch(&self, info: &RepoBuildInfo) -> BuilderResult<CommitInfo> {
        let url = &info.repository_url;
        let path = url.split('?').next().unwrap_or(url);
        let format = ArchiveFormat::from_name(path).ok_or_else(|| {
            BuilderError::invalid_params(format!("不支持的代码包格式: {url}"))
        })?;

        if info.code_home.exists() {
            tokio::fs::remove_dir_all(&info.code_home).await?;
        }
        tokio::fs::create_dir_all(&info.code_home).await?;

        let mut request = self.http.get(url).timeout(self.timeout);
        if let Some(user) = &info.user {
            request = request.basic_auth(user, info.password.as_ref());
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BuilderError::SourceTimeout(url.clone())
            } else {
                BuilderError::Network(format!("下载代码包失败: {e}"))
            }
        })?;

        match response.status().as_u16() {
            200..=299 => {}
            401 | 403 => {
                return Err(if info.has_credentials() {
                    BuilderError::SourceAuthFailed {
                        repo: url.clone(),
                        reason: builder_core::errors::AuthFailure::Credentials,
                    }
                } else {
                    BuilderError::SourceAuthRequired(url.clone())
                })
            }
            404 => {
                return Err(BuilderError::SourceNotFound(MissingSource::Repository(
                    url.clone(),
                )))
            }
            status => {
                return Err(BuilderError::Network(format!(
                    "下载代码包失败，状态码 {status}"
                )))
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BuilderError::Network(format!("读取代码包失败: {e}")))?;
        if bytes.is_empty() {
            return Err(BuilderError::SourceEmpty(url.clone()));
        }

        let archive = info
            .code_home
            .with_extension(format!("download-{}", std::process::id()));
        tokio::fs::write(&archive, &bytes).await?;

        let dest = info.code_home.clone();
        let archive_path = archive.clone();
        let result = tokio::task::spawn_blocking(move || extract(&archive_path, &dest, format))
            .await
            .map_err(|e| BuilderError::internal(format!("解压任务异常: {e}")))?;
        let _ = tokio::fs::remove_file(&archive).await;
        result?;

        info!(url = %url, dir = %info.code_home.display(), "代码包下载解压完成");
        Ok(CommitInfo::default())
    }
}

/// 解压归档，拒绝解压到目标目录之外的条目
pub fn extract(archive: &Path, dest: &Path, format: ArchiveFormat) -> BuilderResult<()> {
    match format {
        ArchiveFormat::Zip => {
            let file = File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| BuilderError::invalid_params(format!("无效的zip文件: {e}")))?;
            for index in 0..zip.len() {
                let mut entry = zip
                    .by_index(index)
                    .map_err(|e| BuilderError::invalid_params(format!("读取zip条目失败: {e}")))?;
                let Some(relative) = entry.enclosed_name() else {
                    continue;
                };
                let target: PathBuf = dest.join(relative);
                if entry.is_dir() {
                    std::fs::create_dir_all(&target)?;
                    continue;
                }
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut out = File::create(&target)?;
                io::copy(&mut entry, &mut out)?;
            }
        }
        ArchiveFormat::TarGz => {
            let file = File::open(archive)?;
            tar::Archive::new(GzDecoder::new(file)).unpack(dest)?;
        }
        ArchiveFormat::Tar => {
            let file = File::open(archive)?;
            tar::Archive::new(file).unpack(dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_format_from_name() {
        assert_eq!(ArchiveFormat::from_name("code.ZIP"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::from_name("a.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("a.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_name("a.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_name("a.rar"), None);
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("code.tar.gz");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let content = b"module example.com/app\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "go.mod", &content[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        extract(&archive, &dest, ArchiveFormat::TarGz).unwrap();
        assert!(dest.join("go.mod").is_file());
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("code.zip");
        {
            let file = File::create(&archive).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            writer
                .start_file("web/index.html", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"<html></html>").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("out");
        std::fs::create_dir_all(&dest).unwrap();
        extract(&archive, &dest, ArchiveFormat::Zip).unwrap();
        assert!(dest.join("web/index.html").is_file());
    }
}
