//! 应用导出与导入
//!
//! 导出把应用内每个服务的镜像保存为 tar，连同 `metadata.json` 打包成 `<source_dir>.tar.gz`；
//! 导入解开压缩包，加载镜像并重新打标签推送到内部仓库，再改写 `metadata.json` 中的镜像名。

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use builder_core::models::{
    app_export_key, app_import_key, AppTransferRecord, ImageRef, Task, TransferStatus,
};
use builder_core::{put_json, BuilderError, BuilderResult, LogStatus};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::{require, Worker, WorkerRun};
use crate::context::WorkerContext;

const METADATA_FILE: &str = "metadata.json";

async fn record_transfer(
    ctx: &WorkerContext,
    key: String,
    event_id: &str,
    status: TransferStatus,
    tar_file: &str,
    message: &str,
) -> BuilderResult<()> {
    put_json(
        ctx.kv.as_ref(),
        &key,
        &AppTransferRecord {
            event_id: event_id.to_string(),
            status,
            tar_file: tar_file.to_string(),
            message: message.to_string(),
        },
    )
    .await
}

/// `metadata.json` 中的服务列表
fn apps_mut(metadata: &mut Value) -> BuilderResult<&mut Vec<Value>> {
    metadata
        .get_mut("apps")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| BuilderError::invalid_params("应用元数据缺少 apps 列表"))
}

fn app_field<'a>(app: &'a Value, field: &str) -> BuilderResult<&'a str> {
    app.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BuilderError::invalid_params(format!("应用元数据缺少 {field}")))
}

/// 镜像保存文件名，取镜像短名
fn image_archive(dir: &Path, service_key: &str, image: &ImageRef) -> PathBuf {
    dir.join(service_key)
        .join(format!("{}.tar", image.simple_name()))
}

fn pack_dir(source_dir: &Path, archive: &Path) -> BuilderResult<()> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let root = source_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("app"));
    builder.append_dir_all(root, source_dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn unpack_archive(archive: &Path, dest: &Path) -> BuilderResult<()> {
    let file = File::open(archive)?;
    let mut unpacker = tar::Archive::new(GzDecoder::new(file));
    std::fs::create_dir_all(dest)?;
    unpacker.unpack(dest)?;
    Ok(())
}

fn find_metadata(dir: &Path) -> BuilderResult<PathBuf> {
    WalkDir::new(dir)
        .max_depth(3)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == METADATA_FILE)
        .map(|entry| entry.into_path())
        .ok_or_else(|| BuilderError::invalid_params(format!("压缩包中没有 {METADATA_FILE}")))
}

async fn blocking<F>(op: F) -> BuilderResult<()>
where
    F: FnOnce() -> BuilderResult<()> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| BuilderError::internal(format!("打包任务异常退出: {e}")))?
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportAppBody {
    pub event_id: String,
    #[serde(default)]
    pub format: String,
    pub source_dir: PathBuf,
    pub app_metadata: Value,
}

pub struct ExportAppWorker {
    body: ExportAppBody,
}

impl ExportAppWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: ExportAppBody = task.parse_body()?;
        require(&body.event_id, "event_id")?;
        if body.source_dir.as_os_str().is_empty() {
            return Err(BuilderError::invalid_params("缺少参数 source_dir"));
        }
        Ok(Self { body })
    }

    pub fn archive_path(&self) -> PathBuf {
        let mut path = self.body.source_dir.clone().into_os_string();
        path.push(".tar.gz");
        PathBuf::from(path)
    }

    fn key(&self, ctx: &WorkerContext) -> String {
        app_export_key(&ctx.settings.product, &self.body.event_id)
    }
}

#[async_trait]
impl Worker for ExportAppWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(event_id = %self.body.event_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        record_transfer(ctx, self.key(ctx), &body.event_id, TransferStatus::Running, "", "")
            .await?;

        let source_dir = body.source_dir.clone();
        tokio::fs::create_dir_all(&source_dir).await?;
        let mut metadata = body.app_metadata.clone();
        let local_credential = ctx.settings.registry.local_credential();
        for app in apps_mut(&mut metadata)?.iter() {
            let service_key = app_field(app, "service_key")?;
            let image = ImageRef::parse(app_field(app, "share_image")?)?;
            let name = image.to_string();
            let archive = image_archive(&source_dir, service_key, &image);
            if let Some(parent) = archive.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            run.step(&format!("导出镜像 {name}"), "export-app", LogStatus::None)
                .await;
            if ctx.containers.inspect(&name).await?.is_none() {
                ctx.containers
                    .pull(
                        &name,
                        local_credential.as_ref(),
                        ctx.settings.build.pull_timeout(),
                    )
                    .await?;
            }
            ctx.containers
                .save(std::slice::from_ref(&name), &archive)
                .await?;
            debug!(image = %name, archive = %archive.display(), "镜像已保存");
        }

        tokio::fs::write(
            source_dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)?,
        )
        .await?;

        let archive = self.archive_path();
        let tar_source = source_dir.clone();
        let tar_dest = archive.clone();
        blocking(move || pack_dir(&tar_source, &tar_dest)).await?;

        let tar_file = archive.display().to_string();
        record_transfer(
            ctx,
            self.key(ctx),
            &body.event_id,
            TransferStatus::Success,
            &tar_file,
            "",
        )
        .await?;
        info!(tar_file = %tar_file, "应用导出完成");
        run.step("应用导出完成", "export-app", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, error: &BuilderError) -> BuilderResult<()> {
        record_transfer(
            ctx,
            self.key(ctx),
            &self.body.event_id,
            TransferStatus::Failure,
            "",
            &error.user_message(),
        )
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportAppBody {
    pub event_id: String,
    /// 导出得到的 `.tar.gz`
    pub file: PathBuf,
    /// 导入后镜像所在的命名空间
    pub namespace: String,
}

pub struct ImportAppWorker {
    body: ImportAppBody,
}

impl ImportAppWorker {
    pub fn from_task(task: &Task) -> BuilderResult<Self> {
        let body: ImportAppBody = task.parse_body()?;
        require(&body.event_id, "event_id")?;
        require(&body.namespace, "namespace")?;
        if body.file.as_os_str().is_empty() {
            return Err(BuilderError::invalid_params("缺少参数 file"));
        }
        Ok(Self { body })
    }

    fn key(&self, ctx: &WorkerContext) -> String {
        app_import_key(&ctx.settings.product, &self.body.event_id)
    }

    /// 解压目录：压缩包旁边去掉扩展名的同名目录
    pub fn unpack_dir(&self) -> PathBuf {
        let name = self
            .body
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("app.tar.gz");
        let stem = name
            .strip_suffix(".tar.gz")
            .or_else(|| name.strip_suffix(".tgz"))
            .unwrap_or(name);
        self.body
            .file
            .with_file_name(format!("{stem}-import"))
    }
}

#[async_trait]
impl Worker for ImportAppWorker {
    fn event_id(&self) -> &str {
        &self.body.event_id
    }

    #[instrument(skip_all, fields(event_id = %self.body.event_id))]
    async fn run(&self, run: &WorkerRun) -> BuilderResult<()> {
        let ctx = &run.ctx;
        let body = &self.body;
        let settings = &ctx.settings;
        record_transfer(ctx, self.key(ctx), &body.event_id, TransferStatus::Running, "", "")
            .await?;

        let dest = self.unpack_dir();
        let archive = body.file.clone();
        let unpack_dest = dest.clone();
        blocking(move || unpack_archive(&archive, &unpack_dest)).await?;

        let metadata_path = find_metadata(&dest)?;
        let app_root = metadata_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dest.clone());
        let mut metadata: Value = serde_json::from_slice(&tokio::fs::read(&metadata_path).await?)?;
        let local_credential = settings.registry.local_credential();

        for app in apps_mut(&mut metadata)?.iter_mut() {
            let service_key = app_field(app, "service_key")?.to_string();
            let image = ImageRef::parse(app_field(app, "share_image")?)?;
            let archive = image_archive(&app_root, &service_key, &image);
            run.step(
                &format!("导入镜像 {}", image.simple_name()),
                "import-app",
                LogStatus::None,
            )
            .await;
            let loaded = ctx.containers.load(&archive).await?;
            let source = loaded
                .into_iter()
                .next()
                .unwrap_or_else(|| image.to_string());

            let target = format!(
                "{}/{}/{}:{}",
                settings.registry.domain,
                body.namespace,
                image.simple_name(),
                image.tag
            )
            .to_lowercase();
            ctx.containers.tag(&source, &target).await?;
            run.retry("推送镜像", || {
                ctx.containers
                    .push(&target, local_credential.as_ref(), settings.build.push_timeout())
            })
            .await?;
            app["share_image"] = Value::String(target);
        }

        tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&metadata)?).await?;
        record_transfer(
            ctx,
            self.key(ctx),
            &body.event_id,
            TransferStatus::Success,
            &metadata_path.display().to_string(),
            "",
        )
        .await?;
        info!(file = %body.file.display(), "应用导入完成");
        run.step("应用导入完成", "import-app", LogStatus::Success)
            .await;
        Ok(())
    }

    async fn on_failure(&self, ctx: &WorkerContext, error: &BuilderError) -> BuilderResult<()> {
        record_transfer(
            ctx,
            self.key(ctx),
            &self.body.event_id,
            TransferStatus::Failure,
            "",
            &error.user_message(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_find_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("app-1");
        std::fs::create_dir_all(source.join("svc")).unwrap();
        std::fs::write(source.join(METADATA_FILE), br#"{"apps":[]}"#).unwrap();
        std::fs::write(source.join("svc/web.tar"), b"image").unwrap();

        let archive = dir.path().join("app-1.tar.gz");
        pack_dir(&source, &archive).unwrap();

        let out = dir.path().join("out");
        unpack_archive(&archive, &out).unwrap();
        assert_eq!(find_metadata(&out).unwrap(), out.join("app-1").join(METADATA_FILE));
        assert!(out.join("app-1/svc/web.tar").is_file());
    }

    #[test]
    fn test_metadata_fields() {
        let mut metadata = serde_json::json!({"apps": [{"service_key": "k1", "share_image": ""}]});
        let apps = apps_mut(&mut metadata).unwrap();
        assert_eq!(app_field(&apps[0], "service_key").unwrap(), "k1");
        assert!(app_field(&apps[0], "share_image").is_err());
        assert!(apps_mut(&mut serde_json::json!({})).is_err());
    }
}
