// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// 模型文件定位与下载缓存

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

/// 缓存目录名 (位于系统缓存目录下)
pub const CACHE_DIR_NAME: &str = "traffic-ai";

pub fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("cannot determine user cache directory")?;
    Ok(base.join(CACHE_DIR_NAME))
}

/// 定位模型文件
///
/// 1. 路径本身存在 → 直接使用
/// 2. 缓存目录中已有同名文件 → 使用缓存
/// 3. 配置了下载地址 → 下载到缓存目录
pub fn resolve_model(model: &str, url: Option<&str>) -> Result<PathBuf> {
    resolve_model_in(model, url, &cache_dir()?)
}

pub fn resolve_model_in(model: &str, url: Option<&str>, cache: &Path) -> Result<PathBuf> {
    let path = Path::new(model);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let file_name = path
        .file_name()
        .with_context(|| format!("invalid model path: {}", model))?;
    let cached = cache.join(file_name);
    if cached.is_file() {
        info!(path = %cached.display(), "📦 使用缓存模型");
        return Ok(cached);
    }

    let Some(url) = url else {
        bail!(
            "model {} not found and no model_url configured to download it",
            model
        );
    };
    download(url, &cached)?;
    Ok(cached)
}

fn download(url: &str, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    info!(url, dst = %dst.display(), "⬇️  下载模型");

    let resp = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {}", url))?;
    // 写完临时文件后再重命名
    let tmp = dst.with_extension("part");
    let mut file =
        fs::File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    let bytes = io::copy(&mut resp.into_reader(), &mut file)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, dst)?;

    info!(bytes, "✅ 模型下载完成");
    Ok(())
}
