// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! HTTP 接口
//!
//! `POST /api/analyze`: multipart 上传 `file` 字段 → 分析结果 JSON。
//! 失败时返回 `AnalyzeError` 对应的状态码与错误体。

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::BufMut;
use futures::TryStreamExt;
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::multipart::FormData;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

use crate::analyzer::TrafficAnalyzer;
use crate::error::AnalyzeError;
use crate::metrics::AnalysisResult;

/// 上传图片所在的表单字段
pub const UPLOAD_FIELD: &str = "file";

/// 上传大小上限
pub const MAX_UPLOAD_BYTES: u64 = 32 * 1024 * 1024;

pub fn routes(
    analyzer: Arc<TrafficAnalyzer>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let analyzer = warp::any().map(move || analyzer.clone());

    warp::path!("api" / "analyze")
        .and(warp::post())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_BYTES))
        .and(analyzer)
        .and_then(analyze_upload)
}

/// 启动服务,收到 Ctrl-C 后退出
pub async fn serve(analyzer: Arc<TrafficAnalyzer>, addr: SocketAddr) -> Result<()> {
    let routes = routes(analyzer).with(warp::trace::request());
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("🛑 收到退出信号");
        })
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(addr = %bound, "🌐 HTTP 服务已启动: POST /api/analyze");
    server.await;
    Ok(())
}

async fn analyze_upload(
    form: FormData,
    analyzer: Arc<TrafficAnalyzer>,
) -> Result<WithStatus<Json>, Infallible> {
    let outcome = match read_upload(form).await {
        // 推理是阻塞调用,放到阻塞线程池
        Ok((filename, bytes)) => {
            tokio::task::spawn_blocking(move || analyzer.analyze_bytes(&filename, &bytes))
                .await
                .unwrap_or_else(|e| Err(AnalyzeError::Inference(anyhow!("analysis task: {}", e))))
        }
        Err(e) => {
            warn!(error = %e, "⚠️  上传解析失败");
            Err(e)
        }
    };
    Ok(into_reply(outcome))
}

/// 取出 `file` 字段的文件名和内容
async fn read_upload(form: FormData) -> Result<(String, Vec<u8>), AnalyzeError> {
    let mut form = Box::pin(form);
    while let Some(part) = form
        .try_next()
        .await
        .map_err(|e| AnalyzeError::Upload(e.to_string()))?
    {
        if part.name() != UPLOAD_FIELD {
            continue;
        }
        let filename = part.filename().unwrap_or("upload").to_string();
        let bytes = part
            .stream()
            .try_fold(Vec::new(), |mut acc, buf| async move {
                acc.put(buf);
                Ok(acc)
            })
            .await
            .map_err(|e| AnalyzeError::Upload(e.to_string()))?;
        return Ok((filename, bytes));
    }
    Err(AnalyzeError::Upload(format!(
        "missing `{}` field",
        UPLOAD_FIELD
    )))
}

fn into_reply(outcome: Result<AnalysisResult, AnalyzeError>) -> WithStatus<Json> {
    match outcome {
        Ok(result) => warp::reply::with_status(warp::reply::json(&result), StatusCode::OK),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warp::reply::with_status(warp::reply::json(&e.body()), status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::models::Model;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use ndarray::{Array, IxDyn};
    use serde_json::{json, Value};
    use std::io::Cursor;

    const BOUNDARY: &str = "traffic-ai-boundary";

    /// 每张图返回一辆卡车和一个行人
    struct TruckAndPerson {
        fail: bool,
    }

    impl Model for TruckAndPerson {
        fn preprocess(&mut self, _: &[DynamicImage]) -> anyhow::Result<Vec<Array<f32, IxDyn>>> {
            Ok(vec![])
        }

        fn run(
            &mut self,
            xs: Vec<Array<f32, IxDyn>>,
            _: bool,
        ) -> anyhow::Result<Vec<Array<f32, IxDyn>>> {
            if self.fail {
                anyhow::bail!("cuda out of memory");
            }
            Ok(xs)
        }

        fn postprocess(
            &self,
            _: Vec<Array<f32, IxDyn>>,
            xs0: &[DynamicImage],
        ) -> anyhow::Result<Vec<Vec<Detection>>> {
            Ok(xs0
                .iter()
                .map(|_| vec![Detection::of_class(7, 0.9), Detection::of_class(0, 0.8)])
                .collect())
        }

        fn summary(&self) -> String {
            "truck and person".into()
        }
    }

    fn analyzer(fail: bool) -> Arc<TrafficAnalyzer> {
        Arc::new(TrafficAnalyzer::new(Box::new(TruckAndPerson { fail })))
    }

    fn png_bytes() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(20, 10))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn multipart(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, field, filename
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn post(analyzer: Arc<TrafficAnalyzer>, body: Vec<u8>) -> (StatusCode, Value) {
        let res = warp::test::request()
            .method("POST")
            .path("/api/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .reply(&routes(analyzer))
            .await;
        let value = serde_json::from_slice(res.body()).unwrap();
        (res.status(), value)
    }

    #[tokio::test]
    async fn test_upload_ok() {
        let (status, v) = post(analyzer(false), multipart("file", "cam.png", &png_bytes())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["vehicles_detected"], 1);
        assert_eq!(v["co2_rate_g_per_min"], 400);
        assert_eq!(v["system_status"], "NORMAL");
        assert_eq!(
            v["vehicle_breakdown"],
            json!({"car": 0, "motorcycle": 0, "bus": 0, "truck": 1})
        );
    }

    #[tokio::test]
    async fn test_undecodable_upload() {
        let (status, v) = post(analyzer(false), multipart("file", "cam.jpg", b"garbage")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(v, json!({"error": "Could not decode image"}));
    }

    #[tokio::test]
    async fn test_model_failure() {
        let (status, v) = post(analyzer(true), multipart("file", "cam.png", &png_bytes())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(v["error"], "Analysis failed");
        assert!(v["details"].as_str().unwrap().contains("cuda out of memory"));
    }

    #[tokio::test]
    async fn test_missing_file_field() {
        let (status, v) = post(analyzer(false), multipart("image", "cam.png", &png_bytes())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(v["error"], "Invalid upload");
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let res = warp::test::request()
            .method("GET")
            .path("/api/analyze")
            .reply(&routes(analyzer(false)))
            .await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
