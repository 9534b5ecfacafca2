// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 交通分析服务 (TrafficAnalyzer)
//!
//! 职责: 图片字节 → 解码 → 车辆检测 → 指标聚合
//!
//! 检测模型由 `Mutex` 保护,分析器本身可在多个请求线程间共享。

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::anyhow;
use image::DynamicImage;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DetectorConfig;
use crate::detection::Detection;
use crate::error::AnalyzeError;
use crate::metrics::{analyze, AnalysisResult};
use crate::models::{resolve_model, Model, YOLOv8};

/// 读取图片文件,失败属于客户端错误
pub fn read_image_file(path: &Path) -> Result<Vec<u8>, AnalyzeError> {
    std::fs::read(path).map_err(|e| AnalyzeError::Read {
        path: path.display().to_string(),
        source: e,
    })
}

/// 解码上传的图片字节,失败属于客户端错误
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AnalyzeError> {
    image::load_from_memory(bytes).map_err(AnalyzeError::Decode)
}

pub struct TrafficAnalyzer {
    model: Mutex<Box<dyn Model + Send>>,
    profile: bool,
}

impl TrafficAnalyzer {
    pub fn new(model: Box<dyn Model + Send>) -> Self {
        Self {
            model: Mutex::new(model),
            profile: false,
        }
    }

    /// 定位(必要时下载)模型并加载 YOLOv8
    pub fn from_config(config: &DetectorConfig) -> anyhow::Result<Self> {
        config.log_summary();
        let path = resolve_model(&config.model, config.model_url.as_deref())?;
        let config = DetectorConfig {
            model: path.to_string_lossy().into_owned(),
            ..config.clone()
        };
        let model = YOLOv8::new(&config)?;
        info!(summary = %model.summary(), "🚀 交通分析服务就绪");
        Ok(Self::new(Box::new(model)).with_profile(config.profile))
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// 对单张已解码图片做检测
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, AnalyzeError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| AnalyzeError::Inference(anyhow!("model lock poisoned")))?;
        let images = std::slice::from_ref(image);

        let t_pre = Instant::now();
        let xs = model.preprocess(images).map_err(AnalyzeError::Inference)?;
        let preprocess_ms = t_pre.elapsed().as_secs_f64() * 1000.0;

        let t_run = Instant::now();
        let ys = model.run(xs, self.profile).map_err(AnalyzeError::Inference)?;
        let inference_ms = t_run.elapsed().as_secs_f64() * 1000.0;

        let t_post = Instant::now();
        let detections = model
            .postprocess(ys, images)
            .map_err(AnalyzeError::Inference)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let postprocess_ms = t_post.elapsed().as_secs_f64() * 1000.0;

        for d in &detections {
            debug!(
                class_id = d.class_id,
                class = model.class_name(d.class_id),
                confidence = d.confidence,
                "检测目标"
            );
        }
        drop(model);

        if self.profile {
            info!(preprocess_ms, inference_ms, postprocess_ms, "⏱️  推理耗时");
        } else {
            debug!(preprocess_ms, inference_ms, postprocess_ms, "推理耗时");
        }
        Ok(detections)
    }

    /// 检测 + 聚合
    pub fn analyze_image(&self, image: &DynamicImage) -> Result<AnalysisResult, AnalyzeError> {
        let detections = self.detect(image).inspect_err(|e| {
            error!(error = %e, "❌ 分析失败");
        })?;
        let result = analyze(&detections);
        debug!(
            detections = detections.len(),
            vehicles = result.vehicles_detected,
            status = %result.system_status,
            "🎯 分析完成"
        );
        Ok(result)
    }

    /// 请求入口: 原始图片字节 → 分析结果
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn analyze_bytes(&self, source: &str, bytes: &[u8]) -> Result<AnalysisResult, AnalyzeError> {
        info!("📥 收到图片");
        let image = decode_image(bytes).inspect_err(|e| {
            warn!(error = %e, "⚠️  图片解码失败");
        })?;
        self.analyze_image(&image)
    }

    /// 文件入口: 读取失败与解码失败同样按客户端错误处理
    pub fn analyze_file(&self, path: &Path) -> Result<AnalysisResult, AnalyzeError> {
        let bytes = read_image_file(path).inspect_err(|e| {
            warn!(error = %e, "⚠️  图片读取失败");
        })?;
        self.analyze_bytes(&path.display().to_string(), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SystemStatus;
    use image::{ImageFormat, RgbImage};
    use ndarray::{Array, IxDyn};
    use std::io::Cursor;
    use std::sync::Arc;

    /// 返回固定检测结果的模型
    struct StubModel {
        classes: Vec<u32>,
        fail: bool,
    }

    impl Model for StubModel {
        fn preprocess(&mut self, _images: &[DynamicImage]) -> anyhow::Result<Vec<Array<f32, IxDyn>>> {
            Ok(vec![])
        }

        fn run(
            &mut self,
            xs: Vec<Array<f32, IxDyn>>,
            _profile: bool,
        ) -> anyhow::Result<Vec<Array<f32, IxDyn>>> {
            if self.fail {
                anyhow::bail!("onnx session failed");
            }
            Ok(xs)
        }

        fn postprocess(
            &self,
            _xs: Vec<Array<f32, IxDyn>>,
            xs0: &[DynamicImage],
        ) -> anyhow::Result<Vec<Vec<Detection>>> {
            let dets = self
                .classes
                .iter()
                .map(|&c| Detection::of_class(c, 0.5))
                .collect::<Vec<_>>();
            Ok(xs0.iter().map(|_| dets.clone()).collect())
        }

        fn summary(&self) -> String {
            "stub".to_string()
        }
    }

    fn analyzer(classes: Vec<u32>, fail: bool) -> TrafficAnalyzer {
        TrafficAnalyzer::new(Box::new(StubModel { classes, fail }))
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(32, 24));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_analyze_bytes() {
        let a = analyzer(vec![2, 2, 7, 0], false);
        let r = a.analyze_bytes("frame.png", &png_bytes()).unwrap();
        assert_eq!(r.vehicles_detected, 3);
        assert_eq!(r.co2_rate_g_per_min, 2 * 69 + 400);
        assert_eq!(r.system_status, SystemStatus::Normal);
    }

    #[test]
    fn test_undecodable_bytes_is_client_error() {
        let a = analyzer(vec![2], false);
        let err = a.analyze_bytes("junk.bin", b"\x00\x01\x02").unwrap_err();
        assert!(matches!(err, AnalyzeError::Decode(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_model_failure_is_server_error() {
        let a = analyzer(vec![2], true);
        let err = a.analyze_bytes("frame.png", &png_bytes()).unwrap_err();
        assert!(matches!(err, AnalyzeError::Inference(_)));
        assert_eq!(err.status_code(), 500);
        assert!(err.body().details.unwrap().contains("onnx session failed"));
    }

    #[test]
    fn test_missing_file_is_client_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyzer(vec![2], false)
            .analyze_file(&dir.path().join("absent.png"))
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Read { .. }));
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.body().error, "Could not read image");
    }

    #[test]
    fn test_analyze_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, png_bytes()).unwrap();
        let r = analyzer(vec![3, 3], false).analyze_file(&path).unwrap();
        assert_eq!(r.vehicle_breakdown.motorcycle, 2);
    }

    #[test]
    fn test_shared_across_threads() {
        let a = Arc::new(analyzer(vec![5], false));
        let bytes = Arc::new(png_bytes());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let a = Arc::clone(&a);
                let bytes = Arc::clone(&bytes);
                std::thread::spawn(move || a.analyze_bytes(&format!("cam{}", i), &bytes).unwrap())
            })
            .collect();
        for h in handles {
            let r = h.join().unwrap();
            assert_eq!(r.vehicle_breakdown.bus, 1);
            assert_eq!(r.co2_rate_g_per_min, 350);
        }
    }
}
