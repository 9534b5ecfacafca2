// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{CONF_THRESHOLD, INF_SIZE, IOU_THRESHOLD, MAX_DET};

/// 默认模型文件
pub const DEFAULT_MODEL: &str = "yolov8n.onnx";

/// 推理设备
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(i32),
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(0)),
            _ => match s.strip_prefix("cuda:") {
                Some(id) => {
                    let id = id
                        .parse::<i32>()
                        .with_context(|| format!("invalid cuda device id: {}", id))?;
                    Ok(Device::Cuda(id))
                }
                None => bail!("unknown device `{}` (expected cpu or cuda:<id>)", s),
            },
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Device {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 检测器参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    // === 模型 ===
    pub model: String,             // ONNX模型路径
    pub model_url: Option<String>, // 模型不存在时的下载地址

    // === 检测参数 ===
    pub conf_threshold: f32, // 检测置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    pub max_det: usize,      // 每张图最多保留的检测数
    pub imgsz: u32,          // 推理尺寸 (长边)

    // === 运行时 ===
    pub device: Device,
    pub intra_threads: Option<usize>,
    pub profile: bool, // 记录各阶段耗时
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            model_url: None,
            conf_threshold: CONF_THRESHOLD,
            iou_threshold: IOU_THRESHOLD,
            max_det: MAX_DET,
            imgsz: INF_SIZE,
            device: Device::Cpu,
            intra_threads: None,
            profile: false,
        }
    }
}

impl DetectorConfig {
    /// 从JSON文件加载配置,文件不存在时使用默认值
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "📝 配置文件不存在,使用默认配置");
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "✅ 配置已加载");
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "💾 配置已保存");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            bail!("conf_threshold must be in [0, 1], got {}", self.conf_threshold);
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            bail!("iou_threshold must be in [0, 1], got {}", self.iou_threshold);
        }
        if self.imgsz == 0 || self.imgsz % 32 != 0 {
            bail!("imgsz must be a positive multiple of 32, got {}", self.imgsz);
        }
        if self.max_det == 0 {
            bail!("max_det must be at least 1");
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!(
            model = %self.model,
            device = %self.device,
            conf = self.conf_threshold,
            iou = self.iou_threshold,
            imgsz = self.imgsz,
            max_det = self.max_det,
            "🎛️  当前检测器配置"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = DetectorConfig::default();
        assert_eq!(c.model, "yolov8n.onnx");
        assert_eq!(c.conf_threshold, 0.15);
        assert_eq!(c.imgsz, 640);
        assert_eq!(c.device, Device::Cpu);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Cuda(0));
        assert_eq!("cuda:1".parse::<Device>().unwrap(), Device::Cuda(1));
        assert!("cuda:x".parse::<Device>().is_err());
        assert!("tpu".parse::<Device>().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let c: DetectorConfig =
            serde_json::from_str(r#"{"conf_threshold": 0.3, "device": "cuda:0"}"#).unwrap();
        assert_eq!(c.conf_threshold, 0.3);
        assert_eq!(c.device, Device::Cuda(0));
        assert_eq!(c.imgsz, 640);
        assert_eq!(c.iou_threshold, 0.7);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            DetectorConfig {
                conf_threshold: 1.5,
                ..Default::default()
            },
            DetectorConfig {
                imgsz: 600,
                ..Default::default()
            },
            DetectorConfig {
                max_det: 0,
                ..Default::default()
            },
        ];
        for c in bad {
            assert!(c.validate().is_err(), "{:?}", c);
        }
    }

    #[test]
    fn test_load_save_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.json");

        assert_eq!(DetectorConfig::load(&path).unwrap(), DetectorConfig::default());

        let config = DetectorConfig {
            model: "models/yolov8s.onnx".into(),
            imgsz: 1024,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(DetectorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(DetectorConfig::load(&path).is_err());
    }
}
