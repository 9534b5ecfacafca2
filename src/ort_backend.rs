// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// ONNX Runtime 推理后端
//
// 负责: Session 构建、执行设备选择、输入输出形状与类别名称解析

use anyhow::{bail, Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::ValueType;
use regex::Regex;
use tracing::{debug, info};

use crate::config::Device;

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
}

impl From<Device> for OrtEP {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => OrtEP::CPU,
            Device::Cuda(id) => OrtEP::CUDA(id),
        }
    }
}

/// 构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    /// (height, width), 仅在模型输入为动态尺寸时生效
    pub image_size: (u32, u32),
    pub intra_threads: Option<usize>,
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    height: u32,
    width: u32,
    is_height_dynamic: bool,
    is_width_dynamic: bool,
    nc: Option<u32>,
    names: Option<Vec<String>>,
    author: Option<String>,
    version: Option<String>,
    output_names: Vec<String>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let providers: Vec<ExecutionProviderDispatch> = match args.ep {
            OrtEP::CUDA(device_id) => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
        };

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(providers)?;
        if let Some(n) = args.intra_threads {
            builder = builder.with_intra_threads(n)?;
        }
        let session = builder
            .commit_from_file(&args.f)
            .with_context(|| format!("failed to load onnx model {}", args.f))?;

        // input: [batch, 3, height, width], 动态维度为 -1
        let input = session.inputs.first().context("model has no inputs")?;
        let input_dims = match &input.input_type {
            ValueType::Tensor { dimensions, .. } => dimensions.clone(),
            other => bail!("model input is not a tensor: {:?}", other),
        };
        if input_dims.len() != 4 {
            bail!("expected NCHW input, got shape {:?}", input_dims);
        }
        let (image_h, image_w) = args.image_size;
        let (height, is_height_dynamic) = Self::resolve_dim(input_dims[2], image_h);
        let (width, is_width_dynamic) = Self::resolve_dim(input_dims[3], image_w);

        // output0: [batch, 4 + nc, anchors]
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            bail!("model has no outputs");
        }
        let nc_from_shape = match &session.outputs[0].output_type {
            ValueType::Tensor { dimensions, .. } if dimensions.len() == 3 && dimensions[1] > 4 => {
                Some(dimensions[1] as u32 - 4)
            }
            _ => None,
        };

        // ultralytics 导出的元数据
        let metadata = session.metadata()?;
        let names = metadata
            .custom("names")?
            .map(|raw| Self::parse_names(&raw))
            .filter(|names| !names.is_empty());
        let author = metadata.custom("author")?;
        let version = metadata.custom("version")?;
        drop(metadata);

        let nc = nc_from_shape.or_else(|| names.as_ref().map(|n| n.len() as u32));

        info!(
            model = %args.f,
            ep = ?args.ep,
            height,
            width,
            nc = ?nc,
            "✅ 检测模型加载成功"
        );
        debug!(outputs = ?output_names, author = ?author, version = ?version, "model metadata");

        Ok(Self {
            session,
            ep: args.ep,
            height,
            width,
            is_height_dynamic,
            is_width_dynamic,
            nc,
            names,
            author,
            version,
            output_names,
        })
    }

    fn resolve_dim(dim: i64, fallback: u32) -> (u32, bool) {
        if dim > 0 {
            (dim as u32, false)
        } else {
            (fallback, true)
        }
    }

    /// 解析形如 `{0: 'person', 1: 'bicycle', ...}` 的类别字典
    pub fn parse_names(raw: &str) -> Vec<String> {
        let re = match Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        let mut pairs: Vec<(usize, String)> = re
            .captures_iter(raw)
            .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
            .collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs.into_iter().map(|(_, name)| name).collect()
    }

    pub fn run(&self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let outputs = self.session.run(ort::inputs![xs.view()]?)?;
        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let y = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            ys.push(y.into_owned());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_height_dynamic(&self) -> bool {
        self.is_height_dynamic
    }

    pub fn is_width_dynamic(&self) -> bool {
        self.is_width_dynamic
    }

    pub fn nc(&self) -> Option<u32> {
        self.nc
    }

    pub fn names(&self) -> Option<&Vec<String>> {
        self.names.as_ref()
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        let raw = "{0: 'person', 1: 'bicycle', 2: 'car', 10: 'fire hydrant', 3: 'motorcycle'}";
        let names = OrtBackend::parse_names(raw);
        assert_eq!(
            names,
            vec!["person", "bicycle", "car", "motorcycle", "fire hydrant"]
        );
    }

    #[test]
    fn test_parse_names_garbage() {
        assert!(OrtBackend::parse_names("not a dict").is_empty());
    }

    #[test]
    fn test_resolve_dim() {
        assert_eq!(OrtBackend::resolve_dim(640, 320), (640, false));
        assert_eq!(OrtBackend::resolve_dim(-1, 320), (320, true));
    }
}
