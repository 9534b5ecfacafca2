// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// YOLOv8 检测模型实现
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, IxDyn};

use crate::config::DetectorConfig;
use crate::detection::{non_max_suppression, BBox, Detection};
use crate::{OrtBackend, OrtConfig, OrtEP};

/// letterbox 填充灰度 (114/255)
const PAD_VALUE: f32 = 114.0 / 255.0;

/// 等比缩放: 返回 (ratio, w_new, h_new)
fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// YOLOv8 检测模型
pub struct YOLOv8 {
    engine: OrtBackend,
    postprocessor: YOLOv8Postprocessor,
    names: Vec<String>,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        config.validate()?;
        let engine = OrtBackend::build(OrtConfig {
            f: config.model.clone(),
            ep: OrtEP::from(config.device),
            image_size: (config.imgsz, config.imgsz),
            intra_threads: config.intra_threads,
        })?;

        let names = engine
            .names()
            .cloned()
            .unwrap_or_else(|| super::COCO_NAMES.iter().map(|s| s.to_string()).collect());
        let nc = match engine.nc() {
            Some(nc) => nc as usize,
            None => names.len(),
        };

        let postprocessor = YOLOv8Postprocessor::new(YOLOv8Config {
            nc,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            max_det: config.max_det,
            width: engine.width() as usize,
            height: engine.height() as usize,
        });

        Ok(Self {
            engine,
            postprocessor,
            names,
        })
    }

    pub fn width(&self) -> u32 {
        self.engine.width()
    }

    pub fn height(&self) -> u32 {
        self.engine.height()
    }
}

/// letterbox 预处理: 等比缩放到 (width, height),左上对齐,其余填充灰色
pub fn letterbox(xs: &[DynamicImage], width: u32, height: u32) -> Array<f32, IxDyn> {
    let mut ys =
        Array::from_elem((xs.len(), 3, height as usize, width as usize), PAD_VALUE).into_dyn();
    for (idx, x) in xs.iter().enumerate() {
        let (w0, h0) = x.dimensions();
        let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
        let img = x
            .resize_exact(
                (w_new as u32).clamp(1, width),
                (h_new as u32).clamp(1, height),
                FilterType::Triangle,
            )
            .to_rgb8();

        for (x, y, rgb) in img.enumerate_pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b] = rgb.0;
            ys[[idx, 0, y, x]] = (r as f32) / 255.0;
            ys[[idx, 1, y, x]] = (g as f32) / 255.0;
            ys[[idx, 2, y, x]] = (b as f32) / 255.0;
        }
    }
    ys
}

impl super::Model for YOLOv8 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        Ok(vec![letterbox(images, self.width(), self.height())])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, _profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let Some(x) = xs.into_iter().next() else {
            bail!("no input tensor");
        };
        self.engine.run(x)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Detection>>> {
        self.postprocessor.postprocess(xs, xs0)
    }

    fn class_name(&self, class_id: u32) -> &str {
        self.names
            .get(class_id as usize)
            .map(String::as_str)
            .unwrap_or(super::UNKNOWN_CLASS)
    }

    fn summary(&self) -> String {
        format!(
            "YOLOv8{} | EP: {:?} | {}x{} ({}) | nc: {} | conf: {} | iou: {} | max_det: {}",
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::new(),
            },
            self.engine.ep(),
            self.width(),
            self.height(),
            if self.engine.is_height_dynamic() || self.engine.is_width_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.postprocessor.config.nc,
            self.postprocessor.config.conf,
            self.postprocessor.config.iou,
            self.postprocessor.config.max_det,
        )
    }
}

/// YOLOv8 后处理配置
#[derive(Debug, Clone)]
pub struct YOLOv8Config {
    pub nc: usize,
    pub conf: f32,
    pub iou: f32,
    pub max_det: usize,
    pub width: usize,
    pub height: usize,
}

/// YOLOv8 后处理器: 原始输出 [batch, 4 + nc, anchors] → 检测结果
#[derive(Debug, Clone)]
pub struct YOLOv8Postprocessor {
    config: YOLOv8Config,
}

impl YOLOv8Postprocessor {
    pub fn new(config: YOLOv8Config) -> Self {
        Self { config }
    }

    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Detection>>> {
        const CXYWH_OFFSET: usize = 4;

        let Some(preds) = xs.first() else {
            bail!("model produced no outputs");
        };
        let shape = preds.shape();
        if shape.len() != 3 || shape[1] < CXYWH_OFFSET + self.config.nc {
            bail!(
                "unexpected output shape {:?}, expected [batch, {}, anchors]",
                shape,
                CXYWH_OFFSET + self.config.nc
            );
        }
        if shape[0] != xs0.len() {
            bail!("batch size {} does not match {} images", shape[0], xs0.len());
        }

        let mut ys = Vec::with_capacity(xs0.len());
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let width_original = xs0[idx].width() as f32;
            let height_original = xs0[idx].height() as f32;
            let ratio = (self.config.width as f32 / width_original)
                .min(self.config.height as f32 / height_original);

            let mut data: Vec<Detection> = Vec::new();
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + self.config.nc]);

                let Some((id, &confidence)) = clss
                    .into_iter()
                    .enumerate()
                    .reduce(|max, x| if x.1 > max.1 { x } else { max })
                else {
                    continue;
                };

                if !confidence.is_finite() || confidence < self.config.conf {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                let y_bbox =
                    BBox::from_cxcywh(cx, cy, w, h).clip(width_original, height_original);

                data.push(Detection::new(id as u32, confidence, y_bbox));
            }

            non_max_suppression(&mut data, self.config.iou, self.config.max_det);
            ys.push(data);
        }

        Ok(ys)
    }
}
