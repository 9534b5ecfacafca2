// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 模型统一接口与实现
///
/// ## Model Trait
/// 统一的模型接口,定义标准流程: preprocess → run → postprocess
///
/// ## 使用示例
/// ```no_run
/// use traffic_ai::config::DetectorConfig;
/// use traffic_ai::models::{Model, YOLOv8};
///
/// let mut model = YOLOv8::new(&DetectorConfig::default())?;
/// let image = image::open("frame.jpg")?;
/// let detections = model.forward(&[image])?;
/// # Ok::<(), anyhow::Error>(())
/// ```
use anyhow::Result;
use image::DynamicImage;
use ndarray::{Array, IxDyn};

use crate::detection::Detection;

/// 统一的检测模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
pub trait Model {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 推理: 执行模型前向传播,返回未解码的原始输出
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 每张图片的检测结果 (已过滤阈值并去重)
    ///
    /// # Arguments
    /// * `xs` - 模型原始输出
    /// * `xs0` - 原始图片(用于坐标还原)
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Detection>>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<Vec<Detection>>> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs, false)?;
        self.postprocess(ys, images)
    }

    /// 类别名称 (用于日志),默认使用 COCO 标签
    fn class_name(&self, class_id: u32) -> &str {
        COCO_NAMES
            .get(class_id as usize)
            .copied()
            .unwrap_or(UNKNOWN_CLASS)
    }

    /// 模型信息摘要
    fn summary(&self) -> String;
}

pub mod hub;
pub mod yolov8;

pub use hub::resolve_model;
pub use yolov8::{YOLOv8, YOLOv8Config, YOLOv8Postprocessor};

/// 超出类别表的编号
pub const UNKNOWN_CLASS: &str = "unknown";

/// COCO 80 类名称 (模型元数据缺失时使用)
pub const COCO_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::COCO_POLICY;

    struct Unnamed;

    impl Model for Unnamed {
        fn preprocess(&mut self, _: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
            Ok(vec![])
        }

        fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, _: bool) -> Result<Vec<Array<f32, IxDyn>>> {
            Ok(xs)
        }

        fn postprocess(
            &self,
            _: Vec<Array<f32, IxDyn>>,
            _: &[DynamicImage],
        ) -> Result<Vec<Vec<Detection>>> {
            Ok(vec![])
        }

        fn summary(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn test_default_class_name() {
        assert_eq!(Unnamed.class_name(7), "truck");
        assert_eq!(Unnamed.class_name(79), "toothbrush");
        assert_eq!(Unnamed.class_name(80), UNKNOWN_CLASS);
    }

    #[test]
    fn test_coco_names_match_policy_labels() {
        for rule in COCO_POLICY.rules() {
            assert_eq!(COCO_NAMES[rule.class_id as usize], rule.class.label());
        }
    }
}
