// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测数据结构定义
/// Data structures shared by the detector adapter and the aggregator
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// YOLOv8推理输入尺寸 (长边)
pub const INF_SIZE: u32 = 640;

/// 检测置信度阈值
pub const CONF_THRESHOLD: f32 = 0.15;

/// NMS IOU阈值
pub const IOU_THRESHOLD: f32 = 0.7;

/// 单张图片最多保留的检测数
pub const MAX_DET: usize = 300;

// ========== 数据结构 ==========

/// 检测框 (源图像像素坐标)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 由中心点与宽高构造
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.,
            y1: cy - h / 2.,
            x2: cx + w / 2.,
            y2: cy + h / 2.,
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn iou(&self, another: &BBox) -> f32 {
        let inter = self.intersection_area(another);
        let union = self.area() + another.area() - inter;
        if union <= 0. {
            return 0.;
        }
        inter / union
    }

    /// 裁剪到图像范围内
    pub fn clip(self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0., width),
            y1: self.y1.clamp(0., height),
            x2: self.x2.clamp(0., width),
            y2: self.y2.clamp(0., height),
        }
    }
}

/// 单个检测结果
///
/// 检测器输出在边界处立即转换为此结构,聚合器只读取 `class_id`。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// COCO 类别编号 (car=2, motorcycle=3, bus=5, truck=7)
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    /// 不关心位置时使用 (离线打分、测试)
    pub fn of_class(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            bbox: BBox::default(),
        }
    }
}

/// 按类别的非极大值抑制 (agnostic = false)
///
/// 置信度降序排序后,同类别且 IoU 超过阈值的框被丢弃;结果截断到 `max_det`。
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32, max_det: usize) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            if xs[prev_index].bbox.iou(&xs[index].bbox) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
            if current_index == max_det {
                break;
            }
        }
    }
    xs.truncate(current_index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BBox::new(0., 0., 10., 10.);
        let b = BBox::new(5., 0., 15., 10.);
        assert!((a.iou(&b) - 50. / 150.).abs() < 1e-6);
        assert_eq!(a.iou(&BBox::new(20., 20., 30., 30.)), 0.);
        assert!((a.iou(&a) - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box_iou() {
        let empty = BBox::default();
        assert_eq!(empty.iou(&empty), 0.);
    }

    #[test]
    fn test_nms_same_class_suppressed() {
        let mut xs = vec![
            Detection::new(2, 0.6, BBox::new(0., 0., 10., 10.)),
            Detection::new(2, 0.9, BBox::new(1., 1., 11., 11.)),
            Detection::new(2, 0.5, BBox::new(50., 50., 60., 60.)),
        ];
        non_max_suppression(&mut xs, 0.5, MAX_DET);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.9);
        assert_eq!(xs[1].confidence, 0.5);
    }

    #[test]
    fn test_nms_keeps_overlapping_different_classes() {
        // 卡车和轿车框重叠时都保留
        let mut xs = vec![
            Detection::new(2, 0.8, BBox::new(0., 0., 10., 10.)),
            Detection::new(7, 0.7, BBox::new(0., 0., 10., 10.)),
        ];
        non_max_suppression(&mut xs, 0.5, MAX_DET);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_nms_max_det() {
        let mut xs: Vec<Detection> = (0..10)
            .map(|i| {
                let x = i as f32 * 100.;
                Detection::new(2, 0.5 + i as f32 * 0.01, BBox::new(x, 0., x + 10., 10.))
            })
            .collect();
        non_max_suppression(&mut xs, 0.5, 3);
        assert_eq!(xs.len(), 3);
        assert!(xs[0].confidence >= xs[1].confidence);
    }

    #[test]
    fn test_detection_json_without_bbox() {
        let d: Detection = serde_json::from_str(r#"{"class_id": 7, "confidence": 0.4}"#).unwrap();
        assert_eq!(d.class_id, 7);
        assert_eq!(d.bbox, BBox::default());
    }
}
