// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection)
///
/// 检测器适配层的窄数据契约:
/// - Detection: 类别编号 + 置信度 (+ 检测框)
/// - non_max_suppression: 按类别去重
pub mod types;

pub use types::{
    non_max_suppression, BBox, Detection, CONF_THRESHOLD, INF_SIZE, IOU_THRESHOLD, MAX_DET,
};
