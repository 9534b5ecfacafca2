// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
// 交通视觉分析: YOLOv8 车辆检测 → 交通信号控制指标
pub mod analyzer; // 服务入口: 解码 → 检测 → 聚合
pub mod config; // 检测器配置参数
pub mod detection; // 检测数据契约与NMS
pub mod error; // 服务边界错误
pub mod metrics; // 交通指标聚合器
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 批量分析流水线
pub mod policy; // 车辆类别策略表
pub mod server; // HTTP 接口 (warp)

pub mod ort_backend;

pub use crate::analyzer::TrafficAnalyzer;
pub use crate::config::DetectorConfig;
pub use crate::detection::{BBox, Detection};
pub use crate::error::{AnalyzeError, ErrorBody};
pub use crate::metrics::{analyze, AnalysisResult, SystemStatus, VehicleBreakdown};
pub use crate::models::{Model, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};
pub use crate::policy::{VehicleClass, VehicleClassPolicy, COCO_POLICY};
