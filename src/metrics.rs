// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 交通指标聚合器 (Traffic Metrics Aggregator)
//!
//! 检测结果 → 车辆计数、CO₂ 排放、绿灯时长、能效评分、拥堵等级。
//! 纯函数,无 I/O,对任意输入(包括空输入)都有定义。

use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::policy::{VehicleClass, COCO_POLICY};

/// 绿灯时长下限 (秒)
pub const GREEN_MIN_SECONDS: u32 = 15;
/// 绿灯时长上限 (秒)
pub const GREEN_MAX_SECONDS: u32 = 120;
/// 能效评分下限 (%)
pub const ENERGY_FLOOR_PERCENT: u32 = 15;

/// 拥堵等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemStatus {
    Clear,
    Normal,
    Moderate,
    Congested,
}

impl SystemStatus {
    /// 仅由车辆数决定,按顺序匹配第一条规则
    pub fn from_vehicle_count(n: u32) -> Self {
        if n == 0 {
            SystemStatus::Clear
        } else if n <= 5 {
            SystemStatus::Normal
        } else if n <= 15 {
            SystemStatus::Moderate
        } else {
            SystemStatus::Congested
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Clear => "CLEAR",
            SystemStatus::Normal => "NORMAL",
            SystemStatus::Moderate => "MODERATE",
            SystemStatus::Congested => "CONGESTED",
        }
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// 各类车辆计数,四个字段始终存在
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleBreakdown {
    pub car: u32,
    pub motorcycle: u32,
    pub bus: u32,
    pub truck: u32,
}

impl VehicleBreakdown {
    pub fn get(&self, class: VehicleClass) -> u32 {
        match class {
            VehicleClass::Car => self.car,
            VehicleClass::Motorcycle => self.motorcycle,
            VehicleClass::Bus => self.bus,
            VehicleClass::Truck => self.truck,
        }
    }

    fn slot_mut(&mut self, class: VehicleClass) -> &mut u32 {
        match class {
            VehicleClass::Car => &mut self.car,
            VehicleClass::Motorcycle => &mut self.motorcycle,
            VehicleClass::Bus => &mut self.bus,
            VehicleClass::Truck => &mut self.truck,
        }
    }

    pub fn total(&self) -> u32 {
        VehicleClass::ALL
            .iter()
            .fold(0u32, |acc, &class| acc.saturating_add(self.get(class)))
    }
}

/// 分析结果 (响应体)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub vehicles_detected: u32,
    pub co2_rate_g_per_min: u32,
    pub green_signal_time_seconds: u32,
    pub energy_score_percent: u32,
    pub system_status: SystemStatus,
    pub vehicle_breakdown: VehicleBreakdown,
}

/// 推荐绿灯时长: clamp(trunc(3 + n * 2.5), 15, 120)
///
/// 3 + 2.5n == (6 + 5n) / 2,非负整数除法即向零截断。
pub fn green_signal_time(n: u32) -> u32 {
    let raw = (6 + 5 * u64::from(n)) / 2;
    raw.clamp(u64::from(GREEN_MIN_SECONDS), u64::from(GREEN_MAX_SECONDS)) as u32
}

/// 能效评分: max(15, 100 - 4n),不设上限
pub fn energy_score(n: u32) -> u32 {
    100u32
        .saturating_sub(n.saturating_mul(4))
        .max(ENERGY_FLOOR_PERCENT)
}

/// 聚合检测结果,只读取类别编号
pub fn analyze(detections: &[Detection]) -> AnalysisResult {
    analyze_class_ids(detections.iter().map(|d| d.class_id))
}

/// 计数饱和于 u32::MAX,任意长度的输入都不会溢出
fn analyze_class_ids(class_ids: impl IntoIterator<Item = u32>) -> AnalysisResult {
    let mut vehicles_detected = 0u32;
    let mut co2_rate_g_per_min = 0u32;
    let mut vehicle_breakdown = VehicleBreakdown::default();

    for class_id in class_ids {
        // 未识别类别直接跳过
        let Some(rule) = COCO_POLICY.lookup(class_id) else {
            continue;
        };
        vehicles_detected = vehicles_detected.saturating_add(1);
        co2_rate_g_per_min = co2_rate_g_per_min.saturating_add(rule.co2_g_per_min);
        let slot = vehicle_breakdown.slot_mut(rule.class);
        *slot = slot.saturating_add(1);
    }

    AnalysisResult {
        vehicles_detected,
        co2_rate_g_per_min,
        green_signal_time_seconds: green_signal_time(vehicles_detected),
        energy_score_percent: energy_score(vehicles_detected),
        system_status: SystemStatus::from_vehicle_count(vehicles_detected),
        vehicle_breakdown,
    }
}
