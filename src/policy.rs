// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 车辆类别策略表
//!
//! COCO 类别编号 → (标签, 每分钟 CO₂ 排放克数)。进程级只读常量,无需加锁。

use serde::Serialize;

/// 可识别的四类车辆
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl VehicleClass {
    /// 固定顺序,与响应中 vehicle_breakdown 的字段顺序一致
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::Car,
        VehicleClass::Motorcycle,
        VehicleClass::Bus,
        VehicleClass::Truck,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
        }
    }
}

impl std::fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.label())
    }
}

/// 策略表中的一行
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassRule {
    pub class_id: u32,
    pub class: VehicleClass,
    /// g CO₂ / min
    pub co2_g_per_min: u32,
}

/// 类别策略表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VehicleClassPolicy {
    rules: [ClassRule; 4],
}

/// COCO 模型使用的默认策略
pub static COCO_POLICY: VehicleClassPolicy = VehicleClassPolicy {
    rules: [
        ClassRule {
            class_id: 2,
            class: VehicleClass::Car,
            co2_g_per_min: 69,
        },
        ClassRule {
            class_id: 3,
            class: VehicleClass::Motorcycle,
            co2_g_per_min: 15,
        },
        ClassRule {
            class_id: 5,
            class: VehicleClass::Bus,
            co2_g_per_min: 350,
        },
        ClassRule {
            class_id: 7,
            class: VehicleClass::Truck,
            co2_g_per_min: 400,
        },
    ],
};

impl VehicleClassPolicy {
    /// 查找类别编号对应的规则,未识别的类别返回 None
    pub fn lookup(&self, class_id: u32) -> Option<&ClassRule> {
        self.rules.iter().find(|r| r.class_id == class_id)
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_rates() {
        let rates: Vec<(u32, &str, u32)> = COCO_POLICY
            .rules()
            .iter()
            .map(|r| (r.class_id, r.class.label(), r.co2_g_per_min))
            .collect();
        assert_eq!(
            rates,
            vec![
                (2, "car", 69),
                (3, "motorcycle", 15),
                (5, "bus", 350),
                (7, "truck", 400)
            ]
        );
    }

    #[test]
    fn test_lookup_unknown() {
        for id in [0, 1, 4, 6, 8, 79, 1000] {
            assert!(COCO_POLICY.lookup(id).is_none(), "class {} should be ignored", id);
        }
    }
}
