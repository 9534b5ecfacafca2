// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 服务边界错误
//!
//! 上传格式错误、图像无法读取或解码 → 客户端错误 (400);检测器失败 → 服务端错误 (500)。
//! 聚合器本身没有错误状态。

use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum AnalyzeError {
    #[error("Could not read image {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not decode image")]
    Decode(#[source] image::ImageError),

    #[error("Invalid upload: {0}")]
    Upload(String),

    #[error("Analysis failed: {0:#}")]
    Inference(anyhow::Error),
}

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AnalyzeError {
    pub fn status_code(&self) -> u16 {
        match self {
            AnalyzeError::Read { .. } | AnalyzeError::Decode(_) | AnalyzeError::Upload(_) => 400,
            AnalyzeError::Inference(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            AnalyzeError::Read { source, .. } => ErrorBody {
                error: "Could not read image".to_string(),
                details: Some(source.to_string()),
            },
            AnalyzeError::Decode(_) => ErrorBody {
                error: "Could not decode image".to_string(),
                details: None,
            },
            AnalyzeError::Upload(reason) => ErrorBody {
                error: "Invalid upload".to_string(),
                details: Some(reason.clone()),
            },
            AnalyzeError::Inference(e) => ErrorBody {
                error: "Analysis failed".to_string(),
                details: Some(format!("{:#}", e)),
            },
        }
    }
}
