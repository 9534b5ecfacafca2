// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 批量分析流水线 (Batch Pipeline)
///
/// 双阶段架构,通过有界通道通信:
/// - Decoder:  读取并解码图片 (多个工作线程)
/// - Analyzer: 检测 + 指标聚合 (调用线程)
use std::path::{Path, PathBuf};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};
use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::analyzer::{decode_image, read_image_file, TrafficAnalyzer};
use crate::error::{AnalyzeError, ErrorBody};
use crate::metrics::AnalysisResult;

/// 解码队列容量
pub const QUEUE_CAPACITY: usize = 16;

/// 已解码帧 (解码线程 → 分析线程)
pub struct DecodedFrame {
    pub seq: usize, // 输入序号
    pub source: PathBuf,
    pub image: Result<DynamicImage, AnalyzeError>,
}

/// 单个文件的分析记录
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub seq: usize,
    pub source: String,
    pub analyzed_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl FrameReport {
    fn new(seq: usize, source: &Path, outcome: Result<AnalysisResult, AnalyzeError>) -> Self {
        let (result, status, error) = match outcome {
            Ok(r) => (Some(r), None, None),
            Err(e) => (None, Some(e.status_code()), Some(e.body())),
        };
        Self {
            seq,
            source: source.display().to_string(),
            analyzed_at: chrono::Utc::now().to_rfc3339(),
            result,
            status,
            error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

/// 批量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub ok: usize,
    pub client_errors: usize,
    pub server_errors: usize,
}

impl BatchSummary {
    fn record(&mut self, report: &FrameReport) {
        self.total += 1;
        match report.status {
            None => self.ok += 1,
            Some(code) if (400..500).contains(&code) => self.client_errors += 1,
            Some(_) => self.server_errors += 1,
        }
    }
}

/// 读取 + 解码
pub fn load_frame(seq: usize, source: PathBuf) -> DecodedFrame {
    let image = read_image_file(&source).and_then(|bytes| decode_image(&bytes));
    DecodedFrame { seq, source, image }
}

fn decode_worker(jobs: Receiver<(usize, PathBuf)>, tx: Sender<DecodedFrame>) {
    for (seq, source) in jobs.iter() {
        let frame = load_frame(seq, source);
        if tx.send(frame).is_err() {
            // 分析线程已退出
            break;
        }
    }
}

/// 批量分析多张图片
///
/// 报告按完成顺序回调,`seq` 对应输入顺序。
pub fn run_batch<F>(
    analyzer: &TrafficAnalyzer,
    sources: Vec<PathBuf>,
    workers: usize,
    mut on_report: F,
) -> BatchSummary
where
    F: FnMut(FrameReport),
{
    let workers = workers.max(1);
    let total = sources.len();
    info!(total, workers, "🔍 批量分析启动");

    let (job_tx, job_rx) = bounded::<(usize, PathBuf)>(total.max(1));
    for job in sources.into_iter().enumerate() {
        // 容量等于任务数,不会阻塞
        let _ = job_tx.send(job);
    }
    drop(job_tx);

    let (tx, rx) = bounded::<DecodedFrame>(QUEUE_CAPACITY);
    let start = Instant::now();
    let mut summary = BatchSummary::default();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let jobs = job_rx.clone();
            let tx = tx.clone();
            scope.spawn(move || decode_worker(jobs, tx));
        }
        drop(tx);

        for frame in rx.iter() {
            let outcome = frame
                .image
                .and_then(|image| analyzer.analyze_image(&image));
            let report = FrameReport::new(frame.seq, &frame.source, outcome);
            debug!(seq = report.seq, source = %report.source, ok = report.is_ok(), "frame done");
            summary.record(&report);
            on_report(report);
        }
    });

    info!(
        total = summary.total,
        ok = summary.ok,
        client_errors = summary.client_errors,
        server_errors = summary.server_errors,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "✅ 批量分析完成"
    );
    summary
}
