// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 交通视觉分析 (Traffic AI Analyzer)
///
/// 子命令:
/// 1. analyze: 图片 → YOLOv8 车辆检测 → 交通指标 (JSON)
/// 2. score:   已有检测结果 → 交通指标 (无需模型)
/// 3. policy:  打印车辆类别策略表
/// 4. serve:   HTTP 服务 (POST /api/analyze)
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use tracing_subscriber::EnvFilter;

use traffic_ai::config::{Device, DetectorConfig};
use traffic_ai::pipeline::run_batch;
use traffic_ai::server;
use traffic_ai::{analyze, AnalyzeError, Detection, TrafficAnalyzer, COCO_POLICY};

#[derive(Parser, Debug)]
#[command(author, version, about = "交通视觉分析 - 车辆检测与信号配时", long_about = None)]
struct Cli {
    /// JSON配置文件 (命令行参数优先)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 输出格式化JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分析图片: 检测车辆并计算交通指标
    Analyze {
        /// 图片文件 (多个文件时逐行输出JSON记录)
        #[arg(required = true, value_name = "IMAGE")]
        images: Vec<PathBuf>,

        #[command(flatten)]
        detector: DetectorArgs,

        /// 解码线程数
        #[arg(short = 'j', long, default_value_t = 2)]
        workers: usize,
    },
    /// 对检测结果JSON (Detection数组) 打分,`-` 表示标准输入
    Score {
        #[arg(value_name = "DETECTIONS")]
        input: String,
    },
    /// 打印车辆类别策略表
    Policy,
    /// 启动HTTP服务: POST /api/analyze (multipart 字段 `file`)
    Serve {
        /// 监听地址
        #[arg(long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,

        #[command(flatten)]
        detector: DetectorArgs,
    },
}

/// 检测器参数 (覆盖配置文件)
#[derive(clap::Args, Debug)]
struct DetectorArgs {
    /// ONNX模型路径
    #[arg(short, long)]
    model: Option<String>,

    /// 模型不存在时的下载地址
    #[arg(long)]
    model_url: Option<String>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IOU阈值
    #[arg(long)]
    iou: Option<f32>,

    /// 推理尺寸 (长边)
    #[arg(long)]
    imgsz: Option<u32>,

    /// 每张图最多保留的检测数
    #[arg(long)]
    max_det: Option<usize>,

    /// 推理设备: cpu 或 cuda:<id>
    #[arg(long)]
    device: Option<Device>,

    /// ONNX Runtime 线程数
    #[arg(long)]
    threads: Option<usize>,

    /// 记录各阶段耗时
    #[arg(long)]
    profile: bool,
}

impl DetectorArgs {
    fn apply(self, config: &mut DetectorConfig) {
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(url) = self.model_url {
            config.model_url = Some(url);
        }
        if let Some(conf) = self.conf {
            config.conf_threshold = conf;
        }
        if let Some(iou) = self.iou {
            config.iou_threshold = iou;
        }
        if let Some(imgsz) = self.imgsz {
            config.imgsz = imgsz;
        }
        if let Some(max_det) = self.max_det {
            config.max_det = max_det;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(threads) = self.threads {
            config.intra_threads = Some(threads);
        }
        config.profile |= self.profile;
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let s = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", s);
    Ok(())
}

/// 配置文件 + 命令行参数 → 分析器
fn build_analyzer(config: Option<&Path>, detector: DetectorArgs) -> Result<TrafficAnalyzer> {
    let mut config = match config {
        Some(path) => DetectorConfig::load(path)?,
        None => DetectorConfig::default(),
    };
    detector.apply(&mut config);
    config.validate()?;
    TrafficAnalyzer::from_config(&config)
}

fn exit_code_for(err: &AnalyzeError) -> ExitCode {
    if err.is_client_error() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Analyze {
            images,
            detector,
            workers,
        } => {
            let analyzer = build_analyzer(cli.config.as_deref(), detector)?;

            if let [image] = images.as_slice() {
                return match analyzer.analyze_file(image) {
                    Ok(result) => {
                        print_json(&result, cli.pretty)?;
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(e) => {
                        print_json(&e.body(), cli.pretty)?;
                        Ok(exit_code_for(&e))
                    }
                };
            }

            let mut write_err = None;
            let summary = run_batch(&analyzer, images, workers, |report| {
                if write_err.is_none() {
                    write_err = print_json(&report, cli.pretty).err();
                }
            });
            if let Some(e) = write_err {
                return Err(e);
            }
            Ok(if summary.server_errors > 0 {
                ExitCode::FAILURE
            } else if summary.client_errors > 0 {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Score { input } => {
            let reader: Box<dyn Read> = if input == "-" {
                Box::new(io::stdin())
            } else {
                Box::new(File::open(&input).with_context(|| format!("failed to open {}", input))?)
            };
            let detections: Vec<Detection> = serde_json::from_reader(BufReader::new(reader))
                .context("expected a JSON array of detections")?;
            print_json(&analyze(&detections), cli.pretty)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Policy => {
            println!("{:>8}  {:<12} {:>12}", "class_id", "label", "g CO2/min");
            for rule in COCO_POLICY.rules() {
                println!(
                    "{:>8}  {:<12} {:>12}",
                    rule.class_id, rule.class, rule.co2_g_per_min
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { bind, detector } => {
            let analyzer = Arc::new(build_analyzer(cli.config.as_deref(), detector)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build tokio runtime")?;
            runtime.block_on(server::serve(analyzer, bind))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
