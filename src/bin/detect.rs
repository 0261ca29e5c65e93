// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detect.rs - 命令行检测入口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

use kanjian::{
  FromUrl,
  chunk::Cut,
  client::client_from_url,
  detector::ObjectDetector,
  input::InputWrapper,
  label::{FontColor, LabelConfig},
  output::{OutputWrapper, Render},
  prompt::PromptSet,
};

/// Kanjian 检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 image:///photos/desk.jpg 或 image:///photos/
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出目标，可重复指定
  /// 支持格式:
  /// - json: 或 json:///out/result.json
  /// - image:///out/ 或 image:///out/result.png
  #[arg(long, value_name = "OUTPUT", default_value = "json:")]
  pub output: Vec<Url>,

  /// 识别与定位所用的模型，例如 gemini:///gemini-1.5-pro-preview-0409?project=my-project
  #[arg(long, value_name = "MODEL")]
  pub identifier: Url,

  /// 验证所用的模型，例如 openai:///gpt-4o，缺省时与识别模型相同
  #[arg(long, value_name = "MODEL")]
  pub verifier: Option<Url>,

  /// 切分配置，可重复指定，例如 --cut 4x3 --cut 2x1
  #[arg(long = "cut", value_name = "VxH", default_value = "4x3")]
  pub cuts: Vec<Cut>,

  /// 分块级线程数（0 表示按 CPU 数）
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub chunk_threads: usize,

  /// 目标级线程数（0 表示按 CPU 数）
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub item_threads: usize,

  /// 标签间距（像素）
  #[arg(long, default_value = "30", value_name = "PIXELS")]
  pub increment: u32,

  /// 标签网格边距（像素）
  #[arg(long, default_value = "10", value_name = "PIXELS")]
  pub padding: u32,

  #[arg(long, default_value = "11.0", value_name = "PIXELS")]
  pub font_size: f32,

  /// 标签文字颜色，颜色名或 #rrggbb
  #[arg(long, default_value = "magenta", value_name = "COLOR")]
  pub font_color: FontColor,

  /// 提示词目录，缺省时使用内置提示词
  #[arg(long, value_name = "DIR")]
  pub prompts: Option<PathBuf>,

  /// 打乱结果所用的随机种子
  #[arg(long, value_name = "SEED")]
  pub seed: Option<u64>,

  /// 额外保存带标签的图像
  #[arg(long, value_name = "FILE")]
  pub labeled_output: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("识别模型: {}", args.identifier);

  let identifier = client_from_url(&args.identifier)?;
  let verifier = match &args.verifier {
    Some(url) => {
      info!("验证模型: {}", url);
      client_from_url(url)?
    }
    None => Arc::clone(&identifier),
  };

  let prompts = match &args.prompts {
    Some(dir) => PromptSet::from_dir(dir)?,
    None => PromptSet::builtin(),
  };

  let detector = ObjectDetector::builder()
    .chunk_threads(args.chunk_threads)
    .item_threads(args.item_threads)
    .cuts(args.cuts.clone())
    .label_config(LabelConfig {
      increment: args.increment,
      padding: args.padding,
      font_size: args.font_size,
      font_color: args.font_color,
    })
    .prompts(prompts)
    .seed(args.seed)
    .labeled_output(args.labeled_output.clone())
    .build(identifier, verifier)?;

  let outputs = args
    .output
    .iter()
    .map(OutputWrapper::from_url)
    .collect::<Result<Vec<_>, _>>()?;
  let input = InputWrapper::from_url(&args.input)?;

  info!("开始检测...");
  for image in input {
    let image = image?;
    info!("检测图像: {}", image.path.display());

    let now = std::time::Instant::now();
    let result = match detector.detect_objects(&image.frame) {
      Ok(result) => result,
      Err(e) => {
        error!("图像 {} 检测失败: {}", image.path.display(), e);
        continue;
      }
    };
    info!(
      "检测完成，共 {} 个目标，耗时: {:.2?}",
      result.items.len(),
      now.elapsed()
    );

    for output in &outputs {
      output.render_result(&image, &result)?;
    }
  }

  Ok(())
}
