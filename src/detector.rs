// 该文件是 Kanjian （看见） 项目的一部分。
// src/detector.rs - 识别、定位、验证三阶段检测流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  chunk::{ChunkError, ChunkPair, Cut, chunk_pairs},
  client::{ClientError, Message, ModelClient},
  frame::{EncodedFrame, FrameKind},
  label::{LabelConfig, LabelError, LabelMap, Labeler},
  prompt::{PromptError, PromptSet},
};

const DEFAULT_CHUNK_THREADS: usize = 100;
const DEFAULT_ITEM_THREADS: usize = 100;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("标注错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("分块错误: {0}")]
  ChunkError(#[from] ChunkError),
  #[error("线程池创建失败: {0}")]
  PoolError(#[from] ThreadPoolBuildError),
}

/// 单个工作任务内部的错误，只记录日志，不向外传播
#[derive(Error, Debug)]
enum StageError {
  #[error("提示词错误: {0}")]
  Prompt(#[from] PromptError),
  #[error("模型请求错误: {0}")]
  Client(#[from] ClientError),
}

/// 流水线阶段，严格向前推进
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Labeling,
  Chunking,
  Identifying,
  Locating,
  Verifying,
  Done,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Labeling => "标注",
      Stage::Chunking => "分块",
      Stage::Identifying => "识别",
      Stage::Locating => "定位",
      Stage::Verifying => "验证",
      Stage::Done => "完成",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectItem {
  pub name: String,
  pub label: String,
  pub x: u32,
  pub y: u32,
}

/// 各阶段计数，满足 verified <= located <= candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectStats {
  pub chunks: usize,
  pub candidates: usize,
  pub located: usize,
  pub verified: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectResult {
  /// 已打乱顺序，位置没有含义
  pub items: Box<[DetectItem]>,
  pub stats: DetectStats,
}

/// 验证阶段对模型回复的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
  Confirmed,
  Rejected,
  /// 两段，但结论不是 yes/no
  Unrecognized,
  /// 切分后不是恰好两段
  Malformed,
}

/// 识别回复按 `|` 切分，去掉空白与空名称
fn parse_candidates(response: &str) -> Vec<String> {
  response
    .split('|')
    .map(str::trim)
    .filter(|name| !name.is_empty())
    .map(str::to_string)
    .collect()
}

/// 验证回复应为 `理由|yes` 或 `理由|no`
fn parse_verdict(response: &str) -> Verdict {
  let parts: Vec<&str> = response.split('|').map(str::trim).collect();
  match parts.as_slice() {
    [_, "yes"] => Verdict::Confirmed,
    [_, "no"] => Verdict::Rejected,
    [_, _] => Verdict::Unrecognized,
    _ => Verdict::Malformed,
  }
}

#[derive(Debug, Default)]
struct ChunkOutcome {
  candidates: usize,
  located: usize,
  items: Vec<DetectItem>,
}

pub struct ObjectDetectorBuilder {
  chunk_threads: usize,
  item_threads: usize,
  cuts: Vec<Cut>,
  label: LabelConfig,
  prompts: PromptSet,
  seed: Option<u64>,
  labeled_output: Option<PathBuf>,
}

impl Default for ObjectDetectorBuilder {
  fn default() -> Self {
    Self {
      chunk_threads: DEFAULT_CHUNK_THREADS,
      item_threads: DEFAULT_ITEM_THREADS,
      cuts: vec![Cut::default()],
      label: LabelConfig::default(),
      prompts: PromptSet::builtin(),
      seed: None,
      labeled_output: None,
    }
  }
}

impl ObjectDetectorBuilder {
  /// 分块级线程池大小，0 表示由 rayon 按 CPU 数决定
  pub fn chunk_threads(mut self, threads: usize) -> Self {
    self.chunk_threads = threads;
    self
  }

  /// 目标级线程池大小，0 表示由 rayon 按 CPU 数决定
  pub fn item_threads(mut self, threads: usize) -> Self {
    self.item_threads = threads;
    self
  }

  pub fn cuts(mut self, cuts: Vec<Cut>) -> Self {
    self.cuts = cuts;
    self
  }

  pub fn label_config(mut self, label: LabelConfig) -> Self {
    self.label = label;
    self
  }

  pub fn prompts(mut self, prompts: PromptSet) -> Self {
    self.prompts = prompts;
    self
  }

  /// 固定打乱顺序所用的随机种子
  pub fn seed(mut self, seed: Option<u64>) -> Self {
    self.seed = seed;
    self
  }

  pub fn labeled_output(mut self, path: Option<PathBuf>) -> Self {
    self.labeled_output = path;
    self
  }

  /// `identifier` 负责识别与定位，`verifier` 负责验证，两者可以是同一个客户端
  pub fn build(
    self,
    identifier: Arc<dyn ModelClient>,
    verifier: Arc<dyn ModelClient>,
  ) -> Result<ObjectDetector, DetectError> {
    if self.cuts.is_empty() {
      warn!("未配置任何切分，检测结果将始终为空");
    }

    let labeler = Labeler::new(self.label)?.with_labeled_output(self.labeled_output);
    let chunk_pool = ThreadPoolBuilder::new()
      .num_threads(self.chunk_threads)
      .thread_name(|i| format!("kanjian-chunk-{}", i))
      .build()?;
    let item_pool = ThreadPoolBuilder::new()
      .num_threads(self.item_threads)
      .thread_name(|i| format!("kanjian-item-{}", i))
      .build()?;
    info!(
      "线程池已创建: 分块 {} 线程, 目标 {} 线程",
      chunk_pool.current_num_threads(),
      item_pool.current_num_threads()
    );

    Ok(ObjectDetector {
      labeler,
      cuts: self.cuts,
      prompts: self.prompts,
      seed: self.seed,
      identifier,
      verifier,
      chunk_pool,
      item_pool,
    })
  }
}

/// 检测流水线
///
/// 持有两个独立容量的线程池：分块级任务运行在 `chunk_pool` 上，
/// 并在其中把定位与验证任务提交到 `item_pool`。检测器销毁时两个池随之销毁，
/// rayon 只通知工作线程退出，不等待它们结束。
pub struct ObjectDetector {
  labeler: Labeler,
  cuts: Vec<Cut>,
  prompts: PromptSet,
  seed: Option<u64>,
  identifier: Arc<dyn ModelClient>,
  verifier: Arc<dyn ModelClient>,
  chunk_pool: ThreadPool,
  item_pool: ThreadPool,
}

impl ObjectDetector {
  pub fn builder() -> ObjectDetectorBuilder {
    ObjectDetectorBuilder::default()
  }

  pub fn cuts(&self) -> &[Cut] {
    &self.cuts
  }

  /// 运行一次完整检测
  ///
  /// 只有图像本身无法解码或无法切分时才返回错误；单个分块或目标的失败只会让它被跳过。
  pub fn detect_objects(&self, image: &EncodedFrame) -> Result<DetectResult, DetectError> {
    info!("[{}] 开始绘制标签网格", Stage::Labeling);
    let (labels, labeled) = self.labeler.label_image(image)?;
    info!("[{}] 共 {} 个标签", Stage::Labeling, labels.len());

    let pairs = chunk_pairs(image, &labeled, &self.cuts)?;
    info!(
      "[{}] 切分 {:?} 共得到 {} 个分块",
      Stage::Chunking,
      self.cuts.iter().map(Cut::to_string).collect::<Vec<_>>(),
      pairs.len()
    );

    let now = std::time::Instant::now();
    let outcomes: Vec<ChunkOutcome> = self.chunk_pool.install(|| {
      pairs
        .par_iter()
        .map(|pair| self.chunk_worker(pair, &labels))
        .collect()
    });

    let mut stats = DetectStats {
      chunks: pairs.len(),
      ..DetectStats::default()
    };
    let mut items = Vec::new();
    for outcome in outcomes {
      stats.candidates += outcome.candidates;
      stats.located += outcome.located;
      items.extend(outcome.items);
    }
    stats.verified = items.len();

    // 下游模型更关注靠前的条目，打乱以消除位置偏差
    let mut rng = match self.seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    items.shuffle(&mut rng);

    info!(
      "[{}] 候选 {} 个, 定位 {} 个, 验证通过 {} 个, 耗时: {:.2?}",
      Stage::Done,
      stats.candidates,
      stats.located,
      stats.verified,
      now.elapsed()
    );

    Ok(DetectResult {
      items: items.into_boxed_slice(),
      stats,
    })
  }

  fn chunk_worker(&self, pair: &ChunkPair, labels: &LabelMap) -> ChunkOutcome {
    let names = match self.identify(pair) {
      Ok(names) => names,
      Err(e) => {
        error!("[{}] 分块 {} 识别失败，跳过: {}", Stage::Identifying, pair.index, e);
        return ChunkOutcome::default();
      }
    };
    debug!(
      "[{}] 分块 {} ({}) 候选: {:?}",
      Stage::Identifying,
      pair.index,
      pair.cut,
      names
    );
    if names.is_empty() {
      return ChunkOutcome::default();
    }

    let locate_image = self.identifier.format_image_message(pair.frame(FrameKind::Labeled));
    let located: Vec<DetectItem> = self.item_pool.install(|| {
      names
        .par_iter()
        .filter_map(|name| self.locate_worker(pair.index, name, &locate_image, labels))
        .collect()
    });
    let located_count = located.len();

    let verify_image = self.verifier.format_image_message(pair.frame(FrameKind::Labeled));
    let verified: Vec<DetectItem> = self.item_pool.install(|| {
      located
        .into_par_iter()
        .filter_map(|item| self.verify_worker(pair.index, item, &verify_image))
        .collect()
    });

    ChunkOutcome {
      candidates: names.len(),
      located: located_count,
      items: verified,
    }
  }

  fn identify(&self, pair: &ChunkPair) -> Result<Vec<String>, StageError> {
    let prompt = self.prompts.identify()?;
    let messages = [
      self.identifier.format_image_message(pair.frame(FrameKind::Raw)),
      self.identifier.format_text_message(&prompt),
    ];
    let response = self.identifier.request_message(&messages)?;
    Ok(parse_candidates(&response))
  }

  fn locate(&self, name: &str, labeled_image: &Message) -> Result<String, StageError> {
    let prompt = self.prompts.locate(name)?;
    let messages = [
      labeled_image.clone(),
      self.identifier.format_text_message(&prompt),
    ];
    Ok(self.identifier.request_message(&messages)?)
  }

  fn locate_worker(
    &self,
    chunk: usize,
    name: &str,
    labeled_image: &Message,
    labels: &LabelMap,
  ) -> Option<DetectItem> {
    let response = match self.locate(name, labeled_image) {
      Ok(response) => response,
      Err(e) => {
        error!("[{}] 分块 {} 定位 '{}' 失败: {}", Stage::Locating, chunk, name, e);
        return None;
      }
    };

    let label = response.trim();
    match labels.get(label) {
      Some((x, y)) => Some(DetectItem {
        name: name.to_string(),
        label: label.to_string(),
        x,
        y,
      }),
      None => {
        warn!(
          "[{}] 分块 {} 中 '{}' 的标签 '{}' 不存在，丢弃",
          Stage::Locating,
          chunk,
          name,
          label
        );
        None
      }
    }
  }

  fn verify(&self, item: &DetectItem, labeled_image: &Message) -> Result<String, StageError> {
    let prompt = self.prompts.verify(&item.name, &item.label)?;
    let messages = [
      labeled_image.clone(),
      self.verifier.format_text_message(&prompt),
    ];
    Ok(self.verifier.request_message(&messages)?)
  }

  /// 回复为 no 或结论无法识别时丢弃；请求出错或回复不是两段时保留
  fn verify_worker(
    &self,
    chunk: usize,
    item: DetectItem,
    labeled_image: &Message,
  ) -> Option<DetectItem> {
    let response = match self.verify(&item, labeled_image) {
      Ok(response) => response,
      Err(e) => {
        warn!(
          "[{}] 分块 {} 验证 '{}' 出错，保留该目标: {}",
          Stage::Verifying,
          chunk,
          item.name,
          e
        );
        return Some(item);
      }
    };

    match parse_verdict(&response) {
      Verdict::Confirmed => Some(item),
      Verdict::Rejected => {
        debug!(
          "[{}] 分块 {} 中 '{}'@{} 未通过验证",
          Stage::Verifying,
          chunk,
          item.name,
          item.label
        );
        None
      }
      Verdict::Unrecognized => {
        warn!(
          "[{}] 分块 {} 中 '{}' 的验证回复无法识别，丢弃: {}",
          Stage::Verifying,
          chunk,
          item.name,
          response
        );
        None
      }
      Verdict::Malformed => {
        warn!(
          "[{}] 分块 {} 中 '{}' 的验证回复格式错误，保留该目标: {}",
          Stage::Verifying,
          chunk,
          item.name,
          response
        );
        Some(item)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn candidates_are_split_and_trimmed() {
    assert_eq!(
      parse_candidates(" red mug |laptop|  potted plant \n"),
      vec!["red mug", "laptop", "potted plant"]
    );
    assert_eq!(parse_candidates("cat"), vec!["cat"]);
  }

  #[test]
  fn empty_candidates_are_dropped() {
    assert!(parse_candidates("").is_empty());
    assert!(parse_candidates(" | |").is_empty());
    assert_eq!(parse_candidates("cat||dog|"), vec!["cat", "dog"]);
  }

  #[test]
  fn verdict_requires_two_parts() {
    assert_eq!(parse_verdict("on the handle|yes"), Verdict::Confirmed);
    assert_eq!(parse_verdict(" sits on the table | no "), Verdict::Rejected);
    assert_eq!(parse_verdict("yes"), Verdict::Malformed);
    assert_eq!(parse_verdict("a|b|yes"), Verdict::Malformed);
    assert_eq!(parse_verdict(""), Verdict::Malformed);
    assert_eq!(parse_verdict("reason|maybe"), Verdict::Unrecognized);
    assert_eq!(parse_verdict("reason|Yes"), Verdict::Unrecognized);
  }

  #[test]
  fn dropping_detector_releases_clients() {
    let client: Arc<dyn ModelClient> = Arc::new(crate::client::ScriptedClient::constant("ok|yes"));
    let detector = ObjectDetector::builder()
      .chunk_threads(1)
      .item_threads(1)
      .build(client.clone(), client.clone())
      .unwrap();
    assert_eq!(Arc::strong_count(&client), 3);
    drop(detector);
    assert_eq!(Arc::strong_count(&client), 1);
  }

  #[test]
  fn stage_names() {
    assert_eq!(Stage::Identifying.to_string(), "识别");
    assert_eq!(Stage::Done.to_string(), "完成");
  }
}
