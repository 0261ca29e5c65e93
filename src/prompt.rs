// 该文件是 Kanjian （看见） 项目的一部分。
// src/prompt.rs - 提示词模板
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use std::path::Path;

use thiserror::Error;
use tracing::info;

const IDENTIFIER_PROMPT_FILE: &str = "identifier_prompt.txt";
const LOCATOR_PROMPT_FILE: &str = "locator_prompt.txt";
const VERIFIER_PROMPT_FILE: &str = "verifier_prompt.txt";

#[derive(Error, Debug)]
pub enum PromptError {
  #[error("读取提示词文件 {path} 失败: {source}")]
  IoError {
    path: String,
    source: std::io::Error,
  },
  #[error("未知的占位符 {{{0}}}")]
  UnknownPlaceholder(String),
  #[error("占位符未闭合，起始于第 {0} 个字符")]
  Unterminated(usize),
  #[error("第 {0} 个字符处出现单独的 '}}'")]
  StrayBrace(usize),
}

/// 支持 `{name}` 形式占位符的文本模板，`{{` 与 `}}` 表示字面量括号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
  text: String,
}

impl PromptTemplate {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into() }
  }

  pub fn as_str(&self) -> &str {
    &self.text
  }

  pub fn render(&self, params: &[(&str, &str)]) -> Result<String, PromptError> {
    let mut out = String::with_capacity(self.text.len());
    let mut chars = self.text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
      match c {
        '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
          chars.next();
          out.push('{');
        }
        '{' => {
          let mut key = String::new();
          loop {
            match chars.next() {
              Some((_, '}')) => break,
              Some((_, k)) => key.push(k),
              None => return Err(PromptError::Unterminated(pos)),
            }
          }
          let value = params
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
            .ok_or(PromptError::UnknownPlaceholder(key))?;
          out.push_str(value);
        }
        '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
          chars.next();
          out.push('}');
        }
        '}' => return Err(PromptError::StrayBrace(pos)),
        c => out.push(c),
      }
    }
    Ok(out)
  }
}

/// 三个阶段使用的提示词
#[derive(Debug, Clone)]
pub struct PromptSet {
  identify: PromptTemplate,
  locate: PromptTemplate,
  verify: PromptTemplate,
}

impl PromptSet {
  /// 构建时用示例参数渲染一次，提前发现模板错误
  pub fn new(
    identify: PromptTemplate,
    locate: PromptTemplate,
    verify: PromptTemplate,
  ) -> Result<Self, PromptError> {
    identify.render(&[])?;
    locate.render(&[("name", "")])?;
    verify.render(&[("name", ""), ("label", "")])?;

    Ok(Self {
      identify,
      locate,
      verify,
    })
  }

  /// 内置提示词
  pub fn builtin() -> Self {
    Self {
      identify: PromptTemplate::new(include_str!("../prompts/identifier_prompt.txt")),
      locate: PromptTemplate::new(include_str!("../prompts/locator_prompt.txt")),
      verify: PromptTemplate::new(include_str!("../prompts/verifier_prompt.txt")),
    }
  }

  /// 从目录读取 `identifier_prompt.txt`、`locator_prompt.txt` 与 `verifier_prompt.txt`
  pub fn from_dir(dir: &Path) -> Result<Self, PromptError> {
    let read = |file: &str| {
      let path = dir.join(file);
      std::fs::read_to_string(&path)
        .map(PromptTemplate::new)
        .map_err(|source| PromptError::IoError {
          path: path.display().to_string(),
          source,
        })
    };

    let prompts = Self::new(
      read(IDENTIFIER_PROMPT_FILE)?,
      read(LOCATOR_PROMPT_FILE)?,
      read(VERIFIER_PROMPT_FILE)?,
    )?;
    info!("已从 {} 加载提示词", dir.display());
    Ok(prompts)
  }

  pub fn identify(&self) -> Result<String, PromptError> {
    self.identify.render(&[])
  }

  pub fn locate(&self, name: &str) -> Result<String, PromptError> {
    self.locate.render(&[("name", name)])
  }

  pub fn verify(&self, name: &str, label: &str) -> Result<String, PromptError> {
    self.verify.render(&[("name", name), ("label", label)])
  }
}

impl Default for PromptSet {
  fn default() -> Self {
    Self::builtin()
  }
}
