// 该文件是 Kanjian （看见） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Kanjian 项目贡献者

pub mod chunk;
pub mod client;
pub mod detector;
pub mod frame;
pub mod input;
pub mod label;
pub mod output;
pub mod prompt;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 将 URL 路径部分解码为本地文件路径
pub fn url_file_path(url: &url::Url) -> std::path::PathBuf {
  let path = url.path();
  match urlencoding::decode(path) {
    Ok(decoded) => std::path::PathBuf::from(decoded.into_owned()),
    Err(_) => std::path::PathBuf::from(path),
  }
}

/// 读取 URL 查询参数并解析为指定类型，缺失时返回 `None`
pub(crate) fn query_param<T: std::str::FromStr>(
  url: &url::Url,
  key: &str,
) -> Result<Option<T>, String> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<T>()
      .map(Some)
      .map_err(|_| format!("参数 {} 的值无效: {}", key, v)),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_file_path_decodes_percent_escapes() {
    let url = url::Url::parse("image:///tmp/my%20photo.png").unwrap();
    assert_eq!(url_file_path(&url), std::path::PathBuf::from("/tmp/my photo.png"));
  }

  #[test]
  fn query_param_parses_and_reports_invalid_values() {
    let url = url::Url::parse("openai:///gpt-4o?max_tokens=256&temperature=abc").unwrap();
    assert_eq!(query_param::<u32>(&url, "max_tokens").unwrap(), Some(256));
    assert_eq!(query_param::<u32>(&url, "missing").unwrap(), None);
    assert!(query_param::<f32>(&url, "temperature").is_err());
  }
}
