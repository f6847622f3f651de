use crate::error::ConfigError;
use crate::models::batch::{BatchRequest, RequestBatch};
use crate::models::model::Model;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;

/// 模型目录文件格式
#[derive(Debug, Deserialize)]
struct ModelCatalogue {
    #[serde(default)]
    models: Vec<Model>,
}

/// 从 TOML 文件加载模型目录
///
/// 只负责读取和解析，校验交给 `ModelRegistry::new`。
pub async fn load_model_catalogue(path: &Path) -> Result<Vec<Model>, ConfigError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;

    parse_model_catalogue(&content, path)
}

fn parse_model_catalogue(content: &str, path: &Path) -> Result<Vec<Model>, ConfigError> {
    let catalogue: ModelCatalogue =
        toml::from_str(content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;

    tracing::info!(
        "成功加载 {} 个模型定义: {}",
        catalogue.models.len(),
        path.display()
    );
    Ok(catalogue.models)
}

/// 从 TOML 文件加载批量请求
pub async fn load_request_batch(path: &Path) -> Result<Vec<BatchRequest>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取请求文件: {}", path.display()))?;

    let batch: RequestBatch = toml::from_str(&content)
        .with_context(|| format!("无法解析请求文件: {}", path.display()))?;

    tracing::info!("成功加载 {} 个请求", batch.requests.len());

    Ok(batch.requests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_catalogue() {
        let content = r#"
[[models]]
id = "us.anthropic.claude-sonnet-4-5-20250929-v1:0"
name = "Claude Sonnet 4.5"
priority = 1
max_tokens = 8192
temperature = 0.7
base_cooldown_secs = 10
supports_extended_reasoning = true

[[models]]
id = "anthropic.claude-3-7-sonnet-20250219-v1:0"
name = "Claude Sonnet 3.7"
priority = 2
max_tokens = 8192
temperature = 0.7
base_cooldown_secs = 5
"#;
        let models = parse_model_catalogue(content, Path::new("models.toml")).unwrap();
        assert_eq!(models.len(), 2);
        assert!(models[0].supports_extended_reasoning);
        assert!(!models[1].supports_extended_reasoning);
        assert_eq!(models[1].base_cooldown_secs, 5);
    }

    #[test]
    fn test_parse_model_catalogue_reports_path() {
        let err = parse_model_catalogue("models = 3", Path::new("broken.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::TomlParseFailed { ref path, .. } if path == "broken.toml"));
    }

    #[tokio::test]
    async fn test_missing_catalogue_file() {
        let err = load_model_catalogue(Path::new("definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn test_load_request_batch() {
        let path = std::env::temp_dir().join(format!("review_inference_batch_{}.toml", std::process::id()));
        let content = r#"
[[requests]]
caller = "alice"
prompt = "审阅执行摘要"
estimated_tokens = 800
priority = 3

[[requests]]
caller = "bob"
prompt = "审阅根因分析"
system = "你是一名审阅专家"
"#;
        fs::write(&path, content).await.unwrap();

        let requests = load_request_batch(&path).await.unwrap();
        fs::remove_file(&path).await.ok();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].priority, Some(3.0));
        assert_eq!(requests[1].estimated_tokens, 0);

        let request = requests[1].to_request();
        assert_eq!(request.system.as_deref(), Some("你是一名审阅专家"));
    }
}
