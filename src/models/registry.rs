//! 模型目录
//!
//! 启动时加载一次，之后在整个进程生命周期内保持不变。

use std::collections::HashSet;
use std::path::Path;

use tracing::info;

use crate::config::Config;
use crate::error::ConfigError;
use crate::models::loaders::load_model_catalogue;
use crate::models::model::Model;

/// 按优先级排序的模型目录
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: Vec<Model>,
}

impl ModelRegistry {
    /// 校验并创建模型目录
    ///
    /// 按优先级升序排序（稳定排序，同优先级保持原顺序）。
    pub fn new(mut models: Vec<Model>) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::EmptyCatalogue);
        }

        let mut seen = HashSet::new();
        for model in &models {
            if model.id.trim().is_empty() {
                return Err(ConfigError::EmptyModelId {
                    name: model.name.clone(),
                });
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::DuplicateModel {
                    id: model.id.clone(),
                });
            }
            if model.max_tokens == 0 {
                return Err(ConfigError::ZeroMaxTokens {
                    id: model.id.clone(),
                });
            }
            if !model.temperature.is_finite() || model.temperature < 0.0 {
                return Err(ConfigError::InvalidTemperature {
                    id: model.id.clone(),
                    value: model.temperature,
                });
            }
        }

        models.sort_by_key(|m| m.priority);
        Ok(Self { models })
    }

    /// 根据配置加载模型目录
    ///
    /// 配置了目录文件时从 TOML 读取，否则由主模型 + 备用模型列表生成。
    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        match &config.model_catalogue_file {
            Some(path) => {
                info!("📁 从文件加载模型目录: {}", path);
                Self::new(load_model_catalogue(Path::new(path)).await?)
            }
            None => Self::new(models_from_config(config)),
        }
    }

    /// 按优先级升序返回全部模型
    pub fn list_models(&self) -> &[Model] {
        &self.models
    }

    pub fn get(&self, model_id: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn models_from_config(config: &Config) -> Vec<Model> {
    let mut primary = Model::primary(&config.primary_model_id, config.max_tokens, config.temperature);
    primary.name = format!("Primary ({})", config.primary_model_id);

    std::iter::once(primary)
        .chain(
            config
                .fallback_model_ids
                .iter()
                .enumerate()
                .map(|(i, id)| Model::fallback(id, i as u32 + 1, config.max_tokens, config.temperature)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, priority: u32) -> Model {
        Model {
            id: id.to_string(),
            name: id.to_uppercase(),
            priority,
            max_tokens: 1024,
            temperature: 0.5,
            base_cooldown_secs: 5,
            supports_extended_reasoning: false,
        }
    }

    #[test]
    fn test_models_sorted_by_priority() {
        let registry = ModelRegistry::new(vec![model("c", 3), model("a", 1), model("b", 2)]).unwrap();
        let ids: Vec<_> = registry.list_models().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(registry.get("b").map(|m| m.priority), Some(2));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_rejects_empty_catalogue() {
        assert!(matches!(ModelRegistry::new(vec![]), Err(ConfigError::EmptyCatalogue)));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_params() {
        let err = ModelRegistry::new(vec![model("a", 1), model("a", 2)]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateModel { id } if id == "a"));

        let mut zero = model("z", 1);
        zero.max_tokens = 0;
        assert!(matches!(
            ModelRegistry::new(vec![zero]),
            Err(ConfigError::ZeroMaxTokens { .. })
        ));

        let mut hot = model("h", 1);
        hot.temperature = f32::NAN;
        assert!(matches!(
            ModelRegistry::new(vec![hot]),
            Err(ConfigError::InvalidTemperature { .. })
        ));
    }

    #[tokio::test]
    async fn test_from_config_without_catalogue_file() {
        let config = Config {
            primary_model_id: "primary".to_string(),
            fallback_model_ids: vec!["f1".to_string(), "f2".to_string()],
            ..Config::default()
        };

        let registry = ModelRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.len(), 3);

        let models = registry.list_models();
        assert_eq!(models[0].id, "primary");
        assert_eq!(models[0].base_cooldown_secs, 10);
        assert_eq!(models[1].id, "f1");
        assert_eq!(models[1].priority, 2);
        assert_eq!(models[2].base_cooldown_secs, 5);
    }
}
