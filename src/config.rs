use std::time::Duration;

/// 默认的备用模型（按优先级排列）
const DEFAULT_FALLBACK_MODELS: [&str; 3] = [
    "anthropic.claude-3-5-sonnet-20241022-v2:0",
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
];

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时执行的推理请求数量（工作协程数）
    pub worker_count: usize,
    /// 全局每分钟请求上限
    pub requests_per_minute: usize,
    /// 全局每分钟 token 上限（0 表示不限制）
    pub tokens_per_minute: u64,
    /// 每个在途请求带来的优先级惩罚
    pub fairness_penalty: f64,
    /// 未指定时使用的基础优先级
    pub default_priority: f64,
    /// 模型被限流后切换到下一个模型前的等待（毫秒）
    pub model_switch_delay_ms: u64,
    /// 所有模型都在冷却时的短暂等待（毫秒）
    pub all_cooling_delay_ms: u64,
    /// 剩余冷却时间不超过该值的模型仍可参与候选（秒）
    pub cooldown_skip_threshold_secs: u64,
    /// 模型目录 TOML 文件（可选，未设置时从环境变量生成）
    pub model_catalogue_file: Option<String>,
    // --- 模型配置 ---
    pub primary_model_id: String,
    pub fallback_model_ids: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    /// 批量请求文件
    pub request_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 3,
            requests_per_minute: 30,
            tokens_per_minute: 0,
            fairness_penalty: 0.5,
            default_priority: 5.0,
            model_switch_delay_ms: 1000,
            all_cooling_delay_ms: 2000,
            cooldown_skip_threshold_secs: 2,
            model_catalogue_file: None,
            primary_model_id: "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
            fallback_model_ids: DEFAULT_FALLBACK_MODELS.iter().map(|s| s.to_string()).collect(),
            max_tokens: 8192,
            temperature: 0.7,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            request_file: "requests.toml".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            worker_count: parse_env("MAX_CONCURRENT_REQUESTS").unwrap_or(default.worker_count),
            requests_per_minute: parse_env("REQUESTS_PER_MINUTE").unwrap_or(default.requests_per_minute),
            tokens_per_minute: parse_env("TOKENS_PER_MINUTE").unwrap_or(default.tokens_per_minute),
            fairness_penalty: parse_env("FAIRNESS_PENALTY").unwrap_or(default.fairness_penalty),
            default_priority: parse_env("DEFAULT_PRIORITY").unwrap_or(default.default_priority),
            model_switch_delay_ms: parse_env("MODEL_SWITCH_DELAY_MS").unwrap_or(default.model_switch_delay_ms),
            all_cooling_delay_ms: parse_env("ALL_COOLING_DELAY_MS").unwrap_or(default.all_cooling_delay_ms),
            cooldown_skip_threshold_secs: parse_env("COOLDOWN_SKIP_THRESHOLD_SECS")
                .unwrap_or(default.cooldown_skip_threshold_secs),
            model_catalogue_file: std::env::var("MODEL_CATALOGUE_FILE").ok().or(default.model_catalogue_file),
            primary_model_id: std::env::var("BEDROCK_MODEL_ID").unwrap_or(default.primary_model_id),
            fallback_model_ids: std::env::var("BEDROCK_FALLBACK_MODELS")
                .ok()
                .map(|v| split_model_list(&v))
                .filter(|ids| !ids.is_empty())
                .unwrap_or(default.fallback_model_ids),
            max_tokens: parse_env("BEDROCK_MAX_TOKENS").unwrap_or(default.max_tokens),
            temperature: parse_env("BEDROCK_TEMPERATURE").unwrap_or(default.temperature),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            request_file: std::env::var("REQUEST_FILE").unwrap_or(default.request_file),
            verbose_logging: parse_env("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    pub fn model_switch_delay(&self) -> Duration {
        Duration::from_millis(self.model_switch_delay_ms)
    }

    pub fn all_cooling_delay(&self) -> Duration {
        Duration::from_millis(self.all_cooling_delay_ms)
    }

    pub fn cooldown_skip_threshold(&self) -> Duration {
        Duration::from_secs(self.cooldown_skip_threshold_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 解析逗号分隔的模型列表，忽略空项
fn split_model_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_model_list_skips_blanks() {
        let ids = split_model_list(" a , ,b,, c ");
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_default_durations() {
        let config = Config::default();
        assert_eq!(config.model_switch_delay(), Duration::from_secs(1));
        assert_eq!(config.all_cooling_delay(), Duration::from_secs(2));
        assert_eq!(config.cooldown_skip_threshold(), Duration::from_secs(2));
        assert_eq!(config.fallback_model_ids.len(), 3);
    }
}
