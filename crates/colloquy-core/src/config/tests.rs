//! Validation tests for the configuration types

use super::*;

async fn parse(yaml: &str) -> Result<ColloquyConfig, ChatError> {
    ConfigLoader::from_str(yaml).await
}

const BASE: &str = r#"
llm:
  provider: "anthropic"
  model: "claude-3-5-sonnet-latest"
"#;

#[tokio::test]
async fn test_empty_model_rejected() {
    let err = parse(
        r#"
llm:
  provider: "openai"
  model: ""
"#,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("model cannot be empty"));
}

#[tokio::test]
async fn test_zero_pool_rejected() {
    let yaml = format!("{}tools:\n  pool_size: 0\n", BASE);
    let err = parse(&yaml).await.unwrap_err();
    assert!(err.to_string().contains("pool_size"));
}

#[tokio::test]
async fn test_zero_attempts_rejected() {
    let yaml = format!("{}retry:\n  max_attempts: 0\n", BASE);
    let err = parse(&yaml).await.unwrap_err();
    assert!(err.to_string().contains("max_attempts"));
}

#[tokio::test]
async fn test_inverted_delays_rejected() {
    let yaml = format!(
        "{}retry:\n  base_delay_ms: 9000\n  max_delay_ms: 1000\n",
        BASE
    );
    let err = parse(&yaml).await.unwrap_err();
    assert!(err.to_string().contains("base_delay_ms"));
}

#[tokio::test]
async fn test_bad_log_level_rejected() {
    let yaml = format!("{}logging:\n  level: loud\n", BASE);
    let err = parse(&yaml).await.unwrap_err();
    assert!(matches!(err, ChatError::ConfigError(_)));
    assert!(err.to_string().contains("loud"));
}

#[tokio::test]
async fn test_custom_provider_needs_url() {
    let err = parse(
        r#"
llm:
  provider: custom
  base_url: "localhost:8080"
  model: "m"
"#,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("base_url"));

    let err = parse("llm:\n  provider: custom\n  model: m\n")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ConfigError(_)));
}

#[test]
fn test_level_filter() {
    let logging = LoggingConfig {
        level: "debug".to_string(),
    };
    assert_eq!(logging.level_filter().unwrap(), log::LevelFilter::Debug);
}

#[test]
fn test_max_tokens_takes_smaller_budget() {
    let mut config: ColloquyConfig = serde_yaml::from_str(BASE).unwrap();
    assert_eq!(config.max_tokens(), 4096);
    config.llm.parameters.max_tokens = Some(100_000);
    assert_eq!(config.max_tokens(), 4096);
    config.llm.parameters.max_tokens = Some(512);
    assert_eq!(config.max_tokens(), 512);
}
