use shannon_config::{ShannonConfig, load_from_str};

fn no_env() -> Vec<(String, String)> {
    vec![]
}

#[test]
fn test_defaults() {
    let config = ShannonConfig::default();
    assert_eq!(config.llm.provider, "anthropic");
    assert_eq!(config.webhooks.port, 8420);
    assert_eq!(config.webhooks.bind, "0.0.0.0");
    assert!(!config.webhooks.enabled);
    assert_eq!(config.context.max_messages, 50);
    assert!((config.context.summarize_threshold - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.auth.sudo_timeout_seconds, 300);
}

#[test]
fn test_yaml_overrides_defaults() {
    let config = load_from_str(
        r#"
llm:
  provider: local
  model: qwen3
auth:
  rate_limit_per_minute: 2
  admin_users: ["discord:1", "operator-bob"]
webhooks:
  enabled: true
  endpoints:
    - name: github
      path: /hooks/github
      secret: gh
      channel: "discord:42"
      prompt_template: "GitHub {event_type}: {summary}"
"#,
        no_env(),
    )
    .unwrap();

    assert_eq!(config.llm.provider, "local");
    assert_eq!(config.llm.model, "qwen3");
    assert_eq!(config.auth.rate_limit_per_minute, 2);
    assert_eq!(config.auth.admin_users.len(), 2);
    assert_eq!(config.webhooks.endpoints[0].path, "/hooks/github");
    // Untouched sections keep their defaults.
    assert_eq!(config.webhooks.port, 8420);
    assert_eq!(config.llm.max_tokens, 4096);
}

#[test]
fn test_env_overrides_yaml() {
    let config = load_from_str(
        "llm:\n  model: from-yaml\n",
        vec![
            ("SHANNON_LLM__MODEL".to_string(), "from-env".to_string()),
            ("SHANNON_WEBHOOKS__PORT".to_string(), "9000".to_string()),
            ("SHANNON_LOGGING__JSON".to_string(), "true".to_string()),
            // Unrelated vars are ignored.
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SHANNON_CONFIG".to_string(), "/tmp/x.yaml".to_string()),
        ],
    )
    .unwrap();

    assert_eq!(config.llm.model, "from-env");
    assert_eq!(config.webhooks.port, 9000);
    assert!(config.logging.json);
}

#[test]
fn test_env_list_override() {
    let config = load_from_str(
        "{}",
        vec![(
            "SHANNON_AUTH__ADMIN_USERS".to_string(),
            "[\"discord:1\", \"2\"]".to_string(),
        )],
    )
    .unwrap();
    assert_eq!(config.auth.admin_users, vec!["discord:1", "2"]);
}

#[test]
fn test_invalid_provider_rejected() {
    let err = load_from_str("llm:\n  provider: openai\n", no_env()).unwrap_err();
    assert!(err.to_string().contains("provider"));
}

#[test]
fn test_bad_endpoint_path_rejected() {
    let err = load_from_str(
        r#"
webhooks:
  endpoints:
    - name: x
      path: "no-slash"
      secret: s
      channel: "discord:1"
      prompt_template: "{summary}"
"#,
        no_env(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("must start with"));
}

#[test]
fn test_empty_secret_is_warning_not_error() {
    // Fail-closed at runtime, but config load succeeds with a warning.
    let config = load_from_str(
        r#"
webhooks:
  endpoints:
    - name: gh
      path: "/hooks/gh"
      secret: ""
      channel: "discord:1"
      prompt_template: "{summary}"
"#,
        no_env(),
    )
    .unwrap();
    let warnings = config.validate().unwrap();
    assert!(warnings.iter().any(|w| w.message.contains("no secret")));
}
