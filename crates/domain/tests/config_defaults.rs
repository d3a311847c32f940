use cm_domain::config::{
    Config, ConfigSeverity, EmbeddingKind, RetrievalScope, StorageBackend, SummarySinkKind,
};

#[test]
fn defaults_match_hosted_groq_setup() {
    let config = Config::default();
    assert_eq!(config.llm.provider_id, "groq");
    assert_eq!(config.llm.model, "allam-2-7b");
    assert_eq!(config.llm.max_completion_tokens, 512);
    assert_eq!(config.llm.auth.env.as_deref(), Some("GROQ_API_KEY"));
    assert_eq!(config.session.chat_id, "default_chat");
    assert_eq!(config.window.cost_budget, 2048);
}

#[test]
fn default_config_validates_clean() {
    let config = Config::default();
    let issues = config.validate();
    assert!(issues.is_empty(), "unexpected issues: {issues:?}");
}

#[test]
fn empty_toml_yields_defaults() {
    let config: Config = toml::from_str("").unwrap();
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.max_injected, 3);
    assert_eq!(config.retrieval.scope, RetrievalScope::User);
    assert_eq!(config.storage.backend, StorageBackend::File);
    assert_eq!(config.storage.summary_sink, SummarySinkKind::File);
    assert_eq!(config.embedding.kind, EmbeddingKind::Provider);
    assert_eq!(config.retry.max_attempts, 3);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let toml_str = r#"
[window]
cost_budget = 100

[embedding]
kind = "hash"
dimension = 64

[storage]
backend = "milvus"
path = "/tmp/chats"

[storage.milvus]
uri = "http://milvus:19530"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.window.cost_budget, 100);
    assert!(config.window.count_rewrite_cost);
    assert_eq!(config.embedding.kind, EmbeddingKind::Hash);
    assert_eq!(config.embedding.dimension, 64);
    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert_eq!(config.storage.backend, StorageBackend::Milvus);
    assert_eq!(config.storage.milvus.uri, "http://milvus:19530");
    assert_eq!(config.storage.milvus.collection_name, "memory_records");
    assert_eq!(config.storage.milvus.nprobe, 16);
}

#[test]
fn zero_budget_is_an_error() {
    let toml_str = r#"
[window]
cost_budget = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "window.cost_budget" && e.severity == ConfigSeverity::Error));
}

#[test]
fn separator_in_session_id_is_an_error() {
    let toml_str = r#"
[session]
user_id = "alice::admin"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "session" && e.severity == ConfigSeverity::Error));
}

#[test]
fn injected_above_top_k_is_a_warning() {
    let toml_str = r#"
[retrieval]
top_k = 2
max_injected = 3
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Warning);
    assert_eq!(issues[0].field, "retrieval.max_injected");
}

#[test]
fn injected_above_hard_cap_is_an_error() {
    let toml_str = r#"
[retrieval]
top_k = 10
max_injected = 4
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].severity, ConfigSeverity::Error);
    assert_eq!(issues[0].field, "retrieval.max_injected");
}

#[test]
fn memory_backend_warns() {
    let toml_str = r#"
[storage]
backend = "memory"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|e| e.field == "storage.backend" && e.severity == ConfigSeverity::Warning));
}

#[test]
fn issue_display_carries_severity_tag() {
    let mut config = Config::default();
    config.llm.model.clear();
    let issues = config.validate();
    let rendered = issues[0].to_string();
    assert!(rendered.starts_with("[ERROR] llm.model"), "{rendered}");
}

#[test]
fn unknown_scope_is_rejected() {
    let toml_str = r#"
[retrieval]
scope = "everyone"
"#;
    assert!(toml::from_str::<Config>(toml_str).is_err());
}
