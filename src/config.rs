//! Configuration loading.
//!
//! The effective configuration is layered with `figment`, lowest priority
//! first:
//!
//! 1. built-in defaults ([`Config::default`]);
//! 2. the TOML file given by `--config` (a missing file is not an error);
//! 3. `RAG_*` variables, mapped into `[retrieval]` (`RAG_TOP_K` → `retrieval.top_k`);
//!    the legacy names `RAG_TOP_K_TOTAL`, `RAG_PREFLIGHT_MULT` and `RAG_NUM_CTX`
//!    are accepted too (see [`rag_env_key`]);
//! 4. `OLLAMA_BASE_URL` / `OLLAMA_MODEL`, mapped into `[generation]`;
//! 5. `VAULT_*` variables with `__` as the section separator
//!    (`VAULT_SERVER__BIND` → `server.bind`).
//!
//! A loaded [`Config`] is never mutated. Per-query overrides derive a new
//! value (see [`Config::with_validation_mode`]) that the caller wraps in an
//! `Arc` snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use memory_vault_core::ask::AskParams;
use memory_vault_core::assemble::AssemblyParams;
use memory_vault_core::generate::GenerationOptions;
use memory_vault_core::retrieve::RetrievalParams;
use memory_vault_core::select::{GroupBonus, SelectorParams};
use memory_vault_core::validate::{CoverageMode, ValidationRules};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    pub validation: ValidationConfig,
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub top_k_full: usize,
    pub max_chars_full: usize,
    pub snippet_chars: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    pub filter_toc: bool,
    pub pdf_expand: bool,
    pub pdf_expand_radius: usize,
    pub pdf_expand_max: usize,
    pub max_per_source: usize,
    pub preflight_multiplier: usize,
    pub distance_threshold: f64,
    pub max_group_bonus: f64,
    pub group_bonus: BTreeMap<String, f64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let selector = SelectorParams::default();
        let assembly = AssemblyParams::default();
        Self {
            top_k: selector.total_k,
            top_k_full: assembly.top_k_full,
            max_chars_full: assembly.max_chars_full,
            snippet_chars: assembly.snippet_chars,
            min_score: None,
            filter_toc: assembly.filter_toc,
            pdf_expand: assembly.pdf_expand,
            pdf_expand_radius: assembly.pdf_expand_radius,
            pdf_expand_max: assembly.pdf_expand_max,
            max_per_source: selector.max_per_source,
            preflight_multiplier: selector.preflight_multiplier,
            distance_threshold: selector.distance_threshold,
            max_group_bonus: 0.25,
            group_bonus: selector
                .group_bonus
                .entries()
                .map(|(g, b)| (g.to_string(), b))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Require a quote or code block in every cited block of the final answer.
    pub require_evidence: bool,
    pub mode: CoverageMode,
    /// Minimum cited fraction in lenient mode.
    pub min_coverage: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            require_evidence: true,
            mode: CoverageMode::Strict,
            min_coverage: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub num_ctx: usize,
    pub timeout_secs: u64,
    /// Fall back to a similar installed model when `model` is missing.
    pub auto_select_model: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "rag-grounded-nemo".to_string(),
            temperature: 0.1,
            num_ctx: 8192,
            timeout_secs: 300,
            auto_select_model: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Base URL of the Chroma server.
    pub url: String,
    pub collection: String,
    /// Ollama model used to embed queries; must match the ingestion side.
    pub embed_model: String,
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            collection: "knowledge_base".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7331".to_string(),
        }
    }
}

/// Config key for a `RAG_*` variable, given without its prefix.
pub fn rag_env_key(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "top_k_total" => "retrieval.top_k".to_string(),
        "preflight_mult" => "retrieval.preflight_multiplier".to_string(),
        "num_ctx" => "generation.num_ctx".to_string(),
        other => format!("retrieval.{}", other),
    }
}

/// Build the provider stack for `path` without extracting it.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RAG_").map(|k| rag_env_key(k.as_str()).into()))
        .merge(Env::raw().filter_map(|k| {
            if k.as_str().eq_ignore_ascii_case("OLLAMA_BASE_URL") {
                Some("generation.base_url".into())
            } else if k.as_str().eq_ignore_ascii_case("OLLAMA_MODEL") {
                Some("generation.model".into())
            } else {
                None
            }
        }))
        .merge(Env::prefixed("VAULT_").split("__"))
}

/// Load and validate the configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = figment(path)
        .extract()
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if r.top_k_full > r.top_k {
            bail!(
                "retrieval.top_k_full ({}) must not exceed retrieval.top_k ({})",
                r.top_k_full,
                r.top_k
            );
        }
        if r.max_per_source < 1 {
            bail!("retrieval.max_per_source must be >= 1");
        }
        if r.preflight_multiplier < 1 {
            bail!("retrieval.preflight_multiplier must be >= 1");
        }
        if r.max_chars_full == 0 {
            bail!("retrieval.max_chars_full must be > 0");
        }
        if r.snippet_chars == 0 {
            bail!("retrieval.snippet_chars must be > 0");
        }
        if r.distance_threshold <= 0.0 {
            bail!("retrieval.distance_threshold must be > 0");
        }
        if let Some(min) = r.min_score {
            if !(-1.0..=1.0).contains(&min) {
                bail!("retrieval.min_score must be in [-1.0, 1.0]");
            }
        }
        if !(0.0..=1.0).contains(&r.max_group_bonus) {
            bail!("retrieval.max_group_bonus must be in [0.0, 1.0]");
        }
        for (group, bonus) in &r.group_bonus {
            if !(0.0..=r.max_group_bonus).contains(bonus) {
                bail!(
                    "retrieval.group_bonus.{} = {} is outside [0.0, {}]",
                    group,
                    bonus,
                    r.max_group_bonus
                );
            }
        }

        if !(0.0..=1.0).contains(&self.validation.min_coverage) {
            bail!("validation.min_coverage must be in [0.0, 1.0]");
        }

        let g = &self.generation;
        if !(0.0..=2.0).contains(&g.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }
        if g.num_ctx == 0 {
            bail!("generation.num_ctx must be > 0");
        }
        if g.timeout_secs == 0 {
            bail!("generation.timeout_secs must be > 0");
        }
        if g.model.trim().is_empty() {
            bail!("generation.model must not be empty");
        }
        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }
        Ok(())
    }

    /// A copy with a different coverage mode.
    pub fn with_validation_mode(&self, mode: CoverageMode) -> Self {
        let mut next = self.clone();
        next.validation.mode = mode;
        next
    }

    /// A copy with the evidence requirement switched on or off.
    pub fn with_require_evidence(&self, require: bool) -> Self {
        let mut next = self.clone();
        next.validation.require_evidence = require;
        next
    }

    pub fn retrieval_params(&self, verbose: bool) -> RetrievalParams {
        let r = &self.retrieval;
        RetrievalParams {
            selector: SelectorParams {
                total_k: r.top_k,
                max_per_source: r.max_per_source,
                preflight_multiplier: r.preflight_multiplier,
                distance_threshold: r.distance_threshold,
                group_bonus: GroupBonus::new(r.group_bonus.clone()),
                verbose,
            },
            assembly: AssemblyParams {
                top_k_full: r.top_k_full,
                max_chars_full: r.max_chars_full,
                snippet_chars: r.snippet_chars,
                filter_toc: r.filter_toc,
                pdf_expand: r.pdf_expand,
                pdf_expand_radius: r.pdf_expand_radius,
                pdf_expand_max: r.pdf_expand_max,
            },
            min_score: r.min_score,
        }
    }

    pub fn ask_params(&self) -> AskParams {
        let v = &self.validation;
        AskParams {
            final_rules: ValidationRules::full(v.mode, v.require_evidence, v.min_coverage),
            options: GenerationOptions {
                temperature: self.generation.temperature,
                context_window: self.generation.num_ctx,
            },
        }
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.retrieval.group_bonus["sql"], 0.15);
        assert_eq!(config.validation.mode, CoverageMode::Strict);
        assert_eq!(config.server.bind, "127.0.0.1:7331");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = load_config(Path::new("does-not-exist.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let example = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/vault.example.toml");
        Jail::expect_with(|_jail| {
            let config = load_config(&example).map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "vault.toml",
                r#"
                [retrieval]
                top_k = 6
                max_per_source = 2

                [retrieval.group_bonus]
                sql = 0.2

                [validation]
                mode = "lenient"
                "#,
            )?;
            jail.set_env("RAG_MAX_PER_SOURCE", "1");
            jail.set_env("OLLAMA_MODEL", "mistral:7b");
            jail.set_env("VAULT_SERVER__BIND", "0.0.0.0:9000");

            let config = load_config(Path::new("vault.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.retrieval.top_k, 6);
            assert_eq!(config.retrieval.max_per_source, 1);
            assert_eq!(config.retrieval.group_bonus["sql"], 0.2);
            assert_eq!(config.retrieval.group_bonus["python"], 0.10);
            assert_eq!(config.validation.mode, CoverageMode::Lenient);
            assert_eq!(config.generation.model, "mistral:7b");
            assert_eq!(config.server.bind, "0.0.0.0:9000");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_rag_variable_names() {
        assert_eq!(rag_env_key("TOP_K_TOTAL"), "retrieval.top_k");
        assert_eq!(rag_env_key("top_k"), "retrieval.top_k");

        Jail::expect_with(|jail| {
            jail.set_env("RAG_TOP_K_TOTAL", "7");
            jail.set_env("RAG_PREFLIGHT_MULT", "3");
            jail.set_env("RAG_NUM_CTX", "4096");

            let config = load_config(Path::new("missing.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.retrieval.top_k, 7);
            assert_eq!(config.retrieval.preflight_multiplier, 3);
            assert_eq!(config.generation.num_ctx, 4096);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_name_the_key() {
        let mut config = Config::default();
        config.retrieval.top_k_full = 9;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retrieval.top_k_full"));

        let mut config = Config::default();
        config.retrieval.group_bonus.insert("sql".to_string(), 0.9);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("retrieval.group_bonus.sql"));

        let mut config = Config::default();
        config.validation.min_coverage = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_validation_mode_leaves_original_untouched() {
        let base = Config::default();
        let lenient = base.with_validation_mode(CoverageMode::Lenient);
        assert_eq!(base.validation.mode, CoverageMode::Strict);
        assert_eq!(lenient.validation.mode, CoverageMode::Lenient);
        assert_eq!(
            lenient.ask_params().final_rules.coverage,
            Some(CoverageMode::Lenient)
        );
    }

    #[test]
    fn test_params_follow_config() {
        let mut config = Config::default();
        config.retrieval.top_k = 7;
        config.retrieval.preflight_multiplier = 3;
        let params = config.retrieval_params(true);
        assert_eq!(params.selector.preflight_size(), 21);
        assert!(params.selector.verbose);
        assert!((params.selector.group_bonus.bonus("docker") - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_toml_rendering_round_trips() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[retrieval.group_bonus]"));
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
