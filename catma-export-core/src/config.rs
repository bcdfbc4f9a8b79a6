//! # Configuração da Exportação
//!
//! A configuração é lida uma vez (JSON), validada e transformada num [`ExecutionPlan`]
//! imutável antes de qualquer etapa rodar. Nenhuma etapa lê configuração global.
//!
//! ```text
//! {
//!   "tokenizer_language": "German",
//!   "text_range": {"start": 120, "end": 98000},
//!   "paragraph_policy": "eltec-deu",
//!   "conflict_mode": "strict",
//!   "output_dir": "export",
//!   "steps": [
//!     {"step": "basic_token_table", "output_ref": "basic_token_table"},
//!     {"step": "annotated_token_table", "input_ref": "basic_token_table",
//!      "output_ref": "annotated_token_table"},
//!     {"step": "annotated_tei", "input_ref": "annotated_token_table",
//!      "output_ref": "annotated_tei"}
//!   ]
//! }
//! ```
//!
//! Campos ausentes assumem os valores padrão de [`RunConfig::default`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aligner::ConflictMode;
use crate::error::{ExportError, Result};
use crate::paragraph::{ParagraphPolicy, PolicyRegistry, ELTEC_DEU};
use crate::source::{SourceText, TextRange};
use crate::table::TableMode;
use crate::tokenizer::{Language, DEFAULT_MAX_TEXT_LENGTH};

/// Parâmetros de processamento de uma execução.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub tokenizer_language: String,
    pub max_text_length: usize,
    /// Trecho do texto a exportar (offsets de caractere). `None`: texto inteiro.
    pub text_range: Option<TextRange>,
    pub insert_paragraphs: bool,
    pub paragraph_policy: String,
    /// `false`: cada anotação é reduzida a um único segmento `[min(start), max(end))`.
    pub use_all_text_selection_segments: bool,
    pub conflict_mode: ConflictMode,
    /// Formato da tabela anotada (`annotated` ou `iob2`).
    pub annotated_table_mode: TableMode,
    /// Escreve o id da anotação nos spans do TEI.
    pub annotation_attribute: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tokenizer_language: "German".into(),
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            text_range: None,
            insert_paragraphs: true,
            paragraph_policy: ELTEC_DEU.into(),
            use_all_text_selection_segments: true,
            conflict_mode: ConflictMode::Strict,
            annotated_table_mode: TableMode::Iob2,
            annotation_attribute: true,
        }
    }
}

/// Etapas disponíveis do pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Tokeniza o trecho e grava a tabela básica.
    BasicTokenTable,
    /// Alinha as anotações aos tokens e grava a tabela anotada.
    AnnotatedTokenTable,
    /// Segmenta parágrafos e grava o documento TEI.
    AnnotatedTei,
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::BasicTokenTable => "basic_token_table",
            StepKind::AnnotatedTokenTable => "annotated_token_table",
            StepKind::AnnotatedTei => "annotated_tei",
        }
    }

    /// Extensão do artefato produzido.
    pub fn extension(&self) -> &'static str {
        match self {
            StepKind::AnnotatedTei => "xml",
            _ => "tsv",
        }
    }

    fn needs_input(&self) -> bool {
        !matches!(self, StepKind::BasicTokenTable)
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Declaração de uma etapa: o que roda, de onde lê e para onde escreve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub step: StepKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub input_ref: Option<String>,
    pub output_ref: String,
}

impl StepDescriptor {
    pub fn new(step: StepKind, input_ref: Option<&str>, output_ref: &str) -> Self {
        Self {
            step,
            enabled: true,
            input_ref: input_ref.map(String::from),
            output_ref: output_ref.into(),
        }
    }

    /// Nome do arquivo do artefato (`<output_ref>.<ext>`).
    pub fn output_file(&self) -> String {
        format!("{}.{}", self.output_ref, self.step.extension())
    }
}

/// As três etapas padrão, encadeadas pelos nomes dos artefatos.
pub fn default_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::new(StepKind::BasicTokenTable, None, "basic_token_table"),
        StepDescriptor::new(
            StepKind::AnnotatedTokenTable,
            Some("basic_token_table"),
            "annotated_token_table",
        ),
        StepDescriptor::new(
            StepKind::AnnotatedTei,
            Some("annotated_token_table"),
            "annotated_tei",
        ),
    ]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Arquivo de configuração completo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(flatten)]
    pub run: RunConfig,
    #[serde(default = "default_steps")]
    pub steps: Vec<StepDescriptor>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Políticas de parágrafo extras, somadas às embutidas.
    #[serde(default)]
    pub paragraph_policies: Vec<ParagraphPolicy>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            run: RunConfig::default(),
            steps: default_steps(),
            output_dir: default_output_dir(),
            paragraph_policies: Vec::new(),
        }
    }
}

impl ExportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Registro com as políticas embutidas mais as declaradas no arquivo.
    pub fn policy_registry(&self) -> PolicyRegistry {
        let mut registry = PolicyRegistry::with_defaults();
        for policy in &self.paragraph_policies {
            registry.register(policy.clone());
        }
        registry
    }
}

/// Configuração resolvida e validada para um texto concreto.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub language: Language,
    pub max_text_length: usize,
    pub range: TextRange,
    pub policy: ParagraphPolicy,
    pub insert_paragraphs: bool,
    pub collapse_segments: bool,
    pub conflict_mode: ConflictMode,
    pub annotated_table_mode: TableMode,
    pub annotation_attribute: bool,
    /// Somente as etapas habilitadas, na ordem declarada.
    pub steps: Vec<StepDescriptor>,
    pub output_dir: PathBuf,
}

impl ExecutionPlan {
    /// Valida a configuração contra o texto.
    ///
    /// Toda inconsistência aparece aqui, antes de qualquer etapa rodar: idioma ou política
    /// desconhecidos, trecho fora do texto, etapa sem entrada disponível.
    pub fn resolve(config: &ExportConfig, source: &SourceText) -> Result<Self> {
        let run = &config.run;
        let language = Language::from_tag(&run.tokenizer_language)?;
        let policy = config.policy_registry().get(&run.paragraph_policy)?.clone();
        let range = source.resolve_range(run.text_range)?;

        if run.annotated_table_mode == TableMode::Basic {
            return Err(ExportError::config(
                "annotated_table_mode deve ser 'annotated' ou 'iob2'",
            ));
        }

        let steps: Vec<StepDescriptor> = config.steps.iter().filter(|s| s.enabled).cloned().collect();
        if steps.is_empty() {
            return Err(ExportError::config("nenhuma etapa habilitada"));
        }

        let mut produced: HashSet<&str> = HashSet::new();
        for step in &steps {
            match (&step.input_ref, step.step.needs_input()) {
                (Some(input), true) => {
                    let on_disk = config.output_dir.join(format!("{}.tsv", input));
                    if !produced.contains(input.as_str()) && !on_disk.is_file() {
                        return Err(ExportError::config(format!(
                            "etapa '{}': entrada '{}' não é produzida por etapa anterior nem existe em {}",
                            step.step.name(),
                            input,
                            on_disk.display()
                        )));
                    }
                }
                (None, true) => {
                    return Err(ExportError::config(format!(
                        "etapa '{}' precisa de input_ref",
                        step.step.name()
                    )))
                }
                (Some(_), false) => {
                    return Err(ExportError::config(format!(
                        "etapa '{}' não aceita input_ref",
                        step.step.name()
                    )))
                }
                (None, false) => {}
            }
            if !produced.insert(step.output_ref.as_str()) {
                return Err(ExportError::config(format!(
                    "output_ref '{}' repetido",
                    step.output_ref
                )));
            }
        }

        Ok(Self {
            language,
            max_text_length: run.max_text_length,
            range,
            policy,
            insert_paragraphs: run.insert_paragraphs,
            collapse_segments: !run.use_all_text_selection_segments,
            conflict_mode: run.conflict_mode,
            annotated_table_mode: run.annotated_table_mode,
            annotation_attribute: run.annotation_attribute,
            steps,
            output_dir: config.output_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = ExportConfig::from_json_str("{}").unwrap();
        assert_eq!(config.run, RunConfig::default());
        assert_eq!(config.run.max_text_length, 2_000_000);
        assert_eq!(config.run.paragraph_policy, "eltec-deu");
        assert!(config.run.use_all_text_selection_segments);
        assert_eq!(config.steps, default_steps());
    }

    #[test]
    fn test_flat_run_fields() {
        let json = r#"{
            "tokenizer_language": "fr",
            "text_range": {"start": 2, "end": 5},
            "conflict_mode": "lenient",
            "annotated_table_mode": "annotated",
            "steps": [{"step": "basic_token_table", "output_ref": "tokens"}]
        }"#;
        let config = ExportConfig::from_json_str(json).unwrap();
        assert_eq!(config.run.conflict_mode, ConflictMode::Lenient);
        assert_eq!(config.run.text_range, Some(TextRange::new(2, 5)));
        assert!(config.steps[0].enabled);
        assert_eq!(config.steps[0].output_file(), "tokens.tsv");

        let plan = ExecutionPlan::resolve(&config, &SourceText::new("Ab cd ef")).unwrap();
        assert_eq!(plan.language, Language::French);
        assert_eq!(plan.range, TextRange::new(2, 5));
        assert_eq!(plan.annotated_table_mode, TableMode::Annotated);
    }

    #[test]
    fn test_resolve_rejects_invalid_settings() {
        let source = SourceText::new("Ab cd");

        let mut config = ExportConfig::default();
        config.run.tokenizer_language = "Klingon".into();
        assert!(matches!(
            ExecutionPlan::resolve(&config, &source),
            Err(ExportError::Resource(_))
        ));

        let mut config = ExportConfig::default();
        config.run.paragraph_policy = "eltec-spa".into();
        assert!(matches!(
            ExecutionPlan::resolve(&config, &source),
            Err(ExportError::Config(_))
        ));

        let mut config = ExportConfig::default();
        config.run.text_range = Some(TextRange::new(0, 50));
        assert!(matches!(
            ExecutionPlan::resolve(&config, &source),
            Err(ExportError::Config(_))
        ));
    }

    #[test]
    fn test_disabled_producer_needs_file_on_disk() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let source = SourceText::new("Ab cd");
        let mut config = ExportConfig {
            output_dir: dir.path().to_path_buf(),
            ..ExportConfig::default()
        };
        config.steps[0].enabled = false;
        assert!(matches!(
            ExecutionPlan::resolve(&config, &source),
            Err(ExportError::Config(_))
        ));

        std::fs::write(dir.path().join("basic_token_table.tsv"), "Token_ID\tToken\tStart\tEnd\n").unwrap();
        let plan = ExecutionPlan::resolve(&config, &source).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step, StepKind::AnnotatedTokenTable);
    }

    #[test]
    fn test_extra_policy_from_config() {
        let json = r#"{
            "paragraph_policy": "eltec-spa",
            "paragraph_policies": [{"name": "eltec-spa", "max_break_width": 4}]
        }"#;
        let config = ExportConfig::from_json_str(json).unwrap();
        let plan = ExecutionPlan::resolve(&config, &SourceText::new("Hola.")).unwrap();
        assert_eq!(plan.policy.max_break_width, Some(4));
    }
}
