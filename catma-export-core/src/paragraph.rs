//! # Segmentação de Parágrafos
//!
//! Os textos chegam ao CATMA como texto puro: a estrutura de parágrafos precisa ser inferida
//! do layout. Cada intervalo entre dois tokens que contém uma quebra de linha é classificado
//! como **quebra de parágrafo** ou **quebra suave** (linha dentro do mesmo parágrafo).
//!
//! ## Políticas
//!
//! Cada classe de texto codifica parágrafos de um jeito, por isso as regras são **dados**
//! ([`ParagraphPolicy`]) guardados num registro por nome ([`PolicyRegistry`]). Novas classes
//! de texto entram com `register`, sem tocar no alinhador nem nos serializadores.
//!
//! | Política    | Quebra de parágrafo                                              |
//! |-------------|------------------------------------------------------------------|
//! | `eltec-deu` | quebra seguida de poucos espaços (intervalo com menos de 10 car.)|
//! |             | exceto recuo de exatamente 15 espaços, sempre quebra suave       |
//! | `blank-line`| duas ou mais quebras de linha seguidas                           |
//! | `line`      | qualquer quebra de linha                                         |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ExportError, Result};
use crate::source::SourceText;
use crate::tagger::AnnotatedToken;

/// Nome da política de referência.
pub const ELTEC_DEU: &str = "eltec-deu";

/// Decisão tomada para um intervalo entre tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    /// O intervalo não contém quebra de linha.
    None,
    Soft,
    Paragraph,
}

fn default_min_line_breaks() -> usize {
    1
}

/// Conjunto de regras que decide o tipo de cada quebra de linha.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphPolicy {
    pub name: String,
    /// Largura máxima do intervalo (sem o espaço final do token anterior) que ainda conta
    /// como quebra de parágrafo. `None`: sem limite.
    #[serde(default)]
    pub max_break_width: Option<usize>,
    /// Quebra seguida de exatamente este número de espaços é sempre quebra suave.
    #[serde(default)]
    pub soft_indent: Option<usize>,
    /// Número mínimo de quebras de linha no intervalo para abrir parágrafo.
    #[serde(default = "default_min_line_breaks")]
    pub min_line_breaks: usize,
}

impl ParagraphPolicy {
    /// Política dos textos ELTeC em alemão.
    pub fn eltec_deu() -> Self {
        Self {
            name: ELTEC_DEU.into(),
            max_break_width: Some(9),
            soft_indent: Some(15),
            min_line_breaks: 1,
        }
    }

    pub fn blank_line() -> Self {
        Self {
            name: "blank-line".into(),
            max_break_width: None,
            soft_indent: None,
            min_line_breaks: 2,
        }
    }

    pub fn line() -> Self {
        Self {
            name: "line".into(),
            max_break_width: None,
            soft_indent: None,
            min_line_breaks: 1,
        }
    }

    /// Classifica o texto bruto entre dois tokens.
    pub fn classify(&self, gap: &str) -> BreakKind {
        let line_breaks = gap.matches('\n').count();
        if line_breaks == 0 {
            return BreakKind::None;
        }

        if let Some(indent) = self.soft_indent {
            let after_last = gap.rsplit('\n').next().unwrap_or("");
            if after_last.chars().count() == indent && after_last.chars().all(|c| c == ' ') {
                return BreakKind::Soft;
            }
        }

        if line_breaks < self.min_line_breaks {
            return BreakKind::Soft;
        }

        // O primeiro espaço pertence ao token anterior
        let width = gap.strip_prefix(' ').unwrap_or(gap).chars().count();
        match self.max_break_width {
            Some(max) if width > max => BreakKind::Soft,
            _ => BreakKind::Paragraph,
        }
    }
}

/// Marca `paragraph_start` em cada token que abre um parágrafo.
///
/// O primeiro token do trecho processado sempre abre parágrafo.
pub fn segment(source: &SourceText, tokens: &mut [AnnotatedToken], policy: &ParagraphPolicy) -> Result<()> {
    let mut paragraphs = 0;
    for i in 0..tokens.len() {
        let starts = if i == 0 {
            true
        } else {
            let gap = source.slice(tokens[i - 1].token.end, tokens[i].token.start)?;
            policy.classify(gap) == BreakKind::Paragraph
        };
        tokens[i].paragraph_start = starts;
        if starts {
            paragraphs += 1;
        }
    }
    debug!("Política '{}': {} parágrafo(s)", policy.name, paragraphs);
    Ok(())
}

/// Registro de políticas de parágrafo por nome.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, ParagraphPolicy>,
}

impl PolicyRegistry {
    /// Cria um registro vazio
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Registra uma política; substitui outra de mesmo nome.
    pub fn register(&mut self, policy: ParagraphPolicy) {
        self.policies.insert(policy.name.clone(), policy);
    }

    pub fn get(&self, name: &str) -> Result<&ParagraphPolicy> {
        self.policies.get(name).ok_or_else(|| {
            ExportError::config(format!(
                "política de parágrafo desconhecida '{}' (disponíveis: {})",
                name,
                self.list_policies().join(", ")
            ))
        })
    }

    pub fn has(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Nomes das políticas registradas (ordenados)
    pub fn list_policies(&self) -> Vec<String> {
        let mut names: Vec<_> = self.policies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registro com as políticas embutidas
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ParagraphPolicy::eltec_deu());
        registry.register(ParagraphPolicy::blank_line());
        registry.register(ParagraphPolicy::line());
        registry
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{tokenize, Language};

    fn paragraph_starts(text: &str, policy: &ParagraphPolicy) -> Vec<String> {
        let source = SourceText::new(text);
        let mut tokens: Vec<AnnotatedToken> = tokenize(text, Language::German, 10_000)
            .unwrap()
            .into_iter()
            .map(AnnotatedToken::unannotated)
            .collect();
        segment(&source, &mut tokens, policy).unwrap();
        tokens
            .iter()
            .filter(|t| t.paragraph_start)
            .map(|t| t.token.text.clone())
            .collect()
    }

    #[test]
    fn test_eltec_line_break_is_paragraph() {
        let policy = ParagraphPolicy::eltec_deu();
        assert_eq!(paragraph_starts("Ab cd.\nEf gh.", &policy), vec!["Ab", "Ef"]);
        assert_eq!(paragraph_starts("Ab cd. \n Ef gh.", &policy), vec!["Ab", "Ef"]);
    }

    #[test]
    fn test_eltec_wide_indent_is_soft() {
        let policy = ParagraphPolicy::eltec_deu();
        let text = format!("Ab cd,\n{}ef gh.", " ".repeat(15));
        assert_eq!(paragraph_starts(&text, &policy), vec!["Ab"]);
        // Recuo de 15 espaços vence mesmo depois de pontuação
        let text = format!("Ab cd.\n{}Ef gh.", " ".repeat(15));
        assert_eq!(paragraph_starts(&text, &policy), vec!["Ab"]);
    }

    #[test]
    fn test_eltec_long_gap_is_soft() {
        let policy = ParagraphPolicy::eltec_deu();
        assert_eq!(policy.classify(&format!("\n{}", " ".repeat(8))), BreakKind::Paragraph);
        assert_eq!(policy.classify(&format!("\n{}", " ".repeat(9))), BreakKind::Soft);
        assert_eq!(policy.classify(" "), BreakKind::None);
    }

    #[test]
    fn test_blank_line_policy() {
        let policy = ParagraphPolicy::blank_line();
        assert_eq!(
            paragraph_starts("Eins zwei\ndrei.\n\nVier.", &policy),
            vec!["Eins", "Vier"]
        );
    }

    #[test]
    fn test_empty_token_stream() {
        let source = SourceText::new("");
        let mut tokens: Vec<AnnotatedToken> = Vec::new();
        segment(&source, &mut tokens, &ParagraphPolicy::line()).unwrap();
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = PolicyRegistry::with_defaults();
        assert!(registry.has(ELTEC_DEU));
        assert!(matches!(registry.get("eltec-spa"), Err(ExportError::Config(_))));

        let policy: ParagraphPolicy =
            serde_json::from_str(r#"{"name": "eltec-spa", "max_break_width": 4}"#).unwrap();
        assert_eq!(policy.min_line_breaks, 1);
        registry.register(policy);
        assert_eq!(
            registry.list_policies(),
            vec!["blank-line", "eltec-deu", "eltec-spa", "line"]
        );
    }
}
