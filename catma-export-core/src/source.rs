//! # Texto-fonte endereçado por caractere
//!
//! O CATMA endereça anotações por **índice de caractere** (não de byte). Como `str` em Rust é
//! indexado por byte, o [`SourceText`] guarda a tabela caractere → byte uma única vez e todas
//! as etapas (tokenizador, segmentador de parágrafos, serializadores) trabalham com offsets de
//! caractere.
//!
//! Também contém os utilitários de recorte de texto (`text_range`): pré-visualização de um
//! intervalo e busca de um intervalo a partir de dois padrões.

use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

/// Intervalo semiaberto `[start, end)` de caracteres no texto completo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resultado de [`SourceText::find_range`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSearch {
    /// Cada padrão ocorre exatamente uma vez.
    Unique(TextRange),
    /// Zero ou várias ocorrências de algum dos padrões: devolve todos os candidatos.
    Ambiguous { starts: Vec<usize>, ends: Vec<usize> },
}

/// Texto-fonte imutável com acesso por offset de caractere.
#[derive(Debug, Clone)]
pub struct SourceText {
    text: String,
    /// `byte_offsets[i]` é o byte onde começa o caractere `i`; a última entrada é `text.len()`.
    byte_offsets: Vec<usize>,
}

impl SourceText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut byte_offsets: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        byte_offsets.push(text.len());
        Self { text, byte_offsets }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Número de caracteres do texto.
    pub fn char_len(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    /// Byte correspondente ao caractere `char_idx` (aceita `char_len()` como fim).
    pub fn byte_offset(&self, char_idx: usize) -> Option<usize> {
        self.byte_offsets.get(char_idx).copied()
    }

    /// Caractere que começa no byte `byte_idx`; `None` se o byte não for fronteira de caractere.
    pub fn char_offset(&self, byte_idx: usize) -> Option<usize> {
        self.byte_offsets.binary_search(&byte_idx).ok()
    }

    /// Fatia `[start, end)` em caracteres.
    pub fn slice(&self, start: usize, end: usize) -> Result<&str> {
        if start > end {
            return Err(ExportError::config(format!(
                "intervalo invertido: {}..{}",
                start, end
            )));
        }
        match (self.byte_offset(start), self.byte_offset(end)) {
            (Some(b0), Some(b1)) => Ok(&self.text[b0..b1]),
            _ => Err(ExportError::config(format!(
                "intervalo {}..{} fora do texto ({} caracteres)",
                start,
                end,
                self.char_len()
            ))),
        }
    }

    /// Valida o `text_range` configurado; sem intervalo, devolve o texto inteiro.
    pub fn resolve_range(&self, range: Option<TextRange>) -> Result<TextRange> {
        let range = range.unwrap_or(TextRange::new(0, self.char_len()));
        if range.start > range.end || range.end > self.char_len() {
            return Err(ExportError::config(format!(
                "text_range {}..{} fora dos limites do documento (0..{})",
                range.start,
                range.end,
                self.char_len()
            )));
        }
        Ok(range)
    }

    /// Pré-visualização de um intervalo: os primeiros e os últimos `snippet_len` caracteres,
    /// separados por `...`, entre aspas. Trechos curtos são devolvidos inteiros.
    pub fn preview(&self, range: TextRange, snippet_len: usize) -> Result<String> {
        let range = self.resolve_range(Some(range))?;
        let text = self.slice(range.start, range.end)?;
        if range.len() >= snippet_len * 2 {
            let head = self.slice(range.start, range.start + snippet_len)?;
            let tail = self.slice(range.end - snippet_len, range.end)?;
            Ok(format!("\"{}...{}\"", head, tail))
        } else {
            Ok(format!("\"{}\"", text))
        }
    }

    /// Procura um intervalo que começa na ocorrência de `start_pattern` e termina no fim da
    /// ocorrência de `end_pattern` (ambos expressões regulares).
    pub fn find_range(&self, start_pattern: &str, end_pattern: &str) -> Result<RangeSearch> {
        let start_re = Regex::new(start_pattern)
            .map_err(|e| ExportError::config(format!("padrão inicial inválido: {}", e)))?;
        let end_re = Regex::new(end_pattern)
            .map_err(|e| ExportError::config(format!("padrão final inválido: {}", e)))?;

        let starts: Vec<usize> = start_re
            .find_iter(&self.text)
            .filter_map(|m| self.char_offset(m.start()))
            .collect();
        let ends: Vec<usize> = end_re
            .find_iter(&self.text)
            .filter_map(|m| self.char_offset(m.end()))
            .collect();

        if starts.len() == 1 && ends.len() == 1 {
            Ok(RangeSearch::Unique(TextRange::new(starts[0], ends[0])))
        } else {
            Ok(RangeSearch::Ambiguous { starts, ends })
        }
    }
}

/// Reduz finais de linha Windows (`\r\n`) ao padrão Unix (`\n`), para que o texto tenha o
/// mesmo comprimento em qualquer plataforma.
pub fn unify_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains("\r\n") {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}
