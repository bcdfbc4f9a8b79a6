//! # Modelo de Anotações
//!
//! Normaliza os registros brutos do CATMA (uma anotação pode ter vários segmentos
//! descontínuos) numa lista canônica de segmentos por anotação.
//!
//! ## Modos de segmentos
//!
//! O CATMA divide internamente anotações longas e contíguas em vários segmentos. Essa divisão
//! não deve chegar aos dados exportados, por isso existe uma chave global por execução:
//!
//! - `collapse_segments = true`: cada anotação vira um único segmento `[min(start), max(end))`
//!   (usado para anotações longas e contíguas);
//! - `collapse_segments = false`: cada segmento é alinhado de forma independente (usado para
//!   anotações curtas e descontínuas).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ExportError, Result};
use crate::source::{unify_line_endings, SourceText};

/// Um intervalo contíguo `[start, end)` de caracteres no texto completo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Interseção não vazia com `[start, end)`.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Registro de anotação como vem do repositório de anotações.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnnotationRecord {
    pub id: String,
    #[serde(default)]
    pub collection_id: String,
    #[serde(alias = "tag")]
    pub class_label: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// Anotação canônica: id curto, segmentos ordenados e sem sobreposição.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    pub collection_id: String,
    pub class_label: String,
    pub segments: Vec<Segment>,
}

/// Registro descartado durante a normalização, com o motivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardedRecord {
    pub id: String,
    pub reason: String,
}

/// Resultado de [`normalize`].
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub annotations: Vec<Annotation>,
    pub discarded: Vec<DiscardedRecord>,
}

/// Reduz ids do CATMA (`https://.../CATMA_<UUID>`) ao UUID.
pub fn short_annotation_id(id: &str) -> &str {
    let last = id.rsplit('/').next().unwrap_or(id);
    last.rsplit('_').next().unwrap_or(last)
}

/// Normaliza registros brutos em anotações canônicas.
///
/// Registros sem rótulo, sem segmentos ou com segmento vazio/invertido são descartados e
/// reportados.
pub fn normalize(records: &[RawAnnotationRecord], collapse_segments: bool) -> Normalized {
    let mut out = Normalized::default();

    for record in records {
        // Rótulo vazio seria indistinguível de "sem anotação" nas tabelas
        if record.class_label.trim().is_empty() {
            warn!("Anotação '{}' descartada: rótulo de classe vazio", record.id);
            out.discarded.push(DiscardedRecord {
                id: record.id.clone(),
                reason: "rótulo de classe vazio".into(),
            });
            continue;
        }
        if record.segments.is_empty() {
            warn!("Anotação '{}' descartada: nenhum segmento", record.id);
            out.discarded.push(DiscardedRecord {
                id: record.id.clone(),
                reason: "nenhum segmento".into(),
            });
            continue;
        }
        if let Some(bad) = record.segments.iter().find(|s| s.start >= s.end) {
            warn!(
                "Anotação '{}' descartada: segmento inválido {}..{}",
                record.id, bad.start, bad.end
            );
            out.discarded.push(DiscardedRecord {
                id: record.id.clone(),
                reason: format!("segmento inválido {}..{}", bad.start, bad.end),
            });
            continue;
        }

        let mut segments = record.segments.clone();
        segments.sort();
        let segments = if collapse_segments {
            let start = segments.iter().map(|s| s.start).min().unwrap_or(0);
            let end = segments.iter().map(|s| s.end).max().unwrap_or(0);
            vec![Segment::new(start, end)]
        } else {
            merge_overlapping(segments)
        };

        out.annotations.push(Annotation {
            id: short_annotation_id(&record.id).to_string(),
            collection_id: record.collection_id.clone(),
            class_label: record.class_label.clone(),
            segments,
        });
    }

    out
}

/// Funde segmentos sobrepostos de uma mesma anotação (entrada ordenada).
fn merge_overlapping(sorted: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(sorted.len());
    for seg in sorted {
        match merged.last_mut() {
            Some(last) if seg.start < last.end => last.end = last.end.max(seg.end),
            _ => merged.push(seg),
        }
    }
    merged
}

/// Coleção de anotações sobre um documento, como salva pelo CATMA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub text_title: String,
    #[serde(default)]
    pub annotations: Vec<RawAnnotationRecord>,
}

impl AnnotationCollection {
    /// Normaliza os registros da coleção, preenchendo `collection_id` quando ausente.
    pub fn normalized(&self, collapse_segments: bool) -> Normalized {
        let mut normalized = normalize(&self.annotations, collapse_segments);
        for annotation in &mut normalized.annotations {
            if annotation.collection_id.is_empty() {
                annotation.collection_id = self.id.clone();
            }
        }
        normalized
    }
}

/// Projeto carregado: um texto e as coleções que o anotam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub collections: Vec<AnnotationCollection>,
}

impl Project {
    /// Lê um projeto em JSON e unifica os finais de linha do texto.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut project: Project = serde_json::from_str(json)?;
        if project.text.contains("\r\n") {
            project.text = unify_line_endings(&project.text).into_owned();
            info!("Finais de linha do texto unificados para o padrão Unix");
        }
        Ok(project)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let project = Self::from_json_str(&json)?;
        info!(
            "Projeto '{}' carregado: {} coleção(ões)",
            project.name,
            project.collections.len()
        );
        Ok(project)
    }

    pub fn source(&self) -> SourceText {
        SourceText::new(self.text.clone())
    }

    pub fn collection(&self, index: usize) -> Result<&AnnotationCollection> {
        self.collections.get(index).ok_or_else(|| {
            ExportError::config(format!(
                "coleção {} não existe (o projeto tem {})",
                index,
                self.collections.len()
            ))
        })
    }

    /// Índice da única coleção com este nome sobre o texto com este título.
    pub fn find_collection(&self, name: &str, text_title: &str) -> Result<usize> {
        let indices: Vec<usize> = self
            .collections
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name && c.text_title == text_title)
            .map(|(i, _)| i)
            .collect();
        match indices.as_slice() {
            [index] => Ok(*index),
            _ => Err(ExportError::config(format!(
                "{} coleções encontradas com nome '{}' e texto '{}'; esperava exatamente uma",
                indices.len(),
                name,
                text_title
            ))),
        }
    }
}
