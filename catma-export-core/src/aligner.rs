//! # Alinhamento Token ↔ Anotação
//!
//! Projeta os segmentos das anotações (offsets de caractere) sobre os tokens e garante a
//! restrição de **uma classe por token**.
//!
//! ## Cobertura
//!
//! Um segmento *cobre* um token quando os intervalos têm interseção não vazia (sobreposição,
//! não contenção): fronteiras de tokenização e de anotação não precisam coincidir.
//!
//! ## Conflitos
//!
//! Segmentos de anotações com classes **diferentes** cobrindo o mesmo token formam um
//! conflito. A política é explícita ([`ConflictMode`]):
//!
//! - `Strict`: a execução é rejeitada com [`ExportError::AlignmentConflict`];
//! - `Lenient`: mantém-se o primeiro rótulo pela ordem de prioridade e o conflito é
//!   registrado no relatório.
//!
//! A prioridade é determinística: ordem de carga da coleção, depois id da anotação, depois
//! início do segmento. Mesma classe vinda de várias anotações não é conflito.
//!
//! ## Algoritmo (varredura de intervalos)
//!
//! ```text
//! segmentos ordenados por início (uma vez)
//! para cada token, em ordem de início:
//!     admite segmentos com start < token.end       -> conjunto ativo (por prioridade)
//!     expira segmentos com end <= token.start      -> heap de mínimos por fim
//!     ativo == exatamente os segmentos que cobrem o token
//! ```
//!
//! Custo `O((n + m) log m)` em vez de `O(n·m)` do teste par a par: textos chegam a
//! centenas de milhares de tokens.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::annotation::{Annotation, Segment};
use crate::error::{ExportError, Result};
use crate::tagger::AnnotatedToken;
use crate::tokenizer::Token;

/// Política para tokens cobertos por classes diferentes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Rejeita a execução no primeiro conflito.
    #[default]
    Strict,
    /// Mantém o rótulo de maior prioridade e registra o conflito.
    Lenient,
}

/// Conflito registrado no modo `Lenient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub token_index: usize,
    pub kept_label: String,
    pub kept_annotation: String,
    pub rejected_label: String,
    pub rejected_annotation: String,
}

/// Fluxo de tokens anotados e os conflitos encontrados.
#[derive(Debug, Clone, Default)]
pub struct Alignment {
    pub tokens: Vec<AnnotatedToken>,
    pub conflicts: Vec<Conflict>,
}

/// Segmento com sua prioridade global.
struct RankedSegment<'a> {
    segment: Segment,
    annotation: &'a Annotation,
}

/// Ordena os segmentos por prioridade: coleção (ordem de carga), id da anotação, início.
fn rank_segments(annotations: &[Annotation]) -> Vec<RankedSegment<'_>> {
    let mut collection_order: HashMap<&str, usize> = HashMap::new();
    for a in annotations {
        let next = collection_order.len();
        collection_order.entry(a.collection_id.as_str()).or_insert(next);
    }

    let mut ranked: Vec<RankedSegment<'_>> = annotations
        .iter()
        .flat_map(|a| {
            a.segments.iter().map(move |s| RankedSegment {
                segment: *s,
                annotation: a,
            })
        })
        .collect();
    ranked.sort_by(|x, y| {
        let cx = collection_order[x.annotation.collection_id.as_str()];
        let cy = collection_order[y.annotation.collection_id.as_str()];
        (cx, &x.annotation.id, x.segment.start).cmp(&(cy, &y.annotation.id, y.segment.start))
    });
    ranked
}

/// Alinha as anotações aos tokens.
///
/// Os tokens de saída seguem a ordem de entrada; `paragraph_start` fica falso (é papel do
/// segmentador de parágrafos).
pub fn align(tokens: &[Token], annotations: &[Annotation], mode: ConflictMode) -> Result<Alignment> {
    let ranked = rank_segments(annotations);

    // Ranks ordenados por início de segmento
    let mut by_start: Vec<usize> = (0..ranked.len()).collect();
    by_start.sort_by_key(|&r| (ranked[r].segment.start, r));

    // Ordem de varredura dos tokens (normalmente já é a ordem de entrada)
    let mut order: Vec<usize> = (0..tokens.len()).collect();
    order.sort_by_key(|&i| (tokens[i].start, tokens[i].end));

    let mut out: Vec<AnnotatedToken> = tokens.iter().cloned().map(AnnotatedToken::unannotated).collect();
    let mut conflicts = Vec::new();

    let mut next = 0;
    let mut active: BTreeSet<usize> = BTreeSet::new();
    let mut expiry: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
    let mut label_counts: HashMap<&str, usize> = HashMap::new();

    for &i in &order {
        let token = &tokens[i];

        while next < by_start.len() && ranked[by_start[next]].segment.start < token.end {
            let r = by_start[next];
            active.insert(r);
            expiry.push(Reverse((ranked[r].segment.end, r)));
            *label_counts
                .entry(ranked[r].annotation.class_label.as_str())
                .or_insert(0) += 1;
            next += 1;
        }

        while let Some(&Reverse((end, r))) = expiry.peek() {
            if end > token.start {
                break;
            }
            expiry.pop();
            active.remove(&r);
            let label = ranked[r].annotation.class_label.as_str();
            if let Some(count) = label_counts.get_mut(label) {
                *count -= 1;
                if *count == 0 {
                    label_counts.remove(label);
                }
            }
        }

        let Some(&winner) = active.iter().next() else {
            continue;
        };
        let kept = ranked[winner].annotation;

        if label_counts.len() > 1 {
            let rival = active
                .iter()
                .map(|&r| ranked[r].annotation)
                .find(|a| a.class_label != kept.class_label);
            if let Some(rival) = rival {
                match mode {
                    ConflictMode::Strict => {
                        return Err(ExportError::AlignmentConflict {
                            token_index: token.index,
                            first_label: kept.class_label.clone(),
                            second_label: rival.class_label.clone(),
                        });
                    }
                    ConflictMode::Lenient => {
                        warn!(
                            "Conflito no token {} ('{}'): mantendo '{}' ({}), descartando '{}' ({})",
                            token.index, token.text, kept.class_label, kept.id, rival.class_label, rival.id
                        );
                        conflicts.push(Conflict {
                            token_index: token.index,
                            kept_label: kept.class_label.clone(),
                            kept_annotation: kept.id.clone(),
                            rejected_label: rival.class_label.clone(),
                            rejected_annotation: rival.id.clone(),
                        });
                    }
                }
            }
        }

        out[i].class_label = Some(kept.class_label.clone());
        out[i].annotation_id = Some(kept.id.clone());
    }

    debug!(
        "Alinhamento concluído: {} tokens, {} anotados, {} conflitos",
        out.len(),
        out.iter().filter(|t| t.class_label.is_some()).count(),
        conflicts.len()
    );

    Ok(Alignment {
        tokens: out,
        conflicts,
    })
}
