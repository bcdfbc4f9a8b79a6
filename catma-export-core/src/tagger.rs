//! # Tokens Anotados e Esquema IOB2
//!
//! Define o token já alinhado às anotações ([`AnnotatedToken`]) e o esquema de tags **IOB2**
//! usado na tabela de tokens do projeto:
//!
//! - `B-X`: Begin (primeiro token de uma anotação da classe `X`)
//! - `I-X`: Inside (tokens seguintes da mesma anotação)
//! - `O`: Outside (token sem anotação)
//!
//! Diferente de um tagger de NER, as classes não são fixas: qualquer rótulo do sistema de
//! classes do projeto vira uma tag.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tokenizer::Token;

/// Um token com no máximo um rótulo de classe e a marca de início de parágrafo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedToken {
    pub token: Token,
    pub class_label: Option<String>,
    /// Anotação que venceu o alinhamento para este token.
    pub annotation_id: Option<String>,
    pub paragraph_start: bool,
}

impl AnnotatedToken {
    pub fn unannotated(token: Token) -> Self {
        Self {
            token,
            class_label: None,
            annotation_id: None,
            paragraph_start: false,
        }
    }
}

/// Tag IOB2 aplicada a um token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// **Begin**: início de uma anotação. Ex: **Unter** (B-Ort) den Linden.
    Begin(String),
    /// **Inside**: continuação da mesma anotação. Ex: Unter **den** (I-Ort) Linden.
    Inside(String),
    /// **Outside**: o token não está anotado.
    Outside,
}

impl Tag {
    /// Representação textual da tag (ex: "B-Ort", "I-Ort", "O")
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(class) => format!("B-{}", class),
            Tag::Inside(class) => format!("I-{}", class),
            Tag::Outside => "O".to_string(),
        }
    }

    /// Classe desta tag (se for B- ou I-)
    pub fn class(&self) -> Option<&str> {
        match self {
            Tag::Begin(c) | Tag::Inside(c) => Some(c),
            Tag::Outside => None,
        }
    }

    /// Parseia uma tag a partir de string (ex: "B-Ort" → Begin("Ort"))
    pub fn from_label(s: &str) -> Option<Self> {
        if s == "O" {
            return Some(Tag::Outside);
        }
        let (prefix, class) = s.split_once('-')?;
        if class.is_empty() {
            return None;
        }
        match prefix {
            "B" => Some(Tag::Begin(class.to_string())),
            "I" => Some(Tag::Inside(class.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Deriva as tags IOB2 do fluxo anotado.
///
/// Um token abre (`B-`) quando sua anotação difere da anotação do token anterior; caso
/// contrário continua (`I-`). Sem id de anotação (ex: tabela lida do disco), compara-se a
/// classe.
pub fn iob2_tags(tokens: &[AnnotatedToken]) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(tokens.len());
    let mut prev: Option<&AnnotatedToken> = None;

    for t in tokens {
        let tag = match &t.class_label {
            None => Tag::Outside,
            Some(class) => {
                let continues = prev
                    .map(|p| {
                        p.class_label.as_deref() == Some(class.as_str())
                            && p.annotation_id == t.annotation_id
                    })
                    .unwrap_or(false);
                if continues {
                    Tag::Inside(class.clone())
                } else {
                    Tag::Begin(class.clone())
                }
            }
        };
        tags.push(tag);
        prev = Some(t);
    }
    tags
}

/// Quantos tokens cada anotação cobre no fluxo alinhado.
pub fn annotation_token_counts(tokens: &[AnnotatedToken]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for id in tokens.iter().filter_map(|t| t.annotation_id.as_deref()) {
        *counts.entry(id).or_insert(0) += 1;
    }
    counts
}
