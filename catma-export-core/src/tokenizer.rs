//! # Adaptador de Tokenização
//!
//! Divide o texto bruto em tokens (palavras, pontuações) preservando a posição original de
//! cada um em **offsets de caractere**, o mesmo endereçamento usado pelas anotações do CATMA.
//! Espaços em branco nunca viram tokens: eles ficam registrados em `whitespace_after`.
//!
//! ## Esquema de Tokenização
//!
//! 1. O texto é cortado nas fronteiras de palavra do UAX #29 (`unicode-segmentation`).
//!    Números como `1.234` e palavras com apóstrofo já saem inteiros dessa etapa.
//! 2. Regras do idioma reagrupam ou quebram os pedaços:
//!    - compostos com hífen (`Covid-19`, `Ost-West`) ficam juntos;
//!    - abreviações conhecidas mantêm o ponto (`Dr.`, `z.B.`);
//!    - reticências (`...`) formam um token;
//!    - elisões francesas são separadas (`l'homme` -> `l'`, `homme`);
//!    - travessão inicial separado em espanhol (`-Hola` -> `-`, `Hola`).
//!
//! ## Modelos de Idioma
//!
//! Cada idioma tem um [`LanguageModel`] inicializado no máximo uma vez por processo e
//! compartilhado entre threads (leitura concorrente depois da inicialização).
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use catma_export_core::tokenizer::{tokenize, Language};
//!
//! let tokens = tokenize("Ab cd.\nEf gh.", Language::German, 1_000).unwrap();
//! let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
//! assert_eq!(texts, vec!["Ab", "cd", ".", "Ef", "gh", "."]);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{ExportError, Result};
use crate::source::{SourceText, TextRange};

/// Limite padrão de caracteres aceitos pelo tokenizador.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 2_000_000;

/// Um token extraído do texto original.
///
/// `start` e `end` são offsets de caractere no texto **completo** (intervalo semiaberto),
/// mesmo quando apenas um trecho do documento foi tokenizado.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Índice sequencial do token na lista (0, 1, 2...).
    pub index: usize,
    /// O texto do token (ex: "Haus", ",", "z.B.").
    pub text: String,
    /// Offset de caractere inicial (inclusivo).
    pub start: usize,
    /// Offset de caractere final (exclusivo).
    pub end: usize,
    /// Há espaço em branco entre este token e o próximo.
    pub whitespace_after: bool,
}

/// Idiomas com modelo de tokenização disponível.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    German,
    English,
    French,
    Spanish,
    Multilingual,
}

impl Language {
    /// Interpreta uma tag de idioma: nome em inglês, ISO 639-1 ou ISO 639-3.
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "german" | "de" | "deu" => Ok(Language::German),
            "english" | "en" | "eng" => Ok(Language::English),
            "french" | "fr" | "fra" => Ok(Language::French),
            "spanish" | "es" | "spa" => Ok(Language::Spanish),
            "multilingual" | "xx" => Ok(Language::Multilingual),
            other => Err(ExportError::resource(format!(
                "nenhum modelo de tokenização para o idioma '{}'",
                other
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::German => "de",
            Language::English => "en",
            Language::French => "fr",
            Language::Spanish => "es",
            Language::Multilingual => "xx",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Language::German => 0,
            Language::English => 1,
            Language::French => 2,
            Language::Spanish => 3,
            Language::Multilingual => 4,
        }
    }
}

const GERMAN_ABBREVIATIONS: &[&str] = &[
    "z.b.", "u.a.", "d.h.", "usw.", "u.s.w.", "bzw.", "ca.", "dr.", "hr.", "fr.", "frl.", "st.",
    "nr.", "vgl.", "etc.", "s.", "str.", "z.t.", "geb.", "prof.", "jr.", "sen.", "bd.", "kap.",
];
const ENGLISH_ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "st.", "jr.", "sr.", "e.g.", "i.e.", "etc.", "vs.", "no.",
    "prof.", "vol.", "ch.",
];
const FRENCH_ABBREVIATIONS: &[&str] = &["m.", "mme.", "mlle.", "dr.", "st.", "etc.", "p.", "cf."];
const SPANISH_ABBREVIATIONS: &[&str] = &[
    "sr.", "sra.", "srta.", "d.", "dña.", "dr.", "ud.", "uds.", "etc.", "pág.", "núm.", "vd.",
];

const FRENCH_ELISIONS: &[&str] = &["l", "d", "j", "qu", "n", "s", "c", "m", "t", "jusqu", "lorsqu"];

const HYPHENS: &[&str] = &["-", "\u{2010}"];

/// Regras de tokenização de um idioma.
#[derive(Debug, Clone)]
pub struct LanguageModel {
    pub language: Language,
    abbreviations: HashSet<String>,
    elisions: &'static [&'static str],
    /// Separa o hífen inicial de uma palavra (`-Hola`). Quando falso, o hífen fica colado.
    split_leading_dash: bool,
}

impl LanguageModel {
    fn build(language: Language) -> Self {
        let (abbreviations, elisions, split_leading_dash): (&[&str], &'static [&'static str], bool) =
            match language {
                Language::German => (GERMAN_ABBREVIATIONS, &[], false),
                Language::English => (ENGLISH_ABBREVIATIONS, &[], false),
                Language::French => (FRENCH_ABBREVIATIONS, FRENCH_ELISIONS, false),
                Language::Spanish => (SPANISH_ABBREVIATIONS, &[], true),
                Language::Multilingual => (&[], &[], false),
            };
        Self {
            language,
            abbreviations: abbreviations.iter().map(|s| s.to_string()).collect(),
            elisions,
            split_leading_dash,
        }
    }

    pub fn is_abbreviation(&self, candidate: &str) -> bool {
        self.abbreviations.contains(&candidate.to_lowercase())
    }

    /// Comprimento em caracteres do prefixo elidido (incluindo o apóstrofo), se houver.
    fn elision_prefix_len(&self, word: &str) -> Option<usize> {
        let lower = word.to_lowercase();
        for prefix in self.elisions {
            for apostrophe in ['\'', '\u{2019}'] {
                let candidate = format!("{}{}", prefix, apostrophe);
                if lower.starts_with(&candidate) && lower.chars().count() > candidate.chars().count() {
                    return Some(candidate.chars().count());
                }
            }
        }
        None
    }
}

static MODELS: [OnceCell<Arc<LanguageModel>>; 5] = [
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
    OnceCell::new(),
];

/// Devolve o modelo do idioma, inicializando-o na primeira chamada.
///
/// A inicialização acontece no máximo uma vez por processo, sob exclusão mútua; chamadas
/// posteriores apenas clonam o `Arc`.
pub fn language_model(language: Language) -> Arc<LanguageModel> {
    MODELS[language.slot()]
        .get_or_init(|| {
            info!("Inicializando modelo de tokenização '{}'", language.code());
            Arc::new(LanguageModel::build(language))
        })
        .clone()
}

/// Tokenizador configurado para um idioma e um limite de tamanho.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    model: Arc<LanguageModel>,
    max_length: usize,
}

impl Tokenizer {
    pub fn new(language: Language, max_length: usize) -> Self {
        Self {
            model: language_model(language),
            max_length,
        }
    }

    /// Tokeniza um texto; offsets relativos ao início de `text`.
    pub fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        self.tokenize_at(text, 0)
    }

    /// Tokeniza o trecho `range` de `source`; offsets absolutos no texto completo.
    pub fn tokenize_range(&self, source: &SourceText, range: TextRange) -> Result<Vec<Token>> {
        let range = source.resolve_range(Some(range))?;
        let text = source.slice(range.start, range.end)?;
        self.tokenize_at(text, range.start)
    }

    fn tokenize_at(&self, text: &str, offset: usize) -> Result<Vec<Token>> {
        let len = text.chars().count();
        if len > self.max_length {
            return Err(ExportError::TextTooLong {
                len,
                max: self.max_length,
            });
        }

        let pieces = split_pieces(text);
        let mut spans = assemble(&pieces, &self.model);

        // Marca espaços e re-indexa os tokens
        let mut tokens = Vec::with_capacity(spans.len());
        for i in 0..spans.len() {
            let next_start = spans.get(i + 1).map(|s| s.start).unwrap_or(len);
            let span = &mut spans[i];
            tokens.push(Token {
                index: i,
                text: std::mem::take(&mut span.text),
                start: span.start + offset,
                end: span.end + offset,
                whitespace_after: span.end < next_start,
            });
        }
        debug!("{} tokens gerados a partir de {} caracteres", tokens.len(), len);
        Ok(tokens)
    }
}

/// Tokeniza um texto com o modelo do idioma indicado.
///
/// Falha com [`ExportError::TextTooLong`] quando o texto tem mais de `max_length` caracteres.
pub fn tokenize(text: &str, language: Language, max_length: usize) -> Result<Vec<Token>> {
    Tokenizer::new(language, max_length).tokenize(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PieceKind {
    Space,
    Word,
    Punct,
}

/// Pedaço produzido pelo UAX #29, com offsets de caractere.
#[derive(Debug, Clone)]
struct Piece<'a> {
    text: &'a str,
    start: usize,
    end: usize,
    kind: PieceKind,
}

/// Token em construção.
#[derive(Debug, Clone)]
struct Span {
    text: String,
    start: usize,
    end: usize,
}

impl Span {
    fn from_piece(piece: &Piece<'_>) -> Self {
        Span {
            text: piece.text.to_string(),
            start: piece.start,
            end: piece.end,
        }
    }

    fn absorb(&mut self, piece: &Piece<'_>) {
        self.text.push_str(piece.text);
        self.end = piece.end;
    }
}

fn split_pieces(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut char_pos = 0;
    for (_, segment) in text.split_word_bound_indices() {
        // WB4 cola marcas combinantes e ZWJ ao espaço anterior: o espaço vira peça própria
        let lead = segment
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map_or(segment.len(), |(i, _)| i);
        let (space, rest) = segment.split_at(lead);
        if !space.is_empty() {
            let n = space.chars().count();
            pieces.push(Piece {
                text: space,
                start: char_pos,
                end: char_pos + n,
                kind: PieceKind::Space,
            });
            char_pos += n;
        }
        if rest.is_empty() {
            continue;
        }
        let n = rest.chars().count();
        let kind = if rest.chars().any(char::is_alphanumeric) {
            PieceKind::Word
        } else {
            PieceKind::Punct
        };
        pieces.push(Piece {
            text: rest,
            start: char_pos,
            end: char_pos + n,
            kind,
        });
        char_pos += n;
    }
    pieces
}

fn assemble(pieces: &[Piece<'_>], model: &LanguageModel) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut i = 0;

    while i < pieces.len() {
        let piece = &pieces[i];
        if piece.kind == PieceKind::Space {
            i += 1;
            continue;
        }

        let mut current = Span::from_piece(piece);
        let mut j = i + 1;
        let mut is_word = piece.kind == PieceKind::Word;

        // Hífen inicial colado à palavra (exceto em idiomas que o separam)
        let starts_chunk = i == 0 || pieces[i - 1].kind == PieceKind::Space;
        if HYPHENS.contains(&piece.text)
            && starts_chunk
            && !model.split_leading_dash
            && pieces.get(j).map(|p| p.kind == PieceKind::Word).unwrap_or(false)
        {
            current.absorb(&pieces[j]);
            j += 1;
            is_word = true;
        }

        if is_word {
            // Compostos com hífen: Palavra (- Palavra)*
            while j + 1 < pieces.len()
                && HYPHENS.contains(&pieces[j].text)
                && pieces[j + 1].kind == PieceKind::Word
            {
                current.absorb(&pieces[j]);
                current.absorb(&pieces[j + 1]);
                j += 2;
            }
            // Abreviação conhecida mantém o ponto
            if let Some(next) = pieces.get(j) {
                if next.text == "." && model.is_abbreviation(&format!("{}.", current.text)) {
                    current.absorb(next);
                    j += 1;
                }
            }
        } else if piece.text == "." {
            // Reticências
            while pieces.get(j).map(|p| p.text == ".").unwrap_or(false) {
                current.absorb(&pieces[j]);
                j += 1;
            }
        }

        match model.elision_prefix_len(&current.text).filter(|_| is_word) {
            Some(prefix_len) => {
                let split_byte = current
                    .text
                    .char_indices()
                    .nth(prefix_len)
                    .map(|(b, _)| b)
                    .unwrap_or(current.text.len());
                let rest = current.text.split_off(split_byte);
                let boundary = current.start + prefix_len;
                spans.push(Span {
                    text: current.text,
                    start: current.start,
                    end: boundary,
                });
                spans.push(Span {
                    text: rest,
                    start: boundary,
                    end: current.end,
                });
            }
            None => spans.push(current),
        }
        i = j;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_tokenize_reference_example() {
        let tokens = tokenize("Ab cd.\nEf gh.", Language::German, 1_000).unwrap();
        let offsets: Vec<(usize, usize)> = tokens.iter().map(|t| (t.start, t.end)).collect();
        assert_eq!(texts(&tokens), vec!["Ab", "cd", ".", "Ef", "gh", "."]);
        assert_eq!(offsets, vec![(0, 2), (3, 5), (5, 6), (7, 9), (10, 12), (12, 13)]);
        assert!(tokens[0].whitespace_after);
        assert!(!tokens[1].whitespace_after);
        assert!(tokens[2].whitespace_after);
        assert!(!tokens[5].whitespace_after);
    }

    #[test]
    fn test_tokenize_is_deterministic() {
        let text = "Der Dr. Müller kam z.B. am 3.5. um 10:30 Uhr – „endlich“...";
        let a = tokenize(text, Language::German, 10_000).unwrap();
        let b = tokenize(text, Language::German, 10_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_tokens_cover_text_without_gaps() {
        let text = "Él dijo: «¡Vámonos!»\n  Y se fue   al Covid-19-Zentrum.";
        let tokens = tokenize(text, Language::Spanish, 10_000).unwrap();
        let chars: Vec<char> = text.chars().collect();
        let mut cursor = 0;
        for token in &tokens {
            assert!(chars[cursor..token.start].iter().all(|c| c.is_whitespace()));
            let piece: String = chars[token.start..token.end].iter().collect();
            assert_eq!(piece, token.text);
            cursor = token.end;
        }
        assert!(chars[cursor..].iter().all(|c| c.is_whitespace()));
    }

    #[test]
    fn test_abbreviations_and_compounds() {
        let tokens = tokenize("Dr. Ost-West sagte z.B. nichts...", Language::German, 1_000).unwrap();
        assert_eq!(
            texts(&tokens),
            vec!["Dr.", "Ost-West", "sagte", "z.B.", "nichts", "..."]
        );
    }

    #[test]
    fn test_french_elision() {
        let tokens = tokenize("L'homme d’affaires", Language::French, 1_000).unwrap();
        assert_eq!(texts(&tokens), vec!["L'", "homme", "d’", "affaires"]);
        assert_eq!((tokens[1].start, tokens[1].end), (2, 7));
    }

    #[test]
    fn test_spanish_splits_leading_dash() {
        let es = tokenize("-Hola", Language::Spanish, 100).unwrap();
        assert_eq!(texts(&es), vec!["-", "Hola"]);
        let de = tokenize("-Hallo", Language::German, 100).unwrap();
        assert_eq!(texts(&de), vec!["-Hallo"]);
    }

    #[test]
    fn test_text_too_long() {
        let err = tokenize("abcdef", Language::English, 5).unwrap_err();
        assert!(matches!(err, ExportError::TextTooLong { len: 6, max: 5 }));
    }

    #[test]
    fn test_tokenize_range_uses_absolute_offsets() {
        let source = SourceText::new("Vorwort. Ein Haus.");
        let tokenizer = Tokenizer::new(Language::German, 1_000);
        let tokens = tokenizer.tokenize_range(&source, TextRange::new(9, 18)).unwrap();
        assert_eq!(texts(&tokens), vec!["Ein", "Haus", "."]);
        assert_eq!(tokens[0].index, 0);
        assert_eq!((tokens[0].start, tokens[0].end), (9, 12));
    }

    #[test]
    fn test_language_tags_and_shared_model() {
        assert_eq!(Language::from_tag("deu").unwrap(), Language::German);
        assert_eq!(Language::from_tag("Spanish").unwrap(), Language::Spanish);
        assert!(matches!(Language::from_tag("klingon"), Err(ExportError::Resource(_))));
        let a = language_model(Language::French);
        let b = language_model(Language::French);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_model_initialized_once_across_threads() {
        let barrier = std::sync::Barrier::new(8);
        let barrier = &barrier;
        let models: Vec<Arc<LanguageModel>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        language_model(Language::English)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        assert!(Arc::ptr_eq(&models[0], &language_model(Language::English)));
    }

    #[test]
    fn test_combining_mark_after_space_is_not_whitespace_token() {
        for text in ["a \u{0301}b", "x \u{fe0f} y"] {
            let tokens = tokenize(text, Language::English, 1_000).unwrap();
            let chars: Vec<char> = text.chars().collect();
            assert!(tokens[0].whitespace_after, "{:?}", text);
            for token in &tokens {
                assert!(!token.text.chars().any(char::is_whitespace), "{:?}", token.text);
                let covered: String = chars[token.start..token.end].iter().collect();
                assert_eq!(covered, token.text);
            }
        }
    }
}
