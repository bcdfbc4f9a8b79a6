//! # Documento Anotado (TEI XML)
//!
//! Converte o fluxo de tokens anotados num documento TEI em que cada trecho rotulado vira um
//! elemento com o nome da classe:
//!
//! ```text
//! <TEI xmlns="http://www.tei-c.org/ns/1.0" xmlns:CS1="https://www.canspin.uni-rostock.de/ns/CS1/110">
//!   <teiHeader>...</teiHeader>
//!   <text>
//!     <body>
//!       <p>Ab <CS1:X CS1:annotation="a1">cd.</CS1:X></p>
//!       <p>Ef gh.</p>
//!     </body>
//!   </text>
//! </TEI>
//! ```
//!
//! ## Regras
//!
//! 1. Um parágrafo abre em cada token com `paragraph_start` (se `insert_paragraphs`)
//! 2. Tokens vizinhos com o mesmo rótulo formam **um** único span, mesmo vindo de anotações
//!    diferentes
//! 3. Spans nunca atravessam parágrafos
//! 4. O espaço entre dois tokens vira exatamente um espaço; no fim do parágrafo é descartado
//!
//! O documento é montado primeiro como árvore ([`MarkupDocument`]) e só depois escrito como
//! XML, o que permite testar a estrutura sem comparar strings.

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::tagger::AnnotatedToken;

pub const TEI_NAMESPACE: &str = "http://www.tei-c.org/ns/1.0";
pub const CS1_NAMESPACE: &str = "https://www.canspin.uni-rostock.de/ns/CS1/110";

/// Namespace XML dos elementos de anotação.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn cs1() -> Self {
        Self {
            prefix: "CS1".into(),
            uri: CS1_NAMESPACE.into(),
        }
    }
}

/// Opções de montagem e escrita do documento.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupOptions {
    pub insert_paragraphs: bool,
    /// `None`: spans sem prefixo (`<X>…</X>`).
    pub span_namespace: Option<Namespace>,
    /// Escreve o id da anotação como atributo do span.
    pub annotation_attribute: bool,
    pub title: Option<String>,
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self {
            insert_paragraphs: true,
            span_namespace: Some(Namespace::cs1()),
            annotation_attribute: true,
            title: None,
        }
    }
}

impl MarkupOptions {
    /// Spans sem namespace e sem atributos.
    pub fn plain() -> Self {
        Self {
            insert_paragraphs: true,
            span_namespace: None,
            annotation_attribute: false,
            title: None,
        }
    }
}

/// Conteúdo de linha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Span {
        label: String,
        /// Anotações fundidas neste span, na ordem de aparição.
        annotation_ids: Vec<String>,
        text: String,
    },
}

/// Bloco do corpo do documento.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    /// Texto direto no `<body>`, quando parágrafos estão desligados.
    Flow(Vec<Inline>),
}

impl Block {
    pub fn inlines(&self) -> &[Inline] {
        match self {
            Block::Paragraph(inlines) | Block::Flow(inlines) => inlines,
        }
    }
}

/// Árvore do documento anotado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupDocument {
    pub blocks: Vec<Block>,
    options: MarkupOptions,
}

/// Monta o documento a partir do fluxo de tokens.
///
/// Falha com [`ExportError::Serialization`] se os intervalos dos tokens não estiverem em
/// ordem, sem sobreposição, com índices consecutivos e texto do tamanho do intervalo.
pub fn to_markup(tokens: &[AnnotatedToken], options: &MarkupOptions) -> Result<MarkupDocument> {
    validate(tokens)?;

    let mut builder = BlockBuilder::default();
    let mut blocks = Vec::new();

    for (i, t) in tokens.iter().enumerate() {
        if options.insert_paragraphs && t.paragraph_start && i > 0 {
            blocks.push(Block::Paragraph(builder.finish()));
        }
        builder.push(t);
    }
    if !tokens.is_empty() {
        let inlines = builder.finish();
        blocks.push(if options.insert_paragraphs {
            Block::Paragraph(inlines)
        } else {
            Block::Flow(inlines)
        });
    }

    Ok(MarkupDocument {
        blocks,
        options: options.clone(),
    })
}

fn validate(tokens: &[AnnotatedToken]) -> Result<()> {
    let mut prev_end: Option<usize> = None;
    for (i, t) in tokens.iter().enumerate() {
        let token = &t.token;
        if i > 0 && token.index != tokens[i - 1].token.index + 1 {
            return Err(ExportError::serialization(format!(
                "índice {} depois de {}: tokens fora de sequência",
                token.index,
                tokens[i - 1].token.index
            )));
        }
        if token.start >= token.end {
            return Err(ExportError::serialization(format!(
                "token {} com intervalo vazio [{}, {})",
                token.index, token.start, token.end
            )));
        }
        if let Some(end) = prev_end {
            if token.start < end {
                return Err(ExportError::serialization(format!(
                    "token {} começa em {} antes do fim do anterior ({})",
                    token.index, token.start, end
                )));
            }
        }
        if token.text.chars().count() != token.end - token.start {
            return Err(ExportError::serialization(format!(
                "token {} '{}' não corresponde ao intervalo [{}, {})",
                token.index, token.text, token.start, token.end
            )));
        }
        prev_end = Some(token.end);
    }
    Ok(())
}

/// Acumula o conteúdo de um bloco, fundindo spans vizinhos de mesmo rótulo.
#[derive(Default)]
struct BlockBuilder {
    inlines: Vec<Inline>,
    text: String,
    span: Option<(String, Vec<String>, String)>,
    pending_space: bool,
}

impl BlockBuilder {
    fn push(&mut self, t: &AnnotatedToken) {
        let space = std::mem::take(&mut self.pending_space);
        self.pending_space = t.token.whitespace_after;

        if let (Some((label, ids, text)), Some(class)) = (self.span.as_mut(), t.class_label.as_ref()) {
            if *label == *class {
                if space {
                    text.push(' ');
                }
                text.push_str(&t.token.text);
                if let Some(id) = &t.annotation_id {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                }
                return;
            }
        }

        self.close_span();
        if space {
            self.text.push(' ');
        }
        match &t.class_label {
            Some(class) => {
                self.flush_text();
                let ids = t.annotation_id.iter().cloned().collect();
                self.span = Some((class.clone(), ids, t.token.text.clone()));
            }
            None => self.text.push_str(&t.token.text),
        }
    }

    fn close_span(&mut self) {
        if let Some((label, annotation_ids, text)) = self.span.take() {
            self.inlines.push(Inline::Span {
                label,
                annotation_ids,
                text,
            });
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.inlines.push(Inline::Text(std::mem::take(&mut self.text)));
        }
    }

    fn finish(&mut self) -> Vec<Inline> {
        self.close_span();
        self.flush_text();
        self.pending_space = false;
        std::mem::take(&mut self.inlines)
    }
}

impl MarkupDocument {
    /// Conteúdo textual, um parágrafo por linha.
    pub fn to_plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| {
                block
                    .inlines()
                    .iter()
                    .map(|inline| match inline {
                        Inline::Text(text) | Inline::Span { text, .. } => text.as_str(),
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Quantidade de spans no documento.
    pub fn span_count(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|b| b.inlines())
            .filter(|i| matches!(i, Inline::Span { .. }))
            .count()
    }

    /// Escreve o documento TEI.
    pub fn to_xml(&self) -> String {
        let mut writer = XmlWriter::new(&self.options);
        writer.document(self);
        writer.output
    }
}

struct XmlWriter<'a> {
    output: String,
    indent_level: usize,
    options: &'a MarkupOptions,
}

impl<'a> XmlWriter<'a> {
    fn new(options: &'a MarkupOptions) -> Self {
        Self {
            output: String::new(),
            indent_level: 0,
            options,
        }
    }

    fn indent(&self) -> String {
        "  ".repeat(self.indent_level)
    }

    fn line(&mut self, s: &str) {
        self.output.push_str(&self.indent());
        self.output.push_str(s);
        self.output.push('\n');
    }

    fn open(&mut self, s: &str) {
        self.line(s);
        self.indent_level += 1;
    }

    fn close(&mut self, s: &str) {
        self.indent_level -= 1;
        self.line(s);
    }

    fn document(&mut self, doc: &MarkupDocument) {
        self.output
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let root = match &self.options.span_namespace {
            Some(ns) => format!(
                "<TEI xmlns=\"{}\" xmlns:{}=\"{}\">",
                TEI_NAMESPACE,
                ns.prefix,
                escape_xml(&ns.uri)
            ),
            None => format!("<TEI xmlns=\"{}\">", TEI_NAMESPACE),
        };
        self.open(&root);

        self.open("<teiHeader>");
        match &self.options.title {
            Some(title) => {
                self.open("<fileDesc>");
                self.line(&format!(
                    "<titleStmt><title>{}</title></titleStmt>",
                    escape_xml(title)
                ));
                self.close("</fileDesc>");
            }
            None => self.line("<fileDesc/>"),
        }
        self.line("<profileDesc/>");
        self.line("<revisionDesc/>");
        self.close("</teiHeader>");

        self.open("<text>");
        if doc.blocks.is_empty() {
            self.line("<body/>");
        } else {
            self.open("<body>");
            for block in &doc.blocks {
                let content = self.inlines(block.inlines());
                match block {
                    Block::Paragraph(_) => self.line(&format!("<p>{}</p>", content)),
                    Block::Flow(_) => self.line(&content),
                }
            }
            self.close("</body>");
        }
        self.close("</text>");
        self.close("</TEI>");
    }

    fn inlines(&self, inlines: &[Inline]) -> String {
        let mut out = String::new();
        for inline in inlines {
            match inline {
                Inline::Text(text) => out.push_str(&escape_xml(text)),
                Inline::Span {
                    label,
                    annotation_ids,
                    text,
                } => {
                    let name = match &self.options.span_namespace {
                        Some(ns) => format!("{}:{}", ns.prefix, xml_name(label)),
                        None => xml_name(label),
                    };
                    out.push('<');
                    out.push_str(&name);
                    if self.options.annotation_attribute && !annotation_ids.is_empty() {
                        let attr = match &self.options.span_namespace {
                            Some(ns) => format!("{}:annotation", ns.prefix),
                            None => "annotation".to_string(),
                        };
                        out.push_str(&format!(
                            " {}=\"{}\"",
                            attr,
                            escape_xml(&annotation_ids.join(" "))
                        ));
                    }
                    out.push('>');
                    out.push_str(&escape_xml(text));
                    out.push_str(&format!("</{}>", name));
                }
            }
        }
        out
    }
}

/// Escapa os caracteres reservados do XML
fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\"', "&quot;")
        .replace('\'', "&apos;")
}

/// Converte um rótulo de classe num nome de elemento XML válido (ex: "Ort Name" → "Ort_Name").
fn xml_name(label: &str) -> String {
    let mut name: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let valid_start = name
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start {
        name.insert(0, '_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::{align, ConflictMode};
    use crate::annotation::{Annotation, Segment};
    use crate::paragraph::{segment, ParagraphPolicy};
    use crate::source::SourceText;
    use crate::tokenizer::{tokenize, Language, Token};

    fn annotation(id: &str, label: &str, segments: &[(usize, usize)]) -> Annotation {
        Annotation {
            id: id.into(),
            collection_id: "c".into(),
            class_label: label.into(),
            segments: segments.iter().map(|&(s, e)| Segment::new(s, e)).collect(),
        }
    }

    fn stream(text: &str, annotations: &[Annotation], policy: &ParagraphPolicy) -> Vec<AnnotatedToken> {
        let source = SourceText::new(text);
        let tokens = tokenize(text, Language::German, 10_000).unwrap();
        let mut annotated = align(&tokens, annotations, ConflictMode::Strict)
            .unwrap()
            .tokens;
        segment(&source, &mut annotated, policy).unwrap();
        annotated
    }

    #[test]
    fn test_reference_round_trip() {
        let tokens = stream(
            "Ab cd.\nEf gh.",
            &[annotation("a1", "X", &[(3, 6)])],
            &ParagraphPolicy::eltec_deu(),
        );
        let doc = to_markup(&tokens, &MarkupOptions::plain()).unwrap();
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.span_count(), 1);

        let xml = doc.to_xml();
        assert_eq!(xml.matches("<X>cd.</X>").count(), 1);
        assert!(xml.contains("<p>Ab <X>cd.</X></p>"));
        assert!(xml.contains("<p>Ef gh.</p>"));
    }

    #[test]
    fn test_adjacent_annotations_merge() {
        // Duas anotações de mesma classe, lado a lado
        let tokens = stream(
            "Unter den Linden steht.",
            &[annotation("a", "Ort", &[(0, 9)]), annotation("b", "Ort", &[(10, 16)])],
            &ParagraphPolicy::eltec_deu(),
        );
        let doc = to_markup(&tokens, &MarkupOptions::default()).unwrap();
        assert_eq!(
            doc.blocks[0].inlines()[0],
            Inline::Span {
                label: "Ort".into(),
                annotation_ids: vec!["a".into(), "b".into()],
                text: "Unter den Linden".into(),
            }
        );
        let xml = doc.to_xml();
        assert!(xml.contains(
            "<p><CS1:Ort CS1:annotation=\"a b\">Unter den Linden</CS1:Ort> steht.</p>"
        ));
        assert!(xml.contains(&format!("xmlns:CS1=\"{}\"", CS1_NAMESPACE)));
    }

    #[test]
    fn test_span_does_not_cross_paragraphs() {
        let tokens = stream(
            "Ab cd\nef gh.",
            &[annotation("a", "X", &[(3, 8)])],
            &ParagraphPolicy::line(),
        );
        let doc = to_markup(&tokens, &MarkupOptions::plain()).unwrap();
        assert_eq!(doc.span_count(), 2);
        assert!(doc.to_xml().contains("<p><X>ef</X> gh.</p>"));
    }

    #[test]
    fn test_without_paragraphs_text_goes_into_body() {
        let tokens = stream(
            "Ab cd.\nEf gh.",
            &[annotation("a1", "X", &[(3, 6)])],
            &ParagraphPolicy::eltec_deu(),
        );
        let options = MarkupOptions {
            insert_paragraphs: false,
            ..MarkupOptions::plain()
        };
        let doc = to_markup(&tokens, &options).unwrap();
        assert_eq!(doc.blocks.len(), 1);
        let xml = doc.to_xml();
        assert!(!xml.contains("<p>"));
        assert!(xml.contains("Ab <X>cd.</X> Ef gh."));
    }

    #[test]
    fn test_reserved_characters_escaped() {
        let tokens = stream(
            "A & B <c>",
            &[annotation("a", "Tag Name", &[(0, 1)])],
            &ParagraphPolicy::eltec_deu(),
        );
        let xml = to_markup(&tokens, &MarkupOptions::plain()).unwrap().to_xml();
        assert!(xml.contains("&amp;"));
        assert!(xml.contains("&lt;"));
        assert!(!xml.contains(" & "));
        assert!(xml.contains("<Tag_Name>A</Tag_Name>"));
    }

    #[test]
    fn test_non_contiguous_stream_rejected() {
        let make = |index, text: &str, start, end| AnnotatedToken::unannotated(Token {
            index,
            text: text.into(),
            start,
            end,
            whitespace_after: true,
        });
        let overlapping = vec![make(0, "Ab", 0, 2), make(1, "bc", 1, 3)];
        assert!(matches!(
            to_markup(&overlapping, &MarkupOptions::default()),
            Err(ExportError::Serialization(_))
        ));
        let skipped = vec![make(0, "Ab", 0, 2), make(2, "cd", 3, 5)];
        assert!(to_markup(&skipped, &MarkupOptions::default()).is_err());
        let wrong_length = vec![make(0, "Abc", 0, 2)];
        assert!(to_markup(&wrong_length, &MarkupOptions::default()).is_err());
    }

    #[test]
    fn test_paragraph_boundaries_idempotent() {
        let text = "Erste Zeile.\nZweite Zeile, noch\n               weiter.\nDritte.";
        let policy = ParagraphPolicy::eltec_deu();
        let first = stream(text, &[], &policy);
        let plain = to_markup(&first, &MarkupOptions::plain()).unwrap().to_plain_text();
        let second = stream(&plain, &[], &policy);

        let starts = |tokens: &[AnnotatedToken]| -> Vec<String> {
            tokens
                .iter()
                .filter(|t| t.paragraph_start)
                .map(|t| t.token.text.clone())
                .collect()
        };
        assert_eq!(starts(&first), vec!["Erste", "Zweite", "Dritte"]);
        assert_eq!(starts(&first), starts(&second));
    }

    #[test]
    fn test_empty_stream() {
        let doc = to_markup(&[], &MarkupOptions::default()).unwrap();
        assert!(doc.blocks.is_empty());
        assert!(doc.to_xml().contains("<body/>"));
        assert_eq!(doc.to_plain_text(), "");
    }

    #[test]
    fn test_title_in_header() {
        let options = MarkupOptions {
            title: Some("Effi Briest".into()),
            ..MarkupOptions::default()
        };
        let xml = to_markup(&[], &options).unwrap().to_xml();
        assert!(xml.contains("<titleStmt><title>Effi Briest</title></titleStmt>"));
        assert!(xml.contains("<profileDesc/>"));
    }
}
