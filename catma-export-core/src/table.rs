//! # Tabelas de Tokens (TSV)
//!
//! Serializa o fluxo de tokens como linhas de uma tabela separada por tabulação. A ordem das
//! linhas é a ordem dos tokens: nenhuma reordenação nem filtragem.
//!
//! | Modo        | Colunas                                                            |
//! |-------------|--------------------------------------------------------------------|
//! | `basic`     | `Token_ID  Token  Start  End`                                      |
//! | `annotated` | `... Class_Label` (vazio quando o token não está anotado)          |
//! | `iob2`      | `... Tag  Annotation_ID  Multi_Token_Annotation`                   |
//!
//! Tabulações, quebras de linha e barras invertidas dentro dos campos são escapadas
//! (`\t`, `\n`, `\r`, `\\`).

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::tagger::{annotation_token_counts, iob2_tags, AnnotatedToken, Tag};
use crate::tokenizer::Token;

const BASIC_COLUMNS: &[&str] = &["Token_ID", "Token", "Start", "End"];
const ANNOTATED_COLUMNS: &[&str] = &["Token_ID", "Token", "Start", "End", "Class_Label"];
const IOB2_COLUMNS: &[&str] = &[
    "Token_ID",
    "Token",
    "Start",
    "End",
    "Tag",
    "Annotation_ID",
    "Multi_Token_Annotation",
];

/// Id de anotação escrito quando o token não está anotado.
const NO_ANNOTATION: &str = "none";

/// Formato da tabela.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    Basic,
    Annotated,
    Iob2,
}

impl TableMode {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableMode::Basic => BASIC_COLUMNS,
            TableMode::Annotated => ANNOTATED_COLUMNS,
            TableMode::Iob2 => IOB2_COLUMNS,
        }
    }

    fn from_header(header: &[&str]) -> Option<Self> {
        [TableMode::Basic, TableMode::Annotated, TableMode::Iob2]
            .into_iter()
            .find(|mode| mode.columns() == header)
    }
}

/// Uma linha da tabela, campos ainda sem escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row(pub Vec<String>);

impl Row {
    pub fn to_tsv_line(&self) -> String {
        self.0
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join("\t")
    }
}

/// Gera as linhas de forma preguiçosa, na ordem dos tokens.
pub fn to_rows<'a>(tokens: &'a [AnnotatedToken], mode: TableMode) -> Box<dyn Iterator<Item = Row> + 'a> {
    let base = |t: &AnnotatedToken| {
        vec![
            t.token.index.to_string(),
            t.token.text.clone(),
            t.token.start.to_string(),
            t.token.end.to_string(),
        ]
    };

    match mode {
        TableMode::Basic => Box::new(tokens.iter().map(move |t| Row(base(t)))),
        TableMode::Annotated => Box::new(tokens.iter().map(move |t| {
            let mut fields = base(t);
            // Célula vazia = sem anotação; rótulos vazios já foram descartados na normalização
            fields.push(t.class_label.clone().unwrap_or_default());
            Row(fields)
        })),
        TableMode::Iob2 => {
            let counts = annotation_token_counts(tokens);
            let tags = iob2_tags(tokens);
            Box::new(tokens.iter().zip(tags).map(move |(t, tag)| {
                let mut fields = base(t);
                fields.push(tag.label());
                match t.annotation_id.as_deref() {
                    Some(id) => {
                        fields.push(id.to_string());
                        fields.push(counts.get(id).copied().unwrap_or(0).to_string());
                    }
                    None => {
                        fields.push(NO_ANNOTATION.to_string());
                        fields.push("0".to_string());
                    }
                }
                Row(fields)
            }))
        }
    }
}

/// Escreve cabeçalho e linhas em `writer`.
pub fn write_table(writer: &mut dyn Write, tokens: &[AnnotatedToken], mode: TableMode) -> Result<()> {
    writeln!(writer, "{}", mode.columns().join("\t"))?;
    for row in to_rows(tokens, mode) {
        writeln!(writer, "{}", row.to_tsv_line())?;
    }
    Ok(())
}

/// Lê uma tabela escrita por [`write_table`] (qualquer modo).
///
/// `whitespace_after` é reconstruído pelos offsets; `paragraph_start` fica falso.
pub fn read_table(reader: impl BufRead) -> Result<(TableMode, Vec<AnnotatedToken>)> {
    let mut lines = reader.lines();
    let header_line = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(ExportError::Table {
                line: 1,
                message: "arquivo vazio".into(),
            })
        }
    };
    let header: Vec<&str> = header_line.split('\t').collect();
    let mode = TableMode::from_header(&header).ok_or_else(|| ExportError::Table {
        line: 1,
        message: format!("cabeçalho desconhecido: {}", header_line),
    })?;

    let mut tokens: Vec<AnnotatedToken> = Vec::new();
    for (n, line) in lines.enumerate() {
        let line_no = n + 2;
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<String> = line.split('\t').map(unescape_field).collect();
        if fields.len() != mode.columns().len() {
            return Err(ExportError::Table {
                line: line_no,
                message: format!(
                    "{} campos, esperava {}",
                    fields.len(),
                    mode.columns().len()
                ),
            });
        }
        let number = |i: usize| -> Result<usize> {
            fields[i].parse().map_err(|_| ExportError::Table {
                line: line_no,
                message: format!("'{}' não é um número", fields[i]),
            })
        };

        let token = Token {
            index: number(0)?,
            text: fields[1].clone(),
            start: number(2)?,
            end: number(3)?,
            whitespace_after: false,
        };
        let (class_label, annotation_id) = match mode {
            TableMode::Basic => (None, None),
            TableMode::Annotated => (Some(fields[4].clone()).filter(|l| !l.is_empty()), None),
            TableMode::Iob2 => {
                let tag = Tag::from_label(&fields[4]).ok_or_else(|| ExportError::Table {
                    line: line_no,
                    message: format!("tag IOB2 inválida '{}'", fields[4]),
                })?;
                let id = Some(fields[5].clone()).filter(|id| id != NO_ANNOTATION);
                (tag.class().map(String::from), id)
            }
        };
        tokens.push(AnnotatedToken {
            token,
            class_label,
            annotation_id,
            paragraph_start: false,
        });
    }

    for i in 0..tokens.len().saturating_sub(1) {
        tokens[i].token.whitespace_after = tokens[i + 1].token.start > tokens[i].token.end;
    }
    Ok((mode, tokens))
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::{align, ConflictMode};
    use crate::annotation::{Annotation, Segment};
    use crate::tokenizer::{tokenize, Language};

    fn reference_stream() -> Vec<AnnotatedToken> {
        let tokens = tokenize("Ab cd.\nEf gh.", Language::German, 1_000).unwrap();
        let annotations = vec![Annotation {
            id: "a1".into(),
            collection_id: "c".into(),
            class_label: "X".into(),
            segments: vec![Segment::new(3, 6)],
        }];
        align(&tokens, &annotations, ConflictMode::Strict).unwrap().tokens
    }

    #[test]
    fn test_basic_rows() {
        let stream = reference_stream();
        let rows: Vec<Row> = to_rows(&stream, TableMode::Basic).collect();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1], Row(vec!["1".into(), "cd".into(), "3".into(), "5".into()]));
    }

    #[test]
    fn test_annotated_rows_use_empty_label() {
        let stream = reference_stream();
        let labels: Vec<String> = to_rows(&stream, TableMode::Annotated)
            .map(|r| r.0[4].clone())
            .collect();
        assert_eq!(labels, vec!["", "X", "X", "", "", ""]);
    }

    #[test]
    fn test_iob2_rows() {
        let stream = reference_stream();
        let rows: Vec<Vec<String>> = to_rows(&stream, TableMode::Iob2).map(|r| r.0).collect();
        assert_eq!(rows[0][4..], ["O", "none", "0"]);
        assert_eq!(rows[1][4..], ["B-X", "a1", "2"]);
        assert_eq!(rows[2][4..], ["I-X", "a1", "2"]);
    }

    #[test]
    fn test_write_then_read_annotated_table() {
        let stream = reference_stream();
        let mut buf: Vec<u8> = Vec::new();
        write_table(&mut buf, &stream, TableMode::Annotated).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Token_ID\tToken\tStart\tEnd\tClass_Label\n0\tAb\t0\t2\t\n"));

        let (mode, read) = read_table(buf.as_slice()).unwrap();
        assert_eq!(mode, TableMode::Annotated);
        assert_eq!(read.len(), stream.len());
        for (a, b) in read.iter().zip(&stream) {
            assert_eq!(a.token, b.token);
            assert_eq!(a.class_label, b.class_label);
        }
    }

    #[test]
    fn test_escaping_special_characters() {
        let field = "a\tb\\c\nd";
        assert_eq!(escape_field(field), "a\\tb\\\\c\\nd");
        assert_eq!(unescape_field(&escape_field(field)), field);
    }

    #[test]
    fn test_read_rejects_bad_rows() {
        let bad_header = "Id\tWord\n0\tAb\n";
        assert!(matches!(
            read_table(bad_header.as_bytes()),
            Err(ExportError::Table { line: 1, .. })
        ));
        let bad_number = "Token_ID\tToken\tStart\tEnd\n0\tAb\tx\t2\n";
        assert!(matches!(
            read_table(bad_number.as_bytes()),
            Err(ExportError::Table { line: 2, .. })
        ));
    }
}
