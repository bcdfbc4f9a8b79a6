//! # catma-export-core: Exportação de Anotações CATMA para TSV e TEI
//!
//! Este crate transforma anotações de texto feitas no CATMA (offsets de caractere sobre texto
//! puro) em duas representações reutilizáveis: uma **tabela por token** (TSV) e um
//! **documento TEI** com os trechos anotados como elementos.
//!
//! ## Arquitetura do Sistema
//!
//! O problema central é conciliar três formas de endereçar o mesmo texto: offsets de
//! caractere (anotações), fronteiras de token (tokenizador) e parágrafos inferidos do layout.
//!
//! 1.  **Entrada**: [`Project`] com o texto e as coleções de anotações.
//! 2.  **Tokenização** ([`tokenizer`]): o texto é dividido em tokens com offsets absolutos.
//! 3.  **Normalização** ([`annotation`]): registros brutos viram anotações com segmentos
//!     ordenados e disjuntos.
//! 4.  **Alinhamento** ([`aligner`]): segmentos projetados sobre os tokens, uma classe por
//!     token, conflitos tratados por [`ConflictMode`].
//! 5.  **Parágrafos** ([`paragraph`]): quebras de linha classificadas por uma política nomeada.
//! 6.  **Saída**: [`table`] (TSV) e [`markup`] (TEI XML), gravados atomicamente ([`output`]).
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use catma_export_core::aligner::{align, ConflictMode};
//! use catma_export_core::annotation::{Annotation, Segment};
//! use catma_export_core::markup::{to_markup, MarkupOptions};
//! use catma_export_core::paragraph::{segment, ParagraphPolicy};
//! use catma_export_core::source::SourceText;
//! use catma_export_core::tokenizer::{tokenize, Language};
//!
//! let text = "Ab cd.\nEf gh.";
//! let tokens = tokenize(text, Language::German, 2_000_000).unwrap();
//! let annotations = vec![Annotation {
//!     id: "a1".into(),
//!     collection_id: "c1".into(),
//!     class_label: "X".into(),
//!     segments: vec![Segment::new(3, 6)],
//! }];
//!
//! let mut stream = align(&tokens, &annotations, ConflictMode::Strict).unwrap().tokens;
//! segment(&SourceText::new(text), &mut stream, &ParagraphPolicy::eltec_deu()).unwrap();
//!
//! let xml = to_markup(&stream, &MarkupOptions::plain()).unwrap().to_xml();
//! assert!(xml.contains("<p>Ab <X>cd.</X></p>"));
//! ```
//!
//! ## Módulos Principais
//!
//! - [`pipeline`]: Orquestrador que executa as etapas configuradas.
//! - [`config`]: Configuração da execução e plano validado.
//! - [`tokenizer`]: Segmentação do texto em tokens.
//! - [`aligner`]: Projeção das anotações sobre os tokens.

pub mod aligner;
pub mod annotation;
pub mod config;
pub mod error;
pub mod markup;
pub mod output;
pub mod paragraph;
pub mod pipeline;
pub mod source;
pub mod table;
pub mod tagger;
pub mod tokenizer;

pub use aligner::{Alignment, ConflictMode};
pub use annotation::{Annotation, AnnotationCollection, Project};
pub use config::{ExecutionPlan, ExportConfig, RunConfig, StepDescriptor, StepKind};
pub use error::{ExportError, Result};
pub use pipeline::{ExportPipeline, PipelineEvent, RunReport};
pub use tagger::{AnnotatedToken, Tag};
pub use tokenizer::{Language, Token};
