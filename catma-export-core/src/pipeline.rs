//! # Pipeline de Exportação: Orquestrador com Eventos Observáveis
//!
//! O pipeline executa as etapas declaradas no [`ExecutionPlan`] para uma coleção e emite
//! eventos em cada passo via um canal Rust (`mpsc`), permitindo que a linha de comando (ou
//! qualquer outro consumidor) acompanhe o progresso.
//!
//! ## Etapas
//!
//! ```text
//! basic_token_table      texto ──tokenizador──▶ tokens            ──▶ <ref>.tsv
//! annotated_token_table  tokens + anotações ──alinhador──▶ tokens anotados ──▶ <ref>.tsv
//! annotated_tei          tokens anotados ──parágrafos──▶ documento ──▶ <ref>.xml
//! ```
//!
//! Cada etapa lê a saída de outra pelo nome (`input_ref`). Se a etapa produtora rodou nesta
//! execução, o fluxo vem da memória; se está desligada, a tabela `<input_ref>.tsv` é lida do
//! diretório de saída.
//!
//! Os artefatos só aparecem no disco quando **todas** as etapas terminam: uma execução que
//! falha não deixa arquivos pela metade (ver [`crate::output`]).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info};

use crate::aligner::{align, Conflict};
use crate::annotation::{DiscardedRecord, Project};
use crate::config::{ExecutionPlan, ExportConfig, StepDescriptor, StepKind};
use crate::error::{ExportError, Result};
use crate::markup::{to_markup, MarkupOptions, Namespace};
use crate::output::StagedOutput;
use crate::paragraph::segment;
use crate::source::TextRange;
use crate::table::{read_table, write_table, TableMode};
use crate::tagger::AnnotatedToken;
use crate::tokenizer::{Token, Tokenizer};

/// Eventos emitidos pelo pipeline durante a execução.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// Uma etapa começou (`number` conta a partir de 1).
    StepStarted {
        number: usize,
        total: usize,
        step: StepKind,
        output_ref: String,
    },
    TokenizationDone {
        total: usize,
        range: TextRange,
    },
    /// Anotações normalizadas; registros inválidos foram descartados.
    AnnotationsNormalized {
        annotations: usize,
        discarded: Vec<DiscardedRecord>,
    },
    AlignmentDone {
        annotated_tokens: usize,
        conflicts: Vec<Conflict>,
    },
    ParagraphsDone {
        paragraphs: usize,
    },
    /// Artefato escrito em temporário; publicado só no fim.
    ArtifactStaged {
        output_ref: String,
        path: PathBuf,
    },
    Done {
        report: RunReport,
    },
    Error {
        message: String,
    },
}

/// Resumo de uma execução concluída.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub collection: String,
    pub text_title: String,
    pub tokens: usize,
    pub annotated_tokens: usize,
    pub conflicts: Vec<Conflict>,
    pub discarded: Vec<DiscardedRecord>,
    pub paragraphs: usize,
    /// Arquivos publicados, na ordem das etapas.
    pub written: Vec<PathBuf>,
    pub processing_ms: u64,
}

/// O pipeline de exportação.
///
/// # Modos de Uso
/// - **Sync**: [`ExportPipeline::run`] para scripts e chamadas diretas.
/// - **Streaming**: [`ExportPipeline::run_streaming`] para acompanhar o progresso.
/// - **Lote**: [`ExportPipeline::export_collections`], várias coleções em paralelo.
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    pub config: ExportConfig,
}

impl ExportPipeline {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Executa todas as etapas para a coleção `collection_index`.
    pub fn run(&self, project: &Project, collection_index: usize) -> Result<RunReport> {
        let (tx, _rx) = mpsc::channel();
        self.run_streaming(project, collection_index, tx)
    }

    /// Executa o pipeline enviando eventos de progresso pelo canal `tx`.
    ///
    /// O último evento é sempre `Done` ou `Error`. Um receptor descartado não interrompe a
    /// execução.
    pub fn run_streaming(
        &self,
        project: &Project,
        collection_index: usize,
        tx: mpsc::Sender<PipelineEvent>,
    ) -> Result<RunReport> {
        let result = self.execute(project, collection_index, &tx);
        match &result {
            Ok(report) => {
                let _ = tx.send(PipelineEvent::Done {
                    report: report.clone(),
                });
            }
            Err(e) => {
                error!("Execução abortada: {}", e);
                let _ = tx.send(PipelineEvent::Error {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    fn execute(
        &self,
        project: &Project,
        collection_index: usize,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let collection = project.collection(collection_index)?;
        let source = project.source();
        let plan = ExecutionPlan::resolve(&self.config, &source)?;

        if project.collections.len() > 1 {
            info!(
                "Coleção selecionada: '{}' sobre o texto '{}'",
                collection.name, collection.text_title
            );
        }
        info!("Pipeline iniciado");

        let mut staged = StagedOutput::new(&plan.output_dir)?;
        let mut store: HashMap<String, Vec<AnnotatedToken>> = HashMap::new();
        let mut report = RunReport {
            collection: collection.name.clone(),
            text_title: collection.text_title.clone(),
            ..RunReport::default()
        };

        let total = plan.steps.len();
        for (n, step) in plan.steps.iter().enumerate() {
            info!("Executando etapa {}/{}: '{}' ...", n + 1, total, step.step.name());
            let _ = tx.send(PipelineEvent::StepStarted {
                number: n + 1,
                total,
                step: step.step,
                output_ref: step.output_ref.clone(),
            });

            let stream = match step.step {
                // === Etapa 1: Tokenização ===
                StepKind::BasicTokenTable => {
                    let tokenizer = Tokenizer::new(plan.language, plan.max_text_length);
                    let tokens = tokenizer.tokenize_range(&source, plan.range)?;
                    report.tokens = tokens.len();
                    let _ = tx.send(PipelineEvent::TokenizationDone {
                        total: tokens.len(),
                        range: plan.range,
                    });

                    let stream: Vec<AnnotatedToken> =
                        tokens.into_iter().map(AnnotatedToken::unannotated).collect();
                    let path = staged.stage(&step.output_file(), |w| {
                        write_table(w, &stream, TableMode::Basic)
                    })?;
                    let _ = tx.send(PipelineEvent::ArtifactStaged {
                        output_ref: step.output_ref.clone(),
                        path,
                    });
                    stream
                }

                // === Etapa 2: Alinhamento ===
                StepKind::AnnotatedTokenTable => {
                    let tokens: Vec<Token> = load_input(&store, &plan, step)?
                        .into_iter()
                        .map(|t| t.token)
                        .collect();
                    report.tokens = tokens.len();

                    let normalized = collection.normalized(plan.collapse_segments);
                    let _ = tx.send(PipelineEvent::AnnotationsNormalized {
                        annotations: normalized.annotations.len(),
                        discarded: normalized.discarded.clone(),
                    });
                    report.discarded = normalized.discarded;

                    let alignment = align(&tokens, &normalized.annotations, plan.conflict_mode)?;
                    report.annotated_tokens = alignment
                        .tokens
                        .iter()
                        .filter(|t| t.class_label.is_some())
                        .count();
                    let _ = tx.send(PipelineEvent::AlignmentDone {
                        annotated_tokens: report.annotated_tokens,
                        conflicts: alignment.conflicts.clone(),
                    });
                    report.conflicts = alignment.conflicts;

                    let mode = plan.annotated_table_mode;
                    let path = staged.stage(&step.output_file(), |w| {
                        write_table(w, &alignment.tokens, mode)
                    })?;
                    let _ = tx.send(PipelineEvent::ArtifactStaged {
                        output_ref: step.output_ref.clone(),
                        path,
                    });
                    alignment.tokens
                }

                // === Etapa 3: Parágrafos e TEI ===
                StepKind::AnnotatedTei => {
                    let mut stream = load_input(&store, &plan, step)?;
                    if plan.insert_paragraphs {
                        segment(&source, &mut stream, &plan.policy)?;
                        report.paragraphs = stream.iter().filter(|t| t.paragraph_start).count();
                        let _ = tx.send(PipelineEvent::ParagraphsDone {
                            paragraphs: report.paragraphs,
                        });
                    }

                    let options = MarkupOptions {
                        insert_paragraphs: plan.insert_paragraphs,
                        span_namespace: Some(Namespace::cs1()),
                        annotation_attribute: plan.annotation_attribute,
                        title: Some(collection.text_title.clone()).filter(|t| !t.is_empty()),
                    };
                    let document = to_markup(&stream, &options)?;
                    let path = staged.stage(&step.output_file(), |w| {
                        w.write_all(document.to_xml().as_bytes())?;
                        Ok(())
                    })?;
                    let _ = tx.send(PipelineEvent::ArtifactStaged {
                        output_ref: step.output_ref.clone(),
                        path,
                    });
                    stream
                }
            };
            store.insert(step.output_ref.clone(), stream);
        }

        report.written = staged.commit()?;
        report.processing_ms = start.elapsed().as_millis() as u64;
        info!("Pipeline concluído em {} ms", report.processing_ms);
        Ok(report)
    }

    /// Exporta várias coleções em paralelo, cada uma no seu subdiretório de `output_dir`.
    ///
    /// As execuções são independentes: a falha de uma não interrompe as demais.
    pub fn export_collections(
        &self,
        project: &Project,
        indices: &[usize],
    ) -> Vec<(usize, Result<RunReport>)> {
        indices
            .par_iter()
            .map(|&index| {
                let result = project.collection(index).and_then(|collection| {
                    let mut config = self.config.clone();
                    config.output_dir = self
                        .config
                        .output_dir
                        .join(collection_dir_name(index, &collection.name));
                    ExportPipeline::new(config).run(project, index)
                });
                (index, result)
            })
            .collect()
    }
}

/// Fluxo de entrada de uma etapa: da memória, ou da tabela gravada numa execução anterior.
fn load_input(
    store: &HashMap<String, Vec<AnnotatedToken>>,
    plan: &ExecutionPlan,
    step: &StepDescriptor,
) -> Result<Vec<AnnotatedToken>> {
    let input_ref = step.input_ref.as_deref().ok_or_else(|| {
        ExportError::config(format!("etapa '{}' sem input_ref", step.step.name()))
    })?;
    if let Some(stream) = store.get(input_ref) {
        return Ok(stream.clone());
    }

    let path = plan.output_dir.join(format!("{}.tsv", input_ref));
    info!("Lendo '{}' de {}", input_ref, path.display());
    let (_, stream) = read_table(BufReader::new(File::open(&path)?))?;
    Ok(stream)
}

/// Nome do subdiretório de uma coleção (ex: `0_Gold_Standard`).
fn collection_dir_name(index: usize, name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}", index, safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::ConflictMode;
    use crate::config::default_steps;

    const PROJECT: &str = r#"{
        "name": "Projekt",
        "text": "Ab cd.\r\nEf gh.",
        "collections": [
            {"id": "c1", "name": "Gold", "text_title": "Roman",
             "annotations": [
                {"id": "https://app.catma.de/anno/CATMA_A1", "class_label": "X",
                 "segments": [{"start": 3, "end": 6}]}
             ]},
            {"id": "c2", "name": "Konflikt", "text_title": "Roman",
             "annotations": [
                {"id": "a1", "class_label": "X", "segments": [{"start": 0, "end": 5}]},
                {"id": "a2", "class_label": "Y", "segments": [{"start": 3, "end": 9}]}
             ]}
        ]
    }"#;

    fn config_in(dir: &std::path::Path) -> ExportConfig {
        ExportConfig {
            output_dir: dir.to_path_buf(),
            ..ExportConfig::default()
        }
    }

    #[test]
    fn test_full_run_writes_three_artifacts() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let report = ExportPipeline::new(config_in(dir.path()))
            .run(&project, 0)
            .unwrap();

        assert_eq!(report.tokens, 6);
        assert_eq!(report.annotated_tokens, 2);
        assert_eq!(report.paragraphs, 2);
        assert_eq!(report.written.len(), 3);

        let annotated =
            std::fs::read_to_string(dir.path().join("annotated_token_table.tsv")).unwrap();
        assert!(annotated.contains("1\tcd\t3\t5\tB-X\tA1\t2"));
        let tei = std::fs::read_to_string(dir.path().join("annotated_tei.xml")).unwrap();
        assert!(tei.contains("<p>Ab <CS1:X CS1:annotation=\"A1\">cd.</CS1:X></p>"));
        assert!(tei.contains("<title>Roman</title>"));
    }

    #[test]
    fn test_events_stream() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let (tx, rx) = mpsc::channel();
        ExportPipeline::new(config_in(dir.path()))
            .run_streaming(&project, 0, tx)
            .unwrap();

        let events: Vec<PipelineEvent> = rx.try_iter().collect();
        assert!(
            matches!(&events[0], PipelineEvent::StepStarted { number: 1, total: 3, .. }),
            "Primeiro evento deve ser StepStarted"
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::TokenizationDone { total: 6, .. })));
        let last = events.last().unwrap();
        assert!(
            matches!(last, PipelineEvent::Done { .. }),
            "Último evento deve ser Done"
        );
    }

    #[test]
    fn test_strict_conflict_writes_nothing() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let (tx, rx) = mpsc::channel();
        let result = ExportPipeline::new(config_in(dir.path())).run_streaming(&project, 1, tx);

        match result {
            Err(ExportError::AlignmentConflict {
                token_index,
                first_label,
                second_label,
            }) => {
                assert_eq!(token_index, 1);
                assert_eq!(first_label, "X");
                assert_eq!(second_label, "Y");
            }
            other => panic!("esperava conflito, veio {:?}", other),
        }
        assert!(matches!(
            rx.try_iter().last(),
            Some(PipelineEvent::Error { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_lenient_conflict_is_reported() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let mut config = config_in(dir.path());
        config.run.conflict_mode = ConflictMode::Lenient;
        let report = ExportPipeline::new(config).run(&project, 1).unwrap();
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kept_label, "X");
    }

    #[test]
    fn test_disabled_step_reads_previous_table() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();

        let mut first = config_in(dir.path());
        first.steps = default_steps().into_iter().take(2).collect();
        ExportPipeline::new(first).run(&project, 0).unwrap();
        assert!(!dir.path().join("annotated_tei.xml").exists());

        let mut second = config_in(dir.path());
        second.steps = default_steps();
        second.steps[0].enabled = false;
        second.steps[1].enabled = false;
        let report = ExportPipeline::new(second).run(&project, 0).unwrap();
        assert_eq!(report.written, vec![dir.path().join("annotated_tei.xml")]);
        let tei = std::fs::read_to_string(dir.path().join("annotated_tei.xml")).unwrap();
        assert!(tei.contains("<CS1:X CS1:annotation=\"A1\">cd.</CS1:X>"));
    }

    #[test]
    fn test_text_range_restricts_tokens() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let mut config = config_in(dir.path());
        config.run.text_range = Some(TextRange::new(7, 13));
        let report = ExportPipeline::new(config).run(&project, 0).unwrap();
        assert_eq!(report.tokens, 3);
        assert_eq!(report.annotated_tokens, 0);

        let basic = std::fs::read_to_string(dir.path().join("basic_token_table.tsv")).unwrap();
        assert!(basic.contains("0\tEf\t7\t9"));
    }

    #[test]
    fn test_export_collections_in_parallel() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let project = Project::from_json_str(PROJECT).unwrap();
        let mut results = ExportPipeline::new(config_in(dir.path())).export_collections(&project, &[0, 1, 7]);
        results.sort_by_key(|(i, _)| *i);

        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(ExportError::AlignmentConflict { .. })));
        assert!(matches!(results[2].1, Err(ExportError::Config(_))));
        assert!(dir.path().join("0_Gold").join("annotated_tei.xml").exists());
        assert!(!dir.path().join("1_Konflikt").join("annotated_tei.xml").exists());
    }
}
