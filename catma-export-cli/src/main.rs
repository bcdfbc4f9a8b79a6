//! Linha de comando para exportar coleções de anotações CATMA em TSV e TEI
//!
//! Uso:
//!   catma-export run <projeto.json> [--config <config.json>] [--collection N | --name X --title Y]
//!   catma-export preview <projeto.json> --start N --end M
//!   catma-export find-range <projeto.json> <padrão-inicial> <padrão-final>
//!   catma-export policies [--config <config.json>]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

use catma_export_core::annotation::Project;
use catma_export_core::source::{RangeSearch, TextRange};
use catma_export_core::{ExportConfig, ExportPipeline, PipelineEvent, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catma-export", version, about = "Exporta anotações CATMA em tabelas TSV e TEI XML")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Executa as etapas configuradas para uma ou mais coleções
    Run(RunArgs),
    /// Mostra o início e o fim de um trecho do texto
    Preview {
        project: PathBuf,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
        /// Caracteres mostrados em cada ponta
        #[arg(long, default_value_t = 30)]
        snippet: usize,
    },
    /// Procura o trecho entre dois padrões (expressões regulares)
    FindRange {
        project: PathBuf,
        start_pattern: String,
        end_pattern: String,
    },
    /// Lista as políticas de parágrafo disponíveis
    Policies {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    project: PathBuf,
    /// Arquivo de configuração JSON (padrões embutidos quando ausente)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Índice da coleção (repetível: várias coleções rodam em paralelo)
    #[arg(long, short = 'i', conflicts_with_all = ["name", "all"])]
    collection: Vec<usize>,
    /// Nome da coleção (exige --title)
    #[arg(long, requires = "title")]
    name: Option<String>,
    /// Título do texto anotado pela coleção
    #[arg(long, requires = "name")]
    title: Option<String>,
    /// Exporta todas as coleções do projeto
    #[arg(long)]
    all: bool,
    /// Diretório de saída (sobrepõe o da configuração)
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Preview {
            project,
            start,
            end,
            snippet,
        } => handle_preview(project, TextRange::new(start, end), snippet),
        Command::FindRange {
            project,
            start_pattern,
            end_pattern,
        } => handle_find_range(project, &start_pattern, &end_pattern),
        Command::Policies { config } => handle_policies(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load(path),
        None => Ok(ExportConfig::default()),
    }
}

fn handle_run(args: RunArgs) -> Result<()> {
    let project = Project::load(&args.project)?;
    let mut config = load_config(args.config)?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let indices: Vec<usize> = if args.all {
        (0..project.collections.len()).collect()
    } else if let (Some(name), Some(title)) = (&args.name, &args.title) {
        vec![project.find_collection(name, title)?]
    } else if args.collection.is_empty() {
        vec![0]
    } else {
        args.collection
    };

    let pipeline = ExportPipeline::new(config);

    if let [index] = indices.as_slice() {
        let (tx, rx) = mpsc::channel();
        let printer = thread::spawn(move || {
            for event in rx {
                log_event(&event);
            }
        });
        let result = pipeline.run_streaming(&project, *index, tx);
        let _ = printer.join();
        let report = result?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut failures = 0;
    for (index, result) in pipeline.export_collections(&project, &indices) {
        match result {
            Ok(report) => info!(
                "Coleção {} ('{}'): {} arquivo(s) gravado(s)",
                index,
                report.collection,
                report.written.len()
            ),
            Err(e) => {
                failures += 1;
                error!("Coleção {}: {}", index, e);
            }
        }
    }
    if failures > 0 {
        return Err(catma_export_core::ExportError::config(format!(
            "{} de {} coleções falharam",
            failures,
            indices.len()
        )));
    }
    Ok(())
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::TokenizationDone { total, range } => {
            info!("{} tokens no trecho [{}, {})", total, range.start, range.end)
        }
        PipelineEvent::AnnotationsNormalized {
            annotations,
            discarded,
        } => info!(
            "{} anotações normalizadas, {} descartadas",
            annotations,
            discarded.len()
        ),
        PipelineEvent::AlignmentDone {
            annotated_tokens,
            conflicts,
        } => {
            info!("{} tokens anotados", annotated_tokens);
            if !conflicts.is_empty() {
                warn!("{} conflito(s) resolvidos pela prioridade", conflicts.len());
            }
        }
        PipelineEvent::ParagraphsDone { paragraphs } => info!("{} parágrafos", paragraphs),
        _ => {}
    }
}

fn handle_preview(project: PathBuf, range: TextRange, snippet: usize) -> Result<()> {
    let project = Project::load(project)?;
    println!("{}", project.source().preview(range, snippet)?);
    Ok(())
}

fn handle_find_range(project: PathBuf, start_pattern: &str, end_pattern: &str) -> Result<()> {
    let project = Project::load(project)?;
    match project.source().find_range(start_pattern, end_pattern)? {
        RangeSearch::Unique(range) => {
            println!("{{\"start\": {}, \"end\": {}}}", range.start, range.end)
        }
        RangeSearch::Ambiguous { starts, ends } => {
            warn!("Padrões não são únicos no texto");
            println!("inícios candidatos: {:?}", starts);
            println!("fins candidatos: {:?}", ends);
        }
    }
    Ok(())
}

fn handle_policies(config: Option<PathBuf>) -> Result<()> {
    let registry = load_config(config)?.policy_registry();
    for name in registry.list_policies() {
        let policy = registry.get(&name)?;
        println!("{}\t{}", name, serde_json::to_string(policy)?);
    }
    Ok(())
}
