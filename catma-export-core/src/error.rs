//! # Taxonomia de Erros da Exportação
//!
//! Nenhum destes erros é transitório: todos indicam entrada inválida ou um invariante
//! quebrado. O pipeline aborta a execução corrente e não persiste nenhum artefato parcial.

use thiserror::Error;

/// Tipo `Result` usado por todo o crate.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Erros que podem interromper uma execução de exportação.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// Configuração inválida ou ausente (ex: `text_range` fora dos limites do documento).
    #[error("Configuração inválida: {0}")]
    Config(String),

    /// O texto excede o limite aceito pelo tokenizador.
    #[error("Texto longo demais para tokenização: {len} caracteres (máximo {max})")]
    TextTooLong { len: usize, max: usize },

    /// Dois rótulos diferentes cobrem o mesmo token (modo estrito).
    #[error("Conflito de anotação no token {token_index}: '{first_label}' e '{second_label}'")]
    AlignmentConflict {
        token_index: usize,
        first_label: String,
        second_label: String,
    },

    /// Invariante quebrado detectado no momento da serialização.
    #[error("Erro de serialização: {0}")]
    Serialization(String),

    /// Tabela de tokens lida do disco com formato inválido.
    #[error("Tabela inválida (linha {line}): {message}")]
    Table { line: usize, message: String },

    /// Modelo de tokenização indisponível.
    #[error("Recurso indisponível: {0}")]
    Resource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExportError {
    pub fn config(msg: impl Into<String>) -> Self {
        ExportError::Config(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        ExportError::Serialization(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        ExportError::Resource(msg.into())
    }
}
