//! # Saída atômica
//!
//! Cada artefato é escrito num arquivo temporário no diretório de destino e só é renomeado
//! para o nome final em [`StagedOutput::commit`]. Se a execução falhar antes disso, os
//! temporários são apagados ao sair de escopo: nenhum arquivo truncado fica com cara de válido.
//!
//! O commit é tudo ou nada: se uma renomeação falha, os arquivos já publicados na mesma
//! execução são removidos. Diretórios criados por [`StagedOutput::new`] são removidos (se
//! continuarem vazios) quando nada chega a ser publicado.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Artefatos escritos mas ainda não publicados.
#[derive(Debug)]
pub struct StagedOutput {
    dir: PathBuf,
    pending: Vec<(NamedTempFile, PathBuf)>,
    /// Diretórios criados por esta instância, do mais profundo ao mais raso.
    created_dirs: Vec<PathBuf>,
}

impl StagedOutput {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let created_dirs: Vec<PathBuf> = dir
            .ancestors()
            .take_while(|d| !d.as_os_str().is_empty() && !d.exists())
            .map(Path::to_path_buf)
            .collect();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: Vec::new(),
            created_dirs,
        })
    }

    /// Escreve um artefato num temporário; devolve o caminho final que terá após o commit.
    pub fn stage<F>(&mut self, file_name: &str, write: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        let target = self.dir.join(file_name);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            write(&mut writer)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        debug!("Artefato '{}' preparado em {:?}", file_name, tmp.path());
        self.pending.push((tmp, target.clone()));
        Ok(target)
    }

    /// Publica todos os artefatos (renomeação atômica de cada um).
    ///
    /// Se alguma renomeação falhar, os arquivos já publicados nesta chamada são removidos e os
    /// temporários restantes descartados.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        let pending = std::mem::take(&mut self.pending);
        let mut written = Vec::with_capacity(pending.len());
        for (tmp, target) in pending {
            if let Err(e) = tmp.persist(&target) {
                warn!(
                    "Falha ao publicar {}: desfazendo {} arquivo(s)",
                    target.display(),
                    written.len()
                );
                for path in &written {
                    let _ = std::fs::remove_file(path);
                }
                return Err(e.error.into());
            }
            info!("Arquivo gravado: {}", target.display());
            written.push(target);
        }
        self.created_dirs.clear();
        Ok(written)
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        // Temporários se apagam sozinhos; só sobra desfazer os diretórios vazios
        self.pending.clear();
        for dir in &self.created_dirs {
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
        }
    }
}
