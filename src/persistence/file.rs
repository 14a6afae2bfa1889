//! 파일 백엔드
//!
//! 인덱스 바이트 파일 하나와 JSON lines 문서 파일 하나를 사용합니다.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::{ArtifactBackend, Artifacts};
use crate::error::{RagError, Result};

/// 파일 시스템 백엔드
#[derive(Debug, Clone)]
pub struct FileBackend {
    index_path: PathBuf,
    documents_path: PathBuf,
}

impl FileBackend {
    pub fn new(index_path: impl Into<PathBuf>, documents_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            documents_path: documents_path.into(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn documents_path(&self) -> &Path {
        &self.documents_path
    }
}

impl ArtifactBackend for FileBackend {
    fn write(&self, artifacts: &Artifacts) -> Result<()> {
        write_atomic(&self.index_path, &artifacts.index)?;

        let mut body = String::with_capacity(artifacts.documents.iter().map(|l| l.len() + 1).sum());
        for line in &artifacts.documents {
            body.push_str(line);
            body.push('\n');
        }
        write_atomic(&self.documents_path, body.as_bytes())?;

        tracing::debug!(
            "Wrote {} index bytes to {:?} and {} records to {:?}",
            artifacts.index.len(),
            self.index_path,
            artifacts.documents.len(),
            self.documents_path
        );
        Ok(())
    }

    fn read(&self) -> Result<Artifacts> {
        let index = match fs::read(&self.index_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RagError::NotFound(self.index_path.display().to_string()));
            }
            Err(e) => return Err(RagError::io(&self.index_path, e)),
        };

        let documents = match fs::read_to_string(&self.documents_path) {
            Ok(text) => text.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Documents file {:?} missing, treating as empty",
                    self.documents_path
                );
                Vec::new()
            }
            Err(e) => return Err(RagError::io(&self.documents_path, e)),
        };

        Ok(Artifacts { index, documents })
    }

    fn describe(&self) -> String {
        format!(
            "file ({}, {})",
            self.index_path.display(),
            self.documents_path.display()
        )
    }
}

/// 같은 디렉토리의 임시 파일에 기록한 뒤 rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RagError::Configuration(format!("invalid artifact path {:?}", path)))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let result = (|| -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        RagError::io(path, e)
    })
}
