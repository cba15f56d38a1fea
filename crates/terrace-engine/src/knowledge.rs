use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_KNOWLEDGE_PATH: &str = "urban_terrace_farming_knowledge.txt";

#[derive(Debug, Error)]
pub enum KnowledgeLoadError {
    #[error("failed reading knowledge file {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("knowledge file {} is not valid UTF-8", path.display())]
    NotUtf8 { path: PathBuf },
}

/// Result of the startup read. A failed read yields empty text plus the warning.
#[derive(Debug)]
pub struct KnowledgeLoad {
    pub text: String,
    pub warning: Option<KnowledgeLoadError>,
}

pub fn load_knowledge(path: &Path) -> KnowledgeLoad {
    match read_knowledge(path) {
        Ok(text) => {
            log::debug!(
                "loaded {} bytes of knowledge from {}",
                text.len(),
                path.display()
            );
            KnowledgeLoad {
                text,
                warning: None,
            }
        }
        Err(err) => {
            log::warn!("{err}; continuing without domain knowledge");
            KnowledgeLoad {
                text: String::new(),
                warning: Some(err),
            }
        }
    }
}

fn read_knowledge(path: &Path) -> Result<String, KnowledgeLoadError> {
    let bytes = std::fs::read(path).map_err(|source| KnowledgeLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| KnowledgeLoadError::NotUtf8 {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::{load_knowledge, KnowledgeLoadError};

    #[test]
    fn reads_whole_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("knowledge.txt");
        std::fs::write(&path, "Basil likes warmth.\nMint spreads fast.\n")?;

        let loaded = load_knowledge(&path);
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.text, "Basil likes warmth.\nMint spreads fast.\n");
        Ok(())
    }

    #[test]
    fn missing_file_degrades_to_empty_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let loaded = load_knowledge(&temp.path().join("absent.txt"));
        assert!(loaded.text.is_empty());
        assert!(matches!(loaded.warning, Some(KnowledgeLoadError::Io { .. })));
        Ok(())
    }

    #[test]
    fn invalid_utf8_degrades_to_empty_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("latin1.txt");
        std::fs::write(&path, [0x66, 0x6f, 0xff, 0xfe])?;

        let loaded = load_knowledge(&path);
        assert!(loaded.text.is_empty());
        let warning = loaded.warning.map(|err| err.to_string()).unwrap_or_default();
        assert!(warning.contains("not valid UTF-8"));
        Ok(())
    }
}
