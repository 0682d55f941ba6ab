use crate::core::error::{Error, Result};
use std::path::Path;

/// Kinds of file that can be read as text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Plain,
    Markdown,
    Code,
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text(TextKind),
    /// Known document format with no text extractor (PDF, Word, ...)
    Unsupported(&'static str),
    Unknown,
}

/// Determine the format of a file from its extension
pub fn detect_format(path: &Path) -> FileFormat {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileFormat::Unknown;
    };

    match ext.to_lowercase().as_str() {
        "txt" | "text" | "log" | "rst" | "org" => FileFormat::Text(TextKind::Plain),
        "md" | "markdown" | "mdown" | "mkd" | "mkdn" => FileFormat::Text(TextKind::Markdown),
        "py" | "js" | "ts" | "jsx" | "tsx" | "rs" | "go" | "java" | "kt" | "c" | "h" | "cpp"
        | "hpp" | "cs" | "rb" | "php" | "swift" | "sh" | "bash" | "zsh" | "sql" | "lua" => {
            FileFormat::Text(TextKind::Code)
        }
        "json" | "yaml" | "yml" | "toml" | "csv" | "tsv" | "xml" | "html" | "htm" | "ini" => {
            FileFormat::Text(TextKind::Structured)
        }
        "pdf" => FileFormat::Unsupported("pdf"),
        "docx" | "doc" => FileFormat::Unsupported("word"),
        "odt" | "rtf" | "pages" => FileFormat::Unsupported("rich-text"),
        _ => FileFormat::Unknown,
    }
}

/// Read a text file as UTF-8.
///
/// Any read or decode failure is an `Error::Extraction`.
pub fn extract_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::extraction(path, e))?;
    let mut text = String::from_utf8(bytes)
        .map_err(|e| Error::extraction(path, format!("not valid UTF-8: {}", e)))?;
    if text.starts_with('\u{feff}') {
        text.drain(..'\u{feff}'.len_utf8());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a.md")), FileFormat::Text(TextKind::Markdown));
        assert_eq!(detect_format(Path::new("a.TXT")), FileFormat::Text(TextKind::Plain));
        assert_eq!(detect_format(Path::new("a.py")), FileFormat::Text(TextKind::Code));
        assert_eq!(detect_format(Path::new("a.yaml")), FileFormat::Text(TextKind::Structured));
        assert_eq!(detect_format(Path::new("a.pdf")), FileFormat::Unsupported("pdf"));
        assert_eq!(detect_format(Path::new("a.docx")), FileFormat::Unsupported("word"));
        assert_eq!(detect_format(Path::new("a.bin")), FileFormat::Unknown);
        assert_eq!(detect_format(Path::new("Makefile")), FileFormat::Unknown);
    }

    #[test]
    fn test_extract_text() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("note.md");
        fs::write(&file, "\u{feff}# Title\n\nBody").unwrap();
        assert_eq!(extract_text(&file).unwrap(), "# Title\n\nBody");
    }

    #[test]
    fn test_extract_invalid_utf8() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("binary.txt");
        fs::write(&file, [0xff, 0xfe, 0x00, 0x81]).unwrap();
        assert!(matches!(extract_text(&file), Err(Error::Extraction { .. })));
        assert!(matches!(
            extract_text(&temp_dir.path().join("missing.txt")),
            Err(Error::Extraction { .. })
        ));
    }
}
