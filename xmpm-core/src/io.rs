//! Input document access and surface-mesh readers.
//!
//! [`Io`] wraps the parsed JSON input. Section lookups and relative file
//! names are resolved through it so that nothing else touches paths.
//!
//! Surface meshes use a plain ASCII layout:
//!
//! ```text
//! ! comment lines start with '!'
//! nnodes ncells
//! x y [z]          (nnodes lines)
//! n0 n1 [n2]       (ncells lines, 0-based)
//! ```

use crate::error::{Error, Result};
use crate::types::Vector;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Parsed input file.
#[derive(Debug, Clone)]
pub struct Io {
    document: Value,
    directory: PathBuf,
}

impl Io {
    /// Read and parse a JSON input file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Config(format!("cannot open input file {}: {}", path.display(), e))
        })?;
        let document: Value = serde_json::from_reader(BufReader::new(file))?;
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_value(document, directory)
    }

    /// Wrap an already parsed document; relative files resolve against
    /// `directory`.
    pub fn from_value(document: Value, directory: impl Into<PathBuf>) -> Result<Self> {
        if !document.is_object() {
            return Err(Error::Config("input document must be a JSON object".to_string()));
        }
        Ok(Self {
            document,
            directory: directory.into(),
        })
    }

    /// Raw JSON of a top-level section.
    pub fn json_object(&self, section: &str) -> Result<&Value> {
        self.document
            .get(section)
            .ok_or_else(|| Error::Config(format!("missing input section '{section}'")))
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.document.get(section).is_some()
    }

    /// Deserialize a required section.
    pub fn section<T: DeserializeOwned>(&self, section: &str) -> Result<T> {
        let value = self.json_object(section)?;
        T::deserialize(value)
            .map_err(|e| Error::Config(format!("section '{section}': {e}")))
    }

    /// Deserialize a section, falling back to `T::default()` when absent.
    pub fn section_or_default<T: DeserializeOwned + Default>(&self, section: &str) -> Result<T> {
        if self.has_section(section) {
            self.section(section)
        } else {
            Ok(T::default())
        }
    }

    /// Resolve a file name relative to the input file.
    pub fn file_name(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.directory.join(path)
        }
    }
}

/// Surface mesh reader, selected by the `io_type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshReaderKind {
    Ascii2D,
    Ascii3D,
}

impl FromStr for MeshReaderKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "ascii2d" => Ok(MeshReaderKind::Ascii2D),
            "ascii3d" => Ok(MeshReaderKind::Ascii3D),
            _ => Err(Error::Config(format!("unknown mesh reader '{tag}'"))),
        }
    }
}

impl MeshReaderKind {
    pub fn dimension(self) -> usize {
        match self {
            MeshReaderKind::Ascii2D => 2,
            MeshReaderKind::Ascii3D => 3,
        }
    }

    /// Vertices per surface cell.
    fn cell_size(self) -> usize {
        self.dimension()
    }

    pub fn read_mesh_nodes<P: AsRef<Path>>(self, path: P) -> Result<Vec<Vector>> {
        Ok(self.read(path)?.0)
    }

    pub fn read_mesh_cells<P: AsRef<Path>>(self, path: P) -> Result<Vec<Vec<usize>>> {
        Ok(self.read(path)?.1)
    }

    /// Read nodes and cells in one pass.
    pub fn read<P: AsRef<Path>>(self, path: P) -> Result<(Vec<Vector>, Vec<Vec<usize>>)> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::Discontinuity(format!("cannot open mesh {}: {}", path.display(), e))
        })?;
        self.read_from_reader(BufReader::new(file))
    }

    pub fn read_from_reader<R: BufRead>(self, reader: R) -> Result<(Vec<Vector>, Vec<Vec<usize>>)> {
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('!') {
                continue;
            }
            lines.push(trimmed.to_string());
        }
        let mut lines = lines.into_iter().enumerate();

        let (_, header) = lines
            .next()
            .ok_or_else(|| Error::Discontinuity("mesh file is empty".to_string()))?;
        let counts: Vec<usize> = parse_fields(&header, "header")?;
        let [nnodes, ncells] = counts[..] else {
            return Err(Error::Discontinuity(format!(
                "mesh header must be 'nnodes ncells', got '{header}'"
            )));
        };

        let dim = self.dimension();
        let mut nodes = Vec::with_capacity(nnodes);
        for _ in 0..nnodes {
            let (n, line) = lines
                .next()
                .ok_or_else(|| Error::Discontinuity(format!("expected {nnodes} nodes")))?;
            let coords: Vec<f64> = parse_fields(&line, "node")?;
            if coords.len() < dim {
                return Err(Error::Discontinuity(format!(
                    "line {}: node needs {dim} coordinates",
                    n + 1
                )));
            }
            nodes.push(Vector::from_column_slice(&coords[..dim]));
        }

        let size = self.cell_size();
        let mut cells = Vec::with_capacity(ncells);
        for _ in 0..ncells {
            let (n, line) = lines
                .next()
                .ok_or_else(|| Error::Discontinuity(format!("expected {ncells} cells")))?;
            let cell: Vec<usize> = parse_fields(&line, "cell")?;
            if cell.len() != size {
                return Err(Error::Discontinuity(format!(
                    "line {}: cell needs {size} node indices",
                    n + 1
                )));
            }
            cells.push(cell);
        }
        Ok((nodes, cells))
    }
}

fn parse_fields<T: FromStr>(line: &str, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|s| {
            s.parse::<T>()
                .map_err(|_| Error::Discontinuity(format!("invalid {what} entry '{s}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[test]
    fn test_sections_and_file_names() {
        let io = Io::from_value(
            serde_json::json!({"analysis": {"dt": 0.1}}),
            "/data/run",
        )
        .unwrap();
        assert!(io.json_object("analysis").is_ok());
        assert!(matches!(io.json_object("mesh"), Err(Error::Config(_))));
        assert_eq!(io.file_name("crack.txt"), PathBuf::from("/data/run/crack.txt"));
        assert_eq!(io.file_name("/abs/crack.txt"), PathBuf::from("/abs/crack.txt"));
    }

    #[test]
    fn test_section_or_default() {
        #[derive(Deserialize, Default)]
        struct Optional {
            #[serde(default)]
            value: usize,
        }
        let io = Io::from_value(serde_json::json!({}), ".").unwrap();
        assert_eq!(io.section_or_default::<Optional>("missing").unwrap().value, 0);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Io::from_value(serde_json::json!([1, 2]), ".").is_err());
    }

    #[test]
    fn test_reader_tags() {
        assert_eq!("Ascii2D".parse::<MeshReaderKind>().unwrap(), MeshReaderKind::Ascii2D);
        assert_eq!("ascii3d".parse::<MeshReaderKind>().unwrap(), MeshReaderKind::Ascii3D);
        assert!("vtk".parse::<MeshReaderKind>().is_err());
    }

    #[test]
    fn test_read_ascii2d_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "! crack across the block").unwrap();
        writeln!(file, "3 2").unwrap();
        writeln!(file, "0.0 0.5").unwrap();
        writeln!(file, "0.5 0.5").unwrap();
        writeln!(file, "1.0 0.5").unwrap();
        writeln!(file, "0 1").unwrap();
        writeln!(file, "1 2").unwrap();
        file.flush().unwrap();

        let reader = MeshReaderKind::Ascii2D;
        let nodes = reader.read_mesh_nodes(file.path()).unwrap();
        let cells = reader.read_mesh_cells(file.path()).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1].as_slice(), &[0.5, 0.5]);
        assert_eq!(cells, vec![vec![0, 1], vec![1, 2]]);
    }

    #[test]
    fn test_truncated_mesh_is_an_error() {
        let text = "2 1\n0 0\n";
        let result = MeshReaderKind::Ascii2D.read_from_reader(text.as_bytes());
        assert!(matches!(result, Err(Error::Discontinuity(_))));
    }

    #[test]
    fn test_wrong_cell_arity() {
        let text = "3 1\n0 0 0\n1 0 0\n0 1 0\n0 1\n";
        assert!(MeshReaderKind::Ascii3D.read_from_reader(text.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = MeshReaderKind::Ascii2D.read(dir.path().join("absent.txt"));
        assert!(matches!(result, Err(Error::Discontinuity(_))));
    }
}
