use flate2::read::GzDecoder;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error("Failed to open the table file")]
    Io(#[from] std::io::Error),
    #[error("missing `# key1 key2 ...` header line")]
    MissingHeader,
    #[error("line {line}: expected {expected} values, found {found}")]
    RowLength {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: failed to parse {value:?}")]
    Parse {
        line: usize,
        value: String,
        source: std::num::ParseFloatError,
    },
    #[error("column {0:?} not found in table")]
    MissingColumn(String),
}
type Result<T> = std::result::Result<T, TableError>;

/// Whitespace separated ASCII table
///
/// The first line lists the column names after a `#`,
/// e.g. `# expreq exptime flux nd fiber`.
#[derive(Debug, Default, Clone)]
pub struct AsciiTable {
    keys: Vec<String>,
    columns: BTreeMap<String, Vec<f64>>,
}
impl AsciiTable {
    /// Loads a table from a file, gzip compressed if the extension is `gz`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("reading {:?}", path);
        let file = File::open(path)?;
        if path.extension().map_or(false, |ext| ext == "gz") {
            Self::from_reader(BufReader::new(GzDecoder::new(file)))
        } else {
            Self::from_reader(BufReader::new(file))
        }
    }
    pub fn from_reader<R: Read>(reader: BufReader<R>) -> Result<Self> {
        let mut lines = reader.lines().enumerate();
        let keys: Vec<String> = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line?;
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    break line
                        .strip_prefix('#')
                        .ok_or(TableError::MissingHeader)?
                        .split_whitespace()
                        .map(|k| k.to_string())
                        .collect();
                }
                None => return Err(TableError::MissingHeader),
            }
        };
        if keys.is_empty() {
            return Err(TableError::MissingHeader);
        }

        let mut values: Vec<Vec<f64>> = vec![vec![]; keys.len()];
        for (i, line) in lines {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != keys.len() {
                return Err(TableError::RowLength {
                    line: i + 1,
                    expected: keys.len(),
                    found: fields.len(),
                });
            }
            for (column, field) in values.iter_mut().zip(fields) {
                column.push(field.parse::<f64>().map_err(|source| TableError::Parse {
                    line: i + 1,
                    value: field.to_string(),
                    source,
                })?);
            }
        }

        let columns = keys.iter().cloned().zip(values).collect();
        Ok(Self { keys, columns })
    }
    /// Column names in file order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
    /// Number of rows
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, |c| c.len())
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn contains(&self, key: &str) -> bool {
        self.columns.contains_key(key)
    }
    pub fn column(&self, key: &str) -> Result<&[f64]> {
        self.columns
            .get(key)
            .map(|c| c.as_slice())
            .ok_or_else(|| TableError::MissingColumn(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(contents: &str) -> Result<AsciiTable> {
        AsciiTable::from_reader(BufReader::new(contents.as_bytes()))
    }

    #[test]
    fn parse_columns() {
        let t = table("# expreq flux nd\n1.0 100 1\n\n# comment\n2.0  200.5 2\n").unwrap();
        assert_eq!(t.keys(), &["expreq", "flux", "nd"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.column("flux").unwrap(), &[100., 200.5]);
        assert!(t.column("fiber").is_err());
    }

    #[test]
    fn header_required() {
        assert!(matches!(table("1 2 3\n"), Err(TableError::MissingHeader)));
        assert!(matches!(table(""), Err(TableError::MissingHeader)));
    }

    #[test]
    fn ragged_row() {
        assert!(matches!(
            table("# a b\n1 2\n3\n"),
            Err(TableError::RowLength { line: 3, .. })
        ));
    }

    #[test]
    fn bad_value() {
        assert!(matches!(
            table("# a b\n1 x\n"),
            Err(TableError::Parse { line: 2, .. })
        ));
    }
}
