//! Delimited line parser
//!
//! Turns one line of delimited text into a [`Record`]. Tokenizing goes through the `csv`
//! crate so quoted fields containing the delimiter are handled.

use serde::{Deserialize, Serialize};

use super::error::{FormatError, ParseError};
use super::types::Record;

pub const DEFAULT_DELIMITER: char = ',';
pub const DEFAULT_COMMENT_PREFIX: &str = "#";

/// Column layout of the input files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFormat {
    pub delimiter: char,
    /// Column names in file order; must contain `id` and `name`
    pub fields: Vec<String>,
    /// Lines starting with this prefix are not records
    pub comment_prefix: Option<String>,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            fields: vec!["id".to_string(), "name".to_string()],
            comment_prefix: Some(DEFAULT_COMMENT_PREFIX.to_string()),
        }
    }
}

impl LineFormat {
    /// Build a format from a comma-separated field list such as `id,name`
    pub fn with_fields(mut self, fields: &str) -> Self {
        self.fields = fields
            .split(',')
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        self.delimiter_byte()?;
        self.column_of("id")?;
        self.column_of("name")?;

        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.as_str()) {
                return Err(FormatError::DuplicateField(field.clone()));
            }
        }
        Ok(())
    }

    fn delimiter_byte(&self) -> Result<u8, FormatError> {
        if self.delimiter.is_ascii() && self.delimiter != '"' && self.delimiter != '\n' {
            Ok(self.delimiter as u8)
        } else {
            Err(FormatError::Delimiter(self.delimiter.to_string()))
        }
    }

    fn column_of(&self, field: &'static str) -> Result<usize, FormatError> {
        self.fields
            .iter()
            .position(|f| f.eq_ignore_ascii_case(field))
            .ok_or(FormatError::MissingField(field))
    }
}

/// Stateless parser for one input line
#[derive(Debug)]
pub struct RecordLineParser {
    tokenizer: csv::ReaderBuilder,
    expected_fields: usize,
    id_column: usize,
    name_column: usize,
    comment_prefix: Option<String>,
}

impl RecordLineParser {
    pub fn new(format: &LineFormat) -> Result<Self, FormatError> {
        format.validate()?;

        let mut tokenizer = csv::ReaderBuilder::new();
        tokenizer
            .has_headers(false)
            .flexible(true)
            .delimiter(format.delimiter_byte()?);

        Ok(Self {
            tokenizer,
            expected_fields: format.fields.len(),
            id_column: format.column_of("id")?,
            name_column: format.column_of("name")?,
            comment_prefix: format.comment_prefix.clone().filter(|p| !p.is_empty()),
        })
    }

    /// Blank lines and comment lines carry no record
    pub fn is_ignorable(&self, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match &self.comment_prefix {
            Some(prefix) => line.starts_with(prefix.as_str()),
            None => false,
        }
    }

    /// Parse `line` (the `line_number`-th line of its file) into a record
    pub fn parse(&self, line: &str, line_number: i64) -> Result<Record, ParseError> {
        let mut reader = self.tokenizer.from_reader(line.as_bytes());
        let mut fields = csv::StringRecord::new();

        let found_row = reader
            .read_record(&mut fields)
            .map_err(|e| ParseError::Malformed {
                line: line_number,
                reason: e.to_string(),
            })?;
        if !found_row {
            fields.clear();
        }

        if fields.len() != self.expected_fields {
            return Err(ParseError::FieldCountMismatch {
                line: line_number,
                expected: self.expected_fields,
                found: fields.len(),
            });
        }

        let raw_id = &fields[self.id_column];
        let id = raw_id
            .trim()
            .parse::<i64>()
            .map_err(|_| ParseError::TypeCoercion {
                line: line_number,
                field: "id".to_string(),
                value: raw_id.to_string(),
            })?;

        Ok(Record::new(id, &fields[self.name_column]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> RecordLineParser {
        RecordLineParser::new(&LineFormat::default()).unwrap()
    }

    #[test]
    fn test_parses_id_and_name() {
        let record = parser().parse("1,Room-A", 1).unwrap();
        assert_eq!(record, Record::new(1, "Room-A"));
    }

    #[test]
    fn test_trims_id_but_keeps_name() {
        let record = parser().parse(" 42 , Suite 9", 1).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.name, " Suite 9");
    }

    #[test]
    fn test_quoted_name_may_contain_delimiter() {
        let record = parser().parse(r#"7,"Hall, East""#, 1).unwrap();
        assert_eq!(record.name, "Hall, East");
    }

    #[test]
    fn test_field_count_mismatch() {
        let err = parser().parse("1,Room-A,extra", 4).unwrap_err();
        assert_eq!(
            err,
            ParseError::FieldCountMismatch {
                line: 4,
                expected: 2,
                found: 3
            }
        );

        let err = parser().parse("12", 5).unwrap_err();
        assert!(matches!(err, ParseError::FieldCountMismatch { found: 1, .. }));
    }

    #[test]
    fn test_non_integer_id() {
        let err = parser().parse("one,Room-A", 2).unwrap_err();
        assert_eq!(
            err,
            ParseError::TypeCoercion {
                line: 2,
                field: "id".to_string(),
                value: "one".to_string()
            }
        );
    }

    #[test]
    fn test_custom_delimiter_and_field_order() {
        let format = LineFormat::default()
            .with_delimiter(';')
            .with_fields("name,floor,id");
        let parser = RecordLineParser::new(&format).unwrap();

        let record = parser.parse("Room-B;3;2", 1).unwrap();
        assert_eq!(record, Record::new(2, "Room-B"));
    }

    #[test]
    fn test_ignorable_lines() {
        let parser = parser();
        assert!(parser.is_ignorable(""));
        assert!(parser.is_ignorable("   "));
        assert!(parser.is_ignorable("# exported 2026-10-01"));
        assert!(!parser.is_ignorable("1,Room-A"));
    }

    #[test]
    fn test_format_validation() {
        let missing = LineFormat::default().with_fields("id,label");
        assert_eq!(
            RecordLineParser::new(&missing).unwrap_err(),
            FormatError::MissingField("name")
        );

        let duplicate = LineFormat::default().with_fields("id,name,id");
        assert!(matches!(
            duplicate.validate(),
            Err(FormatError::DuplicateField(_))
        ));

        let wide = LineFormat::default().with_delimiter('§');
        assert!(matches!(wide.validate(), Err(FormatError::Delimiter(_))));
    }
}
