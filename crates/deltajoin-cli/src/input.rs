//! Delimited text input.
//!
//! A relation file starts with a header line of `name:type` columns, followed
//! by one row per line. Blank lines and lines starting with `#` are skipped.
//! An empty field or `NULL` is a null; `bytes` columns are hex encoded.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use deltajoin_core::row::{ColumnType, Datum, Row, RowSchema};

/// A parsed input file.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Columns declared by the header line
    pub schema: RowSchema,
    /// Data rows in file order
    pub rows: Vec<Row>,
}

/// Parses a column list such as `id:int,name:text`.
pub fn parse_schema(columns: &str, delimiter: char) -> Result<RowSchema> {
    let mut parsed = Vec::new();
    for field in columns.split(delimiter) {
        let field = field.trim();
        let (name, ty) = field
            .split_once(':')
            .with_context(|| format!("column `{field}` is not of the form name:type"))?;
        parsed.push((name.trim().to_string(), parse_type(ty.trim())?));
    }
    Ok(RowSchema::new(parsed))
}

fn parse_type(ty: &str) -> Result<ColumnType> {
    Ok(match ty.to_ascii_lowercase().as_str() {
        "int" | "int64" | "bigint" => ColumnType::Int64,
        "float" | "float64" | "double" => ColumnType::Float64,
        "text" | "string" => ColumnType::Text,
        "bool" | "boolean" => ColumnType::Bool,
        "bytes" | "bytea" => ColumnType::Bytes,
        other => bail!("unknown column type `{other}`"),
    })
}

/// Parses one data line against `schema`.
pub fn parse_row(schema: &RowSchema, line: &str, delimiter: char) -> Result<Row> {
    let fields: Vec<&str> = line.split(delimiter).collect();
    if fields.len() != schema.width() {
        bail!(
            "expected {} fields, found {} in `{line}`",
            schema.width(),
            fields.len()
        );
    }
    let values = schema
        .columns()
        .iter()
        .zip(fields)
        .map(|(column, field)| {
            parse_datum(column.ty, field.trim())
                .with_context(|| format!("column `{}`", column.name))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(values))
}

fn parse_datum(ty: ColumnType, field: &str) -> Result<Datum> {
    if field.is_empty() || field.eq_ignore_ascii_case("null") {
        return Ok(Datum::Null);
    }
    Ok(match ty {
        ColumnType::Int64 => Datum::Int64(field.parse()?),
        ColumnType::Float64 => Datum::Float64(field.parse()?),
        ColumnType::Text => Datum::Text(field.to_string()),
        ColumnType::Bool => match field.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Datum::Bool(true),
            "false" | "f" | "0" => Datum::Bool(false),
            other => bail!("invalid boolean `{other}`"),
        },
        ColumnType::Bytes => Datum::Bytes(parse_hex(field)?),
    })
}

fn parse_hex(field: &str) -> Result<Vec<u8>> {
    let digits = field.strip_prefix("0x").unwrap_or(field).as_bytes();
    if digits.len() % 2 != 0 || !digits.iter().all(u8::is_ascii_hexdigit) {
        bail!("invalid hex value `{field}`");
    }
    digits
        .chunks(2)
        .map(|pair| Ok(u8::from_str_radix(std::str::from_utf8(pair)?, 16)?))
        .collect()
}

/// Parses a whole relation from text.
pub fn parse_relation(text: &str, delimiter: char) -> Result<Relation> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.starts_with('#'));
    let (_, header) = lines.next().context("input has no header line")?;
    let schema = parse_schema(header, delimiter)?;
    let rows = lines
        .map(|(index, line)| {
            parse_row(&schema, line, delimiter).with_context(|| format!("line {}", index + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Relation { schema, rows })
}

/// Reads and parses a relation file.
pub fn read_relation(path: &Path, delimiter: char) -> Result<Relation> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_relation(&text, delimiter).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_relation() {
        let text = "\
# orders
id:int,customer:text,total:float,paid:bool,tag:bytes
1,alice,9.5,true,0xbeef

2,NULL,,f,
";
        let relation = parse_relation(text, ',').unwrap();
        assert_eq!(relation.schema.width(), 5);
        assert_eq!(
            relation.rows,
            vec![
                Row::new(vec![
                    Datum::Int64(1),
                    Datum::Text("alice".into()),
                    Datum::Float64(9.5),
                    Datum::Bool(true),
                    Datum::Bytes(vec![0xBE, 0xEF]),
                ]),
                Row::new(vec![
                    Datum::Int64(2),
                    Datum::Null,
                    Datum::Null,
                    Datum::Bool(false),
                    Datum::Null,
                ]),
            ]
        );
    }

    #[test]
    fn test_pipe_delimiter() {
        let relation = parse_relation("k:int|v:text\n3|x\n", '|').unwrap();
        assert_eq!(
            relation.rows,
            vec![Row::new(vec![Datum::Int64(3), Datum::Text("x".into())])]
        );
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse_relation("k:int\n1\nabc\n", ',').unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));

        assert!(parse_relation("k:int,v:text\n1\n", ',').is_err());
        assert!(parse_schema("k:decimal", ',').is_err());
        assert!(parse_schema("k", ',').is_err());
        assert!(parse_relation("", ',').is_err());
    }

    #[test]
    fn test_malformed_hex_is_an_error() {
        let schema = parse_schema("tag:bytes", ',').unwrap();
        for field in ["a\u{e9}0", "\u{e9}\u{e9}", "0xabc", "zz", "0x\u{1f600}"] {
            assert!(parse_row(&schema, field, ',').is_err(), "accepted `{field}`");
        }
        assert_eq!(
            parse_row(&schema, "0xA0ff", ',').unwrap(),
            Row::new(vec![Datum::Bytes(vec![0xA0, 0xFF])])
        );
    }

    #[test]
    fn test_read_relation_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("left.csv");
        fs::write(&path, "k:int\n5\n6\n").unwrap();
        let relation = read_relation(&path, ',').unwrap();
        assert_eq!(relation.rows.len(), 2);
        assert!(read_relation(&dir.path().join("missing.csv"), ',').is_err());
    }
}
