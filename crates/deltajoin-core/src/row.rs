//! Row model and row payload encoding.
//!
//! A [`Row`] is an ordered list of [`Datum`] values. Inside one process rows
//! move by value through the operator tree; across the row channel they are
//! copied as opaque payloads produced by [`RowCodec`].
//!
//! Join keys are ordered with [`compare_datums`] under a [`SortOrder`], which
//! carries the descending and nulls-first flags of the sort that produced the
//! input.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rkyv::{
    rancor::Error as RkyvError, util::AlignedVec, Archive, Deserialize as RkyvDeserialize,
    Serialize as RkyvSerialize,
};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
pub enum Datum {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Datum {
    /// Returns true if this value is NULL.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Returns the column type of a non-null value.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Datum::Null => None,
            Datum::Bool(_) => Some(ColumnType::Bool),
            Datum::Int64(_) => Some(ColumnType::Int64),
            Datum::Float64(_) => Some(ColumnType::Float64),
            Datum::Text(_) => Some(ColumnType::Text),
            Datum::Bytes(_) => Some(ColumnType::Bytes),
        }
    }

    /// Rank used to order values of different types.
    fn type_rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int64(_) | Datum::Float64(_) => 2,
            Datum::Text(_) => 3,
            Datum::Bytes(_) => 4,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::Int64(v) => write!(f, "{v}"),
            Datum::Float64(v) => write!(f, "{v}"),
            Datum::Text(v) => write!(f, "{v}"),
            Datum::Bytes(v) => {
                write!(f, "\\x")?;
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Column type in a [`RowSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Boolean column.
    Bool,
    /// 64-bit signed integer column.
    Int64,
    /// 64-bit float column.
    Float64,
    /// UTF-8 text column.
    Text,
    /// Raw bytes column.
    Bytes,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int64 => "int8",
            ColumnType::Float64 => "float8",
            ColumnType::Text => "text",
            ColumnType::Bytes => "bytea",
        };
        f.write_str(name)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
}

/// Column layout of the rows an operator produces.
///
/// Cheap to clone; the column list is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    columns: Arc<[Column]>,
}

impl RowSchema {
    /// Creates a schema from `(name, type)` pairs.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, ty)| Column {
                    name: name.into(),
                    ty,
                })
                .collect(),
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// All columns in order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Schema of `self` followed by `other`, the shape of a joined row.
    #[must_use]
    pub fn concat(&self, other: &RowSchema) -> RowSchema {
        Self {
            columns: self
                .columns
                .iter()
                .chain(other.columns.iter())
                .cloned()
                .collect(),
        }
    }
}

/// An immutable row of values.
#[derive(Debug, Clone, PartialEq, Archive, RkyvSerialize, RkyvDeserialize)]
pub struct Row {
    values: Vec<Datum>,
}

impl Row {
    /// Creates a row from its values.
    #[must_use]
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    /// A row of `width` NULLs, used to null-fill the unmatched side of an
    /// outer join.
    #[must_use]
    pub fn nulls(width: usize) -> Self {
        Self {
            values: vec![Datum::Null; width],
        }
    }

    /// Number of values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the row has no values.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, or `None` if out of range.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Datum> {
        self.values.get(index)
    }

    /// All values in order.
    #[must_use]
    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    /// Consumes the row and returns its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Datum> {
        self.values
    }

    /// Concatenates two rows (outer values first).
    #[must_use]
    pub fn concat(left: &Row, right: &Row) -> Row {
        let mut values = Vec::with_capacity(left.len() + right.len());
        values.extend_from_slice(&left.values);
        values.extend_from_slice(&right.values);
        Row { values }
    }
}

impl From<Vec<Datum>> for Row {
    fn from(values: Vec<Datum>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Sort direction and null placement of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOrder {
    /// Values sort in descending order.
    pub descending: bool,
    /// NULLs sort before non-null values.
    pub nulls_first: bool,
}

impl SortOrder {
    /// Ascending, nulls last (the SQL default).
    pub const ASC: SortOrder = SortOrder {
        descending: false,
        nulls_first: false,
    };

    /// Descending, nulls first (the SQL default for DESC).
    pub const DESC: SortOrder = SortOrder {
        descending: true,
        nulls_first: true,
    };
}

/// Compares two values under `order`.
///
/// NULL placement follows `order.nulls_first` independently of direction.
/// Integers and floats compare numerically; otherwise values of different
/// types order by type.
#[must_use]
pub fn compare_datums(left: &Datum, right: &Datum, order: SortOrder) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return if order.nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            return if order.nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => {}
    }

    let base = compare_non_null(left, right);
    if order.descending {
        base.reverse()
    } else {
        base
    }
}

#[allow(clippy::cast_precision_loss)]
fn compare_non_null(left: &Datum, right: &Datum) -> Ordering {
    match (left, right) {
        (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
        (Datum::Int64(a), Datum::Int64(b)) => a.cmp(b),
        (Datum::Float64(a), Datum::Float64(b)) => a.total_cmp(b),
        (Datum::Int64(a), Datum::Float64(b)) => (*a as f64).total_cmp(b),
        (Datum::Float64(a), Datum::Int64(b)) => a.total_cmp(&(*b as f64)),
        (Datum::Text(a), Datum::Text(b)) => a.cmp(b),
        (Datum::Bytes(a), Datum::Bytes(b)) => a.cmp(b),
        _ => left.type_rank().cmp(&right.type_rank()),
    }
}

/// Errors from encoding or decoding row payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Row width differs from the channel's schema.
    #[error("row has {actual} columns, schema expects {expected}")]
    ArityMismatch {
        /// Schema width.
        expected: usize,
        /// Row width.
        actual: usize,
    },

    /// A non-null value does not match its column's type.
    #[error("column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Column index.
        column: usize,
        /// Declared column type.
        expected: ColumnType,
        /// Type of the value.
        found: ColumnType,
    },

    /// Payload serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Payload is not a valid encoded row.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

/// Encodes rows of one [`RowSchema`] to opaque payloads and back.
///
/// The schema is recorded when a channel is created so that the reading side
/// can validate what it reconstructs.
#[derive(Debug, Clone)]
pub struct RowCodec {
    schema: RowSchema,
}

impl RowCodec {
    /// Creates a codec for rows shaped like `schema`.
    #[must_use]
    pub fn new(schema: RowSchema) -> Self {
        Self { schema }
    }

    /// The schema rows are validated against.
    #[must_use]
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Encodes `row` into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ArityMismatch`] or [`CodecError::TypeMismatch`] if
    /// the row does not fit the schema, or [`CodecError::Serialization`] if
    /// encoding fails.
    pub fn encode(&self, row: &Row) -> Result<AlignedVec, CodecError> {
        self.validate(row)?;
        rkyv::to_bytes::<RkyvError>(row).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Decodes a payload into a row.
    ///
    /// The payload need not be aligned; it is copied into an aligned buffer
    /// before validation.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Deserialization`] if the bytes are not a valid
    /// encoded row, or a shape error if the row does not fit the schema.
    pub fn decode(&self, payload: &[u8]) -> Result<Row, CodecError> {
        let mut aligned = AlignedVec::<16>::with_capacity(payload.len());
        aligned.extend_from_slice(payload);
        let row = rkyv::from_bytes::<Row, RkyvError>(&aligned)
            .map_err(|e| CodecError::Deserialization(e.to_string()))?;
        self.validate(&row)?;
        Ok(row)
    }

    fn validate(&self, row: &Row) -> Result<(), CodecError> {
        if row.len() != self.schema.width() {
            return Err(CodecError::ArityMismatch {
                expected: self.schema.width(),
                actual: row.len(),
            });
        }
        for (column, (value, col)) in row.values().iter().zip(self.schema.columns()).enumerate() {
            if let Some(found) = value.column_type() {
                if found != col.ty {
                    return Err(CodecError::TypeMismatch {
                        column,
                        expected: col.ty,
                        found,
                    });
                }
            }
        }
        Ok(())
    }
}
