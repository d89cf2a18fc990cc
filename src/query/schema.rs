//! Declared row schema shared by every partition of a read.

use serde::{Deserialize, Serialize};

use crate::query::Value;

/// Column data types understood by the row decoder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `true` / `false`.
    Boolean,
    /// Signed 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    String,
    /// Base64 encoded bytes.
    Binary,
    /// Calendar date (`YYYY-MM-DD`).
    Date,
    /// RFC 3339 timestamp.
    Timestamp,
}

impl DataType {
    /// Whether the type has a total order usable by range comparisons.
    pub fn is_orderable(self) -> bool {
        !matches!(self, DataType::Boolean | DataType::Binary)
    }

    /// Whether a literal can be compared against a column of this type.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (DataType::Boolean, Value::Bool(_))
                | (DataType::Long, Value::Int(_))
                | (DataType::Double, Value::Int(_) | Value::Float(_))
                | (DataType::String, Value::String(_))
                | (DataType::Binary, Value::Bytes(_))
                | (DataType::Date, Value::Date(_))
                | (DataType::Timestamp, Value::DateTime(_))
        )
    }
}

/// Single column declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Column name as returned by the remote engine.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether missing / null values are allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    /// Nullable column of the given type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Marks the column as non-nullable.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered column list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Builds a schema from its columns, in output order.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Columns in output order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the named column.
    ///
    /// Qualified attributes (`view.col`, `schema.view.col`) resolve by their
    /// final segment when no column carries the full name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| {
                let short = name.rsplit('.').next()?;
                self.fields.iter().position(|f| f.name == short)
            })
    }

    /// Column declaration for the named attribute.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|idx| &self.fields[idx])
    }

    /// Schema restricted to the named columns, in the order given.
    pub fn project(&self, columns: &[String]) -> Option<Schema> {
        columns
            .iter()
            .map(|name| self.field(name).cloned())
            .collect::<Option<Vec<_>>>()
            .map(Schema::new)
    }
}
