//! Abstract column vocabulary shared by both backends.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Backend-neutral column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbstractType {
    Text,
    Integer64,
    Integer32,
    Double,
    Float32,
    Boolean,
    Timestamp,
    Date,
    Decimal,
}

impl AbstractType {
    pub const ALL: [AbstractType; 9] = [
        AbstractType::Text,
        AbstractType::Integer64,
        AbstractType::Integer32,
        AbstractType::Double,
        AbstractType::Float32,
        AbstractType::Boolean,
        AbstractType::Timestamp,
        AbstractType::Date,
        AbstractType::Decimal,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AbstractType::Text => "text",
            AbstractType::Integer64 => "integer64",
            AbstractType::Integer32 => "integer32",
            AbstractType::Double => "double",
            AbstractType::Float32 => "float32",
            AbstractType::Boolean => "boolean",
            AbstractType::Timestamp => "timestamp",
            AbstractType::Date => "date",
            AbstractType::Decimal => "decimal",
        }
    }

    /// Resolve a type name, case-insensitively.
    ///
    /// Accepts the vocabulary names as well as the warehouse spellings callers
    /// historically passed (`STRING`, `BIGINT`, `INT`, ...).
    pub fn lookup(raw: &str) -> Option<Self> {
        let t = raw.trim().to_ascii_lowercase();
        let found = match t.as_str() {
            "text" | "string" | "varchar" => AbstractType::Text,
            "integer64" | "bigint" | "long" | "int8" => AbstractType::Integer64,
            "integer32" | "int" | "integer" | "int4" => AbstractType::Integer32,
            "double" | "double precision" | "float8" => AbstractType::Double,
            "float32" | "float" | "real" | "float4" => AbstractType::Float32,
            "boolean" | "bool" => AbstractType::Boolean,
            "timestamp" => AbstractType::Timestamp,
            "date" => AbstractType::Date,
            "decimal" | "numeric" => AbstractType::Decimal,
            _ => return None,
        };
        Some(found)
    }
}

impl fmt::Display for AbstractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A column type as supplied by the caller.
///
/// Unrecognized names are preserved rather than rejected so that schema
/// creation is never blocked; translation substitutes the backend's text type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Known(AbstractType),
    Unknown(String),
}

impl ColumnType {
    pub fn parse(raw: &str) -> Self {
        match AbstractType::lookup(raw) {
            Some(t) => ColumnType::Known(t),
            None => ColumnType::Unknown(raw.trim().to_string()),
        }
    }

    pub fn as_known(&self) -> Option<AbstractType> {
        match self {
            ColumnType::Known(t) => Some(*t),
            ColumnType::Unknown(_) => None,
        }
    }
}

impl From<AbstractType> for ColumnType {
    fn from(t: AbstractType) -> Self {
        ColumnType::Known(t)
    }
}

impl From<&str> for ColumnType {
    fn from(raw: &str) -> Self {
        ColumnType::parse(raw)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Known(t) => write!(f, "{}", t),
            ColumnType::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ColumnType::parse(&raw))
    }
}

/// Ordered column list used for table creation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnSchema {
    columns: Vec<(String, ColumnType)>,
}

impl ColumnSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column; a repeated name replaces the earlier type in place.
    pub fn with_column(mut self, name: impl Into<String>, ty: impl Into<ColumnType>) -> Self {
        self.push(name, ty);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, ty: impl Into<ColumnType>) {
        let name = name.into();
        let ty = ty.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = ty,
            None => self.columns.push((name, ty)),
        }
    }

    pub fn columns(&self) -> &[(String, ColumnType)] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<N, T> FromIterator<(N, T)> for ColumnSchema
where
    N: Into<String>,
    T: Into<ColumnType>,
{
    fn from_iter<I: IntoIterator<Item = (N, T)>>(iter: I) -> Self {
        let mut schema = ColumnSchema::new();
        for (name, ty) in iter {
            schema.push(name, ty);
        }
        schema
    }
}
