//! Schema types and structures
//!
//! A [`Schema`] is an immutable, ordered list of [`Field`]s. Field order matters
//! for display but not for equality, and sibling names are unique ignoring case.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};

/// Column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Binary,
    Date,
    Timestamp,
    /// Single child named `element`
    List,
    /// Two children, `key` then `value`
    Map,
    Struct,
}

impl DataType {
    /// All type tags, in declaration order
    pub const ALL: [DataType; 12] = [
        DataType::Boolean,
        DataType::Int32,
        DataType::Int64,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
        DataType::Binary,
        DataType::Date,
        DataType::Timestamp,
        DataType::List,
        DataType::Map,
        DataType::Struct,
    ];

    /// Get the canonical tag name
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::List => "list",
            DataType::Map => "map",
            DataType::Struct => "struct",
        }
    }

    /// Whether fields of this type carry children
    pub fn is_nested(&self) -> bool {
        matches!(self, DataType::List | DataType::Map | DataType::Struct)
    }

    /// Rough encoded width of one value, used for byte estimates.
    /// Nested types are sized from their children by [`Field::estimated_width`].
    pub fn fixed_width(&self) -> u64 {
        match self {
            DataType::Boolean => 1,
            DataType::Int32 | DataType::Float32 | DataType::Date => 4,
            DataType::Int64 | DataType::Float64 | DataType::Timestamp => 8,
            DataType::String => 16,
            DataType::Binary => 32,
            DataType::List | DataType::Map | DataType::Struct => 0,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| TableError::validation(format!("unknown type tag '{}'", s)))
    }
}

impl TryFrom<String> for DataType {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

/// A single column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    /// Column name, unique among its siblings ignoring case
    pub name: String,
    /// Type tag
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Whether the column may hold nulls
    pub nullable: bool,
    /// Free-form column metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Nested fields for struct, list and map columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Field>,
}

impl Field {
    /// Create a primitive field
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Create a struct field
    pub fn new_struct(name: impl Into<String>, children: Vec<Field>, nullable: bool) -> Self {
        Self {
            children,
            ..Self::new(name, DataType::Struct, nullable)
        }
    }

    /// Create a list field; the element is renamed to `element`
    pub fn new_list(name: impl Into<String>, mut element: Field, nullable: bool) -> Self {
        element.name = "element".to_string();
        Self {
            children: vec![element],
            ..Self::new(name, DataType::List, nullable)
        }
    }

    /// Create a map field; children are renamed to `key` and `value`
    pub fn new_map(
        name: impl Into<String>,
        mut key: Field,
        mut value: Field,
        nullable: bool,
    ) -> Self {
        key.name = "key".to_string();
        value.name = "value".to_string();
        Self {
            children: vec![key, value],
            ..Self::new(name, DataType::Map, nullable)
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a direct child by name, ignoring case
    pub fn child(&self, name: &str) -> Option<&Field> {
        find_field(&self.children, name)
    }

    /// Estimated encoded width of one value of this field
    pub fn estimated_width(&self) -> u64 {
        match self.data_type {
            DataType::Struct => self.children.iter().map(Field::estimated_width).sum(),
            // Assume a handful of entries per collection value.
            DataType::List | DataType::Map => {
                4 * self.children.iter().map(Field::estimated_width).sum::<u64>()
            }
            other => other.fixed_width(),
        }
    }

    fn validate(&self, path: &str) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TableError::validation(format!("{}: field name is empty", path)));
        }
        match self.data_type {
            DataType::List if self.children.len() != 1 => {
                return Err(TableError::validation(format!(
                    "{}: list must have exactly one element field, found {}",
                    path,
                    self.children.len()
                )));
            }
            DataType::Map if self.children.len() != 2 => {
                return Err(TableError::validation(format!(
                    "{}: map must have key and value fields, found {}",
                    path,
                    self.children.len()
                )));
            }
            DataType::Struct if self.children.is_empty() => {
                return Err(TableError::validation(format!("{}: struct has no fields", path)));
            }
            t if !t.is_nested() && !self.children.is_empty() => {
                return Err(TableError::validation(format!(
                    "{}: {} field cannot have children",
                    path, t
                )));
            }
            _ => {}
        }
        validate_siblings(&self.children, path)
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}: {}", "", self.name, self.data_type, indent = depth * 2)?;
        if !self.nullable {
            f.write_str(" not null")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.metadata == other.metadata
            && same_fields(&self.children, &other.children)
    }
}

impl Eq for Field {}

/// An immutable table schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "SchemaRepr")]
pub struct Schema {
    fields: Vec<Field>,
}

#[derive(Deserialize)]
struct SchemaRepr {
    #[serde(default)]
    fields: Vec<Field>,
}

impl TryFrom<SchemaRepr> for Schema {
    type Error = TableError;

    fn try_from(repr: SchemaRepr) -> Result<Self> {
        Schema::new(repr.fields)
    }
}

impl Schema {
    /// Create a validated schema
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        validate_siblings(&fields, "")?;
        Ok(Self { fields })
    }

    /// The schema with no fields
    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    /// Parse and validate a schema from JSON (`{"fields": [...]}`)
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| TableError::validation(e.to_string()))
    }

    /// Serialize to pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a top-level field by name, ignoring case
    pub fn field(&self, name: &str) -> Option<&Field> {
        find_field(&self.fields, name)
    }

    /// Whether a top-level field exists, ignoring case
    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Top-level field names in declaration order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Estimated encoded width of one row
    pub fn estimated_row_width(&self) -> u64 {
        self.fields.iter().map(Field::estimated_width).sum()
    }

    pub(crate) fn from_validated(fields: Vec<Field>) -> Self {
        Self { fields }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        same_fields(&self.fields, &other.fields)
    }
}

impl Eq for Schema {}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            field.fmt_indented(f, 0)?;
        }
        Ok(())
    }
}

/// Case-insensitive key used to match fields across schemas
pub(crate) fn field_key(name: &str) -> String {
    name.to_lowercase()
}

fn find_field<'a>(fields: &'a [Field], name: &str) -> Option<&'a Field> {
    let key = field_key(name);
    fields.iter().find(|f| field_key(&f.name) == key)
}

/// Order-insensitive comparison of two sibling sets
fn same_fields(a: &[Field], b: &[Field]) -> bool {
    a.len() == b.len()
        && a.iter().all(|field| {
            b.iter()
                .find(|other| field_key(&other.name) == field_key(&field.name))
                .is_some_and(|other| other == field)
        })
}

fn validate_siblings(fields: &[Field], parent: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for field in fields {
        let path = if parent.is_empty() {
            field.name.clone()
        } else {
            format!("{}.{}", parent, field.name)
        };
        if !seen.insert(field_key(&field.name)) {
            return Err(TableError::validation(format!(
                "duplicate field name '{}'",
                path
            )));
        }
        field.validate(&path)?;
    }
    Ok(())
}
