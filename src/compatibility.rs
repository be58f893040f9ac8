//! Schema compatibility checking
//!
//! Computes structural differences between schemas, classifies them as
//! compatible or breaking, and merges schemas under the type promotion lattice.
//!
//! ## Promotion lattice
//!
//! ```text
//! boolean   -> string
//! int32     -> int64, float64, string
//! int64     -> float64, string
//! float32   -> float64, string
//! date      -> timestamp, string
//! timestamp -> string
//! ```
//!
//! Every type also widens to itself. Any other type change is breaking.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};

use crate::error::{Result, TableError};
use crate::schema::{field_key, DataType, Field, Schema};

/// A field reported as added or removed, with its dotted path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffField {
    pub path: String,
    pub field: Field,
}

/// A field present in both schemas whose definition changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldModification {
    pub path: String,
    pub old_type: DataType,
    pub new_type: DataType,
    pub old_nullable: bool,
    pub new_nullable: bool,
    /// Only column metadata differs
    #[serde(default)]
    pub metadata_changed: bool,
}

impl FieldModification {
    /// Whether the type moved along the promotion lattice
    pub fn is_widening(&self) -> bool {
        self.old_type != self.new_type && widens_to(self.old_type, self.new_type)
    }
}

/// Result of comparing an old schema with a new one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub added_fields: Vec<DiffField>,
    pub removed_fields: Vec<DiffField>,
    pub modified_fields: Vec<FieldModification>,
    /// Paths of fields identical in both schemas
    pub unchanged_fields: Vec<String>,
    /// Human-readable description of every breaking change
    pub compatibility_issues: Vec<String>,
    pub is_backward_compatible: bool,
}

impl SchemaDiff {
    /// Returns true if the schemas describe the same columns
    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.modified_fields.is_empty()
            && self.compatibility_issues.is_empty()
    }

    /// Total number of added, removed and modified fields
    pub fn change_count(&self) -> usize {
        self.added_fields.len() + self.removed_fields.len() + self.modified_fields.len()
    }

    /// One-line summary, in the style of a compatibility report
    pub fn summary(&self) -> String {
        if self.is_empty() {
            "No changes detected".to_string()
        } else if self.is_backward_compatible {
            format!("{} compatible changes detected", self.change_count())
        } else {
            format!("{} breaking changes detected", self.compatibility_issues.len())
        }
    }
}

/// Whether values of `from` can be read as `to` without loss
pub fn widens_to(from: DataType, to: DataType) -> bool {
    use DataType::*;
    from == to
        || matches!(
            (from, to),
            (Boolean, String)
                | (Int32, Int64 | Float64 | String)
                | (Int64, Float64 | String)
                | (Float32, Float64 | String)
                | (Date, Timestamp | String)
                | (Timestamp, String)
        )
}

/// Order used by [`merge`]: the promotion lattice plus `float64 -> string`.
///
/// With that edge every pair of primitive types other than `binary` has a
/// least upper bound, so merging is associative. [`diff`] keeps the narrower
/// [`widens_to`].
fn merges_into(from: DataType, to: DataType) -> bool {
    widens_to(from, to) || (from == DataType::Float64 && to == DataType::String)
}

/// Least upper bound of two types in the merge order, if any
pub fn promote(a: DataType, b: DataType) -> Option<DataType> {
    let bounds: Vec<DataType> = DataType::ALL
        .iter()
        .copied()
        .filter(|t| merges_into(a, *t) && merges_into(b, *t))
        .collect();
    bounds
        .iter()
        .copied()
        .find(|t| bounds.iter().all(|u| merges_into(*t, *u)))
}

/// Compare two schemas. Added fields are never breaking; removed fields,
/// non-widening type changes and nullable-to-required changes always are.
pub fn diff(old: &Schema, new: &Schema) -> SchemaDiff {
    let mut result = SchemaDiff::default();
    diff_fields(old.fields(), new.fields(), "", &mut result);
    result.is_backward_compatible = result.compatibility_issues.is_empty();
    result
}

/// Whether `new` can replace `old` without breaking readers or data
pub fn is_compatible(old: &Schema, new: &Schema) -> bool {
    diff(old, new).is_backward_compatible
}

/// Union of two schemas.
///
/// Shared fields take the promoted type and the looser nullability; fields
/// found on one side only become nullable. Fields of `a` come first.
pub fn merge(a: &Schema, b: &Schema) -> Result<Schema> {
    let fields = merge_fields(a.fields(), b.fields(), "")?;
    Schema::new(fields)
}

/// Unified line diff of the two schema renderings
pub fn render_text_diff(old: &Schema, new: &Schema) -> String {
    let old_text = old.to_string();
    let new_text = new.to_string();
    let text_diff = TextDiff::from_lines(&old_text, &new_text);

    let mut out = String::new();
    for change in text_diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        out.push(sign);
        out.push_str(change.value());
        if change.missing_newline() {
            out.push('\n');
        }
    }
    out
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn push_issue(result: &mut SchemaDiff, prefix: &str, path: &str, message: String) {
    if prefix.is_empty() {
        result.compatibility_issues.push(message);
    } else {
        result.compatibility_issues.push(format!("{}: {}", path, message));
    }
}

fn index_by_key(fields: &[Field]) -> HashMap<String, &Field> {
    fields.iter().map(|f| (field_key(&f.name), f)).collect()
}

fn diff_fields(old: &[Field], new: &[Field], prefix: &str, result: &mut SchemaDiff) {
    let new_by_key = index_by_key(new);
    let old_by_key = index_by_key(old);

    for old_field in old {
        let path = join_path(prefix, &old_field.name);
        match new_by_key.get(&field_key(&old_field.name)) {
            None => {
                push_issue(
                    result,
                    prefix,
                    &path,
                    format!("Field '{}' was removed", old_field.name),
                );
                result.removed_fields.push(DiffField {
                    path,
                    field: old_field.clone(),
                });
            }
            Some(new_field) => diff_field(old_field, new_field, prefix, path, result),
        }
    }

    for new_field in new {
        if !old_by_key.contains_key(&field_key(&new_field.name)) {
            result.added_fields.push(DiffField {
                path: join_path(prefix, &new_field.name),
                field: new_field.clone(),
            });
        }
    }
}

fn diff_field(old: &Field, new: &Field, prefix: &str, path: String, result: &mut SchemaDiff) {
    let type_changed = old.data_type != new.data_type;
    let nullability_changed = old.nullable != new.nullable;
    let metadata_changed = old.metadata != new.metadata;

    if type_changed && !widens_to(old.data_type, new.data_type) {
        push_issue(
            result,
            prefix,
            &path,
            format!(
                "Field '{}' type changed from {} to {}, which is not a widening promotion",
                old.name, old.data_type, new.data_type
            ),
        );
    }
    if old.nullable && !new.nullable {
        push_issue(
            result,
            prefix,
            &path,
            format!("Field '{}' changed from nullable to non-nullable", old.name),
        );
    }

    if type_changed || nullability_changed || metadata_changed {
        result.modified_fields.push(FieldModification {
            path: path.clone(),
            old_type: old.data_type,
            new_type: new.data_type,
            old_nullable: old.nullable,
            new_nullable: new.nullable,
            metadata_changed: metadata_changed && !type_changed && !nullability_changed,
        });
    } else if old == new {
        result.unchanged_fields.push(path.clone());
    }

    if !type_changed && old.data_type.is_nested() {
        diff_fields(&old.children, &new.children, &path, result);
    }
}

fn forced_nullable(field: &Field) -> Field {
    Field {
        nullable: true,
        ..field.clone()
    }
}

fn merge_fields(a: &[Field], b: &[Field], prefix: &str) -> Result<Vec<Field>> {
    let a_by_key = index_by_key(a);
    let b_by_key = index_by_key(b);

    let mut merged = Vec::with_capacity(a.len() + b.len());
    for field_a in a {
        match b_by_key.get(&field_key(&field_a.name)) {
            Some(field_b) => merged.push(merge_field(field_a, field_b, prefix)?),
            None => merged.push(forced_nullable(field_a)),
        }
    }
    for field_b in b {
        if !a_by_key.contains_key(&field_key(&field_b.name)) {
            merged.push(forced_nullable(field_b));
        }
    }
    Ok(merged)
}

fn merge_field(a: &Field, b: &Field, prefix: &str) -> Result<Field> {
    let path = join_path(prefix, &a.name);
    let data_type = promote(a.data_type, b.data_type).ok_or_else(|| TableError::SchemaIncompatible {
        issues: vec![format!(
            "Field '{}' has incompatible types {} and {}",
            path, a.data_type, b.data_type
        )],
    })?;

    let children = if data_type.is_nested() {
        merge_fields(&a.children, &b.children, &path)?
    } else {
        Vec::new()
    };

    let mut metadata: BTreeMap<String, String> = b.metadata.clone();
    metadata.extend(a.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(Field {
        name: a.name.clone(),
        data_type,
        nullable: a.nullable || b.nullable,
        metadata,
        children,
    })
}
