//! Nested secret trees and their path-keyed flat form.
//!
//! A tree node is either a leaf or a branch of named children. Leaves are
//! scalars or typed parameter objects tagged with an explicit `kind`:
//!
//! ```json
//! {
//!   "db": {
//!     "host": "localhost",
//!     "password": { "kind": "ssmParameter", "type": "SecureString", "value": "pw" }
//!   }
//! }
//! ```
//!
//! flattens to `{"db/host": "localhost", "db/password": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::path::{check_segment, SecretPath};
use secenv_common::{Error, Result};

/// Name of the discriminant field of typed leaves.
pub const KIND_FIELD: &str = "kind";

/// Discriminant of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    Literal,
    SsmParameter,
    SecretsManagerParameter,
}

impl LeafKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeafKind::Literal => "literal",
            LeafKind::SsmParameter => "ssmParameter",
            LeafKind::SecretsManagerParameter => "secretsManagerParameter",
        }
    }

    fn parse(kind: &str) -> Result<Self> {
        match kind {
            "literal" => Ok(LeafKind::Literal),
            "ssmParameter" => Ok(LeafKind::SsmParameter),
            "secretsManagerParameter" => Ok(LeafKind::SecretsManagerParameter),
            other => Err(Error::InvalidInput(format!("Unknown leaf kind '{}'", other))),
        }
    }
}

/// Storage type of an SSM parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SsmParameterType {
    #[default]
    String,
    StringList,
    SecureString,
}

/// A value stored as an SSM parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsmParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_value: Option<String>,
    #[serde(rename = "type", default)]
    pub parameter_type: SsmParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Region override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Encryption key for `SecureString` parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// A value stored as a Secrets Manager secret.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsManagerParameter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

/// A terminal value of a secret tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// Any JSON value stored as is.
    Literal(Value),
    SsmParameter(SsmParameter),
    SecretsManagerParameter(SecretsManagerParameter),
}

impl Leaf {
    /// String literal shorthand.
    pub fn literal(value: impl Into<String>) -> Self {
        Leaf::Literal(Value::String(value.into()))
    }

    pub fn kind(&self) -> LeafKind {
        match self {
            Leaf::Literal(_) => LeafKind::Literal,
            Leaf::SsmParameter(_) => LeafKind::SsmParameter,
            Leaf::SecretsManagerParameter(_) => LeafKind::SecretsManagerParameter,
        }
    }

    /// Plaintext value, if the leaf carries one as a string.
    pub fn value(&self) -> Option<&str> {
        match self {
            Leaf::Literal(value) => value.as_str(),
            Leaf::SsmParameter(p) => p.value.as_deref(),
            Leaf::SecretsManagerParameter(p) => p.value.as_deref(),
        }
    }

    /// Parse a leaf from JSON.
    ///
    /// # Errors
    /// - `InvalidInput` for an object without a known `kind`, or a typed
    ///   leaf carrying neither `value` nor `encryptedValue`
    pub fn from_value(value: Value) -> Result<Self> {
        let mut object = match value {
            Value::Object(object) => object,
            scalar => return Ok(Leaf::Literal(scalar)),
        };

        let kind = match object.remove(KIND_FIELD) {
            Some(Value::String(kind)) => LeafKind::parse(&kind)?,
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Object leaf requires a string '{}' field",
                    KIND_FIELD
                )))
            }
        };

        let leaf = match kind {
            LeafKind::Literal => Leaf::Literal(
                object
                    .remove("value")
                    .ok_or_else(|| Error::InvalidInput("Literal leaf has no value".to_string()))?,
            ),
            LeafKind::SsmParameter => {
                let parameter: SsmParameter = serde_json::from_value(Value::Object(object))?;
                require_value(
                    kind,
                    parameter.value.is_some() || parameter.encrypted_value.is_some(),
                )?;
                Leaf::SsmParameter(parameter)
            }
            LeafKind::SecretsManagerParameter => {
                let parameter: SecretsManagerParameter =
                    serde_json::from_value(Value::Object(object))?;
                require_value(
                    kind,
                    parameter.value.is_some() || parameter.encrypted_value.is_some(),
                )?;
                Leaf::SecretsManagerParameter(parameter)
            }
        };
        Ok(leaf)
    }

    /// Convert to JSON. Object literals keep an explicit `kind` so they
    /// are not read back as branches.
    pub fn to_value(&self) -> Result<Value> {
        let mut object = match self {
            Leaf::Literal(Value::Object(inner)) => {
                let mut object = Map::new();
                object.insert("value".to_string(), Value::Object(inner.clone()));
                object
            }
            Leaf::Literal(scalar) => return Ok(scalar.clone()),
            Leaf::SsmParameter(p) => into_object(serde_json::to_value(p)?)?,
            Leaf::SecretsManagerParameter(p) => into_object(serde_json::to_value(p)?)?,
        };
        object.insert(
            KIND_FIELD.to_string(),
            Value::String(self.kind().as_str().to_string()),
        );
        Ok(Value::Object(object))
    }
}

fn require_value(kind: LeafKind, present: bool) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{} leaf needs 'value' or 'encryptedValue'",
            kind.as_str()
        )))
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(Error::Serialization(
            "Typed leaf did not serialize to an object".to_string(),
        )),
    }
}

/// Flat form of a tree: leaves keyed by `/`-joined paths.
pub type FlatTree = BTreeMap<String, Leaf>;

/// A nested secret tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SecretTree {
    Leaf(Leaf),
    Branch(BTreeMap<String, SecretTree>),
}

impl Default for SecretTree {
    fn default() -> Self {
        SecretTree::Branch(BTreeMap::new())
    }
}

impl SecretTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a tree from JSON.
    ///
    /// Non-object values are literal leaves, objects with a `kind` string
    /// are typed leaves, and any other object is a branch.
    ///
    /// # Errors
    /// - `InvalidInput` for an unknown `kind` or an incomplete typed leaf
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(object) if matches!(object.get(KIND_FIELD), Some(Value::String(_))) => {
                Ok(SecretTree::Leaf(Leaf::from_value(Value::Object(object))?))
            }
            Value::Object(object) => {
                let mut children = BTreeMap::new();
                for (name, child) in object {
                    let child = SecretTree::from_value(child)
                        .map_err(|e| Error::InvalidInput(format!("at '{}': {}", name, e)))?;
                    children.insert(name, child);
                }
                Ok(SecretTree::Branch(children))
            }
            scalar => Ok(SecretTree::Leaf(Leaf::Literal(scalar))),
        }
    }

    /// Convert to JSON.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            SecretTree::Leaf(leaf) => leaf.to_value(),
            SecretTree::Branch(children) => {
                let mut object = Map::new();
                for (name, child) in children {
                    object.insert(name.clone(), child.to_value()?);
                }
                Ok(Value::Object(object))
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, SecretTree::Leaf(_))
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            SecretTree::Leaf(_) => 1,
            SecretTree::Branch(children) => children.values().map(SecretTree::leaf_count).sum(),
        }
    }

    /// Node at `path`.
    pub fn get(&self, path: &SecretPath) -> Option<&SecretTree> {
        let mut current = self;
        for segment in path.segments() {
            match current {
                SecretTree::Branch(children) => current = children.get(segment)?,
                SecretTree::Leaf(_) => return None,
            }
        }
        Some(current)
    }

    /// Insert a leaf, creating intermediate branches.
    ///
    /// # Errors
    /// - `AlreadyExists` if a node is already at `path`
    /// - `InvalidInput` if a leaf lies on the way to `path`
    pub fn insert(&mut self, path: &SecretPath, leaf: Leaf) -> Result<()> {
        let Some((last, parents)) = path.segments().split_last() else {
            return match self {
                SecretTree::Branch(children) if children.is_empty() => {
                    *self = SecretTree::Leaf(leaf);
                    Ok(())
                }
                _ => Err(Error::AlreadyExists(
                    "Root already holds secrets".to_string(),
                )),
            };
        };

        let mut current = self;
        for (depth, segment) in parents.iter().enumerate() {
            current = match current {
                SecretTree::Branch(children) => children.entry(segment.clone()).or_default(),
                SecretTree::Leaf(_) => return Err(leaf_in_the_way(&parents[..depth], path)),
            };
        }

        match current {
            SecretTree::Branch(children) => {
                if children.contains_key(last) {
                    return Err(Error::AlreadyExists(format!("'{}' already exists", path)));
                }
                children.insert(last.clone(), SecretTree::Leaf(leaf));
                Ok(())
            }
            SecretTree::Leaf(_) => Err(leaf_in_the_way(parents, path)),
        }
    }

    /// Flatten into leaves keyed by `/`-joined paths.
    ///
    /// Empty branches have no leaves and leave no trace.
    pub fn flatten(&self) -> FlatTree {
        let mut flat = FlatTree::new();
        self.flatten_into(String::new(), &mut flat);
        flat
    }

    fn flatten_into(&self, prefix: String, flat: &mut FlatTree) {
        match self {
            SecretTree::Leaf(leaf) => {
                flat.insert(prefix, leaf.clone());
            }
            SecretTree::Branch(children) => {
                for (name, child) in children {
                    let key = if prefix.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", prefix, name)
                    };
                    child.flatten_into(key, flat);
                }
            }
        }
    }

    /// Rebuild a tree from its flat form.
    ///
    /// # Errors
    /// - `InvalidInput` for malformed keys, or a key naming a leaf that is
    ///   also a prefix of another key
    pub fn expand(flat: &FlatTree) -> Result<Self> {
        let mut tree = SecretTree::new();
        for (key, leaf) in flat {
            let path = SecretPath::parse(key)?;
            tree.insert(&path, leaf.clone())?;
        }
        Ok(tree)
    }

    /// Check that the tree survives a flatten/expand cycle unchanged.
    ///
    /// # Errors
    /// - `InvalidInput` for empty nested branches or bad segment names
    pub fn validate(&self) -> Result<()> {
        self.validate_at(&SecretPath::root())
    }

    fn validate_at(&self, path: &SecretPath) -> Result<()> {
        match self {
            SecretTree::Leaf(_) => Ok(()),
            SecretTree::Branch(children) => {
                if children.is_empty() && !path.is_root() {
                    return Err(Error::InvalidInput(format!("Empty branch at '{}'", path)));
                }
                for (name, child) in children {
                    check_segment(name)
                        .map_err(|e| Error::InvalidInput(format!("under '{}': {}", path, e)))?;
                    child.validate_at(&path.join(name)?)?;
                }
                Ok(())
            }
        }
    }
}

fn leaf_in_the_way(at: &[String], path: &SecretPath) -> Error {
    Error::InvalidInput(format!(
        "'{}' is a leaf and cannot hold '{}'",
        at.join("/"),
        path
    ))
}

/// Flatten a tree. See [`SecretTree::flatten`].
pub fn flatten(tree: &SecretTree) -> FlatTree {
    tree.flatten()
}

/// Expand a flat tree. See [`SecretTree::expand`].
pub fn expand(flat: &FlatTree) -> Result<SecretTree> {
    SecretTree::expand(flat)
}
