//! Secret trees for structured secret files.
//!
//! Converts between nested trees, as found in JSON secret files, and flat
//! maps keyed by `/`-joined paths, as pushed to parameter stores.

pub mod path;
pub mod tree;

pub use path::{SecretPath, SEPARATOR};
pub use tree::{
    expand, flatten, FlatTree, Leaf, LeafKind, SecretTree, SecretsManagerParameter, SsmParameter,
    SsmParameterType, KIND_FIELD,
};
