use serde::{Deserialize, Serialize};

/// One field of a target model declared in `sync-project.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelField {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
}

/// A target model for the built-in entity store.
///
/// `id`, `created_at` and `updated_at` are managed by the store and need not
/// be listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDeclaration {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<ModelField>,
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,
}
