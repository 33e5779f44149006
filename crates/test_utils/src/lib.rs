use common::config::loader::PROJECT_FILE;
use common::config::MappingDefinition;
use common::types::record_from;
use common::Record;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Global mutex to serialize tests that modify the process working directory.
/// Changing the directory concurrently can lead to nondeterministic failures.
pub static TEST_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Temporarily change the current working directory for the duration of the closure.
/// Guards against concurrent `chdir` calls by taking the global `TEST_MUTEX` lock.
/// Always restores the original directory, even if the closure panics.
pub fn with_chdir<F, T>(target: impl AsRef<Path>, f: F) -> std::io::Result<T>
where
    F: FnOnce() -> T,
{
    let _lock = TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let original = env::current_dir()?;
    env::set_current_dir(target.as_ref())?;

    struct Reset(PathBuf);
    impl Drop for Reset {
        fn drop(&mut self) {
            let _ = env::set_current_dir(&self.0);
        }
    }
    let _guard = Reset(original);

    Ok(f())
}

/// Rows shaped like the legacy `Artikel_Stamm` export.
pub fn legacy_products() -> Vec<Record> {
    vec![
        record_from(json!({"Nummer": "10001", "Bezeichnung": " Schraube M4 ", "Preis": "0,15", "Lager": 120})),
        record_from(json!({"Nummer": "10002", "Bezeichnung": "Mutter M4", "Preis": "0,05", "Lager": 300})),
        record_from(json!({"Nummer": "10003", "Bezeichnung": "Unterlegscheibe", "Preis": "0,02", "Lager": 0})),
    ]
}

/// `mapping_config` for [`legacy_products`].
pub fn product_mapping_config() -> Value {
    json!({
        "transformer": "field_mapping",
        "extractor": "static",
        "field_mappings": {
            "legacy_id": "Nummer",
            "name": "Bezeichnung",
            "price": "Preis"
        },
        "custom_transformers": [
            {"field": "name", "transform": "trim"},
            {"field": "price", "transform": "to_float"}
        ],
        "validation_rules": [
            {"field": "name", "check": "required"},
            {"field": "price", "check": "greater_than", "value": 0}
        ],
        "incremental": {
            "timestamp_filter_format": [["modified_date", ">", "{{ datetime }}"]]
        }
    })
}

/// A product mapping reading the JSON export at `data_path`.
pub fn product_mapping(data_path: &Path) -> MappingDefinition {
    MappingDefinition {
        name: "products".into(),
        entity_type: "product".into(),
        source: "legacy_erp".into(),
        target: "pyerp".into(),
        source_config: json!({"path": data_path, "table": "Artikel_Stamm", "key_field": "Nummer"}),
        target_config: json!({"model": "products.models.Product", "unique_field": "legacy_id"}),
        mapping_config: serde_json::from_value(product_mapping_config())
            .unwrap_or_default(),
        active: true,
    }
}

/// A throwaway sync project on disk: `sync-project.yml`, a `mappings/`
/// directory with a products mapping and the products JSON export.
pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        fs::create_dir_all(root.join("mappings"))?;
        fs::create_dir_all(root.join("data"))?;
        fs::write(
            root.join(PROJECT_FILE),
            r#"
name: pyerp-test
state_path: .sync/state.json
store_path: .sync/store.json
mappings_dir: mappings
defaults:
  batch_size: 2
models:
  - name: Customer
    fields:
      - { name: legacy_id, required: true, unique: true }
      - { name: name, required: true }
  - name: Product
    fields:
      - { name: legacy_id, required: true, unique: true }
      - { name: name, required: true }
      - { name: price }
"#,
        )?;
        let project = Self { dir };
        project.write_data("products.json", &legacy_products())?;
        project.write_mapping(
            "products.yml",
            &format!(
                r#"
name: products
entity_type: product
source: legacy_erp
target: pyerp
source_config:
  path: data/products.json
target_config:
  model: products.models.Product
mapping_config: {}
"#,
                product_mapping_config()
            ),
        )?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_path(&self, name: &str) -> PathBuf {
        self.root().join("data").join(name)
    }

    pub fn write_data(&self, name: &str, rows: &[Record]) -> std::io::Result<PathBuf> {
        let path = self.data_path(name);
        let rows: Vec<Value> = rows.iter().cloned().map(Value::Object).collect();
        fs::write(&path, Value::Array(rows).to_string())?;
        Ok(path)
    }

    pub fn write_mapping(&self, file: &str, yaml: &str) -> std::io::Result<PathBuf> {
        let path = self.root().join("mappings").join(file);
        fs::write(&path, yaml)?;
        Ok(path)
    }
}
