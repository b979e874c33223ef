use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize, Default)]
struct OwnedProductsDocument {
    #[serde(rename = "iapProducts", default)]
    iap_products: Vec<String>,
}

/// JSON file holding the ids of redeemed non-consumable products.
///
/// Every save rewrites the primary file and then copies it to `<path>.bak`. Loading
/// falls back from the primary file to the backup, then to an empty list.
#[derive(Debug, Clone)]
pub struct OwnedProductsFile {
    path: PathBuf,
    backup_path: PathBuf,
}

impl OwnedProductsFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut backup = path.clone().into_os_string();
        backup.push(".bak");
        Self {
            path,
            backup_path: PathBuf::from(backup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    fn read(path: &Path) -> Option<Vec<String>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "owned products file unreadable");
                return None;
            }
        };
        match serde_json::from_slice::<OwnedProductsDocument>(&bytes) {
            Ok(document) => Some(document.iap_products),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "owned products file is malformed");
                None
            }
        }
    }

    /// Never fails; an unreadable store is treated as owning nothing.
    pub fn load(&self) -> Vec<String> {
        if let Some(products) = Self::read(&self.path) {
            return products;
        }
        if let Some(products) = Self::read(&self.backup_path) {
            warn!(path = %self.backup_path.display(), "loaded owned products from backup");
            return products;
        }
        Vec::new()
    }

    pub fn save(&self, products: &[String]) -> Result<()> {
        let document = OwnedProductsDocument {
            iap_products: products.to_vec(),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&document)?)?;

        // The backup is best effort; the primary write already succeeded.
        if let Err(err) = fs::copy(&self.path, &self.backup_path) {
            warn!(path = %self.backup_path.display(), error = %err, "owned products backup failed");
        }
        Ok(())
    }
}
