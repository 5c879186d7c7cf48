// src/catalog.rs

//! The selectable configuration options (libraries and examples).

use serde::Deserialize;
use tracing::debug;

use crate::types::OptionMenu;

/// One selectable option, as declared by an `[[option]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogOption {
    /// Configuration key without the `CONFIG_` prefix, e.g. `LIB_TWAI`.
    pub id: String,
    pub name: String,
    pub menu: OptionMenu,
    /// For examples: the library ids it can be built against. Empty means any.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

pub trait OptionCatalog: Send + Sync {
    fn options(&self) -> &[CatalogOption];

    fn get(&self, id: &str) -> Option<&CatalogOption> {
        self.options().iter().find(|o| o.id == id)
    }

    fn dependencies(&self, id: &str) -> &[String] {
        self.get(id).map(|o| o.depends_on.as_slice()).unwrap_or(&[])
    }

    fn in_menu(&self, menu: OptionMenu) -> Vec<&CatalogOption> {
        self.options().iter().filter(|o| o.menu == menu).collect()
    }

    fn ids(&self) -> Vec<String> {
        self.options().iter().map(|o| o.id.clone()).collect()
    }
}

/// Catalog loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    options: Vec<CatalogOption>,
}

impl StaticCatalog {
    pub fn new(options: Vec<CatalogOption>) -> Self {
        Self { options }
    }
}

impl OptionCatalog for StaticCatalog {
    fn options(&self) -> &[CatalogOption] {
        &self.options
    }
}

/// Whether `example` can be built against `library`.
///
/// Both ids must name options in the right menu. An example without
/// dependencies accepts any library.
pub fn check_dependencies(catalog: &dyn OptionCatalog, library: &str, example: &str) -> bool {
    let lib = catalog.get(library).filter(|o| o.menu == OptionMenu::Library);
    let ex = catalog.get(example).filter(|o| o.menu == OptionMenu::Example);

    let (Some(lib), Some(ex)) = (lib, ex) else {
        debug!(library, example, "library or example not in catalog");
        return false;
    };

    if ex.depends_on.is_empty() {
        return true;
    }

    let ok = ex.depends_on.iter().any(|d| *d == lib.id);
    debug!(library, example, depends_on = ?ex.depends_on, ok, "dependency check");
    ok
}
