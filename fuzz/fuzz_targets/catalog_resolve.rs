#![no_main]

use std::sync::OnceLock;

use goalboard_engine::{PageCatalog, ResolveMode};
use libfuzzer_sys::fuzz_target;

static CATALOG: OnceLock<PageCatalog> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let catalog = CATALOG.get_or_init(|| PageCatalog::builtin().expect("builtin catalog"));
    let raw = String::from_utf8_lossy(data);
    if let Some(page) = catalog.resolve(&raw, ResolveMode::Strict) {
        assert_eq!(catalog.resolve(page.as_str(), ResolveMode::Strict), Some(page));
    }
    if let Some(page) = catalog.resolve(&raw, ResolveMode::Lenient) {
        assert!(!page.as_str().trim().is_empty());
    }
});
