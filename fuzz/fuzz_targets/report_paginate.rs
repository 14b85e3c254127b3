#![no_main]

use goalboard_engine::{paginate, ChunkLimits, RenderedReport};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let ceiling = 64 + usize::from(data[0]) * 16;
    let safety_margin = ceiling.saturating_sub(usize::from(data[1]));
    let body = String::from_utf8_lossy(&data[2..]);
    let rows = body
        .split('\n')
        .filter(|row| !row.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    let report = RenderedReport {
        title: "🎯 GOALBOARD — Fuzz".to_string(),
        header: "🎯 GOALBOARD — Fuzz\n💰 Shift Total: $0.00".to_string(),
        table_head: ["Page".to_string(), "----".to_string()],
        rows: rows.clone(),
    };
    let limits = ChunkLimits {
        ceiling,
        safety_margin,
    };
    let pages = paginate(&report, limits);
    assert!(!pages.is_empty());
    for page in &pages {
        assert!(page.text.chars().count() <= ceiling);
    }
    let carried = pages
        .iter()
        .flat_map(|page| page.rows.iter().cloned())
        .collect::<Vec<_>>();
    assert_eq!(carried, rows);
});
