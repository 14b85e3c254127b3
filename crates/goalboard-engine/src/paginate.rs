//! Splits a rendered report into transport-sized message parts.

use crate::render::RenderedReport;

/// Hard per-message ceiling of the Telegram Bot API, in characters.
pub const TELEGRAM_MAX_CHARS: usize = 4096;
pub const DEFAULT_SAFETY_MARGIN: usize = 3900;
pub const EMPTY_REPORT_NOTICE: &str = "No pages found for this team yet.";

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Messages longer than this are never emitted.
    pub ceiling: usize,
    /// Greedy packing stops before a part reaches this length.
    pub safety_margin: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            ceiling: TELEGRAM_MAX_CHARS,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        }
    }
}

impl ChunkLimits {
    fn margin(&self) -> usize {
        self.safety_margin.min(self.ceiling)
    }
}

/// One self-contained outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPage {
    pub part: usize,
    pub parts: usize,
    /// Data rows carried by this part, in report order.
    pub rows: Vec<String>,
    pub text: String,
    /// Table is wrapped in a Markdown code fence.
    pub fenced: bool,
}

/// Packs rows greedily into parts without ever splitting a row.
///
/// The whole report goes out as one part when it fits under the ceiling.
/// Otherwise the first part keeps the full header and later parts use a
/// `Part i/N` title. A part that still overflows the ceiling is sent as
/// plain text cut to the ceiling.
pub fn paginate(report: &RenderedReport, limits: ChunkLimits) -> Vec<ReportPage> {
    if report.rows.is_empty() {
        let text = truncate_chars(
            &format!("{}\n\n{EMPTY_REPORT_NOTICE}", report.header),
            limits.ceiling,
        );
        return vec![ReportPage {
            part: 1,
            parts: 1,
            rows: Vec::new(),
            text,
            fenced: false,
        }];
    }

    let single = fenced_message(&report.header, &report.table_head, &report.rows);
    if char_len(&single) <= limits.ceiling {
        return vec![ReportPage {
            part: 1,
            parts: 1,
            rows: report.rows.clone(),
            text: single,
            fenced: true,
        }];
    }

    let groups = pack_rows(report, limits.margin());
    let parts = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(index, rows)| {
            let part = index + 1;
            let prefix = if part == 1 {
                report.header.clone()
            } else {
                part_title(&report.title, part, parts)
            };
            let fenced = fenced_message(&prefix, &report.table_head, &rows);
            if char_len(&fenced) <= limits.ceiling {
                ReportPage {
                    part,
                    parts,
                    rows,
                    text: fenced,
                    fenced: true,
                }
            } else {
                let plain = plain_message(&prefix, &report.table_head, &rows);
                ReportPage {
                    part,
                    parts,
                    rows,
                    text: truncate_chars(&plain, limits.ceiling),
                    fenced: false,
                }
            }
        })
        .collect()
}

fn pack_rows(report: &RenderedReport, margin: usize) -> Vec<Vec<String>> {
    // Worst-case part numbers so the title estimate never undercounts.
    let digits = report.rows.len().to_string().len();
    let placeholder = "9".repeat(digits);
    let continuation_title = format!("{} (Part {placeholder}/{placeholder})", report.title);
    let first_overhead = char_len(&fenced_message(&report.header, &report.table_head, &[]));
    let continuation_overhead =
        char_len(&fenced_message(&continuation_title, &report.table_head, &[]));

    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = first_overhead;
    for row in &report.rows {
        let row_len = char_len(row) + 1;
        if !current.is_empty() && current_len + row_len > margin {
            groups.push(std::mem::take(&mut current));
            current_len = continuation_overhead;
        }
        current.push(row.clone());
        current_len += row_len;
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn part_title(title: &str, part: usize, parts: usize) -> String {
    format!("{title} (Part {part}/{parts})")
}

fn fenced_message(prefix: &str, table_head: &[String; 2], rows: &[String]) -> String {
    let mut body = table_head.to_vec();
    body.extend(rows.iter().cloned());
    format!("{prefix}\n\n{FENCE}\n{}\n{FENCE}", body.join("\n"))
}

fn plain_message(prefix: &str, table_head: &[String; 2], rows: &[String]) -> String {
    let mut body = table_head.to_vec();
    body.extend(rows.iter().cloned());
    format!("{prefix}\n\n{}", body.join("\n"))
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
