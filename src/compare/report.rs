use std::fmt::Write as _;

use super::diff::{CompareOptions, DiffKind, Mark, WordDiff, WordStats};

pub const SUMMARY_FILE: &str = "summary_report.html";
const MAX_DIFF_ROWS: usize = 100;

const STYLE: &str = r#"
body { font-family: Georgia, serif; margin: 20px; background: #f5f5f5; line-height: 1.6; }
.container { max-width: 1400px; margin: 0 auto; }
h1 { color: #333; text-align: center; }
.panel { background: white; padding: 20px; margin: 15px 0; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
.panel h2 { margin-top: 0; color: #444; border-bottom: 2px solid #007acc; padding-bottom: 10px; }
.text { line-height: 2; font-size: 16px; white-space: pre-wrap; }
.error { background: #fff3cd; border-bottom: 2px solid #ffc107; cursor: help; }
.deleted { background: #f8d7da; text-decoration: line-through; color: #721c24; }
.inserted { background: #d4edda; color: #155724; }
.stats { display: grid; grid-template-columns: repeat(auto-fit, minmax(140px, 1fr)); gap: 15px; }
.stat-box { background: #667eea; color: white; padding: 20px; border-radius: 8px; text-align: center; }
.stat-box.good { background: #11998e; }
.stat-box.warn { background: #f5576c; }
.stat-box .value { font-size: 28px; font-weight: bold; }
.stat-box .label { font-size: 12px; opacity: 0.9; text-transform: uppercase; }
table { width: 100%; border-collapse: collapse; }
th, td { padding: 8px 12px; text-align: left; border-bottom: 1px solid #ddd; }
th { background: #f8f9fa; }
tr.similar td { background: #fff3cd; }
tr.replaced td { background: #ffe6e6; }
tr.deleted td { background: #f8d7da; }
tr.inserted td { background: #d4edda; }
td.good { color: #155724; font-weight: bold; }
td.warn { color: #856404; font-weight: bold; }
td.bad { color: #721c24; font-weight: bold; }
.image-preview { max-width: 100%; max-height: 400px; border: 1px solid #ddd; }
.side-by-side { display: grid; grid-template-columns: 1fr 1fr; gap: 20px; }
@media (max-width: 900px) { .side-by-side { grid-template-columns: 1fr; } }
.nav { text-align: center; margin: 20px 0; }
.meta { text-align: center; color: #888; font-size: 12px; margin-top: 30px; }
"#;

/// One compared item, as listed in the summary.
pub struct ItemReport<'a> {
    pub item_name: &'a str,
    pub comparison_file: &'a str,
    pub stats: &'a WordStats,
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_marks(marks: &[Mark], counterpart_label: &str) -> String {
    marks
        .iter()
        .map(|m| match m {
            Mark::Plain(w) => escape(w),
            Mark::Error { word, counterpart } => format!(
                r#"<span class="error" title="{}: {}">{}</span>"#,
                counterpart_label,
                escape(counterpart),
                escape(word)
            ),
            Mark::Deleted(w) => format!(r#"<span class="deleted">{}</span>"#, escape(w)),
            Mark::Inserted(w) => format!(r#"<span class="inserted">{}</span>"#, escape(w)),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn stat_box(value: &str, label: &str, class: &str) -> String {
    format!(
        r#"<div class="stat-box {}"><div class="value">{}</div><div class="label">{}</div></div>"#,
        class, value, label
    )
}

fn accuracy_class(accuracy: f64) -> &'static str {
    if accuracy >= 80.0 {
        "good"
    } else if accuracy >= 50.0 {
        "warn"
    } else {
        "bad"
    }
}

/// HTML page comparing one transcription with its OCR output.
pub fn item_page(
    item_name: &str,
    image_file: &str,
    diff: &WordDiff,
    options: &CompareOptions,
) -> String {
    let stats = &diff.stats;
    let accuracy = stats.accuracy();

    let mut rows = String::new();
    for (i, d) in diff.differences.iter().take(MAX_DIFF_ROWS).enumerate() {
        let (class, src, ocr) = match d.kind {
            DiffKind::Similar => ("similar", escape(&d.source), escape(&d.ocr)),
            DiffKind::Replaced => ("replaced", escape(&d.source), escape(&d.ocr)),
            DiffKind::Deleted => ("deleted", escape(&d.source), "(deleted)".to_string()),
            DiffKind::Inserted => ("inserted", "(none)".to_string(), escape(&d.ocr)),
        };
        let _ = write!(
            rows,
            r#"<tr class="{}"><td>{}</td><td>{}</td><td>&rarr;</td><td>{}</td></tr>"#,
            class,
            i + 1,
            src,
            ocr
        );
    }
    if diff.differences.len() > MAX_DIFF_ROWS {
        let _ = write!(
            rows,
            r#"<tr><td colspan="4"><em>... and {} more differences</em></td></tr>"#,
            diff.differences.len() - MAX_DIFF_ROWS
        );
    }
    if rows.is_empty() {
        rows.push_str(r#"<tr><td colspan="4">No differences found!</td></tr>"#);
    }

    let stats_html = [
        stat_box(&stats.total_words1.to_string(), "Source Words", ""),
        stat_box(&stats.total_words2.to_string(), "OCR Words", ""),
        stat_box(&stats.equal.to_string(), "Exact Matches", "good"),
        stat_box(&stats.total_errors().to_string(), "Total Errors", "warn"),
        stat_box(
            &format!("{:.1}%", accuracy),
            "Word Accuracy",
            if accuracy >= 80.0 { "good" } else { "warn" },
        ),
    ]
    .join("\n");

    let name = escape(item_name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>OCR Comparison - {name}</title>
<style>{style}</style>
</head>
<body>
<div class="container">
<div class="nav"><a href="{summary}">&larr; Back to Summary</a></div>
<h1>OCR Comparison: {name}</h1>
<div class="panel"><h2>Comparison Mode</h2><p><strong>Options:</strong> {mode}</p></div>
<div class="panel"><h2>Source Image</h2><img src="../images/{image}" alt="{name}" class="image-preview"></div>
<div class="panel"><h2>Statistics</h2><div class="stats">
{stats_html}
</div></div>
<div class="side-by-side">
<div class="panel"><h2>Source Transcription</h2><div class="text">{source}</div></div>
<div class="panel"><h2>OCR Output</h2><div class="text">{ocr}</div></div>
</div>
<div class="panel"><h2>Differences List ({count} items)</h2>
<table><tr><th>#</th><th>Source</th><th></th><th>OCR</th></tr>
{rows}
</table></div>
<div class="nav"><a href="{summary}">&larr; Back to Summary</a></div>
</div>
</body>
</html>
"#,
        name = name,
        style = STYLE,
        summary = SUMMARY_FILE,
        mode = escape(&options.describe()),
        image = escape(image_file),
        stats_html = stats_html,
        source = render_marks(&diff.source_marks, "OCR"),
        ocr = render_marks(&diff.ocr_marks, "Source"),
        count = diff.differences.len(),
        rows = rows,
    )
}

/// Index page over every compared item.
pub fn summary_page(
    items: &[ItemReport<'_>],
    options: &CompareOptions,
    record_url: &str,
    generated_at: &str,
) -> String {
    let mut totals = WordStats::default();
    let mut rows = String::new();
    for item in items {
        totals.add(item.stats);
        let accuracy = item.stats.accuracy();
        let _ = write!(
            rows,
            r#"<tr><td><a href="{}">{}</a></td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class="{}">{:.1}%</td></tr>"#,
            escape(item.comparison_file),
            escape(item.item_name),
            item.stats.total_words1,
            item.stats.total_words2,
            item.stats.equal,
            item.stats.total_errors(),
            accuracy_class(accuracy),
            accuracy
        );
        rows.push('\n');
    }
    let overall = totals.accuracy();

    let stats_html = [
        stat_box(&items.len().to_string(), "Documents Processed", ""),
        stat_box(&totals.total_words1.to_string(), "Total Source Words", ""),
        stat_box(&totals.total_words2.to_string(), "Total OCR Words", ""),
        stat_box(&totals.equal.to_string(), "Exact Matches", "good"),
        stat_box(&totals.total_errors().to_string(), "Total Errors", "warn"),
        stat_box(
            &format!("{:.1}%", overall),
            "Overall Accuracy",
            if overall >= 80.0 { "good" } else { "warn" },
        ),
    ]
    .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<title>OCR Comparison Summary Report</title>
<style>{style}</style>
</head>
<body>
<div class="container">
<h1>OCR Comparison Summary Report</h1>
<div class="panel"><h2>Overall Statistics</h2><div class="stats">
{stats_html}
</div></div>
<div class="panel"><h2>Individual Document Results</h2>
<table>
<tr><th>Document</th><th>Source Words</th><th>OCR Words</th><th>Matches</th><th>Errors</th><th>Accuracy</th></tr>
{rows}</table></div>
<div class="panel"><h2>About This Report</h2>
<p>OCR output compared against community transcriptions from the National Archives Catalog.</p>
<p><strong>Source:</strong> <a href="{record}" target="_blank">{record}</a></p>
<p><strong>Comparison Mode:</strong> {mode}</p>
</div>
<p class="meta">Generated on {generated}</p>
</div>
</body>
</html>
"#,
        style = STYLE,
        stats_html = stats_html,
        rows = rows,
        record = escape(record_url),
        mode = escape(&options.describe()),
        generated = escape(generated_at),
    )
}
