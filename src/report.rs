//! Status report rendering for `cidx status`.
//!
//! Reads the stored state of one project and prints either a table on
//! stdout or the [`ProjectReport`] as pretty JSON.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::status::{project_report, FileReport, ProjectReport};
use crate::store::SqliteStore;

/// Run the status command for `project_id`.
pub async fn run_status(config: &Config, project_id: &str, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let report = project_report(&store, project_id).await;
    pool.close().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

/// Render `report` as the human-readable table.
pub fn render(report: &ProjectReport) -> String {
    let p = &report.project;
    let mut out = String::new();

    out.push_str(&format!("Project {} ({})\n", p.name, p.id));
    out.push_str(&format!("  Root:     {}\n", p.root_path));
    out.push_str(&format!("  Status:   {}\n", p.status));
    out.push_str(&format!(
        "  Context:  {}\n",
        p.context_id.as_deref().unwrap_or("none")
    ));
    out.push_str(&format!(
        "  Files:    {} uploaded, {} pending, {} failed\n",
        report.file_counts.uploaded, report.file_counts.pending, report.file_counts.failed
    ));
    out.push_str(&format!(
        "  Chunks:   {} / {} uploaded, {} failed\n",
        report.uploaded_chunks, report.total_chunks, report.failed_chunks
    ));

    if report.files.is_empty() {
        return out;
    }

    out.push('\n');
    out.push_str(&format!(
        "  {:<48} {:<9} {:>7} {:>6}\n",
        "FILE", "STATUS", "CHUNKS", "DONE"
    ));
    out.push_str(&format!("  {}\n", "-".repeat(73)));
    for f in &report.files {
        out.push_str(&file_line(f));
    }
    out
}

fn file_line(f: &FileReport) -> String {
    let mut line = format!(
        "  {:<48} {:<9} {:>7} {:>5}%\n",
        truncate(&f.relative_path, 48),
        f.status,
        f.chunks,
        f.percent_uploaded
    );
    if let Some(err) = &f.first_error {
        line.push_str(&format!("      error: {}\n", truncate(err, 100)));
    }
    line
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{keep}...")
}
