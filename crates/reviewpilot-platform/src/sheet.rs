//! Client import from a CSV export of a Google Sheet.
//!
//! Expected columns (any order, case-insensitive):
//! `slug, business_name, package, owner_email, owner_password`.

use reviewpilot_core::error::{ReviewPilotError, Result};
use reviewpilot_core::types::Package;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::db::PlatformDb;
use crate::tenant::{NewClient, onboard_client};

const COLUMNS: [&str; 5] = ["slug", "business_name", "package", "owner_email", "owner_password"];

/// A row that could not be imported.
#[derive(Debug, Clone, Error, Serialize)]
#[error("line {line}: {message}")]
pub struct RowError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub dry_run: bool,
    pub rows: usize,
    pub valid: usize,
    pub created: Vec<String>,
    pub skipped_existing: Vec<String>,
    pub errors: Vec<RowError>,
}

/// Turn a Sheets share/edit link into its CSV export URL. Other URLs pass
/// through unchanged.
pub fn sheet_csv_url(url: &str) -> String {
    const MARKER: &str = "docs.google.com/spreadsheets/d/";
    let Some(start) = url.find(MARKER).map(|i| i + MARKER.len()) else {
        return url.to_string();
    };
    if url.contains("/export?") {
        return url.to_string();
    }
    let id: String = url[start..].chars().take_while(|c| *c != '/' && *c != '?' && *c != '#').collect();
    let gid = url
        .split(['?', '#', '&'])
        .find_map(|part| part.strip_prefix("gid="))
        .map(|g| format!("&gid={g}"))
        .unwrap_or_default();
    format!("https://docs.google.com/spreadsheets/d/{id}/export?format=csv{gid}")
}

/// Read CSV text from a local path or an `http(s)` URL.
pub async fn read_source(source: &str) -> Result<String> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let url = sheet_csv_url(source);
        tracing::info!("downloading sheet from {url}");
        let resp = reqwest::get(&url)
            .await
            .map_err(|e| ReviewPilotError::google(format!("sheet download failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReviewPilotError::google(format!("sheet download failed: HTTP {status}")));
        }
        resp.text()
            .await
            .map_err(|e| ReviewPilotError::google(format!("sheet download failed: {e}")))
    } else {
        Ok(std::fs::read_to_string(source)?)
    }
}

/// Parse and validate every row. A missing column fails the whole sheet; a
/// bad row is reported and skipped.
pub fn parse_clients(csv_text: &str) -> Result<(Vec<(u64, NewClient)>, Vec<RowError>)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ReviewPilotError::validation(format!("unreadable header row: {e}")))?;
    let index: HashMap<String, usize> =
        headers.iter().enumerate().map(|(i, h)| (h.to_ascii_lowercase(), i)).collect();
    let mut positions = [0usize; 5];
    for (slot, col) in positions.iter_mut().zip(COLUMNS) {
        *slot = *index
            .get(col)
            .ok_or_else(|| ReviewPilotError::validation(format!("missing column '{col}'")))?;
    }

    let mut valid = Vec::new();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                errors.push(RowError { line, message: e.to_string() });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        if record.iter().all(str::is_empty) {
            continue;
        }
        let field = |i: usize| record.get(positions[i]).unwrap_or("").to_string();

        let parsed = field(2)
            .parse::<Package>()
            .and_then(|package| {
                NewClient {
                    slug: field(0),
                    business_name: field(1),
                    package,
                    owner_email: field(3),
                    owner_password: field(4),
                }
                .validated()
            });
        match parsed {
            Ok(client) if !seen.insert(client.slug.clone()) => errors.push(RowError {
                line,
                message: format!("duplicate slug '{}' in sheet", client.slug),
            }),
            Ok(client) => valid.push((line, client)),
            Err(e) => errors.push(RowError { line, message: e.to_string() }),
        }
    }
    Ok((valid, errors))
}

/// Validate the sheet and, unless `dry_run`, create each new client.
pub fn import_clients(
    db: &PlatformDb,
    csv_text: &str,
    dry_run: bool,
    bcrypt_cost: u32,
    actor_id: &str,
) -> Result<ImportReport> {
    let (clients, mut errors) = parse_clients(csv_text)?;
    let mut report = ImportReport {
        dry_run,
        rows: clients.len() + errors.len(),
        valid: clients.len(),
        ..Default::default()
    };

    for (line, client) in clients {
        if db.get_tenant_by_slug(&client.slug)?.is_some() {
            report.skipped_existing.push(client.slug);
            continue;
        }
        if dry_run {
            continue;
        }
        let slug = client.slug.clone();
        match onboard_client(db, client, bcrypt_cost, actor_id) {
            Ok(_) => report.created.push(slug),
            Err(e @ ReviewPilotError::Conflict(_)) => errors.push(RowError { line, message: e.to_string() }),
            Err(e) => return Err(e),
        }
    }
    errors.sort_by_key(|e| e.line);
    report.errors = errors;
    tracing::info!(
        created = report.created.len(),
        skipped = report.skipped_existing.len(),
        errors = report.errors.len(),
        dry_run,
        "sheet import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_db;

    const SHEET: &str = "\
Slug,Business_Name,Package,Owner_Email,Owner_Password
blue-door, Blue Door Cafe ,pro,owner@bluedoor.com,correct-horse
Bad Slug,Nope,basic,x@y.z,long-enough-pw
green-leaf,Green Leaf,gold,gl@leaf.com,long-enough-pw

red-fox,Red Fox,Basic,fox@red.com,long-enough-pw
blue-door,Again,pro,again@bluedoor.com,correct-horse
";

    #[test]
    fn test_sheet_csv_url() {
        assert_eq!(
            sheet_csv_url("https://docs.google.com/spreadsheets/d/abc123/edit#gid=42"),
            "https://docs.google.com/spreadsheets/d/abc123/export?format=csv&gid=42"
        );
        assert_eq!(
            sheet_csv_url("https://docs.google.com/spreadsheets/d/abc123/edit?usp=sharing"),
            "https://docs.google.com/spreadsheets/d/abc123/export?format=csv"
        );
        assert_eq!(sheet_csv_url("https://example.com/clients.csv"), "https://example.com/clients.csv");
    }

    #[test]
    fn test_parse_reports_bad_rows_with_lines() {
        let (valid, errors) = parse_clients(SHEET).unwrap();
        let slugs: Vec<_> = valid.iter().map(|(_, c)| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["blue-door", "red-fox"]);
        assert_eq!(valid[0].1.business_name, "Blue Door Cafe");

        let lines: Vec<_> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![3, 4, 7]);
        assert!(errors[1].message.contains("gold"));
        assert!(errors[2].message.contains("duplicate slug"));
    }

    #[test]
    fn test_missing_column_fails_whole_sheet() {
        let err = parse_clients("slug,business_name\nx,y\n").unwrap_err();
        assert!(err.to_string().contains("package"));
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let db = temp_db();
        let report = import_clients(&db, SHEET, true, 4, "cli").unwrap();
        assert!(report.dry_run);
        assert_eq!(report.valid, 2);
        assert_eq!(report.rows, 5);
        assert!(report.created.is_empty());
        assert!(db.list_tenants().unwrap().is_empty());
    }

    #[test]
    fn test_import_skips_existing() {
        let db = temp_db();
        let first = import_clients(&db, SHEET, false, 4, "cli").unwrap();
        assert_eq!(first.created, vec!["blue-door", "red-fox"]);
        assert_eq!(db.list_tenants().unwrap().len(), 2);

        let second = import_clients(&db, SHEET, false, 4, "cli").unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped_existing, vec!["blue-door", "red-fox"]);
    }
}
