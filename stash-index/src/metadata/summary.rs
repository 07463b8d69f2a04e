//! Human-readable manifest report.

use super::MetadataDocument;
use crate::utils::format::{format_bytes, format_duration};
use std::collections::HashMap;

/// Per-category totals derived from the file list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryTotals {
    pub name: String,
    pub files: usize,
    pub size: u64,
}

/// Group non-directory entries by the first component of their backup path,
/// largest category first. Ties are ordered by name.
pub fn category_totals(document: &MetadataDocument) -> Vec<CategoryTotals> {
    let mut by_name: HashMap<String, CategoryTotals> = HashMap::new();

    for file in document.files.iter().filter(|f| !f.is_dir) {
        let name = file.category();
        let totals = by_name.entry(name.clone()).or_insert_with(|| CategoryTotals {
            name,
            files: 0,
            size: 0,
        });
        totals.files += 1;
        totals.size += file.size;
    }

    let mut totals: Vec<CategoryTotals> = by_name.into_values().collect();
    totals.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name)));
    totals
}

pub fn render(document: &MetadataDocument) -> String {
    let mut lines = Vec::new();

    lines.push("Backup Summary".to_string());
    lines.push("==============".to_string());
    lines.push(format!(
        "Created:  {}",
        document.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    lines.push(format!("Host:     {}", document.hostname));
    lines.push(format!("User:     {}", document.username));

    let backup_type = if document.is_incremental() && !document.base_backup.is_empty() {
        format!("incremental (base: {})", document.base_backup)
    } else {
        document.effective_backup_type().to_string()
    };
    lines.push(format!("Type:     {}", backup_type));
    if document.changed_files_only {
        lines.push("Scope:    changed files only".to_string());
    }

    lines.push(String::new());
    lines.push(format!("Files:        {}", document.file_count()));
    lines.push(format!("Directories:  {}", document.dir_count()));
    lines.push(format!("Total size:   {}", format_bytes(document.backup_size)));
    if document.compressed_size > 0 {
        lines.push(format!(
            "Compressed:   {} ({:.1}% saved)",
            format_bytes(document.compressed_size),
            document.compression_ratio()
        ));
    }
    if document.encrypted_size > 0 {
        lines.push(format!(
            "Encrypted:    {}",
            format_bytes(document.encrypted_size)
        ));
    }
    if !document.total_duration.is_zero() {
        lines.push(format!(
            "Duration:     {}",
            format_duration(document.total_duration)
        ));
    }

    let totals = category_totals(document);
    if !totals.is_empty() {
        lines.push(String::new());
        lines.push("Categories:".to_string());
        for category in &totals {
            let timing = document
                .categories
                .get(&category.name)
                .map(|t| format!(", {}", format_duration(t.duration)))
                .unwrap_or_default();
            lines.push(format!(
                "  {:<16} {:>6} files  {:>12}{}",
                category.name,
                category.files,
                format_bytes(category.size),
                timing
            ));
        }
    }

    if !document.package_counts.is_empty() {
        lines.push(String::new());
        lines.push("Packages:".to_string());
        for (manager, count) in &document.package_counts {
            lines.push(format!("  {:<16} {:>6}", manager, count));
        }
    }

    lines.join("\n")
}
