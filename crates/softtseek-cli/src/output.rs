//! TTY-aware output: padded tables for people, JSON for pipes.

use anyhow::Result;
use serde::Serialize;
use std::io::{IsTerminal, Write};
use std::time::Duration;

/// Longest filename or path shown in a table cell.
pub const MAX_CELL: usize = 50;

pub fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Header, dashed separator and rows, each column padded to its widest cell.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .fold(h.chars().count(), usize::max)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut out = vec![
        line(headers.to_vec()),
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "),
    ];
    for row in rows {
        let cells = (0..headers.len())
            .map(|i| row.get(i).map(String::as_str).unwrap_or(""))
            .collect();
        out.push(line(cells));
    }
    out.join("\n")
}

/// Human-readable size: `0 B`, `512 B`, `1.50 KB`, `12.3 MB`, `640 GB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if size >= 100.0 {
        format!("{size:.0} {}", UNITS[unit])
    } else if size >= 10.0 {
        format!("{size:.1} {}", UNITS[unit])
    } else {
        format!("{size:.2} {}", UNITS[unit])
    }
}

/// `3m 42s` style; `-` for zero.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64().round() as u64;
    if secs == 0 {
        return "-".to_string();
    }

    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Cut `s` to [`MAX_CELL`] characters, ending in `...` when shortened.
pub fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_CELL {
        return s.to_string();
    }
    let kept: String = s.chars().take(MAX_CELL - 3).collect();
    format!("{kept}...")
}

/// One JSON object per line.
pub fn print_ndjson<T: Serialize>(items: &[T]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for item in items {
        serde_json::to_writer(&mut out, item)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

/// Pretty JSON when asked for or when stdout is not a terminal, else a table.
pub fn print_output<T: Serialize>(
    data: &T,
    headers: &[&str],
    rows: &[Vec<String>],
    json: bool,
) -> Result<()> {
    if json || !is_tty() {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        println!("{}", format_table(headers, rows));
    }
    Ok(())
}
