// vigil/src/output.rs
//
// Terminal rendering: comfy-table tables and emoji status lines.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde::Serialize;

pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.to_vec());
    table
}

pub fn print_table(table: &Table, empty: &str) {
    if table.row_count() == 0 {
        println!("   {}", empty);
    } else {
        println!("{}", table);
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn success(msg: impl Display) {
    println!("✅ {}", msg);
}

pub fn warning(msg: impl Display) {
    println!("⚠️  {}", msg);
}

pub fn info(msg: impl Display) {
    println!("ℹ️  {}", msg);
}

pub fn kv(key: &str, value: impl Display) {
    println!("   {:<22} {}", format!("{}:", key), value);
}

pub fn ratio(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

pub fn when(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn maybe<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_is_a_percentage() {
        assert_eq!(ratio(0.5), "50.0%");
        assert_eq!(ratio(1.0), "100.0%");
    }

    #[test]
    fn test_maybe_renders_dash() {
        assert_eq!(maybe::<u32>(None), "-");
        assert_eq!(maybe(Some(3)), "3");
    }
}
