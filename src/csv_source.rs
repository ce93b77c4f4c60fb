//! Offline indicator rows from a World Bank bulk-download CSV.
//!
//! The file starts with a few metadata lines, then a header
//! `Country Name, Country Code, Indicator Name, Indicator Code, 1960, …`
//! and one row per economy with one column per year.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow, ensure};
use csv::ReaderBuilder;
use tracing::info;

use crate::codes::is_economy;
use crate::data::IndicatorRow;
use crate::metrics::SeriesPoint;
use crate::resolver::normalize_iso3;

#[derive(Debug, Clone)]
struct Economy {
    iso3: String,
    name: String,
    values: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct CsvTable {
    pub indicator_code: String,
    pub indicator_name: String,
    years: Vec<i32>,
    economies: Vec<Economy>,
}

impl CsvTable {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
        let table = Self::from_reader(file).with_context(|| format!("Failed to parse CSV file: {:?}", path))?;
        ensure!(!table.is_empty(), "No country rows in CSV file: {:?}", path);
        info!(
            indicator = %table.indicator_code,
            economies = table.len(),
            "Loaded {}",
            path.display()
        );
        Ok(table)
    }

    /// Aggregates (regions, income groups) are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(false).flexible(true).from_reader(reader);
        let mut records = rdr.records();

        let header = loop {
            let record = records.next().ok_or_else(|| anyhow!("No `Country Name` header row found"))??;
            if record.get(0).map(|s| s.trim_start_matches('\u{feff}').trim()) == Some("Country Name") {
                break record;
            }
        };
        let years: Vec<(usize, i32)> = header
            .iter()
            .enumerate()
            .skip(4)
            .filter_map(|(i, h)| Some((i, h.trim().parse().ok()?)))
            .collect();
        if years.is_empty() {
            return Err(anyhow!("Header row has no year columns"));
        }

        let mut indicator_code = String::new();
        let mut indicator_name = String::new();
        let mut economies = Vec::new();
        for result in records {
            let record = result?;
            let Some(iso3) = record.get(1).and_then(normalize_iso3) else { continue };
            if !is_economy(&iso3) {
                continue;
            }
            if indicator_code.is_empty() {
                indicator_name = record.get(2).unwrap_or_default().trim().to_string();
                indicator_code = record.get(3).unwrap_or_default().trim().to_string();
            }
            let values = years
                .iter()
                .map(|&(i, _)| record.get(i).and_then(|v| v.trim().parse::<f64>().ok()).filter(|v| v.is_finite()))
                .collect();
            economies.push(Economy { iso3, name: record.get(0).unwrap_or_default().trim().to_string(), values });
        }

        Ok(Self {
            indicator_code,
            indicator_name,
            years: years.into_iter().map(|(_, y)| y).collect(),
            economies,
        })
    }

    pub fn len(&self) -> usize {
        self.economies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.economies.is_empty()
    }

    fn column(&self, year: i32) -> Option<usize> {
        self.years.iter().position(|&y| y == year)
    }

    /// Most recent year for which any economy has a value.
    pub fn latest_year(&self) -> Option<i32> {
        self.years
            .iter()
            .enumerate()
            .rev()
            .find(|&(i, _)| self.economies.iter().any(|e| e.values[i].is_some()))
            .map(|(_, &y)| y)
    }

    /// Every economy, with `None` where the year is empty or unknown.
    pub fn rows_for_year(&self, year: i32) -> Vec<IndicatorRow> {
        let col = self.column(year);
        self.economies
            .iter()
            .map(|e| IndicatorRow::new(&e.iso3, &e.name, col.and_then(|i| e.values[i])))
            .collect()
    }

    pub fn series(&self, iso3: &str) -> Vec<SeriesPoint> {
        let Some(economy) = self.economies.iter().find(|e| e.iso3 == iso3) else {
            return Vec::new();
        };
        self.years
            .iter()
            .zip(&economy.values)
            .map(|(&year, &value)| SeriesPoint { year, value })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\u{feff}\"Data Source\",\"World Development Indicators\",\n\
\n\
\"Last Updated Date\",\"2024-06-28\",\n\
\n\
\"Country Name\",\"Country Code\",\"Indicator Name\",\"Indicator Code\",\"2020\",\"2021\",\"2022\",\"2023\",\n\
\"France\",\"FRA\",\"GDP (current US$)\",\"NY.GDP.MKTP.CD\",\"2.63e12\",\"2.95e12\",\"2.78e12\",\"\",\n\
\"World\",\"WLD\",\"GDP (current US$)\",\"NY.GDP.MKTP.CD\",\"8.5e13\",\"9.7e13\",\"1.0e14\",\"\",\n\
\"Kenya\",\"KEN\",\"GDP (current US$)\",\"NY.GDP.MKTP.CD\",\"1.0e11\",\"\",\"1.1e11\",\"\",\n";

    #[test]
    fn reads_wide_format_and_skips_aggregates() {
        let table = CsvTable::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(table.indicator_code, "NY.GDP.MKTP.CD");
        assert_eq!(table.len(), 2);
        assert_eq!(table.latest_year(), Some(2022));

        let rows = table.rows_for_year(2021);
        assert_eq!(rows[0].iso3, "FRA");
        assert_eq!(rows[0].value, Some(2.95e12));
        assert_eq!(rows[1].value, None);
        assert!(table.rows_for_year(1999).iter().all(|r| r.value.is_none()));
    }

    #[test]
    fn series_follows_year_columns() {
        let table = CsvTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let s = table.series("KEN");
        assert_eq!(s.len(), 4);
        assert_eq!(s[0], SeriesPoint::new(2020, 1.0e11));
        assert_eq!(s[1].value, None);
        assert!(table.series("WLD").is_empty());
    }

    #[test]
    fn load_rejects_file_with_only_aggregates() {
        let path = std::env::temp_dir().join(format!("stratify-aggregates-{}.csv", std::process::id()));
        let only_world = SAMPLE.lines().filter(|l| !l.contains("FRA") && !l.contains("KEN")).collect::<Vec<_>>().join("\n");
        std::fs::write(&path, only_world).unwrap();
        let err = CsvTable::load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("No country rows"));
    }

    #[test]
    fn missing_header_is_error() {
        assert!(CsvTable::from_reader("a,b,c\n1,2,3\n".as_bytes()).is_err());
    }
}
