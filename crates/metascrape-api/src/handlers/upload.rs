//! URL list parsing for uploaded CSV files.

use csv::ReaderBuilder;

/// Extract one URL per record from CSV text: the first field, trimmed, with
/// any leftover surrounding double quotes removed. Blank lines and records
/// with an empty first field are skipped. Order and duplicates are kept.
///
/// Records may have any number of fields; quoted fields may contain commas.
pub fn parse_url_list(text: &str) -> Result<Vec<String>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(first) = record.get(0).map(str::trim) else {
            continue;
        };
        // A quote after leading whitespace is not parsed as quoting.
        let url = first
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(first)
            .trim();
        if !url.is_empty() {
            urls.push(url.to_string());
        }
    }
    Ok(urls)
}
