/// Site list reader (CSV with `sample_id`, `lat`/`latitude`, `lon`/`longitude`).
use crate::error::SiteListError;
use crate::site::{SampleId, Site};
use std::io::Read;
use std::path::Path;

/// Read sites from a CSV file.
pub fn read_sites(path: &Path) -> Result<Vec<Site>, SiteListError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| SiteListError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
    read_from(reader, &path.display().to_string())
}

/// Read sites from any CSV source (header row required).
pub fn read_sites_from<R: Read>(input: R) -> Result<Vec<Site>, SiteListError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    read_from(reader, "<input>")
}

fn read_from<R: Read>(mut reader: csv::Reader<R>, label: &str) -> Result<Vec<Site>, SiteListError> {
    let headers = reader
        .headers()
        .map_err(|source| SiteListError::ReadFailed {
            path: label.to_string(),
            source,
        })?
        .clone();

    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let id_col = find(&["sample_id"]).ok_or(SiteListError::MissingColumn("sample_id"))?;
    let lat_col = find(&["latitude", "lat"]).ok_or(SiteListError::MissingColumn("latitude"))?;
    let lon_col = find(&["longitude", "lon"]).ok_or(SiteListError::MissingColumn("longitude"))?;

    let mut sites = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        // Header is line 1
        let line = idx + 2;
        let row = row.map_err(|source| SiteListError::ReadFailed {
            path: label.to_string(),
            source,
        })?;

        let raw_id = row.get(id_col).unwrap_or_default();
        if raw_id.is_empty() {
            return Err(SiteListError::InvalidValue {
                row: line,
                field: "sample_id",
                value: String::new(),
            });
        }
        let lat = parse_coord(row.get(lat_col), line, "latitude")?;
        let lon = parse_coord(row.get(lon_col), line, "longitude")?;
        sites.push(Site::new(SampleId::parse(raw_id), lat, lon));
    }

    tracing::info!("Loaded {} site(s) from {}", sites.len(), label);
    Ok(sites)
}

fn parse_coord(raw: Option<&str>, row: usize, field: &'static str) -> Result<f64, SiteListError> {
    let raw = raw.unwrap_or_default();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SiteListError::InvalidValue {
            row,
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_short_headers() {
        let csv = "sample_id,lat,lon\n1,40.7128,-74.0060\nabc,51.5,-0.12\n";
        let sites = read_sites_from(csv.as_bytes()).unwrap();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].id, SampleId::Int(1));
        assert_eq!(sites[1].id, SampleId::Text("abc".to_string()));
        assert!((sites[0].lon + 74.006).abs() < 1e-9);
    }

    #[test]
    fn test_reads_long_headers_any_case() {
        let csv = "Latitude,Longitude,sample_id\n10.5,20.25,7\n";
        let sites = read_sites_from(csv.as_bytes()).unwrap();
        assert_eq!(sites[0].lat, 10.5);
        assert_eq!(sites[0].lon, 20.25);
        assert_eq!(sites[0].id, SampleId::Int(7));
    }

    #[test]
    fn test_missing_column() {
        let csv = "sample_id,lat\n1,2\n";
        let err = read_sites_from(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, SiteListError::MissingColumn("longitude")));
    }

    #[test]
    fn test_invalid_value_reports_row() {
        let csv = "sample_id,lat,lon\n1,2,3\n2,north,3\n";
        match read_sites_from(csv.as_bytes()).unwrap_err() {
            SiteListError::InvalidValue { row, field, value } => {
                assert_eq!(row, 3);
                assert_eq!(field, "latitude");
                assert_eq!(value, "north");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
