//! Downloader / Reducer (§4.2): turns a sidecar index plus a set of wanted
//! (short_name, level) pairs into the minimal set of byte ranges to fetch
//! from the source GRIB2 file, then fetches and concatenates them.

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tracing::warn;

use crate::error::{IngestionError, Result};

const RANGE_RETRIES: u32 = 3;
const RANGE_RETRY_DELAY_MS: u64 = 500;

/// A `SourceField` selector as the reducer needs it: the index record's
/// short-name and level text, verbatim as the producer writes them.
#[derive(Debug, Clone)]
pub struct FieldSelector {
    pub short_name: String,
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteRange {
    start: u64,
    end: u64,
}

/// Parse the newline-delimited, colon-separated index
/// (`N:offset:date:short_name:level:forecast_hint:extra`) and compute the
/// byte ranges covering the selected fields.
///
/// Consecutive selected records sharing the same offset (a known producer
/// quirk for U/V pairs emitted under one byte range) are coalesced into a
/// single range rather than fetched twice.
pub(crate) fn ranges_for_selection(index_text: &str, selected: &[FieldSelector]) -> Vec<ByteRange> {
    let records: Vec<(u64, &str, &str)> = index_text
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(6, ':');
            let _n = fields.next()?;
            let offset: u64 = fields.next()?.parse().ok()?;
            let _date = fields.next()?;
            let short_name = fields.next()?;
            let level = fields.next()?;
            Some((offset, short_name, level))
        })
        .collect();

    let mut selected_offsets: Vec<u64> = records
        .iter()
        .filter(|(_, short_name, level)| {
            selected
                .iter()
                .any(|s| s.short_name == *short_name && s.level == *level)
        })
        .map(|(offset, _, _)| *offset)
        .collect();
    selected_offsets.sort_unstable();
    selected_offsets.dedup();

    let mut ranges = Vec::new();
    for &offset in &selected_offsets {
        // The end of this message's range is the offset of the next record
        // in the full index after this offset (not just among selected
        // records) — the reducer needs the true message boundary.
        let next_offset = records
            .iter()
            .map(|(o, _, _)| *o)
            .filter(|&o| o > offset)
            .min();
        if let Some(next_offset) = next_offset {
            ranges.push(ByteRange { start: offset, end: next_offset });
        }
        // A record with no following offset is the file's last message;
        // without a declared file length we can't bound it, so it's
        // skipped rather than guessed at.
    }
    ranges
}

/// Fetch the index, compute ranges for `selected`, then issue the range GETs
/// and concatenate the results into one scratch buffer holding all selected
/// GRIB2 messages back-to-back.
pub async fn fetch_reduced(
    client: &Client,
    grib_url: &str,
    idx_url: &str,
    selected: &[FieldSelector],
) -> Result<Bytes> {
    let idx_text = client
        .get(idx_url)
        .send()
        .await
        .map_err(|e| IngestionError::IndexFetch(e.to_string()))?
        .error_for_status()
        .map_err(|e| classify_http(idx_url, e))?
        .text()
        .await
        .map_err(|e| IngestionError::IndexFetch(e.to_string()))?;

    let ranges = ranges_for_selection(&idx_text, selected);
    let mut buf = BytesMut::new();

    for range in ranges {
        match fetch_range_with_retry(client, grib_url, range).await {
            Ok(bytes) => buf.extend_from_slice(&bytes),
            Err(e) => warn!(grib_url, start = range.start, end = range.end, error = %e, "skipping unreadable range"),
        }
    }

    Ok(buf.freeze())
}

async fn fetch_range_with_retry(client: &Client, url: &str, range: ByteRange) -> Result<Bytes> {
    let header = format!("bytes={}-{}", range.start, range.end - 1);
    let mut last_err = None;
    for attempt in 0..RANGE_RETRIES {
        match client
            .get(url)
            .header(reqwest::header::RANGE, &header)
            .send()
            .await
        {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => match resp.bytes().await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) => last_err = Some(IngestionError::RangeDownload(e.to_string())),
                },
                Err(e) => last_err = Some(classify_http(url, e)),
            },
            Err(e) => last_err = Some(IngestionError::RangeDownload(e.to_string())),
        }
        if attempt + 1 < RANGE_RETRIES {
            tokio::time::sleep(std::time::Duration::from_millis(RANGE_RETRY_DELAY_MS)).await;
        }
    }
    Err(last_err.unwrap())
}

fn classify_http(url: &str, err: reqwest::Error) -> IngestionError {
    if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
        IngestionError::NotYetPublished(url.to_string())
    } else {
        IngestionError::IndexFetch(format!("{url}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = "\
1:0:d=2024010100:UGRD:10 m above ground:anl:\n\
2:520000:d=2024010100:VGRD:10 m above ground:anl:\n\
3:1040000:d=2024010100:TMP:2 m above ground:anl:\n\
4:1560000:d=2024010100:PRMSL:mean sea level:anl:\n";

    #[test]
    fn selects_matching_records_and_derives_next_offset() {
        let selected = vec![FieldSelector {
            short_name: "TMP".to_string(),
            level: "2 m above ground".to_string(),
        }];
        let ranges = ranges_for_selection(INDEX, &selected);
        assert_eq!(ranges, vec![ByteRange { start: 1_040_000, end: 1_560_000 }]);
    }

    #[test]
    fn coalesces_records_sharing_an_offset() {
        let index = "1:0:d=2024010100:UGRD:10 m above ground:anl:\n2:0:d=2024010100:VGRD:10 m above ground:anl:\n3:200:d=2024010100:TMP:2 m above ground:anl:\n";
        let selected = vec![
            FieldSelector { short_name: "UGRD".to_string(), level: "10 m above ground".to_string() },
            FieldSelector { short_name: "VGRD".to_string(), level: "10 m above ground".to_string() },
        ];
        let ranges = ranges_for_selection(index, &selected);
        assert_eq!(ranges, vec![ByteRange { start: 0, end: 200 }]);
    }

    #[test]
    fn last_record_with_no_following_offset_is_skipped() {
        let selected = vec![FieldSelector {
            short_name: "PRMSL".to_string(),
            level: "mean sea level".to_string(),
        }];
        let ranges = ranges_for_selection(INDEX, &selected);
        assert!(ranges.is_empty());
    }
}
