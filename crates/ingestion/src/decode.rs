//! Decoder glue (§4.3): parses the reduced buffer into GRIB2 messages,
//! resolves each message's projection, and unpacks its values.

use grib2_parser::{Grib2Message, Grib2Reader};
use storage::catalog::Catalog;

use crate::error::Result;

/// One decoded message paired with its resolved projection id and unpacked
/// values, ready for the derived-field step and the writer.
pub struct DecodedMessage {
    pub message: Grib2Message,
    pub projection_id: i64,
    pub values: Vec<f32>,
}

/// Decode every message in `buf`, resolving (and creating, on first
/// sighting) each one's Projection via the Catalog.
pub async fn decode_all(catalog: &Catalog, buf: bytes::Bytes) -> Result<Vec<DecodedMessage>> {
    let mut reader = Grib2Reader::new(buf);
    let mut out = Vec::new();

    while let Some(message) = reader.next_message()? {
        let values = message.unpack_data()?;
        let (n_lat, n_lon) = message.grid_dims();
        let points = message.latlon_points();
        let ll_hash = message.ll_hash();

        let lats: Vec<f64> = points.iter().map(|p| p.0).collect();
        let lons: Vec<f64> = points.iter().map(|p| p.1).collect();

        let projection_id = catalog
            .find_or_create_projection(ll_hash as i64, n_lon as i32, n_lat as i32, &lats, &lons)
            .await?;

        out.push(DecodedMessage { message, projection_id, values });
    }

    Ok(out)
}
