//! Downloader/Reducer, Decoder, and Derived-field generation for the
//! ingest pipeline (§4.2-§4.4), plus the ingest task state machine (§4.9)
//! that ties them to the Writer.

pub mod decode;
pub mod derive;
pub mod error;
pub mod metar;
pub mod reducer;
pub mod seeds;
pub mod task;

pub use decode::{decode_all, DecodedMessage};
pub use derive::{wind_from_uv, WindFieldIds};
pub use error::{IngestionError, Result};
pub use metar::{ingest_metar, parse_metar_xml, short_name_for as metar_short_name_for, StationObs};
pub use reducer::{fetch_reduced, FieldSelector};
pub use seeds::{should_ingest_parameter, standard_pressure_levels, target_grib2_parameters, ParameterSpec};
pub use task::{run_task, IngestTask, SourceIngestSpec, TaskOutcome};
