//! JSON model loader
//!
//! Models are produced by external editors/persistence as JSON documents
//! in the wire shape of `model::data`.

use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::data::Model;

/// Load a model from a JSON file
pub fn load_model(path: &Path) -> Result<Model, Box<dyn Error>> {
    let file = File::open(path)?;
    let model = read_model(BufReader::new(file))?;
    Ok(model)
}

/// Load a model from any reader producing JSON
pub fn read_model<R: Read>(reader: R) -> Result<Model, Box<dyn Error>> {
    let model: Model = serde_json::from_reader(reader)?;
    Ok(model)
}

/// Parse a model from a JSON string
pub fn parse_model(json: &str) -> Result<Model, Box<dyn Error>> {
    let model: Model = serde_json::from_str(json)?;
    Ok(model)
}
