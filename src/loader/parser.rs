use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};

use crate::error::{Error, Result};

/// Parses a JSON file into a given type `T`.
///
/// Errors are converted into `crate::error::Error` variants:
/// - `Error::IoError` if the file cannot be read.
/// - `Error::DeserializationError` if the JSON is malformed.
pub fn parse_json_file<T: DeserializeOwned>(file_path: &str) -> Result<T> {
    let data = fs::read_to_string(file_path)?;
    let parsed_data: T = serde_json::from_str(&data)?;

    Ok(parsed_data)
}

/// Reads a peer table: whitespace-separated `id address` token pairs, any number per line.
///
/// A non-integer id, an id without address or an id listed twice aborts loading.
pub fn parse_peer_table<R: BufRead>(reader: R) -> Result<BTreeMap<u32, String>> {
    let mut tokens = Vec::new();
    for line in reader.lines() {
        let line = line?;
        tokens.extend(line.split_whitespace().map(str::to_string));
    }

    let mut table = BTreeMap::new();
    for pair in tokens.chunks(2) {
        let [id, address] = pair else {
            return Err(Error::MalformedPeerTable(format!("id '{}' has no address", pair[0])));
        };

        let id: u32 = id.parse().map_err(|_| Error::MalformedPeerTable(format!("'{}' is not a valid id", id)))?;

        if table.insert(id, address.clone()).is_some() {
            return Err(Error::MalformedPeerTable(format!("id {} is listed twice", id)));
        }
    }

    Ok(table)
}

pub fn load_peer_table(file_path: &str) -> Result<BTreeMap<u32, String>> {
    let file = File::open(file_path)?;
    let table = parse_peer_table(BufReader::new(file))?;

    log::debug!("Loaded {} peers from '{}'", table.len(), file_path);
    Ok(table)
}
