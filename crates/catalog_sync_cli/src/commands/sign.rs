//! Sign command implementation.

use catalog_sync_protocol::{SharedSecret, SignedHeaders, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde::Serialize;
use std::error::Error;
use std::io::Read;
use std::path::Path;

/// Headers for one signed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutput {
    /// Signing time (unix millis).
    pub timestamp: i64,
    /// Hex signature.
    pub signature: String,
}

/// Runs the sign command.
pub fn run(
    secret: &str,
    body: Option<String>,
    file: Option<&Path>,
    timestamp: Option<i64>,
    format: &str,
) -> Result<(), Box<dyn Error>> {
    let body = match (body, file) {
        (Some(body), _) => body.into_bytes(),
        (None, Some(path)) => std::fs::read(path)?,
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let output = sign_body(secret, &body, timestamp);
    println!("{}", render(&output, format)?);
    Ok(())
}

/// Signs `body` at `timestamp`.
pub fn sign_body(secret: &str, body: &[u8], timestamp: i64) -> SignOutput {
    let headers = SignedHeaders::new(&SharedSecret::from(secret), body, timestamp);
    SignOutput {
        timestamp: headers.timestamp,
        signature: headers.signature,
    }
}

/// Formats the headers as `text` (one `name: value` per line) or `json`.
pub fn render(output: &SignOutput, format: &str) -> Result<String, serde_json::Error> {
    match format {
        "json" => serde_json::to_string_pretty(output),
        _ => Ok(format!(
            "{TIMESTAMP_HEADER}: {}\n{SIGNATURE_HEADER}: {}",
            output.timestamp, output.signature
        )),
    }
}
