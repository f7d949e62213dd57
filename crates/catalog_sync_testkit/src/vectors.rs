//! Known-answer vectors for checksums and request signatures.
//!
//! A peer written in another language can check its canonical JSON and
//! HMAC against these before talking to a live replica.

use serde::{Deserialize, Serialize};

/// A checksum vector: domain fields and their expected digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecksumVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Domain fields as JSON (key order is irrelevant).
    pub fields: serde_json::Value,
    /// Canonical rendering that is hashed.
    pub canonical: String,
    /// Expected lowercase hex SHA-256.
    pub expected: String,
}

/// A signature vector: secret, timestamp, signed bytes and expected HMAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Shared secret.
    pub secret: String,
    /// Timestamp in unix milliseconds.
    pub timestamp: i64,
    /// Signed bytes (push body or pull query string).
    pub message: String,
    /// Expected lowercase hex HMAC-SHA256.
    pub expected: String,
}

/// Checksum vectors.
pub fn checksum_vectors() -> Vec<ChecksumVector> {
    vec![
        ChecksumVector {
            id: "empty".into(),
            fields: serde_json::json!({}),
            canonical: "{}".into(),
            expected: "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a".into(),
        },
        ChecksumVector {
            id: "unsorted_keys".into(),
            fields: serde_json::json!({"price": 99.99, "name": "Test Product"}),
            canonical: r#"{"name":"Test Product","price":99.99}"#.into(),
            expected: "c98fedd3329abcf1a5489f67de59a55160c553c6fff5eff7c6664b1fa9b96069".into(),
        },
        ChecksumVector {
            id: "product_defaults".into(),
            fields: serde_json::json!({"name": "Lamp", "price": 25.0, "enabled": true}),
            canonical: r#"{"enabled":true,"name":"Lamp","price":25}"#.into(),
            expected: "ccf6dab9d77e741c513c0e595645003aa5c39d11489aae7c5b1d7b78649f0fb5".into(),
        },
        ChecksumVector {
            id: "integer_price".into(),
            fields: serde_json::json!({"name": "Lamp", "price": 5}),
            canonical: r#"{"name":"Lamp","price":5}"#.into(),
            expected: "8ebd67e8345f947987a4fd1ba8bec7aecf1603c57a20fa77a6eea88c83b68141".into(),
        },
        ChecksumVector {
            id: "integral_float_price".into(),
            fields: serde_json::json!({"name": "Lamp", "price": 5.0}),
            canonical: r#"{"name":"Lamp","price":5}"#.into(),
            expected: "8ebd67e8345f947987a4fd1ba8bec7aecf1603c57a20fa77a6eea88c83b68141".into(),
        },
        ChecksumVector {
            id: "fractional_price".into(),
            fields: serde_json::json!({"name": "Lamp", "price": 5.5}),
            canonical: r#"{"name":"Lamp","price":5.5}"#.into(),
            expected: "263c6f90b1f864ee1be44d34dcbdcbce73487b073ca6b326a2acac64950aee5e".into(),
        },
        ChecksumVector {
            id: "nested".into(),
            fields: serde_json::json!({"tags": ["a", "b"], "dims": {"w": 1, "h": 2}}),
            canonical: r#"{"dims":{"h":2,"w":1},"tags":["a","b"]}"#.into(),
            expected: "767ec51b823844f0907f4168ad3c6f5fb7dcf9c6e3bd2f2ba6b082ab822c3b38".into(),
        },
        ChecksumVector {
            id: "non_ascii".into(),
            fields: serde_json::json!({"name": "Café crème"}),
            canonical: "{\"name\":\"Café crème\"}".into(),
            expected: "bf3f97668512a70a1568ad1729a87fc87f84db671047f7529e0b24cdb76348ff".into(),
        },
    ]
}

/// Signature vectors.
pub fn signature_vectors() -> Vec<SignatureVector> {
    vec![
        SignatureVector {
            id: "push_body".into(),
            secret: "shared-secret".into(),
            timestamp: 1_700_000_000_000,
            message: r#"{"clientRev":0}"#.into(),
            expected: "d18c75e15185dbb5f2494c9ba9ae24083c3836ecded7440fc6ec58f67b25ef1b".into(),
        },
        SignatureVector {
            id: "pull_query".into(),
            secret: "shared-secret".into(),
            timestamp: 1_700_000_000_000,
            message: "sinceRev=0".into(),
            expected: "4808cd6e4497ceddd42802eb3158883760f9479dad492c713f2fa80359dc3fe3".into(),
        },
        SignatureVector {
            id: "pull_query_with_limit".into(),
            secret: "shared-secret".into(),
            timestamp: 1_709_294_400_000,
            message: "sinceRev=42&limit=100".into(),
            expected: "3320a6eb3da050a76fceb79603d3ccb1e1b7c33c5756bff7c2032144fed26e03".into(),
        },
        SignatureVector {
            id: "empty_message".into(),
            secret: "shared-secret".into(),
            timestamp: 1_709_294_400_000,
            message: String::new(),
            expected: "ed37f5034dfcce31094c845abc7986a097787560b3b8db1649d90d210020e9ed".into(),
        },
    ]
}
