//! TDF3 manifest (`0.manifest.json`)
//!
//! The archive layer treats the manifest as an opaque JSON blob. These types
//! give callers a typed view for building one and for reading it back.

use crate::crypto::{IV_SIZE, TAG_SIZE};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Plaintext bytes per segment in a new manifest
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;

/// The segment table's encrypted sizes do not fit in a u64 total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("encrypted segment sizes overflow a 64-bit total")]
pub struct SegmentSizeOverflow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdfManifest {
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
    #[serde(rename = "schemaVersion", skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// Reference from the manifest to the payload entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "tdf_spec_version", skip_serializing_if = "Option::is_none")]
    pub tdf_spec_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub alg: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    pub protocol: String,
    #[serde(rename = "wrappedKey")]
    pub wrapped_key: String,
    #[serde(rename = "policyBinding")]
    pub policy_binding: PolicyBinding,
    #[serde(rename = "encryptedMetadata", skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
}

impl KeyAccess {
    /// Creates a wrapped-key access object for the given KAS
    pub fn new(url: String) -> Self {
        KeyAccess {
            access_type: "wrapped".to_string(),
            url,
            kid: None,
            protocol: "kas".to_string(),
            wrapped_key: String::new(),
            policy_binding: PolicyBinding {
                alg: "HS256".to_string(),
                hash: String::new(),
            },
            encrypted_metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionMethod {
    pub algorithm: String,
    #[serde(rename = "isStreamable")]
    pub is_streamable: bool,
    pub iv: String,
}

impl EncryptionMethod {
    /// Decodes the base64 IV
    pub fn iv_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.iv)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    #[serde(rename = "segmentHashAlg")]
    pub segment_hash_alg: String,
    pub segments: Vec<Segment>,
    #[serde(rename = "segmentSizeDefault")]
    pub segment_size_default: u64,
    #[serde(rename = "encryptedSegmentSizeDefault")]
    pub encrypted_segment_size_default: u64,
}

impl IntegrityInformation {
    /// Payload length implied by the segment table
    ///
    /// `Ok(None)` unless every segment records its encrypted size.
    pub fn encrypted_payload_size(&self) -> Result<Option<u64>, SegmentSizeOverflow> {
        if self.segments.is_empty() {
            return Ok(None);
        }
        let mut total = 0u64;
        for segment in &self.segments {
            let Some(size) = segment.encrypted_segment_size else {
                return Ok(None);
            };
            total = total.checked_add(size).ok_or(SegmentSizeOverflow)?;
        }
        Ok(Some(total))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub hash: String,
    #[serde(rename = "segmentSize", skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u64>,
    #[serde(
        rename = "encryptedSegmentSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_segment_size: Option<u64>,
}

impl TdfManifest {
    /// Creates a manifest pointing at `payload_url` with one key access object
    pub fn new(payload_url: String, kas_url: String) -> Self {
        TdfManifest {
            payload: Payload {
                payload_type: "reference".to_string(),
                url: payload_url,
                protocol: "zip".to_string(),
                is_encrypted: true,
                mime_type: Some("application/octet-stream".to_string()),
                tdf_spec_version: Some("3.0.0".to_string()),
            },
            encryption_information: EncryptionInformation {
                encryption_type: "split".to_string(),
                key_access: vec![KeyAccess::new(kas_url)],
                method: EncryptionMethod {
                    algorithm: "AES-256-GCM".to_string(),
                    is_streamable: true,
                    iv: String::new(),
                },
                integrity_information: IntegrityInformation {
                    root_signature: RootSignature {
                        alg: "HS256".to_string(),
                        sig: String::new(),
                    },
                    segment_hash_alg: "GMAC".to_string(),
                    segments: Vec::new(),
                    segment_size_default: DEFAULT_SEGMENT_SIZE,
                    // Each segment carries its IV and GCM tag
                    encrypted_segment_size_default: DEFAULT_SEGMENT_SIZE
                        + (IV_SIZE + TAG_SIZE) as u64,
                },
                policy: String::new(),
            },
            schema_version: Some("3.0.0".to_string()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Stores a policy string base64-encoded
    pub fn set_policy_raw(&mut self, policy: &str) {
        self.encryption_information.policy = BASE64.encode(policy);
    }

    /// Decodes the policy back to a string
    pub fn get_policy_raw(&self) -> Result<String, base64::DecodeError> {
        let bytes = BASE64.decode(&self.encryption_information.policy)?;
        String::from_utf8(bytes)
            .map_err(|err| base64::DecodeError::InvalidByte(err.utf8_error().valid_up_to(), 0))
    }

    pub fn add_segment(
        &mut self,
        hash: String,
        segment_size: Option<u64>,
        encrypted_segment_size: Option<u64>,
    ) {
        self.encryption_information
            .integrity_information
            .segments
            .push(Segment {
                hash,
                segment_size,
                encrypted_segment_size,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_serialization() -> Result<(), serde_json::Error> {
        let manifest = TdfManifest::new(
            "0.payload".to_string(),
            "http://kas.example.com".to_string(),
        );
        let json = manifest.to_json()?;
        assert!(json.contains("\"url\":\"0.payload\""));
        assert!(json.contains("\"encryptionInformation\""));
        assert!(json.contains("\"isStreamable\":true"));

        let back = TdfManifest::from_json(&json)?;
        assert_eq!(back.payload.url, "0.payload");
        assert_eq!(
            back.encryption_information.key_access[0].url,
            "http://kas.example.com"
        );
        Ok(())
    }

    #[test]
    fn test_manifest_deserialization() -> Result<(), serde_json::Error> {
        let json = r#"{
            "payload": {
                "type": "reference",
                "url": "0.payload",
                "protocol": "zip",
                "isEncrypted": true
            },
            "encryptionInformation": {
                "type": "split",
                "keyAccess": [{
                    "type": "wrapped",
                    "url": "https://kas.example.com",
                    "protocol": "kas",
                    "wrappedKey": "d3JhcHBlZA==",
                    "policyBinding": {"alg": "HS256", "hash": "aGFzaA=="}
                }],
                "method": {"algorithm": "AES-256-GCM", "isStreamable": true, "iv": "AAECAwQFBgcICQoLDA0ODw=="},
                "integrityInformation": {
                    "rootSignature": {"alg": "HS256", "sig": ""},
                    "segmentHashAlg": "GMAC",
                    "segments": [
                        {"hash": "a", "segmentSize": 10, "encryptedSegmentSize": 38},
                        {"hash": "b", "segmentSize": 4, "encryptedSegmentSize": 32}
                    ],
                    "segmentSizeDefault": 10,
                    "encryptedSegmentSizeDefault": 38
                },
                "policy": "e30="
            }
        }"#;

        let manifest = TdfManifest::from_json(json)?;
        assert!(manifest.schema_version.is_none());
        assert!(manifest.payload.mime_type.is_none());
        assert_eq!(
            manifest.encryption_information.method.iv_bytes().unwrap(),
            (0u8..16).collect::<Vec<_>>()
        );
        assert_eq!(
            manifest
                .encryption_information
                .integrity_information
                .encrypted_payload_size(),
            Ok(Some(70))
        );
        assert_eq!(manifest.get_policy_raw().unwrap(), "{}");
        Ok(())
    }

    #[test]
    fn test_segment_size_requires_every_segment() {
        let mut manifest = TdfManifest::new("0.payload".to_string(), "kas".to_string());
        let integrity = |m: &TdfManifest| {
            m.encryption_information
                .integrity_information
                .encrypted_payload_size()
        };
        assert_eq!(integrity(&manifest), Ok(None));

        manifest.add_segment("a".to_string(), Some(4), Some(32));
        assert_eq!(integrity(&manifest), Ok(Some(32)));

        manifest.add_segment("b".to_string(), Some(4), None);
        assert_eq!(integrity(&manifest), Ok(None));
    }

    #[test]
    fn test_segment_size_total_overflow() {
        let mut manifest = TdfManifest::new("0.payload".to_string(), "kas".to_string());
        manifest.add_segment("a".to_string(), None, Some(u64::MAX));
        manifest.add_segment("b".to_string(), None, Some(2));
        assert_eq!(
            manifest
                .encryption_information
                .integrity_information
                .encrypted_payload_size(),
            Err(SegmentSizeOverflow)
        );
    }

    #[test]
    fn test_default_segment_size_matches_cipher() {
        let manifest = TdfManifest::new("0.payload".to_string(), "kas".to_string());
        let integrity = &manifest.encryption_information.integrity_information;

        let cipher = crate::crypto::PayloadCipher::new(&[1u8; crate::crypto::KEY_SIZE]).unwrap();
        let plaintext = vec![0u8; integrity.segment_size_default as usize];
        let segment = cipher.encrypt_segment(&plaintext).unwrap();
        assert_eq!(
            segment.len() as u64,
            integrity.encrypted_segment_size_default
        );
    }

    #[test]
    fn test_policy_raw_encoding() {
        let mut manifest = TdfManifest::new("0.payload".to_string(), "kas".to_string());
        manifest.set_policy_raw(r#"{"uuid":"1"}"#);
        assert_eq!(manifest.encryption_information.policy, "eyJ1dWlkIjoiMSJ9");
        assert_eq!(manifest.get_policy_raw().unwrap(), r#"{"uuid":"1"}"#);
    }
}
