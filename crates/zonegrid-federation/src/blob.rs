//! Build-plan blob codec.
//!
//! A build plan is one weighted candidate (`{weight, host, blob, zone}`)
//! sealed with AES-256-GCM under a zone-wide shared secret. The wire form
//! is hex text:
//!
//! ```text
//! version (1 byte) || nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! The key is the SHA-256 digest of the configured secret. Tampered or
//! foreign blobs fail authentication instead of decoding to garbage.

use std::fmt;

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use tracing::debug;

use zonegrid_placement::{WeightedHost, WeightedHostRecord};

use crate::error::BlobError;

const VERSION: u8 = 1;
const TAG_LEN: usize = 16;
const AAD: &[u8] = b"zonegrid-build-plan-v1";

/// Topic assigned to hosts recovered from a plan.
const PLAN_TOPIC: &str = "compute";

/// Seals and opens build plans with the shared zone secret.
pub struct BuildPlanCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl fmt::Debug for BuildPlanCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildPlanCodec").finish_non_exhaustive()
    }
}

impl BuildPlanCodec {
    /// Derive the sealing key from the configured secret.
    pub fn new(secret: &str) -> Result<Self, BlobError> {
        let digest = Sha256::digest(secret.as_bytes());
        let unbound =
            UnboundKey::new(&AES_256_GCM, digest.as_slice()).map_err(|_| BlobError::InvalidKey)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Seal a weighted host into a hex blob.
    pub fn encode(&self, host: &WeightedHost) -> Result<String, BlobError> {
        let mut in_out = serde_json::to_vec(&host.to_record())?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| BlobError::Encrypt)?;
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(AAD),
                &mut in_out,
            )
            .map_err(|_| BlobError::Encrypt)?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        out.push(VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(hex::encode(out))
    }

    /// Open a blob back into a weighted host.
    ///
    /// A local plan comes back with a [`HostState::stub`] carrying only the
    /// host name; a remote plan keeps its zone and inner blob.
    pub fn decode(&self, blob: &str) -> Result<WeightedHost, BlobError> {
        let raw = hex::decode(blob.trim())?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(BlobError::Truncated(raw.len()));
        }
        if raw[0] != VERSION {
            return Err(BlobError::UnsupportedVersion(raw[0]));
        }

        let nonce = Nonce::try_assume_unique_for_key(&raw[1..1 + NONCE_LEN])
            .map_err(|_| BlobError::Decrypt)?;
        let mut in_out = raw[1 + NONCE_LEN..].to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::from(AAD), &mut in_out)
            .map_err(|_| BlobError::Decrypt)?;

        let record: WeightedHostRecord = serde_json::from_slice(plain)?;
        if record.host.is_none() && record.zone.is_none() {
            return Err(BlobError::EmptyPlan);
        }
        debug!(host = ?record.host, zone = ?record.zone, weight = record.weight, "build plan decoded");

        Ok(WeightedHost::from_record(record, PLAN_TOPIC))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonegrid_placement::HostState;

    fn codec() -> BuildPlanCodec {
        BuildPlanCodec::new("zone-secret").unwrap()
    }

    #[test]
    fn local_plan_round_trips_identity() {
        let mut state = HostState::stub("compute-7", "compute");
        state.free_ram_mb = 4096;
        let plan = WeightedHost::local(12.5, state);

        let decoded = codec().decode(&codec().encode(&plan).unwrap()).unwrap();
        assert_eq!(decoded.weight, 12.5);
        assert_eq!(decoded.host_name(), Some("compute-7"));
        assert!(decoded.zone.is_none());
        // Only identity travels; the stub is not a resource snapshot.
        assert_eq!(decoded.host_state.unwrap().free_ram_mb, 0);
    }

    #[test]
    fn remote_plan_keeps_zone_and_inner_blob() {
        let plan = WeightedHost::remote(3.0, "zone-2".to_string(), "inner".to_string());
        let decoded = codec().decode(&codec().encode(&plan).unwrap()).unwrap();

        assert_eq!(decoded.zone.as_deref(), Some("zone-2"));
        assert_eq!(decoded.blob.as_deref(), Some("inner"));
        assert!(decoded.host_state.is_none());
    }

    #[test]
    fn encoding_is_randomized() {
        let plan = WeightedHost::local(1.0, HostState::stub("h1", "compute"));
        assert_ne!(codec().encode(&plan).unwrap(), codec().encode(&plan).unwrap());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let plan = WeightedHost::local(1.0, HostState::stub("h1", "compute"));
        let blob = codec().encode(&plan).unwrap();

        let other = BuildPlanCodec::new("another-secret").unwrap();
        assert!(matches!(other.decode(&blob), Err(BlobError::Decrypt)));
    }

    #[test]
    fn tampered_blob_fails_authentication() {
        let plan = WeightedHost::local(1.0, HostState::stub("h1", "compute"));
        let mut raw = hex::decode(codec().encode(&plan).unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;

        assert!(matches!(
            codec().decode(&hex::encode(raw)),
            Err(BlobError::Decrypt)
        ));
    }

    #[test]
    fn malformed_blobs_are_errors() {
        let codec = codec();
        assert!(matches!(codec.decode("not hex"), Err(BlobError::Hex(_))));
        assert!(matches!(codec.decode("0102"), Err(BlobError::Truncated(2))));

        let mut raw = vec![9u8];
        raw.extend_from_slice(&[0u8; NONCE_LEN + TAG_LEN]);
        assert!(matches!(
            codec.decode(&hex::encode(raw)),
            Err(BlobError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn plan_without_destination_is_rejected() {
        let plan = WeightedHost {
            weight: 1.0,
            host_state: None,
            blob: None,
            zone: None,
        };
        let codec = codec();
        let blob = codec.encode(&plan).unwrap();
        assert!(matches!(codec.decode(&blob), Err(BlobError::EmptyPlan)));
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", codec());
        assert_eq!(rendered, "BuildPlanCodec { .. }");
    }
}
